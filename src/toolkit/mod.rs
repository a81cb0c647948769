//! AutoML toolkit contract.
//!
//! Model search, tuning, evaluation, explanation and prediction are all
//! delegated to an external toolkit; this crate only sequences the calls.
//! The HTTP client in [`http_client`] talks to a sidecar toolkit service.

use crate::dataset::{Dataset, Record};
use crate::error::Result;
use crate::router::TaskType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod http_client;

pub use http_client::HttpToolkitClient;

/// Experiment context scoped to one task type and target. Never shared
/// across concurrent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentHandle {
    pub id: String,
    pub task: TaskType,
    pub target: Option<String>,
}

/// Opaque reference to a toolkit-side model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHandle {
    pub id: String,
    pub family: String,
}

/// Outcome of a best-effort step: a report, or the reason it degraded.
#[derive(Debug, Clone)]
pub enum StepReport {
    Report(serde_json::Value),
    Warning(String),
}

/// Sidecar metadata written next to the persisted artifact. The prediction
/// service validates incoming records against `features`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: String,
    pub model_name: String,
    pub task: TaskType,
    pub target: Option<String>,
    pub features: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

#[async_trait]
pub trait AutoMlToolkit: Send + Sync {
    async fn init_experiment(
        &self,
        dataset: &Dataset,
        task: TaskType,
        target: Option<&str>,
        seed: u64,
    ) -> Result<ExperimentHandle>;

    /// Search the toolkit's candidate model families, returning the best by
    /// its default ranking metric.
    async fn search_best(&self, experiment: &ExperimentHandle) -> Result<ModelHandle>;

    async fn tune(&self, experiment: &ExperimentHandle, model: &ModelHandle)
        -> Result<ModelHandle>;

    async fn evaluate(
        &self,
        experiment: &ExperimentHandle,
        model: &ModelHandle,
    ) -> Result<StepReport>;

    async fn explain(
        &self,
        experiment: &ExperimentHandle,
        model: &ModelHandle,
    ) -> Result<StepReport>;

    /// Persist the model under `name`, overwriting any previous artifact of
    /// that name.
    async fn persist(&self, model: &ModelHandle, name: &str) -> Result<PathBuf>;

    async fn load(&self, name: &str) -> Result<ModelHandle>;

    /// One prediction per record, in input order.
    async fn predict(
        &self,
        model: &ModelHandle,
        records: &[Record],
    ) -> Result<Vec<serde_json::Value>>;
}
