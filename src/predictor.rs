use crate::dataset::Record;
use crate::error::{AgentError, Result};
use crate::orchestrator::manifest_path;
use crate::toolkit::{ArtifactManifest, AutoMlToolkit, ModelHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

struct LoadedModel {
    model: ModelHandle,
    manifest: ArtifactManifest,
}

/// Read path over the persisted artifact. The artifact is loaded lazily,
/// once, under a write lock; concurrent requests then share the immutable
/// loaded handle. A retrain invalidates the cache so the most recently
/// persisted artifact is served.
pub struct PredictionService {
    toolkit: Arc<dyn AutoMlToolkit>,
    artifacts_dir: PathBuf,
    model_name: String,
    loaded: RwLock<Option<Arc<LoadedModel>>>,
}

impl PredictionService {
    pub fn new(toolkit: Arc<dyn AutoMlToolkit>, artifacts_dir: PathBuf, model_name: String) -> Self {
        Self {
            toolkit,
            artifacts_dir,
            model_name,
            loaded: RwLock::new(None),
        }
    }

    /// One prediction per input record, input order preserved. The whole
    /// batch is validated against the training schema before any scoring.
    pub async fn predict(&self, records: &[Record]) -> Result<Vec<serde_json::Value>> {
        let loaded = self.loaded_model().await?;
        validate_records(records, &loaded.manifest)?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let predictions = self.toolkit.predict(&loaded.model, records).await?;
        if predictions.len() != records.len() {
            return Err(AgentError::toolkit(
                "predict",
                format!(
                    "expected {} predictions, got {}",
                    records.len(),
                    predictions.len()
                ),
            ));
        }
        Ok(predictions)
    }

    /// Drops the cached handle so the next request loads the newest artifact.
    pub async fn invalidate(&self) {
        let mut guard = self.loaded.write().await;
        if guard.take().is_some() {
            info!("Prediction cache invalidated after retrain");
        }
    }

    async fn loaded_model(&self) -> Result<Arc<LoadedModel>> {
        if let Some(loaded) = self.loaded.read().await.as_ref() {
            return Ok(loaded.clone());
        }

        let mut guard = self.loaded.write().await;
        // Another request may have loaded while we waited for the lock
        if let Some(loaded) = guard.as_ref() {
            return Ok(loaded.clone());
        }

        let manifest_file = manifest_path(&self.artifacts_dir, &self.model_name);
        let content = tokio::fs::read_to_string(&manifest_file).await.map_err(|_| {
            AgentError::ArtifactNotFound(format!(
                "no trained artifact named '{}'; run training first",
                self.model_name
            ))
        })?;
        let manifest: ArtifactManifest = serde_json::from_str(&content)?;

        let model = self.toolkit.load(&self.model_name).await?;
        info!(
            "Loaded artifact '{}' ({} features, trained {})",
            self.model_name,
            manifest.features.len(),
            manifest.trained_at
        );

        let loaded = Arc::new(LoadedModel { model, manifest });
        *guard = Some(loaded.clone());
        Ok(loaded)
    }
}

fn validate_records(records: &[Record], manifest: &ArtifactManifest) -> Result<()> {
    for (index, record) in records.iter().enumerate() {
        for feature in &manifest.features {
            if !record.contains_key(feature) {
                return Err(AgentError::InvalidInput(format!(
                    "record {} is missing feature '{}'",
                    index, feature
                )));
            }
        }
        for key in record.keys() {
            if !manifest.features.iter().any(|f| f == key) {
                return Err(AgentError::InvalidInput(format!(
                    "record {} has unknown field '{}'",
                    index, key
                )));
            }
        }
    }
    Ok(())
}
