use crate::dataset::{ColumnType, Dataset};
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
    Regression,
    Clustering,
    AnomalyDetection,
    AssociationRules,
    TopicModeling,
}

impl TaskType {
    pub fn is_supervised(&self) -> bool {
        matches!(self, TaskType::Classification | TaskType::Regression)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
            TaskType::Clustering => "clustering",
            TaskType::AnomalyDetection => "anomaly_detection",
            TaskType::AssociationRules => "association_rules",
            TaskType::TopicModeling => "topic_modeling",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes a dataset plus optional target to the task type handed to the
/// AutoML toolkit.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    class_cardinality_threshold: usize,
}

impl TaskRouter {
    pub fn new(class_cardinality_threshold: usize) -> Self {
        Self {
            class_cardinality_threshold,
        }
    }

    /// Supervised routing. A text target is classification regardless of
    /// cardinality; a numeric target is classification only at or below the
    /// cardinality threshold, otherwise regression. Without a target the
    /// caller must pick an unsupervised task explicitly via
    /// [`TaskRouter::route_unsupervised`].
    pub fn route(&self, dataset: &Dataset, target: Option<&str>) -> Result<TaskType> {
        let target = target.ok_or_else(|| {
            AgentError::invalid_dataset(
                "No target column supplied; choose an unsupervised task explicitly",
            )
        })?;

        let column = dataset.validate_target(target)?;

        let task = match column.dtype {
            ColumnType::Text => TaskType::Classification,
            ColumnType::Numeric => {
                if column.distinct_count() <= self.class_cardinality_threshold {
                    TaskType::Classification
                } else {
                    TaskType::Regression
                }
            }
        };

        tracing::info!(
            "Routed target '{}' ({:?}, {} distinct) to {}",
            target,
            column.dtype,
            column.distinct_count(),
            task
        );
        Ok(task)
    }

    /// Validates an explicitly chosen unsupervised task against the dataset.
    pub fn route_unsupervised(&self, dataset: &Dataset, task: TaskType) -> Result<TaskType> {
        if task.is_supervised() {
            return Err(AgentError::invalid_dataset(format!(
                "Task '{}' requires a target column",
                task
            )));
        }
        if dataset.n_rows() == 0 {
            return Err(AgentError::invalid_dataset("Dataset has zero rows"));
        }
        Ok(task)
    }
}
