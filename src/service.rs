use crate::config::Config;
use crate::dataset::{Dataset, Record};
use crate::error::{AgentError, Result};
use crate::notify::{training_complete_job, NotificationDispatcher};
use crate::orchestrator::{TrainingOrchestrator, TrainingRun};
use crate::predictor::PredictionService;
use crate::router::{TaskRouter, TaskType};
use crate::toolkit::AutoMlToolkit;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub struct AppState {
    pub config: Config,
    pub task_router: TaskRouter,
    pub orchestrator: TrainingOrchestrator,
    pub predictor: PredictionService,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        toolkit: Arc<dyn AutoMlToolkit>,
        dispatcher: Arc<NotificationDispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        let task_router = TaskRouter::new(config.training.class_cardinality_threshold);
        let orchestrator = TrainingOrchestrator::new(
            toolkit.clone(),
            config.training.clone(),
            config.toolkit.clone(),
        );
        let predictor = PredictionService::new(
            toolkit,
            PathBuf::from(&config.training.artifacts_dir),
            config.training.model_name.clone(),
        );
        Self {
            config,
            task_router,
            orchestrator,
            predictor,
            dispatcher,
            cancel,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/train", post(train))
        .route("/predict", post(predict))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "automl-agent",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    /// Inline CSV text of the uploaded dataset.
    pub csv: String,
    pub target: Option<String>,
    pub task: Option<TaskType>,
}

async fn train(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrainRequest>,
) -> Result<Json<TrainingRun>> {
    let run = run_training(&state, request).await?;
    Ok(Json(run))
}

/// Routes, trains, refreshes the prediction cache, and (best-effort) mails
/// the configured client.
pub async fn run_training(state: &AppState, request: TrainRequest) -> Result<TrainingRun> {
    let dataset = Dataset::from_csv_str(&request.csv)?;
    let task = resolve_task(
        &state.task_router,
        &dataset,
        request.target.as_deref(),
        request.task,
    )?;

    let run = state
        .orchestrator
        .run(&dataset, task, request.target.as_deref(), &state.cancel)
        .await?;

    state.predictor.invalidate().await;

    if state.config.notifications_enabled() {
        let job = training_complete_job(&state.config.smtp.client_address);
        // The run already succeeded; a failed notification only logs
        if let Err(e) = state.dispatcher.dispatch(&job).await {
            warn!("⚠️ Completion notification failed: {}", e);
        }
    }

    Ok(run)
}

/// How an upload plus optional target/task choice maps to the task handed
/// to the orchestrator.
pub fn resolve_task(
    router: &TaskRouter,
    dataset: &Dataset,
    target: Option<&str>,
    task: Option<TaskType>,
) -> Result<TaskType> {
    match (target, task) {
        (Some(target), None) => router.route(dataset, Some(target)),
        (Some(target), Some(task)) if task.is_supervised() => {
            dataset.validate_target(target)?;
            Ok(task)
        }
        (Some(_), Some(task)) => Err(AgentError::invalid_dataset(format!(
            "task '{}' does not take a target column",
            task
        ))),
        (None, Some(task)) => router.route_unsupervised(dataset, task),
        (None, None) => Err(AgentError::invalid_dataset(
            "provide a target column or an explicit unsupervised task",
        )),
    }
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<Record>>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let predictions = state.predictor.predict(&records).await?;
    Ok(Json(predictions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_config;
    use crate::notify::test_support::StubTransport;
    use crate::toolkit::{ExperimentHandle, ModelHandle, StepReport};
    use async_trait::async_trait;

    struct EchoToolkit;

    #[async_trait]
    impl AutoMlToolkit for EchoToolkit {
        async fn init_experiment(
            &self,
            _dataset: &Dataset,
            task: TaskType,
            target: Option<&str>,
            _seed: u64,
        ) -> Result<ExperimentHandle> {
            Ok(ExperimentHandle {
                id: "exp".into(),
                task,
                target: target.map(|t| t.to_string()),
            })
        }

        async fn search_best(&self, _experiment: &ExperimentHandle) -> Result<ModelHandle> {
            Ok(ModelHandle {
                id: "m".into(),
                family: "gbm".into(),
            })
        }

        async fn tune(
            &self,
            _experiment: &ExperimentHandle,
            model: &ModelHandle,
        ) -> Result<ModelHandle> {
            Ok(model.clone())
        }

        async fn evaluate(
            &self,
            _experiment: &ExperimentHandle,
            _model: &ModelHandle,
        ) -> Result<StepReport> {
            Ok(StepReport::Report(serde_json::json!({})))
        }

        async fn explain(
            &self,
            _experiment: &ExperimentHandle,
            _model: &ModelHandle,
        ) -> Result<StepReport> {
            Ok(StepReport::Report(serde_json::json!({})))
        }

        async fn persist(&self, _model: &ModelHandle, name: &str) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("/tmp/{}.pkl", name)))
        }

        async fn load(&self, _name: &str) -> Result<ModelHandle> {
            Ok(ModelHandle {
                id: "m".into(),
                family: "gbm".into(),
            })
        }

        async fn predict(
            &self,
            _model: &ModelHandle,
            records: &[Record],
        ) -> Result<Vec<serde_json::Value>> {
            Ok(records.iter().map(|_| serde_json::json!("setosa")).collect())
        }
    }

    fn state_with_tempdir(dir: &std::path::Path) -> Arc<AppState> {
        let mut config = tests_config();
        config.training.artifacts_dir = dir.to_string_lossy().to_string();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(StubTransport::default()),
            "agent@example.com".into(),
        ));
        Arc::new(AppState::new(
            config,
            Arc::new(EchoToolkit),
            dispatcher,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn train_then_predict_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tempdir(dir.path());

        let run = run_training(
            &state,
            TrainRequest {
                csv: "sepal_len,species\n5.1,setosa\n6.3,virginica\n5.8,versicolor\n".into(),
                target: Some("species".into()),
                task: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(run.task, TaskType::Classification);

        let mut record = Record::new();
        record.insert("sepal_len".into(), serde_json::json!(5.0));
        let predictions = state.predictor.predict(&[record]).await.unwrap();
        assert_eq!(predictions, vec![serde_json::json!("setosa")]);
    }

    #[tokio::test]
    async fn resolve_task_covers_all_request_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_tempdir(dir.path());
        let ds = Dataset::from_csv_str("x,y\n1,2\n3,4\n").unwrap();

        // Routed supervised
        assert_eq!(
            resolve_task(&state.task_router, &ds, Some("y"), None).unwrap(),
            TaskType::Classification
        );
        // Explicit supervised choice still validates the target
        assert!(resolve_task(
            &state.task_router,
            &ds,
            Some("missing"),
            Some(TaskType::Regression)
        )
        .is_err());
        // Explicit unsupervised choice
        assert_eq!(
            resolve_task(&state.task_router, &ds, None, Some(TaskType::Clustering)).unwrap(),
            TaskType::Clustering
        );
        // Target plus unsupervised task is contradictory
        assert!(
            resolve_task(&state.task_router, &ds, Some("y"), Some(TaskType::Clustering)).is_err()
        );
        // Neither target nor task
        assert!(resolve_task(&state.task_router, &ds, None, None).is_err());
    }
}
