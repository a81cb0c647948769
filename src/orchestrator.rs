use crate::config::{ToolkitConfig, TrainingConfig};
use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::router::TaskType;
use crate::toolkit::{ArtifactManifest, AutoMlToolkit, ModelHandle, StepReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Immutable record of one training run. Terminal once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub task: TaskType,
    pub target: Option<String>,
    pub outcome: RunOutcome,
    pub artifact_name: String,
    pub artifact_path: Option<PathBuf>,
    pub model_family: Option<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Sequences the external toolkit calls for one training run. The toolkit's
/// experiment context is process-global mutable state on the toolkit side,
/// so runs are single-flight: a second invocation while one is active is
/// rejected with [`AgentError::TrainingBusy`].
pub struct TrainingOrchestrator {
    toolkit: Arc<dyn AutoMlToolkit>,
    training: TrainingConfig,
    toolkit_config: ToolkitConfig,
    run_gate: Mutex<()>,
}

impl TrainingOrchestrator {
    pub fn new(
        toolkit: Arc<dyn AutoMlToolkit>,
        training: TrainingConfig,
        toolkit_config: ToolkitConfig,
    ) -> Self {
        Self {
            toolkit,
            training,
            toolkit_config,
            run_gate: Mutex::new(()),
        }
    }

    pub fn artifact_name(&self) -> &str {
        &self.training.model_name
    }

    /// Runs the full sequence: init -> search -> tune -> evaluate -> explain
    /// -> persist. Steps 1-3 are fatal; evaluate/explain failures degrade to
    /// warnings on the run.
    pub async fn run(
        &self,
        dataset: &Dataset,
        task: TaskType,
        target: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TrainingRun> {
        let _guard = self
            .run_gate
            .try_lock()
            .map_err(|_| AgentError::TrainingBusy)?;

        let run_id = Uuid::new_v4().to_string();
        let run_id_short = &run_id[..8];
        let started_at = Utc::now();
        info!(
            "🔄 Run {}: starting {} run (target: {:?}, {} rows)",
            run_id_short,
            task,
            target,
            dataset.n_rows()
        );

        if let Some(target) = target {
            dataset.validate_target(target)?;
        } else if dataset.n_rows() == 0 {
            return Err(AgentError::invalid_dataset("Dataset has zero rows"));
        }

        let mut warnings = Vec::new();
        let result = self
            .execute(&run_id, dataset, task, target, cancel, &mut warnings)
            .await;

        let finished_at = Utc::now();
        match result {
            Ok((model, artifact_path)) => {
                info!(
                    "✅ Run {}: completed, artifact at {}",
                    run_id_short,
                    artifact_path.display()
                );
                Ok(TrainingRun {
                    run_id,
                    task,
                    target: target.map(|t| t.to_string()),
                    outcome: RunOutcome::Succeeded,
                    artifact_name: self.training.model_name.clone(),
                    artifact_path: Some(artifact_path),
                    model_family: Some(model.family),
                    warnings,
                    started_at,
                    finished_at,
                })
            }
            Err(cause) => {
                let failed = TrainingRun {
                    run_id,
                    task,
                    target: target.map(|t| t.to_string()),
                    outcome: RunOutcome::Failed,
                    artifact_name: self.training.model_name.clone(),
                    artifact_path: None,
                    model_family: None,
                    warnings,
                    started_at,
                    finished_at,
                };
                error!(
                    "❌ Run {}: failed after {}s: {}",
                    &failed.run_id[..8],
                    (finished_at - started_at).num_seconds(),
                    cause
                );
                Err(cause)
            }
        }
    }

    async fn execute(
        &self,
        run_id: &str,
        dataset: &Dataset,
        task: TaskType,
        target: Option<&str>,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<(ModelHandle, PathBuf)> {
        let run_id_short = &run_id[..8];

        // 1. Experiment context
        let experiment = self
            .bounded("init_experiment", self.toolkit.init_experiment(
                dataset,
                task,
                target,
                self.toolkit_config.seed,
            ))
            .await
            .map_err(fatal("init_experiment"))?;
        info!("📊 Run {}: experiment {} initialized", run_id_short, experiment.id);
        self.check_cancelled(cancel)?;

        // 2. Model search
        let best = self
            .bounded("search_best", self.toolkit.search_best(&experiment))
            .await
            .map_err(fatal("search_best"))?;
        info!("📊 Run {}: best model family '{}'", run_id_short, best.family);
        self.check_cancelled(cancel)?;

        // 3. Hyperparameter tuning
        let tuned = self
            .bounded("tune", self.toolkit.tune(&experiment, &best))
            .await
            .map_err(fatal("tune"))?;
        info!("📊 Run {}: tuned model {}", run_id_short, tuned.id);
        self.check_cancelled(cancel)?;

        // 4-5. Evaluation and explanation are best-effort
        match self
            .bounded("evaluate", self.toolkit.evaluate(&experiment, &tuned))
            .await
        {
            Ok(StepReport::Report(_)) => {
                info!("📊 Run {}: evaluation complete", run_id_short);
            }
            Ok(StepReport::Warning(message)) | Err(AgentError::Toolkit { message, .. }) => {
                warn!("⚠️ Run {}: evaluation degraded: {}", run_id_short, message);
                warnings.push(format!("evaluation: {}", message));
            }
            Err(e) => {
                warn!("⚠️ Run {}: evaluation failed: {}", run_id_short, e);
                warnings.push(format!("evaluation: {}", e));
            }
        }

        match self
            .bounded("explain", self.toolkit.explain(&experiment, &tuned))
            .await
        {
            Ok(StepReport::Report(_)) => {
                info!("📊 Run {}: explanation complete", run_id_short);
            }
            Ok(StepReport::Warning(message)) | Err(AgentError::Toolkit { message, .. }) => {
                warn!("⚠️ Run {}: explanation degraded: {}", run_id_short, message);
                warnings.push(format!("explanation: {}", message));
            }
            Err(e) => {
                warn!("⚠️ Run {}: explanation failed: {}", run_id_short, e);
                warnings.push(format!("explanation: {}", e));
            }
        }
        self.check_cancelled(cancel)?;

        // 6. Persist, overwriting any prior artifact of this name
        let artifact_path = self
            .bounded(
                "persist",
                self.toolkit.persist(&tuned, &self.training.model_name),
            )
            .await
            .map_err(fatal("persist"))?;

        // The artifact already exists on the toolkit side; a failed sidecar
        // write must not fail the run
        if let Err(e) = self.write_manifest(run_id, dataset, task, target).await {
            warn!(
                "⚠️ Run {}: schema manifest not written: {}",
                run_id_short, e
            );
            warnings.push(format!("manifest: {}", e));
        }

        Ok((tuned, artifact_path))
    }

    async fn write_manifest(
        &self,
        run_id: &str,
        dataset: &Dataset,
        task: TaskType,
        target: Option<&str>,
    ) -> Result<()> {
        let manifest = ArtifactManifest {
            run_id: run_id.to_string(),
            model_name: self.training.model_name.clone(),
            task,
            target: target.map(|t| t.to_string()),
            features: dataset.feature_names(target),
            trained_at: Utc::now(),
        };
        let path = manifest_path(
            Path::new(&self.training.artifacts_dir),
            &self.training.model_name,
        );
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&manifest)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_secs(self.toolkit_config.timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(operation, timeout.as_millis() as u64)),
        }
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled("training run cancelled".to_string()));
        }
        Ok(())
    }
}

fn fatal(step: &'static str) -> impl Fn(AgentError) -> AgentError {
    move |e| match e {
        AgentError::Cancelled(_) | AgentError::Timeout { .. } => e,
        other => AgentError::training(format!("{} failed: {}", step, other)),
    }
}

/// Location of the schema sidecar for a given artifact name.
pub fn manifest_path(artifacts_dir: &Path, model_name: &str) -> PathBuf {
    artifacts_dir.join(format!("{}.schema.json", model_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;
    use crate::toolkit::ExperimentHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct StubToolkit {
        fail_search: bool,
        fail_evaluate: bool,
        fail_explain: bool,
        persist_calls: AtomicUsize,
        hold_search: Option<Arc<Notify>>,
        entered_search: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl AutoMlToolkit for StubToolkit {
        async fn init_experiment(
            &self,
            _dataset: &Dataset,
            task: TaskType,
            target: Option<&str>,
            _seed: u64,
        ) -> crate::error::Result<ExperimentHandle> {
            Ok(ExperimentHandle {
                id: "exp-1".into(),
                task,
                target: target.map(|t| t.to_string()),
            })
        }

        async fn search_best(
            &self,
            _experiment: &ExperimentHandle,
        ) -> crate::error::Result<ModelHandle> {
            if let Some(entered) = &self.entered_search {
                entered.notify_one();
            }
            if let Some(hold) = &self.hold_search {
                hold.notified().await;
            }
            if self.fail_search {
                return Err(AgentError::toolkit("search_best", "no viable candidates"));
            }
            Ok(ModelHandle {
                id: "model-1".into(),
                family: "gbm".into(),
            })
        }

        async fn tune(
            &self,
            _experiment: &ExperimentHandle,
            model: &ModelHandle,
        ) -> crate::error::Result<ModelHandle> {
            Ok(ModelHandle {
                id: format!("{}-tuned", model.id),
                family: model.family.clone(),
            })
        }

        async fn evaluate(
            &self,
            _experiment: &ExperimentHandle,
            _model: &ModelHandle,
        ) -> crate::error::Result<StepReport> {
            if self.fail_evaluate {
                return Err(AgentError::toolkit("evaluate", "metrics unavailable"));
            }
            Ok(StepReport::Report(serde_json::json!({ "accuracy": 0.9 })))
        }

        async fn explain(
            &self,
            _experiment: &ExperimentHandle,
            _model: &ModelHandle,
        ) -> crate::error::Result<StepReport> {
            if self.fail_explain {
                return Ok(StepReport::Warning("SHAP unsupported".into()));
            }
            Ok(StepReport::Report(serde_json::json!({ "importance": [] })))
        }

        async fn persist(
            &self,
            _model: &ModelHandle,
            name: &str,
        ) -> crate::error::Result<PathBuf> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("/tmp/{}.pkl", name)))
        }

        async fn load(&self, _name: &str) -> crate::error::Result<ModelHandle> {
            Ok(ModelHandle {
                id: "model-1-tuned".into(),
                family: "gbm".into(),
            })
        }

        async fn predict(
            &self,
            _model: &ModelHandle,
            records: &[Record],
        ) -> crate::error::Result<Vec<serde_json::Value>> {
            Ok(records.iter().map(|_| serde_json::json!(0)).collect())
        }
    }

    fn orchestrator_with(
        toolkit: Arc<StubToolkit>,
        artifacts_dir: &Path,
    ) -> TrainingOrchestrator {
        TrainingOrchestrator::new(
            toolkit,
            TrainingConfig {
                artifacts_dir: artifacts_dir.to_string_lossy().to_string(),
                model_name: "my_model".into(),
                class_cardinality_threshold: 20,
            },
            ToolkitConfig {
                service_url: "http://127.0.0.1:9090".into(),
                timeout_secs: 5,
                seed: 123,
            },
        )
    }

    fn species_dataset() -> Dataset {
        Dataset::from_csv_str("sepal_len,species\n5.1,setosa\n6.3,virginica\n5.8,versicolor\n")
            .unwrap()
    }

    #[tokio::test]
    async fn successful_run_persists_and_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = Arc::new(StubToolkit::default());
        let orchestrator = orchestrator_with(toolkit.clone(), dir.path());

        let run = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("species"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.outcome, RunOutcome::Succeeded);
        assert!(run.warnings.is_empty());
        assert_eq!(run.artifact_name, "my_model");
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 1);

        let manifest_file = manifest_path(dir.path(), "my_model");
        let manifest: ArtifactManifest =
            serde_json::from_str(&std::fs::read_to_string(manifest_file).unwrap()).unwrap();
        assert_eq!(manifest.features, vec!["sepal_len"]);
        assert_eq!(manifest.target.as_deref(), Some("species"));
    }

    #[tokio::test]
    async fn search_failure_is_fatal_and_nothing_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = Arc::new(StubToolkit {
            fail_search: true,
            ..Default::default()
        });
        let orchestrator = orchestrator_with(toolkit.clone(), dir.path());

        let err = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("species"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category(), "training");
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 0);
        assert!(!manifest_path(dir.path(), "my_model").exists());
    }

    #[tokio::test]
    async fn evaluate_and_explain_failures_degrade_to_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = Arc::new(StubToolkit {
            fail_evaluate: true,
            fail_explain: true,
            ..Default::default()
        });
        let orchestrator = orchestrator_with(toolkit.clone(), dir.path());

        let run = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("species"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.outcome, RunOutcome::Succeeded);
        assert_eq!(run.warnings.len(), 2);
        assert!(run.warnings[0].starts_with("evaluation:"));
        assert!(run.warnings[1].starts_with("explanation:"));
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manifest_write_failure_degrades_to_warning() {
        let dir = tempfile::tempdir().unwrap();
        // An artifacts_dir that is a plain file makes the sidecar write fail
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let toolkit = Arc::new(StubToolkit::default());
        let orchestrator = orchestrator_with(toolkit.clone(), &blocker);

        let run = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("species"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.outcome, RunOutcome::Succeeded);
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 1);
        assert!(run.warnings.iter().any(|w| w.starts_with("manifest:")));
    }

    #[tokio::test]
    async fn retrain_overwrites_same_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = Arc::new(StubToolkit::default());
        let orchestrator = orchestrator_with(toolkit.clone(), dir.path());
        let cancel = CancellationToken::new();

        let first = orchestrator
            .run(&species_dataset(), TaskType::Classification, Some("species"), &cancel)
            .await
            .unwrap();
        let second = orchestrator
            .run(&species_dataset(), TaskType::Classification, Some("species"), &cancel)
            .await
            .unwrap();

        assert_eq!(first.artifact_name, second.artifact_name);
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let toolkit = Arc::new(StubToolkit {
            hold_search: Some(release.clone()),
            entered_search: Some(entered.clone()),
            ..Default::default()
        });
        let orchestrator = Arc::new(orchestrator_with(toolkit, dir.path()));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(
                        &species_dataset(),
                        TaskType::Classification,
                        Some("species"),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        // Wait until the first run is inside the toolkit call
        entered.notified().await;

        let err = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("species"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TrainingBusy));

        release.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn missing_target_rejected_before_any_toolkit_call() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = Arc::new(StubToolkit::default());
        let orchestrator = orchestrator_with(toolkit.clone(), dir.path());

        let err = orchestrator
            .run(
                &species_dataset(),
                TaskType::Classification,
                Some("petal_len"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), "invalid_dataset");
        assert_eq!(toolkit.persist_calls.load(Ordering::SeqCst), 0);
    }
}
