use crate::dataset::{Dataset, Record};
use crate::error::{AgentError, Result};
use crate::router::TaskType;
use crate::toolkit::{AutoMlToolkit, ExperimentHandle, ModelHandle, StepReport};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Toolkit client against a sidecar AutoML service speaking JSON over HTTP.
pub struct HttpToolkitClient {
    http_client: Client,
    base_url: String,
}

impl HttpToolkitClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AgentError::toolkit("http_client", e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, operation: &str, path: &str, payload: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Toolkit call {} -> {}", operation, url);

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::toolkit(operation, e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::toolkit(operation, format!("invalid response body: {}", e)))?;

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("toolkit request failed");
            return Err(AgentError::toolkit(
                operation,
                format!("status {}: {}", status, message),
            ));
        }

        Ok(body)
    }

    fn required_str(body: &Value, field: &str, operation: &str) -> Result<String> {
        body.get(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AgentError::toolkit(operation, format!("response missing '{}' field", field))
            })
    }

    fn model_from(body: &Value, operation: &str) -> Result<ModelHandle> {
        Ok(ModelHandle {
            id: Self::required_str(body, "model_id", operation)?,
            family: body
                .get("family")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    fn step_report_from(body: Value, operation: &str) -> StepReport {
        if let Some(warning) = body.get("warning").and_then(|w| w.as_str()) {
            warn!("Toolkit {} degraded: {}", operation, warning);
            return StepReport::Warning(warning.to_string());
        }
        StepReport::Report(body.get("report").cloned().unwrap_or(body))
    }
}

#[async_trait]
impl AutoMlToolkit for HttpToolkitClient {
    async fn init_experiment(
        &self,
        dataset: &Dataset,
        task: TaskType,
        target: Option<&str>,
        seed: u64,
    ) -> Result<ExperimentHandle> {
        let body = self
            .post(
                "init_experiment",
                "/experiments",
                json!({
                    "dataset": dataset,
                    "task": task,
                    "target": target,
                    "seed": seed,
                }),
            )
            .await?;

        Ok(ExperimentHandle {
            id: Self::required_str(&body, "experiment_id", "init_experiment")?,
            task,
            target: target.map(|t| t.to_string()),
        })
    }

    async fn search_best(&self, experiment: &ExperimentHandle) -> Result<ModelHandle> {
        let body = self
            .post(
                "search_best",
                &format!("/experiments/{}/search", experiment.id),
                json!({}),
            )
            .await?;
        Self::model_from(&body, "search_best")
    }

    async fn tune(
        &self,
        experiment: &ExperimentHandle,
        model: &ModelHandle,
    ) -> Result<ModelHandle> {
        let body = self
            .post(
                "tune",
                &format!("/experiments/{}/tune", experiment.id),
                json!({ "model_id": model.id }),
            )
            .await?;
        Self::model_from(&body, "tune")
    }

    async fn evaluate(
        &self,
        experiment: &ExperimentHandle,
        model: &ModelHandle,
    ) -> Result<StepReport> {
        let body = self
            .post(
                "evaluate",
                &format!("/experiments/{}/evaluate", experiment.id),
                json!({ "model_id": model.id }),
            )
            .await?;
        Ok(Self::step_report_from(body, "evaluate"))
    }

    async fn explain(
        &self,
        experiment: &ExperimentHandle,
        model: &ModelHandle,
    ) -> Result<StepReport> {
        let body = self
            .post(
                "explain",
                &format!("/experiments/{}/explain", experiment.id),
                json!({ "model_id": model.id }),
            )
            .await?;
        Ok(Self::step_report_from(body, "explain"))
    }

    async fn persist(&self, model: &ModelHandle, name: &str) -> Result<PathBuf> {
        let body = self
            .post(
                "persist",
                &format!("/models/{}/persist", model.id),
                json!({ "name": name }),
            )
            .await?;
        Ok(PathBuf::from(Self::required_str(&body, "path", "persist")?))
    }

    async fn load(&self, name: &str) -> Result<ModelHandle> {
        let body = self
            .post("load", "/models/load", json!({ "name": name }))
            .await?;
        Self::model_from(&body, "load")
    }

    async fn predict(
        &self,
        model: &ModelHandle,
        records: &[Record],
    ) -> Result<Vec<serde_json::Value>> {
        let body = self
            .post(
                "predict",
                &format!("/models/{}/predict", model.id),
                json!({ "records": records }),
            )
            .await?;

        body.get("predictions")
            .and_then(|p| p.as_array())
            .map(|p| p.to_vec())
            .ok_or_else(|| {
                AgentError::toolkit("predict", "response missing 'predictions' array".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_report_prefers_warning() {
        let report = HttpToolkitClient::step_report_from(
            json!({ "warning": "SHAP unavailable for this model family" }),
            "explain",
        );
        assert!(matches!(report, StepReport::Warning(w) if w.contains("SHAP")));
    }

    #[test]
    fn step_report_unwraps_report_field() {
        let report =
            HttpToolkitClient::step_report_from(json!({ "report": { "accuracy": 0.93 } }), "evaluate");
        match report {
            StepReport::Report(value) => assert_eq!(value["accuracy"], 0.93),
            StepReport::Warning(_) => panic!("expected report"),
        }
    }

    #[test]
    fn missing_field_is_a_toolkit_error() {
        let err = HttpToolkitClient::required_str(&json!({}), "model_id", "tune").unwrap_err();
        assert_eq!(err.category(), "toolkit");
    }
}
