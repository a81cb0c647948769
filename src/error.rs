use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Training run already in flight")]
    TrainingBusy,

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Mail delivery error: {0}")]
    Delivery(String),

    #[error("Mail store error: {0}")]
    MailStore(String),

    #[error("Completion API error: {0}")]
    Completion(String),

    #[error("Toolkit error: {operation} failed - {message}")]
    Toolkit { operation: String, message: String },

    #[error("No model artifact found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid prediction input: {0}")]
    InvalidInput(String),

    #[error("Timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        AgentError::Config(message.into())
    }

    pub fn invalid_dataset<S: Into<String>>(message: S) -> Self {
        AgentError::InvalidDataset(message.into())
    }

    pub fn training<S: Into<String>>(message: S) -> Self {
        AgentError::Training(message.into())
    }

    pub fn toolkit<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        AgentError::Toolkit {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        AgentError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether a caller may reasonably retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Delivery(_) => true,
            AgentError::MailStore(_) => true,
            AgentError::Completion(msg) => !msg.contains("401") && !msg.contains("403"),
            AgentError::Timeout { .. } => true,
            AgentError::TrainingBusy => true,
            AgentError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::InvalidDataset(_) => "invalid_dataset",
            AgentError::Training(_) => "training",
            AgentError::TrainingBusy => "training_busy",
            AgentError::InvalidRecipient(_) => "invalid_recipient",
            AgentError::Delivery(_) => "delivery",
            AgentError::MailStore(_) => "mail_store",
            AgentError::Completion(_) => "completion",
            AgentError::Toolkit { .. } => "toolkit",
            AgentError::ArtifactNotFound(_) => "artifact_not_found",
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::Timeout { .. } => "timeout",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Io(_) => "io",
            AgentError::Json(_) => "json",
            AgentError::Http(_) => "http",
            AgentError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::InvalidDataset(_)
            | AgentError::InvalidRecipient(_)
            | AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AgentError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::TrainingBusy => StatusCode::CONFLICT,
            AgentError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": true,
            "category": self.category(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Http(err.to_string())
    }
}

impl From<csv::Error> for AgentError {
    fn from(err: csv::Error) -> Self {
        AgentError::InvalidDataset(err.to_string())
    }
}

/// Retry configuration for operations that may fail temporarily.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

impl RetryConfig {
    /// Delay before the given 1-based attempt, doubling up to the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay_ms = std::cmp::min(
            self.base_delay_ms.saturating_mul(2_u64.saturating_pow(exp)),
            self.max_delay_ms,
        );
        std::time::Duration::from_millis(delay_ms)
    }

    /// Execute an async operation, retrying retryable failures with
    /// exponential backoff.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Operation failed (attempt {}/{}): {}. Retrying in {}ms...",
                        attempt,
                        self.max_attempts,
                        err,
                        delay.as_millis()
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Internal("Retry loop failed".to_string())))
    }
}
