use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub toolkit: ToolkitConfig,
    pub training: TrainingConfig,
    pub smtp: SmtpConfig,
    pub imap: ImapConfig,
    pub poll: PollConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    pub service_url: String,
    pub timeout_secs: u64,
    /// Seed forwarded to the toolkit's experiment setup.
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub artifacts_dir: String,
    /// Artifact name; retraining overwrites the prior artifact of this name.
    pub model_name: String,
    /// Supervised targets with at most this many distinct values are routed
    /// to classification. Text targets are classification regardless.
    pub class_cardinality_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// Recipient of training-completion notifications. Empty disables them.
    pub client_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    /// Only unseen messages from this sender are auto-replied to.
    /// Empty disables the poll loop.
    pub watch_sender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Cap for the reconnect backoff when the mail store is unreachable.
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // If a config file is provided, load from file
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            return Ok(config);
        }

        // Otherwise, load from environment variables with defaults
        Ok(Config {
            http: HttpConfig {
                bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            },
            toolkit: ToolkitConfig {
                service_url: env::var("TOOLKIT_SERVICE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
                timeout_secs: env::var("TOOLKIT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
                seed: env::var("EXPERIMENT_SEED")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(123),
            },
            training: TrainingConfig {
                artifacts_dir: env::var("ARTIFACTS_DIR")
                    .unwrap_or_else(|_| "./artifacts".to_string()),
                model_name: env::var("MODEL_NAME").unwrap_or_else(|_| "my_model".to_string()),
                class_cardinality_threshold: env::var("CLASS_CARDINALITY_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            },
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(465),
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_address: env::var("SMTP_FROM_ADDRESS").unwrap_or_default(),
                client_address: env::var("CLIENT_ADDRESS").unwrap_or_default(),
            },
            imap: ImapConfig {
                host: env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string()),
                port: env::var("IMAP_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(993),
                username: env::var("IMAP_USERNAME").unwrap_or_default(),
                password: env::var("IMAP_PASSWORD").unwrap_or_default(),
                mailbox: env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string()),
                watch_sender: env::var("WATCH_SENDER").unwrap_or_default(),
            },
            poll: PollConfig {
                interval_secs: env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
                max_backoff_secs: env::var("POLL_MAX_BACKOFF_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
            },
            completion: CompletionConfig {
                api_url: env::var("COMPLETION_API_URL")
                    .unwrap_or_else(|_| "https://api.together.xyz/v1/chat/completions".to_string()),
                api_key: env::var("COMPLETION_API_KEY").unwrap_or_default(),
                model: env::var("COMPLETION_MODEL")
                    .unwrap_or_else(|_| "meta-llama/Llama-3.3-70B-Instruct-Turbo".to_string()),
                temperature: env::var("COMPLETION_TEMPERATURE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.7),
                system_prompt: env::var("COMPLETION_SYSTEM_PROMPT")
                    .unwrap_or_else(|_| "You are a helpful assistant.".to_string()),
                timeout_secs: env::var("COMPLETION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.training.class_cardinality_threshold == 0 {
            return Err(AgentError::config(
                "class_cardinality_threshold must be greater than 0",
            ));
        }

        if self.poll.interval_secs == 0 {
            return Err(AgentError::config("poll interval_secs must be greater than 0"));
        }

        if self.poll.max_backoff_secs < self.poll.interval_secs {
            return Err(AgentError::config(
                "poll max_backoff_secs must be at least interval_secs",
            ));
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(AgentError::config(format!(
                "completion temperature must be within [0.0, 2.0], got {}",
                self.completion.temperature
            )));
        }

        if self.training.model_name.is_empty() {
            return Err(AgentError::config("model_name must not be empty"));
        }

        // The poll loop needs working mail credentials when enabled
        if !self.imap.watch_sender.is_empty() {
            if self.imap.username.is_empty() || self.imap.password.is_empty() {
                return Err(AgentError::config(
                    "WATCH_SENDER is set but IMAP_USERNAME/IMAP_PASSWORD are not",
                ));
            }
            if self.completion.api_key.is_empty() {
                return Err(AgentError::config(
                    "WATCH_SENDER is set but COMPLETION_API_KEY is not",
                ));
            }
        }

        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.training.artifacts_dir)?;
        Ok(())
    }

    /// Whether the inbox auto-reply loop should run at all.
    pub fn watching_enabled(&self) -> bool {
        !self.imap.watch_sender.is_empty()
    }

    /// Whether training-completion email notifications should be sent.
    pub fn notifications_enabled(&self) -> bool {
        !self.smtp.client_address.is_empty()
    }
}

/// Baseline config for tests, matching the documented defaults.
#[cfg(test)]
pub(crate) fn tests_config() -> Config {
    Config {
        http: HttpConfig {
            bind_addr: "127.0.0.1:8080".into(),
        },
        toolkit: ToolkitConfig {
            service_url: "http://127.0.0.1:9090".into(),
            timeout_secs: 600,
            seed: 123,
        },
        training: TrainingConfig {
            artifacts_dir: "./artifacts".into(),
            model_name: "my_model".into(),
            class_cardinality_threshold: 20,
        },
        smtp: SmtpConfig {
            host: "smtp.gmail.com".into(),
            port: 465,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            client_address: String::new(),
        },
        imap: ImapConfig {
            host: "imap.gmail.com".into(),
            port: 993,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".into(),
            watch_sender: String::new(),
        },
        poll: PollConfig {
            interval_secs: 60,
            max_backoff_secs: 900,
        },
        completion: CompletionConfig {
            api_url: "https://api.together.xyz/v1/chat/completions".into(),
            api_key: String::new(),
            model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
            temperature: 0.7,
            system_prompt: "You are a helpful assistant.".into(),
            timeout_secs: 120,
        },
    }
}
