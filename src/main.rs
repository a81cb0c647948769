use automl_agent::completion::CompletionClient;
use automl_agent::config::Config;
use automl_agent::dataset::Dataset;
use automl_agent::error::RetryConfig;
use automl_agent::mailbox::ImapMailStore;
use automl_agent::notify::{NotificationDispatcher, ReplyJob, SmtpMailTransport};
use automl_agent::poll_loop::InboxPollLoop;
use automl_agent::router::TaskType;
use automl_agent::service::{self, AppState, TrainRequest};
use automl_agent::toolkit::HttpToolkitClient;
use clap::{Arg, Command};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let matches = Command::new("automl-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("AutoML agent service")
        .arg(
            Arg::new("config")
                .help("Path to a JSON config file (default: environment variables)")
                .short('c')
                .long("config"),
        )
        .subcommand(Command::new("serve").about("Start the HTTP service and inbox poll loop"))
        .subcommand(
            Command::new("train")
                .about("Train a model from a CSV file")
                .arg(
                    Arg::new("data")
                        .help("Path to the CSV dataset")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("target")
                        .help("Target column for supervised tasks")
                        .short('t')
                        .long("target"),
                )
                .arg(
                    Arg::new("task")
                        .help("Explicit task type (required when no target is given)")
                        .long("task"),
                ),
        )
        .subcommand(
            Command::new("notify")
                .about("Send a one-shot email to verify SMTP configuration")
                .arg(
                    Arg::new("recipient")
                        .help("Recipient address")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    let config = Config::load(matches.get_one::<String>("config").map(|s| s.as_str()))?;
    config.validate()?;
    config.ensure_directories()?;

    let toolkit = Arc::new(HttpToolkitClient::new(
        &config.toolkit.service_url,
        config.toolkit.timeout_secs,
    )?);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(SmtpMailTransport::new(&config.smtp)),
        config.smtp.from_address.clone(),
    ));
    let cancel = CancellationToken::new();
    let state = Arc::new(AppState::new(
        config.clone(),
        toolkit,
        dispatcher.clone(),
        cancel.clone(),
    ));

    match matches.subcommand() {
        Some(("train", sub_matches)) => {
            let data_path = sub_matches.get_one::<String>("data").unwrap();
            let target = sub_matches.get_one::<String>("target").cloned();
            let task = sub_matches
                .get_one::<String>("task")
                .map(|t| parse_task(t))
                .transpose()?;

            let dataset = Dataset::from_csv_path(data_path).await?;
            info!(
                "Loaded dataset from {} ({} rows)\n{}",
                data_path,
                dataset.n_rows(),
                dataset.preview(5)
            );

            let csv = tokio::fs::read_to_string(data_path).await?;
            match service::run_training(&state, TrainRequest { csv, target, task }).await {
                Ok(run) => {
                    info!(
                        "✅ Run {} finished: {} model persisted as '{}'",
                        &run.run_id[..8],
                        run.task,
                        run.artifact_name
                    );
                    for warning in &run.warnings {
                        warn!("⚠️ {}", warning);
                    }
                }
                Err(e) => {
                    error!("❌ Training failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(("notify", sub_matches)) => {
            let recipient = sub_matches.get_one::<String>("recipient").unwrap();
            let job = ReplyJob {
                recipient: recipient.clone(),
                subject: "AutoML agent test message".to_string(),
                body: "SMTP configuration is working.".to_string(),
            };
            match dispatcher.dispatch(&job).await {
                Ok(()) => info!("✅ Test email sent to {}", recipient),
                Err(e) => {
                    error!("❌ {}", e);
                    std::process::exit(1);
                }
            }
        }
        // Default to serve
        _ => serve(state, cancel).await?,
    }

    Ok(())
}

fn parse_task(value: &str) -> anyhow::Result<TaskType> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown task type '{}'", value))
}

async fn serve(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = state.config.clone();

    let poll_handle = if config.watching_enabled() {
        let poll_loop = Arc::new(InboxPollLoop::new(
            Arc::new(ImapMailStore::new(config.imap.clone())),
            Arc::new(CompletionClient::new(&config.completion)?),
            state.dispatcher.clone(),
            config.poll.clone(),
            config.completion.clone(),
            config.imap.watch_sender.clone(),
            RetryConfig::default(),
        ));
        Some(poll_loop.spawn(cancel.clone())?)
    } else {
        info!("WATCH_SENDER not set; inbox poll loop disabled");
        None
    };

    let app = service::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;

    info!("");
    info!("🚀 ═══════════════════════════════════════════");
    info!("🚀            AUTOML AGENT SERVICE");
    info!("🚀 ═══════════════════════════════════════════");
    info!("🌐 HTTP: {}", config.http.bind_addr);
    info!("🔧 Toolkit: {}", config.toolkit.service_url);
    info!("🗂 Artifact: {}", config.training.model_name);
    if config.watching_enabled() {
        info!(
            "📬 Watching mail from {} every {}s",
            config.imap.watch_sender, config.poll.interval_secs
        );
    }
    info!("");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = poll_handle {
        if let Err(e) = handle.await {
            warn!("Poll loop did not stop cleanly: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}
