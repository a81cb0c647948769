use crate::completion::CompletionBackend;
use crate::config::{CompletionConfig, PollConfig};
use crate::error::{AgentError, Result, RetryConfig};
use crate::mailbox::{MailStore, MessageId};
use crate::notify::{NotificationDispatcher, ReplyJob};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task that answers unseen mail from the watched sender with a
/// completion-API reply. One poller per mailbox; starting a second is
/// rejected so no message is ever answered twice.
pub struct InboxPollLoop {
    store: Arc<dyn MailStore>,
    completion: Arc<dyn CompletionBackend>,
    dispatcher: Arc<NotificationDispatcher>,
    poll: PollConfig,
    completion_config: CompletionConfig,
    watch_sender: String,
    retry: RetryConfig,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a InboxPollLoop);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl InboxPollLoop {
    pub fn new(
        store: Arc<dyn MailStore>,
        completion: Arc<dyn CompletionBackend>,
        dispatcher: Arc<NotificationDispatcher>,
        poll: PollConfig,
        completion_config: CompletionConfig,
        watch_sender: String,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            completion,
            dispatcher,
            poll,
            completion_config,
            watch_sender,
            retry,
            running: AtomicBool::new(false),
        }
    }

    /// Starts the loop on its own task. Runs until `cancel` fires; shutdown
    /// latency is bounded by the poll interval.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::Internal(
                "inbox poll loop already running".to_string(),
            ));
        }

        let this = self.clone();
        Ok(tokio::spawn(async move {
            // Clears `running` even if the task is aborted mid-await
            let _reset = RunningGuard(&this);
            this.run(cancel).await;
        }))
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(
            "📬 Inbox poll loop started (sender: {}, interval: {}s)",
            self.watch_sender, self.poll.interval_secs
        );

        let base = Duration::from_secs(self.poll.interval_secs);
        let max = Duration::from_secs(self.poll.max_backoff_secs);
        let mut backoff = base;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let sleep_for = match self.poll_once().await {
                Ok(replied) => {
                    if replied > 0 {
                        info!("📬 Replied to {} message(s)", replied);
                    } else {
                        debug!("No unseen messages from {}", self.watch_sender);
                    }
                    backoff = base;
                    base
                }
                Err(e) => {
                    // Mail store unreachable: back off, capped, reset on success
                    let delay = backoff;
                    backoff = std::cmp::min(backoff * 2, max);
                    warn!(
                        "⚠️ Poll iteration failed: {}. Next attempt in {}s",
                        e,
                        delay.as_secs()
                    );
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        info!("📪 Inbox poll loop stopped");
    }

    /// One poll iteration. A failure handling a single message is logged and
    /// skipped; only a store-level failure surfaces to the caller.
    pub async fn poll_once(&self) -> Result<usize> {
        let ids = self.store.search_unseen(&self.watch_sender).await?;

        let mut replied = 0;
        for id in ids {
            match self.handle_message(id).await {
                Ok(()) => replied += 1,
                Err(e) => {
                    warn!("⚠️ Skipping message {}: {}", id.0, e);
                }
            }
        }
        Ok(replied)
    }

    async fn handle_message(&self, id: MessageId) -> Result<()> {
        let message = self.store.fetch(id).await?;
        debug!(
            "Message {} from {}: '{}'",
            id.0, message.sender, message.subject
        );

        // Transient completion-API failures are retried before the message
        // is skipped for this iteration
        let reply = self
            .retry
            .execute(|| {
                self.completion.complete(
                    &self.completion_config.system_prompt,
                    &message.body,
                    self.completion_config.temperature,
                )
            })
            .await?;

        self.dispatcher
            .dispatch(&ReplyJob {
                recipient: message.sender,
                subject: format!("RE: {}", message.subject),
                body: reply,
            })
            .await
    }
}
