use crate::config::SmtpConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

/// Fire-and-forget outbound email. No retry state is kept after a terminal
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyJob {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP submission over implicit TLS, one connection per call.
pub struct SmtpMailTransport {
    host: String,
    port: u16,
    credentials: Credentials,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            credentials: Credentials::new(config.username.clone(), config.password.clone()),
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| AgentError::Delivery(format!("invalid from address: {}", e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| AgentError::InvalidRecipient(format!("{}: {}", to, e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| AgentError::Delivery(format!("failed to build message: {}", e)))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
            .map_err(|e| AgentError::Delivery(format!("SMTP relay setup failed: {}", e)))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();

        mailer
            .send(message)
            .await
            .map_err(|e| AgentError::Delivery(e.to_string()))?;

        Ok(())
    }
}

/// Validates the recipient, then attempts exactly one delivery. Transport
/// failures are surfaced, never retried here.
pub struct NotificationDispatcher {
    transport: std::sync::Arc<dyn MailTransport>,
    from_address: String,
}

impl NotificationDispatcher {
    pub fn new(transport: std::sync::Arc<dyn MailTransport>, from_address: String) -> Self {
        Self {
            transport,
            from_address,
        }
    }

    pub async fn dispatch(&self, job: &ReplyJob) -> Result<()> {
        // Syntax validation happens before any network call
        job.recipient
            .parse::<Address>()
            .map_err(|e| AgentError::InvalidRecipient(format!("{}: {}", job.recipient, e)))?;

        debug!("Dispatching '{}' to {}", job.subject, job.recipient);
        self.transport
            .send(&self.from_address, &job.recipient, &job.subject, &job.body)
            .await?;

        info!("📧 Sent '{}' to {}", job.subject, job.recipient);
        Ok(())
    }
}

/// The completion notification the original app mails after a run.
pub fn training_complete_job(recipient: &str) -> ReplyJob {
    ReplyJob {
        recipient: recipient.to_string(),
        subject: "🎉 Your AI Model is Ready!".to_string(),
        body: "Hello,\n\n\
               Your machine learning model has been successfully trained and is ready to use!\n\n\
               Kind regards,\n\
               Smart AutoML Agent\n"
            .to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubTransport;
    use super::*;
    use std::sync::Arc;

    fn dispatcher(stub: Arc<StubTransport>) -> NotificationDispatcher {
        NotificationDispatcher::new(stub, "agent@example.com".to_string())
    }

    #[tokio::test]
    async fn dispatch_records_one_send_with_matching_fields() {
        let stub = Arc::new(StubTransport::default());
        let job = ReplyJob {
            recipient: "client@example.com".into(),
            subject: "Ready".into(),
            body: "Done".into(),
        };

        dispatcher(stub.clone()).dispatch(&job).await.unwrap();

        let sent = stub.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], job);
    }

    #[tokio::test]
    async fn malformed_recipient_never_reaches_transport() {
        let stub = Arc::new(StubTransport::default());
        let job = ReplyJob {
            recipient: "not-an-email".into(),
            subject: "Ready".into(),
            body: "Done".into(),
        };

        let err = dispatcher(stub.clone()).dispatch(&job).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRecipient(_)));
        assert!(stub.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_delivery_error() {
        let stub = Arc::new(StubTransport {
            fail: true,
            ..Default::default()
        });
        let job = ReplyJob {
            recipient: "client@example.com".into(),
            subject: "Ready".into(),
            body: "Done".into(),
        };

        let err = dispatcher(stub).dispatch(&job).await.unwrap_err();
        assert!(matches!(err, AgentError::Delivery(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn training_complete_job_uses_fixed_subject() {
        let job = training_complete_job("client@example.com");
        assert_eq!(job.subject, "🎉 Your AI Model is Ready!");
        assert!(job.body.contains("successfully trained"));
    }
}
