use crate::config::ImapConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use mailparse::{MailAddr, ParsedMail};
use native_tls::TlsConnector;
use tracing::debug;

/// UID of a message within the watched mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageId(pub u32);

/// Inbound message as read from the mail store. The "seen" flag is owned by
/// the store; this system only ever queries unseen messages.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailStore: Send + Sync {
    /// Unseen messages from the given sender, oldest first.
    async fn search_unseen(&self, from_filter: &str) -> Result<Vec<MessageId>>;

    async fn fetch(&self, id: MessageId) -> Result<InboxMessage>;
}

/// IMAP-backed mail store. Sessions are scoped per call; the blocking imap
/// protocol work runs on the blocking pool.
pub struct ImapMailStore {
    config: ImapConfig,
}

impl ImapMailStore {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(
                &mut imap::Session<native_tls::TlsStream<std::net::TcpStream>>,
            ) -> Result<T>
            + Send
            + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let tls = TlsConnector::builder()
                .build()
                .map_err(|e| AgentError::MailStore(format!("TLS setup failed: {}", e)))?;
            let client = imap::connect(
                (config.host.as_str(), config.port),
                config.host.as_str(),
                &tls,
            )
            .map_err(|e| AgentError::MailStore(format!("connect failed: {}", e)))?;

            let mut session = client
                .login(&config.username, &config.password)
                .map_err(|(e, _)| AgentError::MailStore(format!("login failed: {}", e)))?;

            session
                .select(&config.mailbox)
                .map_err(|e| AgentError::MailStore(format!("select failed: {}", e)))?;

            let result = op(&mut session);
            session.logout().ok();
            result
        })
        .await
        .map_err(|e| AgentError::MailStore(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl MailStore for ImapMailStore {
    async fn search_unseen(&self, from_filter: &str) -> Result<Vec<MessageId>> {
        let query = format!("UNSEEN FROM \"{}\"", from_filter.replace('"', ""));
        let uids = self
            .with_session(move |session| {
                session
                    .uid_search(&query)
                    .map_err(|e| AgentError::MailStore(format!("search failed: {}", e)))
            })
            .await?;

        let mut ids: Vec<MessageId> = uids.into_iter().map(MessageId).collect();
        ids.sort_unstable();
        debug!("Found {} unseen message(s)", ids.len());
        Ok(ids)
    }

    async fn fetch(&self, id: MessageId) -> Result<InboxMessage> {
        let raw = self
            .with_session(move |session| {
                let fetches = session
                    .uid_fetch(id.0.to_string(), "RFC822")
                    .map_err(|e| AgentError::MailStore(format!("fetch failed: {}", e)))?;
                let fetch = fetches
                    .iter()
                    .next()
                    .ok_or_else(|| AgentError::MailStore(format!("message {} not found", id.0)))?;
                fetch
                    .body()
                    .map(|b| b.to_vec())
                    .ok_or_else(|| AgentError::MailStore(format!("message {} has no body", id.0)))
            })
            .await?;

        parse_inbox_message(&raw)
    }
}

pub fn parse_inbox_message(raw: &[u8]) -> Result<InboxMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AgentError::MailStore(format!("undecodable message: {}", e)))?;

    let sender = sender_address(&parsed)
        .ok_or_else(|| AgentError::MailStore("message has no From address".to_string()))?;
    let subject = header_value(&parsed, "Subject").unwrap_or_default();
    let body = plain_text_body(&parsed)
        .ok_or_else(|| AgentError::MailStore("message has no text/plain part".to_string()))?;

    Ok(InboxMessage {
        sender,
        subject,
        body,
    })
}

fn header_value(parsed: &ParsedMail, name: &str) -> Option<String> {
    use mailparse::MailHeaderMap;
    parsed.headers.get_first_value(name)
}

fn sender_address(parsed: &ParsedMail) -> Option<String> {
    let raw = header_value(parsed, "From")?;
    let addrs = mailparse::addrparse(&raw).ok()?;
    addrs.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.addr.clone()),
        MailAddr::Group(group) => group.addrs.first().map(|a| a.addr.clone()),
    })
}

/// First `text/plain` part, depth-first; a non-multipart plain message is
/// its own part.
fn plain_text_body(parsed: &ParsedMail) -> Option<String> {
    if parsed.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
        return parsed.get_body().ok();
    }
    parsed.subparts.iter().find_map(plain_text_body)
}
