use std::sync::Mutex;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One message handed to the transport; addresses are already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Transport failure, split by whether a retry can possibly help. The
/// `error_type` string ends up in the per-attempt error log on the row.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct SendError {
    pub error_type: String,
    pub can_retry: bool,
    pub message: String,
}

impl SendError {
    pub fn permanent(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            can_retry: false,
            message: message.into(),
        }
    }

    pub fn retryable(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            can_retry: true,
            message: message.into(),
        }
    }
}

/// Seam to the actual mail transport. The queue worker only ever talks to
/// this trait; SMTP is one implementation, tests use [`RecordingMailer`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError>;

    /// Whether this transport reports delivery events (opens/clicks). SMTP
    /// does not; a provider with webhooks would.
    fn can_have_delivery_info(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender_email: String,
    pub sender_name: String,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, SendError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| SendError::permanent("SMTP_CONFIG", e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            sender: format!("\"{}\" <{}>", config.sender_name, config.sender_email),
        })
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message, SendError> {
        let mut builder = Message::builder()
            .from(
                self.sender
                    .parse()
                    .map_err(|_| SendError::permanent("INVALID_SENDER", "Invalid sender address"))?,
            )
            .subject(message.subject.clone());
        for to in &message.to {
            builder = builder.to(to.parse().map_err(|_| {
                SendError::permanent("INVALID_RECIPIENT", format!("Invalid address: {to}"))
            })?);
        }
        let built = match &message.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                message.html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(message.html.clone()),
        };
        built.map_err(|e| SendError::permanent("MESSAGE_BUILD", e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        if message.to.is_empty() {
            return Ok(());
        }
        let email = self.build_message(message)?;
        self.transport.send(email).await.map_err(|err| {
            // Rejections carrying a permanent (5xx) SMTP code will fail the
            // same way on every attempt; everything else is worth retrying.
            if err.is_permanent() {
                SendError::permanent("SMTP_REJECTED", err.to_string())
            } else {
                SendError::retryable("SMTP_TRANSIENT", err.to_string())
            }
        })?;
        Ok(())
    }
}

/// In-memory mailer for tests: records every accepted message and can be
/// scripted to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failures: Mutex<Vec<SendError>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next `send` call. Multiple
    /// queued errors are consumed in order.
    pub fn fail_next(&self, error: SendError) {
        self.failures.lock().unwrap().push(error);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        let failure = {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(error) = failure {
            return Err(error);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
