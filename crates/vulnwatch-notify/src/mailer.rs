//! Outgoing mail: the transport seam and its SMTP implementation

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use vulnwatch_common::config::MailConfig;
use vulnwatch_core::{Error, Result};

/// A fully composed message with one attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Vec<u8>,
    pub attachment_name: String,
    pub content_type: String,
}

/// Something that can deliver an `OutgoingMail`
#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<()>;
}

/// Check that a recipient is a syntactically valid address
pub fn validate_recipient(address: &str) -> Result<()> {
    address
        .trim()
        .parse::<Address>()
        .map(|_| ())
        .map_err(|e| Error::InvalidInput {
            field: "receiver_email".into(),
            message: format!("'{}': {}", address.trim(), e),
        })
}

/// MIME type for an artifact extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// SMTP relay with STARTTLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(Error::MissingConfig {
                key: "mail.smtp_host".into(),
            });
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::InvalidConfig {
                key: "mail.smtp_host".into(),
                message: e.to_string(),
            })?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        debug!(
            "SMTP relay {}:{} (auth: {})",
            config.smtp_host,
            config.smtp_port,
            config.username.is_some()
        );

        Ok(Self {
            transport: builder.build(),
            host: config.smtp_host.clone(),
        })
    }
}

/// Build the MIME message for `mail`
pub fn compose(mail: &OutgoingMail) -> Result<Message> {
    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|e| Error::Delivery(format!("invalid sender '{}': {}", mail.from, e)))?;
    let to: Mailbox = mail
        .to
        .parse()
        .map_err(|e| Error::Delivery(format!("invalid recipient '{}': {}", mail.to, e)))?;
    let content_type = ContentType::parse(&mail.content_type)
        .map_err(|e| Error::Delivery(format!("invalid content type: {}", e)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(mail.body.clone()))
                .singlepart(
                    Attachment::new(mail.attachment_name.clone())
                        .body(mail.attachment.clone(), content_type),
                ),
        )
        .map_err(|e| Error::Delivery(format!("failed to build message: {}", e)))
}

#[async_trait::async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        let message = compose(&mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Delivery(format!("SMTP {}: {}", self.host, e)))?;
        info!("Mail '{}' delivered to {}", mail.subject, mail.to);
        Ok(())
    }
}
