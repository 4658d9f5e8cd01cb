//! SMTP submission built on `lettre`
//!
//! A fresh transport is built for every message, so sending never contends
//! with the IMAP connection.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;
use uuid::Uuid;

use crate::config::{EndpointConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::mime::DEFAULT_CONTENT_TYPE;
use crate::transport::{MailSender, OutgoingMessage};

/// Sends mail through the configured SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpSender {
    endpoint: EndpointConfig,
    from_address: String,
}

impl SmtpSender {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            endpoint: config.smtp.clone(),
            from_address: config.from_address.clone(),
        }
    }

    /// Build the relay transport
    ///
    /// `secure` selects implicit TLS; otherwise the connection is upgraded
    /// with STARTTLS.
    fn transport(&self) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let relay = if self.endpoint.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.endpoint.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.endpoint.host)
        };
        let builder = relay.map_err(|e| {
            AppError::InvalidInput(format!("invalid SMTP host '{}': {e}", self.endpoint.host))
        })?;

        Ok(builder
            .port(self.endpoint.port)
            .credentials(Credentials::new(
                self.endpoint.user.clone(),
                self.endpoint.pass.expose_secret().to_owned(),
            ))
            .build())
    }
}

impl MailSender for SmtpSender {
    async fn send(&self, message: OutgoingMessage) -> AppResult<String> {
        let message_id = new_message_id(&self.from_address);
        let email = build_message(&self.from_address, &message_id, message)?;
        let transport = self.transport()?;
        transport
            .send(email)
            .await
            .map_err(|e| AppError::Connection(format!("SMTP send failed: {e}")))?;
        info!(%message_id, "message submitted");
        Ok(message_id)
    }
}

/// Generate a `Message-ID` in the sender's domain
fn new_message_id(from_address: &str) -> String {
    let domain = from_address
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{}>", Uuid::new_v4(), domain)
}

/// Assemble the MIME message
///
/// Text and HTML become `multipart/alternative`; attachments wrap the
/// content in `multipart/mixed`.
fn build_message(from: &str, message_id: &str, message: OutgoingMessage) -> AppResult<Message> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| AppError::InvalidInput(format!("invalid from address '{from}': {e}")))?;
    let to: Mailbox = message.to.parse().map_err(|e| {
        AppError::InvalidInput(format!("invalid recipient address '{}': {e}", message.to))
    })?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject)
        .message_id(Some(message_id.to_owned()));

    let content = match (message.text, message.html) {
        (Some(text), Some(html)) => Body::Multi(MultiPart::alternative_plain_html(text, html)),
        (Some(text), None) => Body::Single(SinglePart::plain(text)),
        (None, Some(html)) => Body::Single(SinglePart::html(html)),
        (None, None) => {
            return Err(AppError::invalid("message needs a text or html body"));
        }
    };

    let built = if message.attachments.is_empty() {
        match content {
            Body::Single(part) => builder.singlepart(part),
            Body::Multi(multi) => builder.multipart(multi),
        }
    } else {
        let mut mixed = match content {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Multi(multi) => MultiPart::mixed().multipart(multi),
        };
        for attachment in message.attachments {
            let content_type = content_type_or_default(attachment.content_type.as_deref())?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename).body(attachment.content, content_type),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| AppError::InvalidInput(format!("failed to build message: {e}")))
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

fn content_type_or_default(value: Option<&str>) -> AppResult<ContentType> {
    value
        .and_then(|v| ContentType::parse(v).ok())
        .map_or_else(
            || {
                ContentType::parse(DEFAULT_CONTENT_TYPE)
                    .map_err(|e| AppError::Internal(format!("default content type: {e}")))
            },
            Ok,
        )
}
