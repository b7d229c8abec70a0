//! Outbound email via SMTP (lettre).
//!
//! One transient session per message: connect, authenticate, send, close.

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::EmailConfig;
use crate::error::DeliveryError;

/// Sends one contact-form message to the configured recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        from_name: &str,
        from_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError>;
}

/// SMTP relay sender.
pub struct SmtpEmailSender {
    config: EmailConfig,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, DeliveryError> {
        let host = &self.config.smtp_host;
        // 587 is submission with STARTTLS; anything else gets implicit TLS
        let builder = if self.config.smtp_port == 587 {
            SmtpTransport::starttls_relay(host)
        } else {
            SmtpTransport::relay(host)
        }
        .map_err(|e| DeliveryError::Smtp(format!("SMTP relay error: {e}")))?
        .port(self.config.smtp_port)
        .timeout(Some(self.config.timeout));

        let builder = if self.config.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_string(),
            ))
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(
        &self,
        from_name: &str,
        from_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        let message = build_message(&self.config, from_name, from_address, subject, body)?;
        let transport = self.transport()?;

        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError::Smtp(format!("SMTP task panicked: {e}")))?
            .map_err(|e| DeliveryError::Smtp(e.to_string()))?;

        info!(
            from_name,
            from_address,
            code = %response.code(),
            "Successfully sent email"
        );
        Ok(())
    }
}

// ── Message building ────────────────────────────────────────────────

fn parse_address(address: &str) -> Result<Address, DeliveryError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn mailbox(name: &str, address: Address) -> Mailbox {
    let name = name.trim();
    Mailbox::new((!name.is_empty()).then(|| name.to_string()), address)
}

/// Build the outgoing message.
///
/// Reply-To is always the submitter. From is the submitter too unless a
/// trusted sender address is configured, in which case only the display
/// name is carried over.
pub fn build_message(
    config: &EmailConfig,
    from_name: &str,
    from_address: &str,
    subject: &str,
    body: &str,
) -> Result<Message, DeliveryError> {
    let submitter = parse_address(from_address)?;
    let from = match &config.sender_address {
        Some(trusted) => mailbox(from_name, parse_address(trusted)?),
        None => mailbox(from_name, submitter.clone()),
    };
    let to = mailbox(
        &config.recipient_name,
        parse_address(&config.recipient_address)?,
    );

    Message::builder()
        .from(from)
        .reply_to(mailbox(from_name, submitter))
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| DeliveryError::Smtp(format!("Failed to build email: {e}")))
}
