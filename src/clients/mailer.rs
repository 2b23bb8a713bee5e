use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl OutgoingEmail {
    pub fn password_reset(to: &str, reset_url: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Password Reset Request".to_string(),
            text: format!(
                "You requested a password reset. Open the link below to choose a new password:\n\n{reset_url}\n\nThe link expires in one hour. If you did not request this, ignore this email."
            ),
            html: format!(
                "<p>You requested a password reset.</p>\
                 <p><a href=\"{reset_url}\">Reset your password</a></p>\
                 <p>The link expires in one hour. If you did not request this, ignore this email.</p>"
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// Delivers mail through a plain SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, from: &str) -> Result<Self, MailError> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|_| MailError::Address(from.to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Ok(Self { transport, from })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, MailError> {
        Self::new(&config.smtp_host, config.smtp_port, &config.mail_from)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|_| MailError::Address(email.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))?;

        self.transport.send(message).await?;
        Ok(())
    }
}
