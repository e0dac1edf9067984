use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport, Message,
    Tokio1Executor,
};

use crate::settings::EmailSettings;

/// Hands a composed message to a mail server.
#[async_trait]
pub trait MailRelay: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<()>;
}

/// SMTP submission with mandatory STARTTLS and password auth. Each message
/// opens and closes its own session.
pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpRelay {
    pub fn new(settings: &EmailSettings) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .with_context(|| format!("invalid SMTP server '{}'", settings.smtp_server))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.smtp_user.clone(),
                settings.smtp_password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            server: format!("{}:{}", settings.smtp_server, settings.smtp_port),
        })
    }
}

#[async_trait]
impl MailRelay for SmtpRelay {
    async fn deliver(&self, message: Message) -> Result<()> {
        self.transport
            .send(message)
            .await
            .with_context(|| format!("SMTP delivery via {} failed", self.server))?;
        Ok(())
    }
}
