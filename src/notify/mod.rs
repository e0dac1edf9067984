use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    Message,
};
use log::info;
use tempfile::NamedTempFile;

use crate::settings::{EmailSettings, Target};

mod relay;

pub use relay::{MailRelay, SmtpRelay};

pub const ATTACHMENT_NAME: &str = "page_content.html";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announces that `target` changed, carrying the new page content.
    async fn send(&self, target: &Target, content: &str) -> Result<()>;
}

/// Mails a change alert with the new page attached as an HTML file.
pub struct EmailNotifier {
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
    relay: Box<dyn MailRelay>,
    scratch_dir: PathBuf,
}

impl EmailNotifier {
    pub fn new(settings: &EmailSettings, relay: Box<dyn MailRelay>) -> Result<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address '{}'", settings.from))?;
        let to = settings
            .to
            .iter()
            .map(|address| {
                address
                    .parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address '{address}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            from,
            to,
            subject: settings.subject.clone(),
            relay,
            scratch_dir: std::env::temp_dir(),
        })
    }

    /// Directory for the transient attachment file.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn compose(&self, target: &Target, attachment: Vec<u8>) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        let attachment_type = ContentType::parse("application/octet-stream")
            .map_err(|err| anyhow!("invalid attachment content type: {err}"))?;

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(alert_body(target)))
                    .singlepart(
                        Attachment::new(ATTACHMENT_NAME.to_string())
                            .body(attachment, attachment_type),
                    ),
            )
            .context("failed to build alert message")
    }
}

fn alert_body(target: &Target) -> String {
    let mut body = String::from("The content of a watched page has changed.\n\n");
    if target.label() != target.url {
        body.push_str(&format!("Page: {}\n", target.label()));
    }
    body.push_str(&format!("URL: {}\n\n", target.url));
    body.push_str("See the attached HTML file for details.\n");
    body
}

/// Writes the page to a uniquely named file that is removed on drop.
fn stage_attachment(dir: &Path, content: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("page_content")
        .suffix(".html")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create attachment file in {}", dir.display()))?;
    file.write_all(content.as_bytes())
        .context("failed to write attachment file")?;
    file.flush().context("failed to flush attachment file")?;
    Ok(file)
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, target: &Target, content: &str) -> Result<()> {
        let staged = stage_attachment(&self.scratch_dir, content)?;
        let payload = fs::read(staged.path())
            .with_context(|| format!("failed to read {}", staged.path().display()))?;

        let message = self.compose(target, payload)?;
        self.relay.deliver(message).await?;

        info!(
            "Email sent to {} recipient(s) for {}",
            self.to.len(),
            target.url
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingRelay {
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl MailRelay for RecordingRelay {
        async fn deliver(&self, message: Message) -> Result<()> {
            if self.fail {
                return Err(anyhow!("relay refused connection"));
            }
            let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
            self.sent.lock().unwrap().push(raw);
            Ok(())
        }
    }

    fn email_settings() -> EmailSettings {
        EmailSettings {
            from: "monitor@example.com".into(),
            to: vec!["ops@example.com".into(), "oncall@example.com".into()],
            subject: "Page changed".into(),
            smtp_server: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_user: "monitor".into(),
            smtp_password: "secret".into(),
        }
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    /// Decoded body of the MIME part carrying the attachment.
    fn attachment_payload(raw: &str) -> Vec<u8> {
        let part = &raw[raw.find("Content-Disposition: attachment").unwrap()..];
        let body_start = part.find("\r\n\r\n").unwrap() + 4;
        let body = &part[body_start..];
        let body = &body[..body.find("\r\n--").unwrap()];
        let encoded: String = body.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap()
    }

    #[tokio::test]
    async fn composes_body_and_attachment() {
        let scratch = tempfile::tempdir().unwrap();
        let relay = RecordingRelay::default();
        let notifier = EmailNotifier::new(&email_settings(), Box::new(relay.clone()))
            .unwrap()
            .with_scratch_dir(scratch.path());
        let target = Target::new(Some("Pricing"), "https://example.com/pricing");

        notifier.send(&target, "<html>v2</html>").await.unwrap();

        let sent = relay.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let raw = &sent[0];
        assert!(raw.contains("Subject: Page changed"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("https://example.com/pricing"));
        assert!(raw.contains("Page: Pricing"));
        assert!(raw.contains(ATTACHMENT_NAME));
        assert!(raw.contains("application/octet-stream"));
        assert_eq!(attachment_payload(raw), b"<html>v2</html>");
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn attachment_file_is_removed_when_delivery_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let relay = RecordingRelay {
            fail: true,
            ..Default::default()
        };
        let notifier = EmailNotifier::new(&email_settings(), Box::new(relay))
            .unwrap()
            .with_scratch_dir(scratch.path());
        let target = Target::new(None, "https://example.com/a");

        let result = notifier.send(&target, "content").await;

        assert!(result.is_err());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let mut settings = email_settings();
        settings.to = vec!["not an address".into()];

        let result = EmailNotifier::new(&settings, Box::new(RecordingRelay::default()));
        assert!(result.is_err());
    }

    #[test]
    fn body_names_unlabelled_target_by_url() {
        let body = alert_body(&Target::new(None, "https://example.com/a"));
        assert!(body.contains("URL: https://example.com/a\n"));
        assert!(!body.contains("Page:"));
    }
}
