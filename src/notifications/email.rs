//! Email channel (spec.md §4.7, §6 "Email").
//!
//! SMTP transport via `lettre::AsyncSmtpTransport<Tokio1Executor>`, the one
//! notification dependency with no teacher precedent — the teacher only
//! ever talks to its own fleet hub over HTTP, so this is grounded on
//! `lettre`'s own async-SMTP example rather than an in-repo pattern.

use super::{Channel, NotificationEvent, RenderedContent};
use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::ChannelId;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct EmailChannel {
    from: String,
    to: String,
    smtp_server: String,
    smtp_port: u16,
    credentials: Option<Credentials>,
}

impl EmailChannel {
    pub fn new() -> Self {
        Self {
            from: String::new(),
            to: String::new(),
            smtp_server: String::new(),
            smtp_port: 587,
            credentials: None,
        }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DispatchError> {
        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp_server)
            .map_err(|e| DispatchError::Permanent {
                channel: "email".to_string(),
                message: format!("invalid smtp relay '{}': {e}", self.smtp_server),
            })?
            .port(self.smtp_port);
        let builder = match &self.credentials {
            Some(creds) => builder.credentials(creds.clone()),
            None => builder,
        };
        Ok(builder.build())
    }
}

impl Default for EmailChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Email
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError> {
        let email_cfg = &cfg.notifications.email;
        let missing = |field: &str| DispatchError::Permanent {
            channel: "email".to_string(),
            message: format!("notifications.email.{field} is not set"),
        };
        self.from = email_cfg.from.clone().ok_or_else(|| missing("from"))?;
        self.to = email_cfg.to.clone().ok_or_else(|| missing("to"))?;
        self.smtp_server = email_cfg.smtp_server.clone().ok_or_else(|| missing("smtp_server"))?;
        self.smtp_port = email_cfg.smtp_port.unwrap_or(587);
        self.credentials = match (&email_cfg.username, &email_cfg.password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        };
        Ok(())
    }

    async fn send(&self, _event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError> {
        let email = Message::builder()
            .from(self.from.parse().map_err(|e| DispatchError::Permanent {
                channel: "email".to_string(),
                message: format!("invalid from address '{}': {e}", self.from),
            })?)
            .to(self.to.parse().map_err(|e| DispatchError::Permanent {
                channel: "email".to_string(),
                message: format!("invalid to address '{}': {e}", self.to),
            })?)
            .subject(&content.title)
            .header(ContentType::TEXT_PLAIN)
            .body(content.message.clone())
            .map_err(|e| DispatchError::Permanent {
                channel: "email".to_string(),
                message: format!("failed to build message: {e}"),
            })?;

        let transport = self.build_transport()?;
        transport.send(email).await.map_err(|e| {
            if is_transient_smtp(&e) {
                DispatchError::Transient {
                    channel: "email".to_string(),
                    message: e.to_string(),
                }
            } else {
                DispatchError::Permanent {
                    channel: "email".to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        Ok(())
    }
}

/// Connection and mailbox-temporarily-unavailable failures are retried;
/// authentication/permanent-rejection failures are not (spec.md §4.7
/// "Transient retry").
fn is_transient_smtp(e: &lettre::transport::smtp::Error) -> bool {
    e.is_transient() || e.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_requires_from_to_and_server() {
        let mut channel = EmailChannel::new();
        let cfg = RootConfig::default();
        assert!(channel.configure(&cfg).is_err());
    }

    #[test]
    fn configure_defaults_port_when_unset() {
        let mut channel = EmailChannel::new();
        let mut cfg = RootConfig::default();
        cfg.notifications.email.from = Some("alerts@example.test".to_string());
        cfg.notifications.email.to = Some("oncall@example.test".to_string());
        cfg.notifications.email.smtp_server = Some("smtp.example.test".to_string());
        channel.configure(&cfg).unwrap();
        assert_eq!(channel.smtp_port, 587);
    }

    #[test]
    fn configure_builds_credentials_only_when_both_present() {
        let mut channel = EmailChannel::new();
        let mut cfg = RootConfig::default();
        cfg.notifications.email.from = Some("alerts@example.test".to_string());
        cfg.notifications.email.to = Some("oncall@example.test".to_string());
        cfg.notifications.email.smtp_server = Some("smtp.example.test".to_string());
        cfg.notifications.email.username = Some("user".to_string());
        channel.configure(&cfg).unwrap();
        assert!(channel.credentials.is_none());
    }
}
