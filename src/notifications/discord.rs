//! Discord channel (spec.md §4.7, §6 "Discord payload").
//!
//! Sends an embed via incoming webhook, same transport shape as
//! [`super::teams::TeamsChannel`]. Discord's embed `color` field is a
//! decimal integer, not a hex string, so the shared hex palette is
//! reparsed here.

use super::teams::{classify_reqwest_error, is_transient_status};
use super::{Channel, NotificationEvent, RenderedContent};
use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::ChannelId;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct DiscordChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url: String::new(),
        }
    }
}

impl Default for DiscordChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_to_decimal(hex: &str) -> u32 {
    u32::from_str_radix(hex.trim_start_matches('#'), 16).unwrap_or(0)
}

#[async_trait]
impl Channel for DiscordChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Discord
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError> {
        let url = cfg.notifications.discord.webhook_url.clone().ok_or_else(|| {
            DispatchError::Permanent {
                channel: "discord".to_string(),
                message: "notifications.discord.webhook_url is not set".to_string(),
            }
        })?;
        self.webhook_url = url;
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError> {
        let color = hex_to_decimal(super::templates::color_for(event.severity));
        let body = json!({
            "embeds": [{
                "title": content.title,
                "description": content.message,
                "color": color,
                "timestamp": chrono::DateTime::from_timestamp(event.timestamp, 0)
                    .map(|dt| dt.to_rfc3339()),
            }],
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error("discord", e))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            status if is_transient_status(status) => Err(DispatchError::Transient {
                channel: "discord".to_string(),
                message: format!("HTTP {status}"),
            }),
            status => Err(DispatchError::Permanent {
                channel: "discord".to_string(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_to_decimal_converts_known_color() {
        assert_eq!(hex_to_decimal("#FF0000"), 0xFF0000);
    }

    #[test]
    fn configure_requires_webhook_url() {
        let mut channel = DiscordChannel::new();
        let cfg = RootConfig::default();
        assert!(channel.configure(&cfg).is_err());
    }
}
