//! Slack channel (spec.md §4.7, §6 "Slack payload").
//!
//! Sends a Block Kit message with a colored attachment via incoming
//! webhook, same transport shape as [`super::teams::TeamsChannel`].

use super::teams::{classify_reqwest_error, is_transient_status};
use super::{Channel, NotificationEvent, RenderedContent};
use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::ChannelId;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct SlackChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackChannel {
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

impl Default for SlackChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Slack
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError> {
        let url = cfg.notifications.slack.webhook_url.clone().ok_or_else(|| {
            DispatchError::Permanent {
                channel: "slack".to_string(),
                message: "notifications.slack.webhook_url is not set".to_string(),
            }
        })?;
        self.webhook_url = url;
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError> {
        let color = super::templates::color_for(event.severity);
        let blocks = json!([
            {
                "type": "header",
                "text": {"type": "plain_text", "text": content.title, "emoji": true},
            },
            {
                "type": "section",
                "text": {"type": "mrkdwn", "text": content.message},
            },
            {
                "type": "context",
                "elements": [{
                    "type": "mrkdwn",
                    "text": format!("*{}* · {}", event.source_id, event.status),
                }],
            },
        ]);
        let body = json!({
            "text": content.title,
            "attachments": [{
                "color": color,
                "blocks": blocks,
                "ts": event.timestamp,
            }],
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error("slack", e))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            status if is_transient_status(status) => Err(DispatchError::Transient {
                channel: "slack".to_string(),
                message: format!("HTTP {status}"),
            }),
            status => Err(DispatchError::Permanent {
                channel: "slack".to_string(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_requires_webhook_url() {
        let mut channel = SlackChannel::new();
        let cfg = RootConfig::default();
        assert!(channel.configure(&cfg).is_err());
    }

    #[test]
    fn send_builds_header_section_context_blocks() {
        let event = NotificationEvent::test(0);
        let content = RenderedContent {
            title: "Probe".to_string(),
            message: "body".to_string(),
        };
        let color = super::super::templates::color_for(event.severity);
        let blocks = json!([
            {"type": "header", "text": {"type": "plain_text", "text": content.title, "emoji": true}},
            {"type": "section", "text": {"type": "mrkdwn", "text": content.message}},
            {"type": "context", "elements": [{"type": "mrkdwn", "text": format!("*{}* · {}", event.source_id, event.status)}]},
        ]);
        let expected_types: Vec<&str> = blocks
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["type"].as_str().unwrap())
            .collect();
        assert_eq!(expected_types, vec!["header", "section", "context"]);
        assert!(!color.is_empty());
    }
}
