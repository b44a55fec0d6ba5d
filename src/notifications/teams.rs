//! Microsoft Teams channel (spec.md §4.7, §6 "Teams payload").
//!
//! Sends a legacy MessageCard via incoming webhook, grounded on the
//! `reqwest::Client::builder().timeout(..)` + `match resp.status()` pattern
//! in `fleet/client.rs`.

use super::{Channel, NotificationEvent, RenderedContent};
use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::ChannelId;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct TeamsChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl TeamsChannel {
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

impl Default for TeamsChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TeamsChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Teams
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError> {
        let url = cfg.notifications.teams.webhook_url.clone().ok_or_else(|| {
            DispatchError::Permanent {
                channel: "teams".to_string(),
                message: "notifications.teams.webhook_url is not set".to_string(),
            }
        })?;
        self.webhook_url = url;
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError> {
        let color = super::templates::color_for(event.severity).trim_start_matches('#');
        let body = json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": color,
            "summary": content.title,
            "title": content.title,
            "text": content.message,
            "sections": [{
                "facts": metric_facts(event),
            }],
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error("teams", e))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            status if is_transient_status(status) => Err(DispatchError::Transient {
                channel: "teams".to_string(),
                message: format!("HTTP {status}"),
            }),
            status => Err(DispatchError::Permanent {
                channel: "teams".to_string(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}

/// Builds the MessageCard facts set: source, status and (when a reading is
/// attached) its value and every sampled attribute, each as a `{name,value}`
/// pair.
fn metric_facts(event: &NotificationEvent) -> Vec<serde_json::Value> {
    let mut facts = vec![
        json!({"name": "Source", "value": event.source_id}),
        json!({"name": "Status", "value": event.status.to_string()}),
        json!({"name": "Severity", "value": event.severity.to_string()}),
    ];
    if let Some(reading) = &event.reading {
        if let Some(value) = reading.value {
            facts.push(json!({"name": "Value", "value": value}));
        }
        for (key, value) in &reading.attributes {
            facts.push(json!({"name": key, "value": value.to_string()}));
        }
    }
    facts
}

/// 5xx and 429 are treated as transient (spec.md §4.7 "Transient retry");
/// every other 4xx is permanent.
pub(super) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

pub(super) fn classify_reqwest_error(channel: &str, e: reqwest::Error) -> DispatchError {
    if e.is_timeout() || e.is_connect() {
        DispatchError::Transient {
            channel: channel.to_string(),
            message: e.to_string(),
        }
    } else {
        DispatchError::Permanent {
            channel: channel.to_string(),
            message: e.to_string(),
        }
    }
}
