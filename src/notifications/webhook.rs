//! Generic webhook channel (spec.md §6 "Webhook JSON envelope").
//!
//! Unlike the chat-card channels this one posts a fixed, documented JSON
//! shape rather than a provider-specific payload, so consumers (including
//! Teams via its own generic-webhook connector) can parse it without
//! knowing which built-in channel produced it.

use super::teams::{classify_reqwest_error, is_transient_status};
use super::{Channel, NotificationEvent, RenderedContent};
use crate::config::RootConfig;
use crate::error::DispatchError;
use crate::types::ChannelId;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{Disks, System};

#[derive(Debug, Serialize)]
pub struct AdaptiveCardFact {
    pub title: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct AdaptiveCard {
    #[serde(rename = "type")]
    pub card_type: &'static str,
    pub version: &'static str,
    pub body: Vec<AdaptiveCardTextBlock>,
}

#[derive(Debug, Serialize)]
pub struct AdaptiveCardTextBlock {
    #[serde(rename = "type")]
    pub block_type: &'static str,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAttachment {
    #[serde(rename = "contentType")]
    pub content_type: &'static str,
    pub content: AdaptiveCard,
}

/// Exact field set from spec.md §6 "Webhook JSON envelope".
#[derive(Debug, Serialize)]
pub struct WebhookEnvelope {
    pub title: String,
    pub message: String,
    pub hostname: String,
    pub ip: String,
    pub timestamp: String,
    pub source: &'static str,
    pub os: String,
    pub kernel: String,
    pub uptime: u64,
    pub loadavg: [f64; 3],
    pub cpu: String,
    pub cpu_usage: f32,
    pub memory: String,
    pub memory_usage: f64,
    pub disk: String,
    pub disk_usage: f64,
    pub status: &'static str,
    pub content: AdaptiveCard,
    pub attachments: Vec<WebhookAttachment>,
}

pub struct WebhookChannel {
    http: reqwest::Client,
    url: String,
    disk_mount: PathBuf,
}

impl WebhookChannel {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: String::new(),
            disk_mount: PathBuf::from("/"),
        }
    }
}

impl Default for WebhookChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn status_word(event: &NotificationEvent) -> &'static str {
    use crate::types::EventKind;
    match event.event_kind {
        EventKind::Alert => "alert",
        EventKind::Info => "info",
        EventKind::Test => "test",
        EventKind::Recovery => "recovery",
    }
}

fn build_envelope(event: &NotificationEvent, content: &RenderedContent, disk_mount: &PathBuf) -> WebhookEnvelope {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();
    let load = System::load_average();
    let total_mem = sys.total_memory() as f64;
    let used_mem = sys.used_memory() as f64;
    let memory_usage = if total_mem > 0.0 { used_mem / total_mem * 100.0 } else { 0.0 };
    let cpu_usage = sys.global_cpu_info().cpu_usage();

    let disks = Disks::new_with_refreshed_list();
    let matched = disks
        .iter()
        .filter(|d| disk_mount.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());
    let disk_usage = match matched {
        Some(d) if d.total_space() > 0 => {
            (d.total_space() - d.available_space()) as f64 / d.total_space() as f64 * 100.0
        }
        _ => 0.0,
    };

    let card = AdaptiveCard {
        card_type: "AdaptiveCard",
        version: "1.2",
        body: vec![
            AdaptiveCardTextBlock {
                block_type: "TextBlock",
                text: content.title.clone(),
            },
            AdaptiveCardTextBlock {
                block_type: "TextBlock",
                text: content.message.clone(),
            },
        ],
    };

    WebhookEnvelope {
        title: content.title.clone(),
        message: content.message.clone(),
        hostname: super::hostname(),
        ip: local_ip_guess(),
        timestamp: chrono::DateTime::from_timestamp(event.timestamp, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        source: "ServerSentry",
        os: System::name().unwrap_or_else(|| "unknown".to_string()),
        kernel: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
        uptime: System::uptime(),
        loadavg: [load.one, load.five, load.fifteen],
        cpu: format!("{:.1}%", cpu_usage),
        cpu_usage,
        memory: format!("{:.1}%", memory_usage),
        memory_usage,
        disk: format!("{:.1}%", disk_usage),
        disk_usage,
        status: status_word(event),
        attachments: vec![WebhookAttachment {
            content_type: "application/vnd.microsoft.card.adaptive",
            content: card,
        }],
        content: AdaptiveCard {
            card_type: "AdaptiveCard",
            version: "1.2",
            body: vec![AdaptiveCardTextBlock {
                block_type: "TextBlock",
                text: content.message.clone(),
            }],
        },
    }
}

fn local_ip_guess() -> String {
    "0.0.0.0".to_string()
}

#[async_trait]
impl Channel for WebhookChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Webhook
    }

    fn configure(&mut self, cfg: &RootConfig) -> Result<(), DispatchError> {
        let url = cfg.notifications.webhook.url.clone().ok_or_else(|| DispatchError::Permanent {
            channel: "webhook".to_string(),
            message: "notifications.webhook.url is not set".to_string(),
        })?;
        self.url = url;
        self.disk_mount = PathBuf::from(&cfg.plugins.disk.mount);
        Ok(())
    }

    async fn send(&self, event: &NotificationEvent, content: &RenderedContent) -> Result<(), DispatchError> {
        let envelope = build_envelope(event, content, &self.disk_mount);
        let resp = self
            .http
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| classify_reqwest_error("webhook", e))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            status if is_transient_status(status) => Err(DispatchError::Transient {
                channel: "webhook".to_string(),
                message: format!("HTTP {status}"),
            }),
            status => Err(DispatchError::Permanent {
                channel: "webhook".to_string(),
                message: format!("HTTP {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, Severity, SourceKind, Status};

    #[test]
    fn envelope_carries_fixed_source_tag_and_status_word() {
        let event = NotificationEvent {
            severity: Severity::High,
            source_kind: SourceKind::Plugin,
            source_id: "cpu".to_string(),
            status: Status::Critical,
            status_message: "cpu at 97%".to_string(),
            reading: None,
            event_kind: EventKind::Alert,
            timestamp: 0,
            targets: None,
        };
        let content = RenderedContent {
            title: "CRITICAL: cpu".to_string(),
            message: "cpu at 97%".to_string(),
        };
        let envelope = build_envelope(&event, &content, &PathBuf::from("/"));
        assert_eq!(envelope.source, "ServerSentry");
        assert_eq!(envelope.status, "alert");
        assert_eq!(envelope.attachments.len(), 1);
    }

    #[test]
    fn configure_requires_url() {
        let mut channel = WebhookChannel::new();
        let cfg = RootConfig::default();
        assert!(channel.configure(&cfg).is_err());
    }
}
