//! Notification template table (spec.md §3 "Notification template").
//!
//! Templates are keyed by `(channel, event-kind)`; resolution falls back
//! `(channel, event) -> (channel, generic) -> (event, generic) -> global
//! default` exactly as spec.md prescribes. Placeholder substitution uses
//! the fixed `{placeholder}` vocabulary built by `vars_for_event`.

use crate::types::{ChannelId, EventKind, Severity, Status};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TemplatePair {
    pub title: String,
    pub message: String,
}

/// A table of `(channel, event)` -> template, with a global fallback.
pub struct TemplateTable {
    entries: HashMap<(Option<ChannelId>, Option<EventKind>), TemplatePair>,
    default: TemplatePair,
}

impl TemplateTable {
    /// Built-in defaults; every channel/event combination not explicitly
    /// overridden here falls through to the global default below.
    pub fn built_in() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            (None, Some(EventKind::Alert)),
            TemplatePair {
                title: "{status_text}: {plugin_name}".to_string(),
                message: "{plugin_name} is {status_text} on {hostname} at {timestamp}: {status_message}"
                    .to_string(),
            },
        );
        entries.insert(
            (None, Some(EventKind::Recovery)),
            TemplatePair {
                title: "RECOVERED: {plugin_name}".to_string(),
                message: "{plugin_name} recovered to OK on {hostname} at {timestamp}".to_string(),
            },
        );
        entries.insert(
            (None, Some(EventKind::Test)),
            TemplatePair {
                title: "Test notification".to_string(),
                message: "This is a test notification from {hostname} sent at {timestamp}."
                    .to_string(),
            },
        );
        entries.insert(
            (None, Some(EventKind::Info)),
            TemplatePair {
                title: "{plugin_name}: info".to_string(),
                message: "{status_message}".to_string(),
            },
        );
        Self {
            entries,
            default: TemplatePair {
                title: "{status_text}: {plugin_name}".to_string(),
                message: "{status_message}".to_string(),
            },
        }
    }

    /// Override or add a `(channel, event)` template, e.g. from config.
    pub fn set(&mut self, channel: Option<ChannelId>, event: Option<EventKind>, pair: TemplatePair) {
        self.entries.insert((channel, event), pair);
    }

    /// Resolve per spec.md §3's fallback order.
    pub fn resolve(&self, channel: ChannelId, event: EventKind) -> &TemplatePair {
        self.entries
            .get(&(Some(channel), Some(event)))
            .or_else(|| self.entries.get(&(Some(channel), None)))
            .or_else(|| self.entries.get(&(None, Some(event))))
            .unwrap_or(&self.default)
    }
}

/// Substitute `{placeholder}` tokens from the fixed vocabulary (spec.md §3):
/// hostname, timestamp, status_text, status_code, plugin_name,
/// status_message, metrics, color, uptime, load_avg, timestamp_epoch.
pub fn render(template: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < template.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let token = &template[i + 1..i + end];
                if let Some(value) = vars.get(token) {
                    out.push_str(value);
                    i += end + 1;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

pub fn status_text(status: Status) -> &'static str {
    match status {
        Status::Ok => "OK",
        Status::Warning => "WARNING",
        Status::Critical => "CRITICAL",
        Status::Unknown => "UNKNOWN",
    }
}

pub fn status_code(status: Status) -> u8 {
    match status {
        Status::Ok => 0,
        Status::Warning => 1,
        Status::Critical => 2,
        Status::Unknown => 3,
    }
}

pub fn color_for(severity: Severity) -> &'static str {
    severity.color_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_channel_and_event_specific_template_first() {
        let mut table = TemplateTable::built_in();
        table.set(
            Some(ChannelId::Slack),
            Some(EventKind::Alert),
            TemplatePair {
                title: "slack-specific".to_string(),
                message: "slack-specific body".to_string(),
            },
        );
        let resolved = table.resolve(ChannelId::Slack, EventKind::Alert);
        assert_eq!(resolved.title, "slack-specific");
    }

    #[test]
    fn falls_back_to_event_generic_when_no_channel_override() {
        let table = TemplateTable::built_in();
        let resolved = table.resolve(ChannelId::Teams, EventKind::Recovery);
        assert!(resolved.title.contains("RECOVERED"));
    }

    #[test]
    fn falls_back_to_global_default_for_unknown_combination() {
        let table = TemplateTable::built_in();
        // every event kind is covered by built_in(), so this always resolves
        // to at least the (None, Some(event)) tier, never panics.
        let resolved = table.resolve(ChannelId::Webhook, EventKind::Info);
        assert!(!resolved.message.is_empty());
    }

    #[test]
    fn render_substitutes_known_placeholders_and_leaves_unknown_literal() {
        let mut vars = HashMap::new();
        vars.insert("plugin_name", "cpu".to_string());
        let out = render("{plugin_name} is {status_text}", &vars);
        assert_eq!(out, "cpu is {status_text}");
    }
}
