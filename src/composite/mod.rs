//! Composite Evaluator (spec.md §4.5, component C5).
//!
//! A small boolean expression language over `<plugin>.<attribute>`
//! comparisons, evaluated with three-valued Kleene logic so a missing
//! plugin or attribute degrades to UNKNOWN rather than panicking or
//! silently defaulting to false. Rule files are one-rule-per-TOML-document
//! under `composite_checks.config_directory`, matching the teacher's
//! one-struct-per-document configuration style.

mod parser;

use crate::error::CompositeError;
use crate::types::{AttributeValue, Reading, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Leaf {
        plugin: String,
        attribute: String,
        op: CompareOp,
        scalar: Scalar,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Three-valued Kleene logic value (spec.md "Kleene three-valued logic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    True,
    False,
    Unknown,
}

impl Tri {
    fn and(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::False, _) | (_, Tri::False) => Tri::False,
            (Tri::True, Tri::True) => Tri::True,
            _ => Tri::Unknown,
        }
    }

    fn or(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::True, _) | (_, Tri::True) => Tri::True,
            (Tri::False, Tri::False) => Tri::False,
            _ => Tri::Unknown,
        }
    }

    fn not(self) -> Tri {
        match self {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
        }
    }

    pub fn fires(self) -> bool {
        matches!(self, Tri::True)
    }
}

fn resolve_attribute(
    readings: &HashMap<String, Reading>,
    plugin: &str,
    attribute: &str,
) -> Option<AttributeValue> {
    let reading = readings.get(plugin)?;
    if attribute == "value" {
        return reading.value.map(AttributeValue::Number);
    }
    reading.attributes.get(attribute).cloned()
}

fn compare(actual: &AttributeValue, op: CompareOp, scalar: &Scalar) -> Tri {
    match op {
        CompareOp::Eq => bool_tri(actual.to_string() == scalar.to_string()),
        CompareOp::Ne => bool_tri(actual.to_string() != scalar.to_string()),
        _ => {
            let (AttributeValue::Number(a), Scalar::Number(b)) = (actual, scalar) else {
                return Tri::Unknown;
            };
            bool_tri(match op {
                CompareOp::Gt => a > b,
                CompareOp::Lt => a < b,
                CompareOp::Ge => a >= b,
                CompareOp::Le => a <= b,
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            })
        }
    }
}

fn bool_tri(b: bool) -> Tri {
    if b {
        Tri::True
    } else {
        Tri::False
    }
}

/// Evaluate `expr` against the latest per-plugin readings of the current
/// tick (spec.md §4.5 "Resolution").
pub fn eval(expr: &Expr, readings: &HashMap<String, Reading>) -> Tri {
    match expr {
        Expr::Leaf {
            plugin,
            attribute,
            op,
            scalar,
        } => match resolve_attribute(readings, plugin, attribute) {
            Some(actual) => compare(&actual, *op, scalar),
            None => Tri::Unknown,
        },
        Expr::And(l, r) => eval(l, readings).and(eval(r, readings)),
        Expr::Or(l, r) => eval(l, readings).or(eval(r, readings)),
        Expr::Not(e) => eval(e, readings).not(),
    }
}

/// Substitute `{<plugin>.<attribute>}` placeholders in a trigger-message
/// template (spec.md §4.5 "Templating").
pub fn render_template(template: &str, readings: &HashMap<String, Reading>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < template.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let token = &template[i + 1..i + end];
                if let Some((plugin, attribute)) = token.split_once('.') {
                    let rendered = resolve_attribute(readings, plugin, attribute)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "UNKNOWN".to_string());
                    out.push_str(&rendered);
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

// ============================================================================
// Rule definitions and loading
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_cooldown")]
    pub cooldown: i64,
    pub rule: String,
    #[serde(default = "default_true")]
    pub notify_on_trigger: bool,
    #[serde(default)]
    pub notify_on_recovery: bool,
    #[serde(default)]
    pub notification_message: String,
}

fn default_true() -> bool {
    true
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_cooldown() -> i64 {
    600
}

#[derive(Debug, Clone)]
pub struct CompositeRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub severity: Severity,
    pub cooldown_seconds: i64,
    pub expr: Expr,
    pub notify_on_trigger: bool,
    pub notify_on_recovery: bool,
    pub notification_message: String,
}

impl CompositeRule {
    pub fn from_file(id: impl Into<String>, file: RuleFile) -> Result<Self, CompositeError> {
        let id = id.into();
        let expr = parser::parse(&id, &file.rule)?;
        Ok(Self {
            id,
            name: file.name,
            description: file.description,
            enabled: file.enabled,
            severity: file.severity,
            cooldown_seconds: file.cooldown,
            expr,
            notify_on_trigger: file.notify_on_trigger,
            notify_on_recovery: file.notify_on_recovery,
            notification_message: file.notification_message,
        })
    }

    /// Invariant from spec.md §3: every referenced plugin exists and every
    /// referenced attribute is one the plugin is declared to produce.
    pub fn validate_against(
        &self,
        catalog: &HashMap<String, HashSet<String>>,
    ) -> Result<(), CompositeError> {
        validate_expr(&self.id, &self.expr, catalog)
    }

    pub fn eval(&self, readings: &HashMap<String, Reading>) -> Tri {
        eval(&self.expr, readings)
    }

    pub fn render_message(&self, readings: &HashMap<String, Reading>) -> String {
        render_template(&self.notification_message, readings)
    }
}

fn validate_expr(
    rule_id: &str,
    expr: &Expr,
    catalog: &HashMap<String, HashSet<String>>,
) -> Result<(), CompositeError> {
    match expr {
        Expr::Leaf {
            plugin, attribute, ..
        } => {
            let attrs = catalog
                .get(plugin)
                .ok_or_else(|| CompositeError::UnknownPlugin(rule_id.to_string(), plugin.clone()))?;
            if attribute != "value" && !attrs.contains(attribute) {
                return Err(CompositeError::UnknownAttribute(
                    rule_id.to_string(),
                    plugin.clone(),
                    attribute.clone(),
                ));
            }
            Ok(())
        }
        Expr::And(l, r) | Expr::Or(l, r) => {
            validate_expr(rule_id, l, catalog)?;
            validate_expr(rule_id, r, catalog)
        }
        Expr::Not(e) => validate_expr(rule_id, e, catalog),
    }
}

/// Load every `*.toml` file in `dir` as a one-rule-per-file composite rule.
/// The rule id is the file stem. Missing directory yields an empty set
/// (composite checks are opt-in via `composite_checks.enabled`).
pub fn load_rules_from_dir(dir: &Path) -> Result<Vec<CompositeRule>, CompositeError> {
    let mut rules = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(rules),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("rule")
            .to_string();
        let contents = std::fs::read_to_string(&path).map_err(|e| CompositeError::Parse {
            rule: id.clone(),
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let file: RuleFile = toml::from_str(&contents).map_err(|e| CompositeError::Parse {
            rule: id.clone(),
            message: e.to_string(),
        })?;
        rules.push(CompositeRule::from_file(id, file)?);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn reading(plugin: &str, value: f64) -> Reading {
        Reading::new(plugin, 0, value)
    }

    #[test]
    fn all_unknown_leaves_yield_unknown() {
        let expr = parser::parse("r", "cpu.value > 1 AND memory.value > 1").unwrap();
        let readings = HashMap::new();
        assert_eq!(eval(&expr, &readings), Tri::Unknown);
    }

    #[test]
    fn kleene_and_table() {
        assert_eq!(Tri::Unknown.and(Tri::False), Tri::False);
        assert_eq!(Tri::Unknown.and(Tri::True), Tri::Unknown);
    }

    #[test]
    fn kleene_or_table() {
        assert_eq!(Tri::Unknown.or(Tri::True), Tri::True);
        assert_eq!(Tri::Unknown.or(Tri::False), Tri::Unknown);
    }

    #[test]
    fn kleene_not_table() {
        assert_eq!(Tri::Unknown.not(), Tri::Unknown);
    }

    #[test]
    fn composite_rule_scenario_from_spec() {
        let expr =
            parser::parse("r", "(cpu.value > 90 OR memory.value > 95) AND disk.value > 90").unwrap();
        let mut readings = HashMap::new();
        readings.insert("cpu".to_string(), reading("cpu", 92.0));
        readings.insert("memory".to_string(), reading("memory", 50.0));
        readings.insert("disk".to_string(), reading("disk", 91.0));
        assert_eq!(eval(&expr, &readings), Tri::True);
    }

    #[test]
    fn missing_attribute_is_unknown_not_false() {
        let expr = parser::parse("r", "cpu.missing_attr > 1").unwrap();
        let mut readings = HashMap::new();
        readings.insert("cpu".to_string(), reading("cpu", 50.0));
        assert_eq!(eval(&expr, &readings), Tri::Unknown);
    }

    #[test]
    fn template_renders_resolved_and_unknown_placeholders() {
        let mut readings = HashMap::new();
        readings.insert("cpu".to_string(), reading("cpu", 92.5));
        let out = render_template("cpu at {cpu.value}, mem at {memory.value}", &readings);
        assert_eq!(out, "cpu at 92.5, mem at UNKNOWN");
    }

    #[test]
    fn validate_against_catches_unknown_plugin_and_attribute() {
        let mut catalog = HashMap::new();
        catalog.insert("cpu".to_string(), HashSet::from(["value".to_string()]));
        let rule = CompositeRule::from_file(
            "r1",
            RuleFile {
                name: "r1".into(),
                description: String::new(),
                enabled: true,
                severity: Severity::Warning,
                cooldown: 60,
                rule: "cpu.bogus > 1".into(),
                notify_on_trigger: true,
                notify_on_recovery: false,
                notification_message: String::new(),
            },
        )
        .unwrap();
        assert!(rule.validate_against(&catalog).is_err());

        let rule2 = CompositeRule::from_file(
            "r2",
            RuleFile {
                name: "r2".into(),
                description: String::new(),
                enabled: true,
                severity: Severity::Warning,
                cooldown: 60,
                rule: "unknownplugin.value > 1".into(),
                notify_on_trigger: true,
                notify_on_recovery: false,
                notification_message: String::new(),
            },
        )
        .unwrap();
        assert!(rule2.validate_against(&catalog).is_err());

        let _ = Status::Ok;
    }
}
