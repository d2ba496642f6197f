//! Message template rendering
//!
//! Templates are minijinja strings from the config file. The context exposes
//! the rule, the query result and the notification kind:
//!
//! ```text
//! {{ rule.name }} matched {{ result.matched }} events in {{ rule.timeframe }} ({{ state }})
//! ```

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{NotificationEvent, NotificationKind, QueryResult, Rule};

/// Renders a message body for a notification event
pub trait TemplateRenderer: Send + Sync {
    /// Render `template` against the event
    fn render(&self, template: &str, event: &NotificationEvent) -> Result<String>;
}

/// Values available to message templates
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    pub rule: &'a Rule,
    pub result: &'a QueryResult,
    /// `"alert"` or `"recovery"`
    pub kind: NotificationKind,
    /// `"Alert"` or `"Ok"`
    pub state: &'static str,
    /// RFC 3339 timestamp the alert opened at
    pub alerting_since: Option<String>,
    /// RFC 3339 render time
    pub now: String,
}

impl<'a> TemplateContext<'a> {
    /// Build the context for an event
    pub fn new(event: &'a NotificationEvent) -> Self {
        Self {
            rule: event.rule(),
            result: &event.result,
            kind: event.kind,
            state: event.kind.state_label(),
            alerting_since: event.alerting_since.map(|t| t.to_rfc3339()),
            now: Utc::now().to_rfc3339(),
        }
    }
}

/// minijinja renderer.
///
/// A fresh [`minijinja::Environment`] is built per call since templates are
/// plain strings rather than registered files.
#[derive(Debug, Default)]
pub struct MiniJinjaRenderer {
    _private: (),
}

impl MiniJinjaRenderer {
    /// Create a new renderer
    pub fn new() -> Self {
        Self::default()
    }

    fn build_env<'source>() -> minijinja::Environment<'source> {
        let mut env = minijinja::Environment::new();
        env.add_filter("truncate_chars", truncate_chars);
        env
    }

    /// Check template syntax without rendering it
    pub fn validate(&self, template: &str) -> Result<()> {
        Self::build_env()
            .template_from_str(template)
            .map_err(|e| Error::template(e.to_string()))?;
        Ok(())
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template: &str, event: &NotificationEvent) -> Result<String> {
        Self::build_env()
            .render_str(template, TemplateContext::new(event))
            .map_err(|e| Error::template(e.to_string()))
    }
}

/// Filter: cut a string to `max` characters, appending an ellipsis when cut
fn truncate_chars(value: String, max: usize) -> String {
    if value.chars().count() <= max {
        return value;
    }
    let mut out: String = value.chars().take(max).collect();
    out.push('…');
    out
}
