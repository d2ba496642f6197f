//! Alert state and notification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QueryResult, Rule};

/// Open alert for one rule. At most one exists per rule name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Rule name (store key)
    pub rule_name: String,

    /// Always true while the record exists
    pub alerting: bool,

    /// When the rule entered alert
    pub since: DateTime<Utc>,
}

impl AlertRecord {
    /// Create a record for a rule entering alert now
    pub fn open(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            alerting: true,
            since: Utc::now(),
        }
    }
}

/// Alert state of a rule, derived from presence of an [`AlertRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// An alert record exists
    Alerting,
    /// No alert record
    #[default]
    NotAlerting,
}

/// Transition a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// OK -> Alert
    Alert,
    /// Alert -> OK
    Recovery,
}

impl NotificationKind {
    /// Subject line for a rule's notification
    pub fn subject(self, rule_name: &str) -> String {
        match self {
            Self::Alert => format!("[ALERT] rule {rule_name} is in alert state"),
            Self::Recovery => format!("[OK] rule {rule_name} has recovered from alert state"),
        }
    }

    /// State label exposed to message templates
    pub fn state_label(self) -> &'static str {
        match self {
            Self::Alert => "Alert",
            Self::Recovery => "Ok",
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Recovery => "recovery",
        }
    }
}

/// A decided notification, produced once per qualifying transition
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub result: QueryResult,
    /// When the alert opened, if known
    pub alerting_since: Option<DateTime<Utc>>,
}

impl NotificationEvent {
    /// Rule the event belongs to
    pub fn rule(&self) -> &Rule {
        &self.result.rule
    }

    /// Subject line for this event
    pub fn subject(&self) -> String {
        self.kind.subject(&self.rule().name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(
            NotificationKind::Alert.subject("cpu-high"),
            "[ALERT] rule cpu-high is in alert state"
        );
        assert_eq!(
            NotificationKind::Recovery.subject("cpu-high"),
            "[OK] rule cpu-high has recovered from alert state"
        );
    }

    #[test]
    fn test_open_record_is_alerting() {
        let record = AlertRecord::open("disk-full");
        assert_eq!(record.rule_name, "disk-full");
        assert!(record.alerting);
    }
}
