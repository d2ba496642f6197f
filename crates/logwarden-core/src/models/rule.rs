//! Rule data model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// A named threshold check against a log query over a sliding window.
///
/// Rules are loaded once at startup and shared read-only (behind `Arc`)
/// by every task of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Unique rule name; also the alert state key
    pub name: String,

    /// Log group the query runs against
    pub log_group: String,

    /// Match count at or above which the rule is in alert
    pub num_events: i64,

    /// Lookback window ending at query submission time
    #[serde(with = "humantime_serde")]
    pub timeframe: Duration,

    /// Backend query text
    pub query: String,

    /// Notification target (SNS topic ARN)
    pub target: String,

    /// Whether recovering to OK sends a notification
    pub notify_ok: bool,
}

impl Rule {
    /// Create a rule with a threshold of one event over the last five minutes
    pub fn new(
        name: impl Into<String>,
        log_group: impl Into<String>,
        query: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            log_group: log_group.into(),
            num_events: 1,
            timeframe: Duration::from_secs(300),
            query: query.into(),
            target: target.into(),
            notify_ok: false,
        }
    }

    /// Set the alert threshold
    pub fn with_threshold(mut self, num_events: i64) -> Self {
        self.num_events = num_events;
        self
    }

    /// Set the lookback window
    pub fn with_timeframe(mut self, timeframe: Duration) -> Self {
        self.timeframe = timeframe;
        self
    }

    /// Enable or disable recovery notifications
    pub fn with_notify_ok(mut self, notify_ok: bool) -> Self {
        self.notify_ok = notify_ok;
        self
    }

    /// Query window `[now - timeframe, now]`.
    ///
    /// Fails when the start falls outside the representable time range.
    pub fn window(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = chrono::Duration::from_std(self.timeframe)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .ok_or_else(|| {
                Error::validation(format!(
                    "rule {}: timeframe {} is out of range",
                    self.name,
                    humantime::format_duration(self.timeframe)
                ))
            })?;
        Ok((start, now))
    }

    /// Check if a match count puts this rule in alert
    pub fn is_breached(&self, matched: i64) -> bool {
        matched >= self.num_events
    }
}
