//! Query job types shared between the poller and the log backend

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Rule;
use crate::error::{Error, Result};

/// Largest result limit the backend accepts for a single query
pub const MAX_QUERY_LIMIT: i64 = 10_000;

/// One matched log record, flattened to `field -> value`
pub type LogRecord = BTreeMap<String, String>;

/// A query submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub log_group: String,
    pub query: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: i64,
}

impl QueryRequest {
    /// Build the request for a rule, windowed to end at `now`
    pub fn for_rule(rule: &Rule, now: DateTime<Utc>) -> Result<Self> {
        let (start, end) = rule.window(now)?;
        Ok(Self {
            log_group: rule.log_group.clone(),
            query: rule.query.clone(),
            start,
            end,
            limit: rule.num_events,
        })
    }

    /// Reject requests the backend would refuse
    pub fn validate(&self) -> Result<()> {
        if self.log_group.trim().is_empty() {
            return Err(Error::validation("log group must not be empty"));
        }
        if self.query.trim().is_empty() {
            return Err(Error::validation("query string must not be empty"));
        }
        if !(1..=MAX_QUERY_LIMIT).contains(&self.limit) {
            return Err(Error::validation(format!(
                "limit {} outside 1..={MAX_QUERY_LIMIT}",
                self.limit
            )));
        }
        if self.start >= self.end {
            return Err(Error::validation(format!(
                "empty query window {} .. {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Status of a submitted query job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    /// Anything the backend reports outside the five known states
    Unknown(String),
}

impl QueryStatus {
    /// Whether no further polling happens from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl From<&str> for QueryStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "Scheduled" => Self::Scheduled,
            "Running" => Self::Running,
            "Complete" => Self::Complete,
            "Failed" => Self::Failed,
            "Cancelled" => Self::Cancelled,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("Scheduled"),
            Self::Running => f.write_str("Running"),
            Self::Complete => f.write_str("Complete"),
            Self::Failed => f.write_str("Failed"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Snapshot returned by one poll of a query job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPoll {
    pub status: QueryStatus,
    /// Records matched so far, as counted by the backend
    pub records_matched: i64,
    /// Records scanned so far
    pub records_scanned: i64,
    /// Records returned so far (bounded by the request limit)
    pub records: Vec<LogRecord>,
}

impl QueryPoll {
    /// Poll snapshot with no statistics or records
    pub fn status(status: QueryStatus) -> Self {
        Self {
            status,
            records_matched: 0,
            records_scanned: 0,
            records: Vec::new(),
        }
    }
}

/// Terminal query outcome for one rule, handed to the evaluator
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    #[serde(skip)]
    pub rule: Arc<Rule>,
    pub query_id: String,
    /// Match count compared against the rule threshold
    pub matched: i64,
    pub scanned: i64,
    pub records: Vec<LogRecord>,
    /// Set when the job was stopped before completion
    pub stopped_early: bool,
}

impl QueryResult {
    /// Result of a job that ran to completion
    pub fn complete(rule: Arc<Rule>, query_id: impl Into<String>, poll: QueryPoll) -> Self {
        Self {
            rule,
            query_id: query_id.into(),
            matched: poll.records_matched,
            scanned: poll.records_scanned,
            records: poll.records,
            stopped_early: false,
        }
    }

    /// Result of a job stopped once enough records came back
    pub fn stopped(rule: Arc<Rule>, query_id: impl Into<String>, poll: QueryPoll) -> Self {
        let returned = i64::try_from(poll.records.len()).unwrap_or(i64::MAX);
        Self {
            rule,
            query_id: query_id.into(),
            matched: poll.records_matched.max(returned),
            scanned: poll.records_scanned,
            records: poll.records,
            stopped_early: true,
        }
    }

    /// Whether the match count reaches the rule threshold
    pub fn is_breached(&self) -> bool {
        self.rule.is_breached(self.matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> QueryRequest {
        let end = Utc::now();
        QueryRequest {
            log_group: "/aws/lambda/api".to_string(),
            query: "filter @message like /ERROR/".to_string(),
            start: end - Duration::minutes(5),
            end,
            limit: 10,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let mut req = request();
        req.log_group = "  ".to_string();
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        let mut req = request();
        req.query.clear();
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        let mut req = request();
        req.limit = 0;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        let mut req = request();
        req.limit = MAX_QUERY_LIMIT + 1;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));

        let mut req = request();
        req.start = req.end;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(QueryStatus::from("Running"), QueryStatus::Running);
        assert_eq!(QueryStatus::from("Complete"), QueryStatus::Complete);
        assert_eq!(
            QueryStatus::from("Timeout"),
            QueryStatus::Unknown("Timeout".to_string())
        );
        assert!(QueryStatus::Cancelled.is_terminal());
        assert!(!QueryStatus::Scheduled.is_terminal());
        assert_eq!(QueryStatus::Unknown("Weird".into()).to_string(), "Weird");
    }

    #[test]
    fn test_stopped_result_counts_returned_records() {
        let rule = Arc::new(Rule::new("r", "g", "q", "t").with_threshold(3));
        let poll = QueryPoll {
            status: QueryStatus::Running,
            records_matched: 1,
            records_scanned: 40,
            records: vec![LogRecord::new(), LogRecord::new(), LogRecord::new()],
        };

        let result = QueryResult::stopped(rule, "q-1", poll);

        assert_eq!(result.matched, 3);
        assert!(result.stopped_early);
        assert!(result.is_breached());
    }
}
