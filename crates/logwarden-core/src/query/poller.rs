//! Per-rule query state machine: submit, poll until terminal, produce a result

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::EarlyStopPolicy;
use crate::error::{Error, Result};
use crate::models::{QueryRequest, QueryResult, QueryStatus, Rule};

use super::QueryBackend;

/// Delay between status polls unless configured otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Drives one rule's query job to a terminal outcome
#[derive(Clone)]
pub struct QueryPoller {
    backend: Arc<dyn QueryBackend>,
    poll_interval: Duration,
    early_stop: EarlyStopPolicy,
}

impl QueryPoller {
    /// Create a poller with the default cadence and early-stop policy
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
            early_stop: EarlyStopPolicy::default(),
        }
    }

    /// Set the delay between polls
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set what happens to jobs stopped early
    pub fn with_early_stop(mut self, early_stop: EarlyStopPolicy) -> Self {
        self.early_stop = early_stop;
        self
    }

    /// Run the rule's query.
    ///
    /// Returns `Ok(None)` only when a job is stopped early under
    /// [`EarlyStopPolicy::Discard`]. Every error is terminal for this run;
    /// nothing is retried.
    pub async fn evaluate(&self, rule: Arc<Rule>) -> Result<Option<QueryResult>> {
        let request = QueryRequest::for_rule(&rule, Utc::now())?;
        request.validate()?;

        info!(rule = %rule.name, log_group = %request.log_group, "Submitting log query");
        let query_id = self.backend.submit(&request).await?;
        debug!(rule = %rule.name, query_id = %query_id, "Query submitted");

        loop {
            let poll = self.backend.poll(&query_id).await?;
            let returned = i64::try_from(poll.records.len()).unwrap_or(i64::MAX);

            debug!(
                rule = %rule.name,
                query_id = %query_id,
                status = %poll.status,
                returned,
                matched = poll.records_matched,
                "Polled query status"
            );

            match poll.status.clone() {
                QueryStatus::Scheduled => {}
                QueryStatus::Running if returned < rule.num_events => {}
                QueryStatus::Running => {
                    info!(
                        rule = %rule.name,
                        query_id = %query_id,
                        returned,
                        "Threshold reached while running, stopping query"
                    );
                    let stopped = self.backend.stop(&query_id).await?;
                    if !stopped {
                        warn!(rule = %rule.name, query_id = %query_id, "Backend did not confirm stop");
                    }
                    return Ok(match self.early_stop {
                        EarlyStopPolicy::Forward => Some(QueryResult::stopped(rule, query_id, poll)),
                        EarlyStopPolicy::Discard => None,
                    });
                }
                QueryStatus::Complete => {
                    info!(
                        rule = %rule.name,
                        query_id = %query_id,
                        matched = poll.records_matched,
                        "Query complete"
                    );
                    return Ok(Some(QueryResult::complete(rule, query_id, poll)));
                }
                QueryStatus::Failed => {
                    error!(rule = %rule.name, query_id = %query_id, "Query failed");
                    return Err(Error::QueryFailed { query_id });
                }
                QueryStatus::Cancelled => {
                    error!(rule = %rule.name, query_id = %query_id, "Query cancelled");
                    return Err(Error::QueryCancelled { query_id });
                }
                QueryStatus::Unknown(status) => {
                    error!(rule = %rule.name, query_id = %query_id, status = %status, "Unknown query status");
                    return Err(Error::UnknownStatus { query_id, status });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::models::{LogRecord, QueryPoll};

    /// Backend replaying a fixed sequence of poll responses
    #[derive(Default)]
    struct ScriptedBackend {
        polls: Mutex<VecDeque<Result<QueryPoll>>>,
        submits: AtomicUsize,
        stops: AtomicUsize,
        fail_submit: bool,
    }

    impl ScriptedBackend {
        fn new(polls: Vec<Result<QueryPoll>>) -> Arc<Self> {
            Arc::new(Self {
                polls: Mutex::new(polls.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn submit(&self, _request: &QueryRequest) -> Result<String> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.fail_submit {
                return Err(Error::backend("throttled"));
            }
            Ok("q-1".to_string())
        }

        async fn poll(&self, _query_id: &str) -> Result<QueryPoll> {
            self.polls
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::backend("script exhausted")))
        }

        async fn stop(&self, _query_id: &str) -> Result<bool> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn poll(status: QueryStatus, matched: i64, returned: usize) -> Result<QueryPoll> {
        Ok(QueryPoll {
            status,
            records_matched: matched,
            records_scanned: matched * 10,
            records: vec![LogRecord::new(); returned],
        })
    }

    fn rule(threshold: i64) -> Arc<Rule> {
        Arc::new(
            Rule::new("cpu-high", "/aws/ec2/app", "fields @message", "arn:topic")
                .with_threshold(threshold),
        )
    }

    fn poller(backend: Arc<ScriptedBackend>) -> QueryPoller {
        QueryPoller::new(backend).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_polls_until_complete() {
        let backend = ScriptedBackend::new(vec![
            poll(QueryStatus::Scheduled, 0, 0),
            poll(QueryStatus::Running, 1, 1),
            poll(QueryStatus::Complete, 2, 2),
        ]);

        let result = poller(backend.clone()).evaluate(rule(5)).await.unwrap().unwrap();

        assert_eq!(result.matched, 2);
        assert_eq!(result.query_id, "q-1");
        assert!(!result.stopped_early);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 0);
        assert!(backend.polls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_running_with_enough_records_stops_and_forwards() {
        let backend = ScriptedBackend::new(vec![
            poll(QueryStatus::Running, 2, 2),
            poll(QueryStatus::Running, 6, 5),
        ]);

        let result = poller(backend.clone()).evaluate(rule(5)).await.unwrap().unwrap();

        assert!(result.stopped_early);
        assert_eq!(result.matched, 6);
        assert!(result.is_breached());
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discard_policy_yields_no_result() {
        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Running, 5, 5)]);

        let result = poller(backend.clone())
            .with_early_stop(EarlyStopPolicy::Discard)
            .evaluate(rule(5))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_failures() {
        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Running, 0, 0), poll(QueryStatus::Failed, 0, 0)]);
        let err = poller(backend).evaluate(rule(5)).await.unwrap_err();
        assert!(matches!(err, Error::QueryFailed { ref query_id } if query_id == "q-1"));

        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Cancelled, 0, 0)]);
        let err = poller(backend).evaluate(rule(5)).await.unwrap_err();
        assert!(matches!(err, Error::QueryCancelled { .. }));

        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Unknown("Timeout".into()), 0, 0)]);
        let err = poller(backend).evaluate(rule(5)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownStatus { ref status, .. } if status == "Timeout"));
    }

    #[tokio::test]
    async fn test_poll_error_is_terminal() {
        let backend = ScriptedBackend::new(vec![
            poll(QueryStatus::Scheduled, 0, 0),
            Err(Error::backend("connection reset")),
            poll(QueryStatus::Complete, 9, 9),
        ]);

        let err = poller(backend.clone()).evaluate(rule(5)).await.unwrap_err();

        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(backend.polls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_is_never_submitted() {
        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Complete, 1, 1)]);
        let rule = Arc::new(Rule::new("bad", "", "fields @message", "arn:topic"));

        let err = poller(backend.clone()).evaluate(rule).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_window_is_never_submitted() {
        let backend = ScriptedBackend::new(vec![poll(QueryStatus::Complete, 1, 1)]);
        let rule = Arc::new(
            Rule::new("ancient", "/aws/ec2/app", "fields @message", "arn:topic")
                .with_timeframe(Duration::from_secs(31_557_600_000_000)),
        );

        let err = poller(backend.clone()).evaluate(rule).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_error_is_terminal() {
        let backend = Arc::new(ScriptedBackend {
            fail_submit: true,
            ..Default::default()
        });

        let err = poller(backend.clone()).evaluate(rule(5)).await.unwrap_err();

        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(backend.submits.load(Ordering::SeqCst), 1);
    }
}
