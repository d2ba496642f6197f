//! Fan-out of one query poll per rule, fan-in of their results

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::models::{QueryResult, Rule};

use super::QueryPoller;

/// Runs every rule's query concurrently and collects the results
#[derive(Clone)]
pub struct RuleDispatcher {
    poller: QueryPoller,
}

impl RuleDispatcher {
    pub fn new(poller: QueryPoller) -> Self {
        Self { poller }
    }

    /// Poll all rules at once.
    ///
    /// Returns only after every poll has terminated. The stream holds one
    /// result per successful poll, in completion order, and is closed for
    /// sending. Failed polls are logged and contribute nothing.
    pub async fn dispatch(&self, rules: &[Arc<Rule>]) -> mpsc::Receiver<QueryResult> {
        let (tx, rx) = mpsc::channel(rules.len().max(1));
        let mut tasks = JoinSet::new();

        for rule in rules {
            let poller = self.poller.clone();
            let rule = Arc::clone(rule);
            let tx = tx.clone();
            tasks.spawn(
                async move {
                    let name = rule.name.clone();
                    match poller.evaluate(rule).await {
                        Ok(Some(result)) => {
                            if tx.send(result).await.is_err() {
                                error!(rule = %name, "Result stream closed");
                            }
                        }
                        Ok(None) => {
                            debug!(rule = %name, "Query stopped early, result discarded");
                        }
                        Err(e) if e.is_terminal_job_state() => {
                            warn!(rule = %name, error = %e, "Query job ended without a result");
                        }
                        Err(e) => {
                            error!(rule = %name, error = %e, "Error evaluating rule query");
                        }
                    }
                }
                .in_current_span(),
            );
        }
        drop(tx);

        info!(rules = rules.len(), "Waiting for rule queries");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Query task panicked");
            }
        }

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::error::{Error, Result};
    use crate::models::{LogRecord, QueryPoll, QueryRequest, QueryStatus};
    use crate::query::QueryBackend;

    /// Completes immediately with a per-log-group matched count, or fails
    struct FixedBackend {
        matched: HashMap<String, Option<i64>>,
    }

    #[async_trait::async_trait]
    impl QueryBackend for FixedBackend {
        async fn submit(&self, request: &QueryRequest) -> Result<String> {
            Ok(request.log_group.clone())
        }

        async fn poll(&self, query_id: &str) -> Result<QueryPoll> {
            match self.matched.get(query_id).copied().flatten() {
                Some(n) => Ok(QueryPoll {
                    status: QueryStatus::Complete,
                    records_matched: n,
                    records_scanned: n,
                    records: vec![LogRecord::new(); n as usize],
                }),
                None => Ok(QueryPoll::status(QueryStatus::Failed)),
            }
        }

        async fn stop(&self, _query_id: &str) -> Result<bool> {
            Err(Error::backend("not running"))
        }
    }

    fn rule(name: &str) -> Arc<Rule> {
        Arc::new(Rule::new(name, format!("/logs/{name}"), "fields @message", "arn:topic"))
    }

    fn dispatcher(matched: &[(&str, Option<i64>)]) -> RuleDispatcher {
        let backend = FixedBackend {
            matched: matched
                .iter()
                .map(|(name, n)| (format!("/logs/{name}"), *n))
                .collect(),
        };
        RuleDispatcher::new(QueryPoller::new(Arc::new(backend)).with_poll_interval(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_one_result_per_successful_rule() {
        let dispatcher = dispatcher(&[("a", Some(1)), ("b", None), ("c", Some(0))]);
        let rules = vec![rule("a"), rule("b"), rule("c")];

        let mut rx = dispatcher.dispatch(&rules).await;

        let mut names = Vec::new();
        while let Some(result) = rx.recv().await {
            names.push(result.rule.name.clone());
        }
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_empty_rule_set_closes_immediately() {
        let mut rx = dispatcher(&[]).dispatch(&[]).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_is_complete_on_return() {
        let names: Vec<String> = (0..20).map(|i| format!("rule-{i}")).collect();
        let matched: Vec<(&str, Option<i64>)> = names.iter().map(|n| (n.as_str(), Some(2))).collect();
        let rules: Vec<_> = names.iter().map(|n| rule(n)).collect();

        let mut rx = dispatcher(&matched).dispatch(&rules).await;

        let mut count = 0;
        while let Ok(result) = rx.try_recv() {
            assert_eq!(result.matched, 2);
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
