//! Rule evaluation: threshold check plus alert state transition

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use crate::error::Result;
use crate::models::{AlertState, NotificationEvent, NotificationKind, QueryResult};

use super::store::AlertStateStore;

/// What to do for one evaluated result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// OK -> Alert: create the alert record and notify
    Open,
    /// Alert -> OK: delete the alert record, notify if requested
    Close { notify: bool },
    /// Steady state, nothing to do
    Unchanged,
}

impl Decision {
    /// Decide from threshold outcome, current state and the rule's `notify_ok` flag
    pub fn decide(breached: bool, current: AlertState, notify_ok: bool) -> Self {
        match (breached, current) {
            (true, AlertState::NotAlerting) => Self::Open,
            (true, AlertState::Alerting) => Self::Unchanged,
            (false, AlertState::Alerting) => Self::Close { notify: notify_ok },
            (false, AlertState::NotAlerting) => Self::Unchanged,
        }
    }
}

/// Counts from one evaluation stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub alerts: usize,
    pub recoveries: usize,
    pub failed: usize,
}

/// Compares query results against thresholds and maintains alert state
#[derive(Clone)]
pub struct RuleEvaluator {
    store: Arc<dyn AlertStateStore>,
}

impl RuleEvaluator {
    /// Create an evaluator over an alert state store
    pub fn new(store: Arc<dyn AlertStateStore>) -> Self {
        Self { store }
    }

    /// The store this evaluator mutates
    pub fn store(&self) -> &Arc<dyn AlertStateStore> {
        &self.store
    }

    /// Evaluate one result. Returns the notification to send, if any.
    pub fn evaluate(&self, result: QueryResult) -> Result<Option<NotificationEvent>> {
        let rule = Arc::clone(&result.rule);
        let current = self.store.lookup(&rule.name)?;
        let breached = result.is_breached();

        debug!(
            rule = %rule.name,
            matched = result.matched,
            threshold = rule.num_events,
            breached,
            state = ?current,
            "Evaluated rule"
        );

        match Decision::decide(breached, current, rule.notify_ok) {
            Decision::Open => self.handle_breach(result).map(Some),
            Decision::Close { notify } => self.handle_recovery(result, notify),
            Decision::Unchanged if breached => {
                info!(rule = %rule.name, "Rule is already in alert state, skipping");
                Ok(None)
            }
            Decision::Unchanged => {
                info!(rule = %rule.name, matched = result.matched, "Rule is OK");
                Ok(None)
            }
        }
    }

    /// Open an alert
    fn handle_breach(&self, result: QueryResult) -> Result<NotificationEvent> {
        self.store.insert(&result.rule.name)?;
        let since = self.store.get(&result.rule.name)?.map(|r| r.since);

        info!(
            rule = %result.rule.name,
            matched = result.matched,
            threshold = result.rule.num_events,
            "Rule entered alert state"
        );

        Ok(NotificationEvent {
            kind: NotificationKind::Alert,
            result,
            alerting_since: since,
        })
    }

    /// Close an alert
    fn handle_recovery(&self, result: QueryResult, notify: bool) -> Result<Option<NotificationEvent>> {
        let since = self.store.get(&result.rule.name)?.map(|r| r.since);
        self.store.delete(&result.rule.name)?;

        info!(rule = %result.rule.name, "Rule recovered from alert state");

        if !notify {
            info!(rule = %result.rule.name, "Recovery notification disabled, skipping");
            return Ok(None);
        }

        Ok(Some(NotificationEvent {
            kind: NotificationKind::Recovery,
            result,
            alerting_since: since,
        }))
    }

    /// Evaluate every result on the stream concurrently, one task per result.
    ///
    /// Returns once all evaluations have finished; the returned stream holds
    /// every decided notification and is already closed for sending.
    pub async fn evaluate_all(
        &self,
        mut results: mpsc::Receiver<QueryResult>,
    ) -> (mpsc::Receiver<NotificationEvent>, EvaluationSummary) {
        let mut tasks = JoinSet::new();
        let mut pending = Vec::new();

        while let Some(result) = results.recv().await {
            pending.push(result);
        }

        let (tx, rx) = mpsc::channel(pending.len().max(1));

        for result in pending {
            let evaluator = self.clone();
            let tx = tx.clone();
            tasks.spawn(
                async move {
                    let rule_name = result.rule.name.clone();
                    match evaluator.evaluate(result) {
                        Ok(Some(event)) => {
                            let kind = event.kind;
                            if tx.send(event).await.is_err() {
                                error!(rule = %rule_name, "Notification stream closed");
                            }
                            Ok(Some(kind))
                        }
                        Ok(None) => Ok(None),
                        Err(e) => {
                            error!(rule = %rule_name, error = %e, "Error evaluating rule");
                            Err(e)
                        }
                    }
                }
                .in_current_span(),
            );
        }
        drop(tx);

        let mut summary = EvaluationSummary::default();
        while let Some(joined) = tasks.join_next().await {
            summary.evaluated += 1;
            match joined {
                Ok(Ok(Some(NotificationKind::Alert))) => summary.alerts += 1,
                Ok(Ok(Some(NotificationKind::Recovery))) => summary.recoveries += 1,
                Ok(Ok(None)) => {}
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!(error = %e, "Evaluation task panicked");
                    summary.failed += 1;
                }
            }
        }

        (rx, summary)
    }
}
