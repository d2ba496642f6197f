//! Cycle orchestration
//!
//! A cycle is three stages with a barrier between each: every rule's query
//! runs to completion, then every result is evaluated against the alert
//! store, then every decided notification is delivered. [`Engine::run`]
//! repeats cycles, sleeping `run_interval` after each one finishes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::alerting::{
    AlertStateStore, MiniJinjaRenderer, NotificationDispatcher, Notifier, RuleEvaluator,
};
use crate::config::Config;
use crate::models::Rule;
use crate::query::{QueryBackend, QueryPoller, RuleDispatcher};

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub id: Uuid,
    /// Rules dispatched
    pub rules: usize,
    /// Query results that reached evaluation
    pub results: usize,
    /// Alerts opened
    pub alerts: usize,
    /// Alerts closed, notified or not
    pub recoveries: usize,
    /// Notifications delivered
    pub delivered: usize,
    /// Evaluations plus deliveries that failed
    pub failed: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// The rule evaluation engine: dispatch, evaluate, notify
#[derive(Clone)]
pub struct Engine {
    dispatcher: RuleDispatcher,
    evaluator: RuleEvaluator,
    notifications: NotificationDispatcher,
}

impl Engine {
    pub fn new(
        dispatcher: RuleDispatcher,
        evaluator: RuleEvaluator,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            dispatcher,
            evaluator,
            notifications,
        }
    }

    /// Wire an engine from config and its external collaborators
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn QueryBackend>,
        store: Arc<dyn AlertStateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let poller = QueryPoller::new(backend)
            .with_poll_interval(config.general.poll_interval)
            .with_early_stop(config.general.early_stop);

        Self::new(
            RuleDispatcher::new(poller),
            RuleEvaluator::new(store),
            NotificationDispatcher::new(
                notifier,
                Arc::new(MiniJinjaRenderer::new()),
                config.general.message_template.as_str(),
            ),
        )
    }

    /// The alert store shared across cycles
    pub fn store(&self) -> &Arc<dyn AlertStateStore> {
        self.evaluator.store()
    }

    /// Run one full cycle over `rules`.
    ///
    /// Per-rule failures are logged and counted, never returned.
    pub async fn run_cycle(&self, rules: &[Arc<Rule>]) -> CycleReport {
        let id = Uuid::new_v4();
        let span = info_span!("cycle", id = %id);

        async move {
            let started = Instant::now();
            info!(rules = rules.len(), "Starting cycle");

            let results = self.dispatcher.dispatch(rules).await;
            let (events, summary) = self.evaluator.evaluate_all(results).await;
            let deliveries = self.notifications.dispatch(events).await;

            let delivered = deliveries.iter().filter(|d| d.success).count();
            let report = CycleReport {
                id,
                rules: rules.len(),
                results: summary.evaluated,
                alerts: summary.alerts,
                recoveries: summary.recoveries,
                delivered,
                failed: summary.failed + (deliveries.len() - delivered),
                elapsed: started.elapsed(),
            };

            info!(
                rules = report.rules,
                results = report.results,
                alerts = report.alerts,
                recoveries = report.recoveries,
                delivered = report.delivered,
                failed = report.failed,
                elapsed = %humantime::format_duration(round_millis(report.elapsed)),
                "Cycle finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// The interval is measured from the end of one cycle to the start of the
    /// next. Shutdown is only observed between cycles; a running cycle always
    /// completes. Returns the number of cycles run.
    pub async fn run<F>(&self, rules: &[Arc<Rule>], run_interval: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycles = 0;

        loop {
            self.run_cycle(rules).await;
            cycles += 1;

            tokio::select! {
                () = &mut shutdown => {
                    info!(cycles, "Shutdown requested, stopping");
                    return cycles;
                }
                () = tokio::time::sleep(run_interval) => {}
            }
        }
    }
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
