//! Alerting for Logwarden
//!
//! Threshold evaluation, alert state tracking and notification delivery.

mod evaluator;
mod notifier;
mod sns;
mod store;
mod template;

pub use evaluator::{Decision, EvaluationSummary, RuleEvaluator};
pub use notifier::{LogNotifier, NotificationDispatcher, NotificationResult, Notifier};
pub use sns::SnsNotifier;
pub use store::{AlertStateStore, MemoryAlertStore, ReadTxn, WriteTxn};
pub use template::{MiniJinjaRenderer, TemplateContext, TemplateRenderer};
