//! # Logwarden
//!
//! Threshold alerting over log search queries.
//!
//! Logwarden periodically runs a set of configured rules against CloudWatch
//! Logs Insights, compares each rule's match count with its threshold and
//! sends one notification per state transition: when a rule enters alert and,
//! optionally, when it recovers.
//!
//! ## Architecture
//!
//! - **Query**: one asynchronous query job per rule, polled until terminal
//! - **Alerting**: in-memory alert state, the dedup decision table, SNS delivery
//! - **Cycle**: dispatch, evaluate and notify stages joined by barriers
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the config file
//! logwarden --config logwarden.toml validate
//!
//! # Run one cycle without publishing anything
//! logwarden check --dry-run
//!
//! # Run forever
//! logwarden run
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod alerting;
pub mod aws;
pub mod config;
pub mod cycle;
pub mod error;
pub mod models;
pub mod query;

pub use config::Config;
pub use cycle::{CycleReport, Engine};
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertStateStore, MemoryAlertStore, Notifier, TemplateRenderer};
    pub use crate::config::Config;
    pub use crate::cycle::{CycleReport, Engine};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::query::{QueryBackend, QueryPoller, RuleDispatcher};
}
