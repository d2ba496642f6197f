//! Query module - runs rule queries against the log backend
//!
//! Each rule's query is submitted as an asynchronous backend job and polled
//! until it reaches a terminal state. The dispatcher runs one poller per rule
//! concurrently and streams the finished results to the evaluator.

mod cloudwatch;
mod dispatcher;
mod poller;

pub use cloudwatch::CloudWatchLogsBackend;
pub use dispatcher::RuleDispatcher;
pub use poller::QueryPoller;

use crate::error::Result;
use crate::models::{QueryPoll, QueryRequest};

/// Log backend running asynchronous query jobs.
///
/// One instance is shared by every poller in a cycle.
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync {
    /// Start a query job, returning its id
    async fn submit(&self, request: &QueryRequest) -> Result<String>;

    /// Fetch the current status, statistics and records of a job
    async fn poll(&self, query_id: &str) -> Result<QueryPoll>;

    /// Ask the backend to stop a running job
    async fn stop(&self, query_id: &str) -> Result<bool>;
}
