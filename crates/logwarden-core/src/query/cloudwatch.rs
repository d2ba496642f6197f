//! CloudWatch Logs Insights backend

use aws_sdk_cloudwatchlogs::types::ResultField;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{LogRecord, QueryPoll, QueryRequest, QueryStatus};

use super::QueryBackend;

/// Runs rule queries as CloudWatch Logs Insights jobs
#[derive(Debug, Clone)]
pub struct CloudWatchLogsBackend {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchLogsBackend {
    /// Create a backend from a shared AWS SDK config
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudwatchlogs::Client::new(sdk_config),
        }
    }

    /// Create a backend from an existing client
    pub fn from_client(client: aws_sdk_cloudwatchlogs::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl QueryBackend for CloudWatchLogsBackend {
    async fn submit(&self, request: &QueryRequest) -> Result<String> {
        let limit = i32::try_from(request.limit)
            .map_err(|_| Error::validation(format!("query limit {} out of range", request.limit)))?;

        let output = self
            .client
            .start_query()
            .log_group_name(&request.log_group)
            .query_string(&request.query)
            .start_time(request.start.timestamp())
            .end_time(request.end.timestamp())
            .limit(limit)
            .send()
            .await
            .map_err(|e| Error::backend(format!("StartQuery on {}: {e}", request.log_group)))?;

        output
            .query_id()
            .map(str::to_string)
            .ok_or_else(|| Error::backend("StartQuery returned no query id"))
    }

    async fn poll(&self, query_id: &str) -> Result<QueryPoll> {
        let output = self
            .client
            .get_query_results()
            .query_id(query_id)
            .send()
            .await
            .map_err(|e| Error::backend(format!("GetQueryResults for {query_id}: {e}")))?;

        let status = output
            .status()
            .map_or(QueryStatus::Unknown(String::new()), |s| QueryStatus::from(s.as_str()));

        let (records_matched, records_scanned) = output
            .statistics()
            .map_or((0, 0), |s| (s.records_matched() as i64, s.records_scanned() as i64));

        let records: Vec<LogRecord> = output.results().iter().map(Vec::as_slice).map(to_record).collect();

        debug!(query_id, status = %status, records = records.len(), "GetQueryResults");

        Ok(QueryPoll {
            status,
            records_matched,
            records_scanned,
            records,
        })
    }

    async fn stop(&self, query_id: &str) -> Result<bool> {
        let output = self
            .client
            .stop_query()
            .query_id(query_id)
            .send()
            .await
            .map_err(|e| Error::backend(format!("StopQuery for {query_id}: {e}")))?;

        Ok(output.success())
    }
}

/// Flatten one result row of field/value pairs into a record
fn to_record(row: &[ResultField]) -> LogRecord {
    row.iter()
        .filter_map(|f| Some((f.field()?.to_string(), f.value().unwrap_or_default().to_string())))
        .collect()
}
