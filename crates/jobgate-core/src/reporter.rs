//! Status reporting contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;
use crate::record::JobRecord;

/// What a reporter did with a record.
#[derive(Debug, Clone, Default)]
pub struct ReportOutcome {
    /// Records updated by the report (for example with a status URL).
    pub records: Vec<JobRecord>,
    /// Ask to be called again after this delay.
    pub requeue_after: Option<Duration>,
}

/// Reports job state to an external channel (commit statuses, chat, ...).
#[async_trait]
pub trait StatusReporter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this reporter handles the record at all.
    async fn should_report(&self, record: &JobRecord) -> bool;

    async fn report(&self, record: &JobRecord) -> Result<ReportOutcome>;
}
