//! Execution backend contract.
//!
//! The backend persists job records and runs them; the trigger path only
//! creates records.

use async_trait::async_trait;

use crate::Result;
use crate::record::JobRecord;

/// Client for the execution backend.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Create a job record. Errors are terminal for the triggering event;
    /// no retry happens at this layer.
    async fn create(&self, record: &JobRecord) -> Result<JobRecord>;
}
