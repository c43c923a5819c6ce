//! A job client that logs jobs instead of creating them.

use async_trait::async_trait;
use jobgate_core::Result;
use jobgate_core::backend::JobClient;
use jobgate_core::record::JobRecord;
use tracing::info;

/// Accepts every job and only logs it. Used for `--dry-run`.
pub struct DryRunJobClient;

#[async_trait]
impl JobClient for DryRunJobClient {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn create(&self, record: &JobRecord) -> Result<JobRecord> {
        info!(
            job = %record.spec.job,
            id = %record.id,
            cluster = %record.spec.cluster,
            labels = ?record.labels,
            "Dry run: job not submitted"
        );
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgate_core::record::JobSpec;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_accepts_without_keeping_state() {
        let client = DryRunJobClient;
        for _ in 0..3 {
            let record = JobRecord::new(JobSpec::default(), BTreeMap::new(), BTreeMap::new());
            let created = client.create(&record).await.unwrap();
            assert_eq!(created, record);
        }
    }
}
