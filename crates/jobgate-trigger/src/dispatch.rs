//! Admission, submission and status reporting of resolved jobs.

use jobgate_core::backend::JobClient;
use jobgate_core::event::JobEvent;
use jobgate_core::record::{JobRecord, JobSpec, JobState};
use jobgate_core::reporter::StatusReporter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::resolver::Resolution;
use crate::{TriggerError, TriggerResult};

/// Wildcard entry of an allowed-clusters list.
pub const ANY_CLUSTER: &str = "*";

/// Turns resolutions into created job records.
pub struct Dispatcher {
    client: Arc<dyn JobClient>,
    reporter: Arc<dyn StatusReporter>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn JobClient>, reporter: Arc<dyn StatusReporter>) -> Self {
        Self { client, reporter }
    }

    /// Admit and submit a resolved job.
    ///
    /// Every failure after decoding is reported as an errored record before
    /// the error is returned. Reporting itself never changes the outcome.
    pub async fn dispatch(
        &self,
        event: &JobEvent,
        resolution: TriggerResult<Resolution>,
        allowed_clusters: &[String],
    ) -> TriggerResult<JobRecord> {
        let Resolution { spec, mut labels } = match resolution {
            Ok(resolution) => resolution,
            Err(err) => {
                debug!(job = %event.name, error = %err, "Failed resolving job");
                let mut record =
                    JobRecord::new(JobSpec::default(), BTreeMap::new(), event.annotations.clone());
                self.report(&mut record, Some(&err)).await;
                return Err(err);
            }
        };

        if !cluster_allowed(allowed_clusters, &spec.cluster) {
            let err = TriggerError::ClusterNotAllowed(spec.cluster.clone());
            warn!(job = %event.name, cluster = %spec.cluster, "Cluster not allowed");
            let mut record = JobRecord::new(spec, BTreeMap::new(), event.annotations.clone());
            self.report(&mut record, Some(&err)).await;
            return Err(err);
        }

        labels.extend(event.labels.clone());
        let mut record = JobRecord::new(spec, labels, event.annotations.clone());
        if let Some(pod_spec) = record.spec.pod_spec.as_mut() {
            pod_spec.append_env(&event.envs);
        }

        if let Err(e) = self.client.create(&record).await {
            error!(
                job = %event.name,
                id = %record.id,
                backend = self.client.name(),
                error = %e,
                "Failed to create job"
            );
            let err = TriggerError::from(e);
            self.report(&mut record, Some(&err)).await;
            return Err(err);
        }

        info!(job = %event.name, id = %record.id, cluster = %record.spec.cluster, "Job created");
        self.report(&mut record, None).await;
        Ok(record)
    }

    /// Best effort: failures are logged and swallowed.
    async fn report(&self, record: &mut JobRecord, err: Option<&TriggerError>) {
        match err {
            Some(err) => record.set_state(JobState::Error, format!("Failed creating job: {err}")),
            None => record.set_state(JobState::Triggered, "Successfully triggered job."),
        }
        if !self.reporter.should_report(record).await {
            return;
        }
        if let Err(e) = self.reporter.report(record).await {
            warn!(
                reporter = self.reporter.name(),
                id = %record.id,
                error = %e,
                "Failed to report status"
            );
        }
    }
}

/// Whether `cluster` is admitted by the list. `*` admits everything.
pub fn cluster_allowed(allowed_clusters: &[String], cluster: &str) -> bool {
    allowed_clusters
        .iter()
        .any(|allowed| allowed == ANY_CLUSTER || allowed == cluster)
}
