//! Job specifications and the records submitted to the execution backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::JobId;
use crate::event::Refs;
use crate::job::{JobBase, JobType, Periodic, PodSpec, Postsubmit, Presubmit, Reporter};

pub const CREATED_BY_LABEL: &str = "created-by-jobgate";
pub const JOB_LABEL: &str = "jobgate.dev/job";
pub const TYPE_LABEL: &str = "jobgate.dev/type";
pub const ORG_LABEL: &str = "jobgate.dev/refs.org";
pub const REPO_LABEL: &str = "jobgate.dev/refs.repo";
pub const BASE_REF_LABEL: &str = "jobgate.dev/refs.base_ref";
pub const PULL_LABEL: &str = "jobgate.dev/refs.pull";
pub const JOB_ANNOTATION: &str = "jobgate.dev/job";

/// Kubernetes caps label values at 63 characters.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Executable form of a job definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<PodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub report: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_command: Option<String>,
    #[serde(default)]
    pub max_concurrency: u32,
}

impl JobSpec {
    fn from_base(job_type: JobType, base: &JobBase) -> Self {
        Self {
            job_type: Some(job_type),
            job: base.name.clone(),
            cluster: base.cluster().to_string(),
            namespace: base.namespace.clone(),
            pod_spec: base.spec.clone(),
            max_concurrency: base.max_concurrency,
            ..Default::default()
        }
    }

    fn with_reporter(mut self, reporter: &Reporter) -> Self {
        self.context = if reporter.context.is_empty() {
            Some(self.job.clone())
        } else {
            Some(reporter.context.clone())
        };
        self.report = !reporter.skip_report;
        self
    }

    pub fn periodic(job: &Periodic) -> Self {
        let mut spec = Self::from_base(JobType::Periodic, &job.base);
        spec.report = true;
        spec
    }

    pub fn presubmit(job: &Presubmit, refs: Refs) -> Self {
        let mut spec = Self::from_base(JobType::Presubmit, &job.base).with_reporter(&job.reporter);
        spec.refs = Some(refs);
        spec.rerun_command = job.rerun_command.clone();
        spec
    }

    pub fn postsubmit(job: &Postsubmit, refs: Refs) -> Self {
        let mut spec = Self::from_base(JobType::Postsubmit, &job.base).with_reporter(&job.reporter);
        spec.refs = Some(refs);
        spec
    }
}

/// State of a submitted job as seen by the trigger path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// The job was accepted by the execution backend.
    #[default]
    Triggered,
    /// The job could not be created.
    Error,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Triggered => write!(f, "triggered"),
            JobState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
}

/// The job object sent to the execution backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: JobSpec,
    pub status: JobStatus,
}

impl JobRecord {
    /// Build a record for `spec`. Labels and annotations derived from the
    /// spec are added first; the supplied ones override them.
    pub fn new(
        spec: JobSpec,
        extra_labels: BTreeMap<String, String>,
        extra_annotations: BTreeMap<String, String>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();

        labels.insert(CREATED_BY_LABEL.to_string(), "true".to_string());
        if !spec.job.is_empty() {
            labels.insert(JOB_LABEL.to_string(), truncate_label(&spec.job));
            annotations.insert(JOB_ANNOTATION.to_string(), spec.job.clone());
        }
        if let Some(job_type) = spec.job_type {
            labels.insert(TYPE_LABEL.to_string(), job_type.to_string());
        }
        if let Some(refs) = &spec.refs {
            labels.insert(ORG_LABEL.to_string(), truncate_label(&refs.org));
            labels.insert(REPO_LABEL.to_string(), truncate_label(&refs.repo));
            labels.insert(BASE_REF_LABEL.to_string(), truncate_label(&refs.base_ref));
            if let Some(pull) = refs.pulls.first() {
                labels.insert(PULL_LABEL.to_string(), pull.number.to_string());
            }
        }

        labels.extend(extra_labels);
        annotations.extend(extra_annotations);

        Self {
            id: JobId::new(),
            labels,
            annotations,
            spec,
            status: JobStatus {
                state: JobState::Triggered,
                description: String::new(),
                start_time: Utc::now(),
            },
        }
    }

    pub fn set_state(&mut self, state: JobState, description: impl Into<String>) {
        self.status.state = state;
        self.status.description = description.into();
    }
}

fn truncate_label(value: &str) -> String {
    value.chars().take(MAX_LABEL_VALUE_LEN).collect()
}
