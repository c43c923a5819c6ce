//! Status reporters.

use async_trait::async_trait;
use jobgate_core::job::JobType;
use jobgate_core::record::{JobRecord, JobState};
use jobgate_core::reporter::{ReportOutcome, StatusReporter};
use jobgate_core::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Logs every state change, including records for events that never
/// resolved to a job.
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn should_report(&self, _record: &JobRecord) -> bool {
        true
    }

    async fn report(&self, record: &JobRecord) -> Result<ReportOutcome> {
        match record.status.state {
            JobState::Triggered => info!(
                job = %record.spec.job,
                id = %record.id,
                state = %record.status.state,
                description = %record.status.description,
                "Job status"
            ),
            JobState::Error => warn!(
                job = %record.spec.job,
                id = %record.id,
                state = %record.status.state,
                description = %record.status.description,
                annotations = ?record.annotations,
                "Job status"
            ),
        }
        Ok(ReportOutcome {
            records: vec![record.clone()],
            requeue_after: None,
        })
    }
}

/// Hands each record to every reporter that wants it.
///
/// All reporters are tried; the first failure is returned afterwards.
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn StatusReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Arc<dyn StatusReporter>>) -> Self {
        Self { reporters }
    }
}

#[async_trait]
impl StatusReporter for FanoutReporter {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn should_report(&self, record: &JobRecord) -> bool {
        for reporter in &self.reporters {
            if reporter.should_report(record).await {
                return true;
            }
        }
        false
    }

    async fn report(&self, record: &JobRecord) -> Result<ReportOutcome> {
        let mut outcome = ReportOutcome::default();
        let mut first_error = None;
        for reporter in &self.reporters {
            if !reporter.should_report(record).await {
                continue;
            }
            match reporter.report(record).await {
                Ok(reported) => {
                    outcome.records.extend(reported.records);
                    outcome.requeue_after = match (outcome.requeue_after, reported.requeue_after) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                Err(err) => {
                    warn!(reporter = reporter.name(), error = %err, "Reporter failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }
}

/// GitHub caps status descriptions at 140 characters.
const MAX_DESCRIPTION_LEN: usize = 140;

/// Body of a commit status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitStatus {
    pub state: &'static str,
    pub description: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// Where and what to post for a record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRequest {
    pub org: String,
    pub repo: String,
    pub sha: String,
    pub status: CommitStatus,
}

impl StatusRequest {
    /// Build the status for a record, if it has a commit to attach to.
    pub fn for_record(record: &JobRecord) -> Option<Self> {
        let refs = record.spec.refs.as_ref()?;
        let sha = match record.spec.job_type? {
            JobType::Presubmit => refs.pulls.first()?.sha.clone(),
            JobType::Postsubmit => refs.base_sha.clone(),
            JobType::Periodic => return None,
        };
        if sha.is_empty() {
            return None;
        }

        let state = match record.status.state {
            JobState::Triggered => "pending",
            JobState::Error => "error",
        };
        let context = record
            .spec
            .context
            .clone()
            .unwrap_or_else(|| record.spec.job.clone());

        Some(Self {
            org: refs.org.clone(),
            repo: refs.repo.clone(),
            sha,
            status: CommitStatus {
                state,
                description: record
                    .status
                    .description
                    .chars()
                    .take(MAX_DESCRIPTION_LEN)
                    .collect(),
                context,
                target_url: None,
            },
        })
    }
}

/// Posts commit statuses to the GitHub API.
pub struct GitHubStatusReporter {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl GitHubStatusReporter {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_api_base("https://api.github.com", access_token)
    }

    pub fn with_api_base(api_base: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn status_url(&self, request: &StatusRequest) -> String {
        format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_base, request.org, request.repo, request.sha
        )
    }
}

#[async_trait]
impl StatusReporter for GitHubStatusReporter {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn should_report(&self, record: &JobRecord) -> bool {
        record.spec.report && StatusRequest::for_record(record).is_some()
    }

    async fn report(&self, record: &JobRecord) -> Result<ReportOutcome> {
        let Some(request) = StatusRequest::for_record(record) else {
            return Ok(ReportOutcome::default());
        };
        let url = self.status_url(&request);
        debug!(url = %url, state = request.status.state, "Posting commit status");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "jobgate")
            .header("Accept", "application/vnd.github+json")
            .json(&request.status)
            .send()
            .await
            .map_err(|e| Error::Report(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Report(format!(
                "failed to create status ({status}): {text}"
            )));
        }

        Ok(ReportOutcome {
            records: vec![record.clone()],
            requeue_after: None,
        })
    }
}
