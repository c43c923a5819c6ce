//! Job definitions.
//!
//! A job definition is a named template describing what to run and on which
//! cluster. Definitions come either from the static service configuration or
//! from configuration checked into the target repository.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster alias used when a job does not name one.
pub const DEFAULT_CLUSTER: &str = "default";

/// Kind of a job, which decides how it is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Runs on a schedule.
    Periodic,
    /// Runs against a pending change.
    Presubmit,
    /// Runs after a change merged.
    Postsubmit,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Periodic => write!(f, "periodic"),
            JobType::Presubmit => write!(f, "presubmit"),
            JobType::Postsubmit => write!(f, "postsubmit"),
        }
    }
}

/// An environment variable injected into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A container in a job's pod template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Pod template of a job. Only the fields the trigger path touches are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl PodSpec {
    /// Append every variable to every container, in order.
    pub fn append_env<'a>(&mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) {
        let vars: Vec<EnvVar> = vars
            .into_iter()
            .map(|(k, v)| EnvVar::new(k.clone(), v.clone()))
            .collect();
        for container in &mut self.containers {
            container.env.extend(vars.iter().cloned());
        }
    }
}

/// Fields shared by every job kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobBase {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Cluster alias the job runs on; empty until defaulted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub max_concurrency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
}

impl JobBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The cluster the job runs on, falling back to the default alias.
    pub fn cluster(&self) -> &str {
        if self.cluster.is_empty() {
            DEFAULT_CLUSTER
        } else {
            &self.cluster
        }
    }
}

/// Branch filters for presubmits and postsubmits.
///
/// Patterns are regular expressions anchored at both ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brancher {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_branches: Vec<String>,
}

impl Brancher {
    /// Whether a job with these filters may run against `branch`.
    pub fn could_run(&self, branch: &str) -> bool {
        if self
            .skip_branches
            .iter()
            .any(|pattern| matches_branch(pattern, branch))
        {
            return false;
        }
        self.branches.is_empty()
            || self
                .branches
                .iter()
                .any(|pattern| matches_branch(pattern, branch))
    }

    /// Check that every pattern compiles.
    pub fn validate(&self) -> Result<(), String> {
        for pattern in self.branches.iter().chain(&self.skip_branches) {
            anchored(pattern).map_err(|e| format!("invalid branch pattern {pattern:?}: {e}"))?;
        }
        Ok(())
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn matches_branch(pattern: &str, branch: &str) -> bool {
    // Invalid patterns are rejected during validation; treat them as literals here.
    match anchored(pattern) {
        Ok(re) => re.is_match(branch),
        Err(_) => pattern == branch,
    }
}

/// Status reporting settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reporter {
    /// Name of the status context; defaults to the job name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default)]
    pub skip_report: bool,
}

/// A job triggered on a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Periodic {
    #[serde(flatten)]
    pub base: JobBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// A job triggered by a pending change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presubmit {
    #[serde(flatten)]
    pub base: JobBase,
    #[serde(flatten)]
    pub brancher: Brancher,
    #[serde(flatten)]
    pub reporter: Reporter,
    #[serde(default)]
    pub always_run: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if_changed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_command: Option<String>,
}

impl Presubmit {
    pub fn could_run(&self, branch: &str) -> bool {
        self.brancher.could_run(branch)
    }
}

/// A job triggered after a change merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Postsubmit {
    #[serde(flatten)]
    pub base: JobBase,
    #[serde(flatten)]
    pub brancher: Brancher,
    #[serde(flatten)]
    pub reporter: Reporter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if_changed: Option<String>,
}

impl Postsubmit {
    pub fn could_run(&self, branch: &str) -> bool {
        self.brancher.could_run(branch)
    }
}

/// Environment shared by every job whose labels include the preset's labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Preset {
    /// A preset applies when all of its labels are set on the job. A preset
    /// without labels applies to nothing.
    pub fn matches(&self, job_labels: &BTreeMap<String, String>) -> bool {
        !self.labels.is_empty()
            && self
                .labels
                .iter()
                .all(|(k, v)| job_labels.get(k) == Some(v))
    }

    pub fn apply(&self, base: &mut JobBase) {
        if !self.matches(&base.labels) || self.env.is_empty() {
            return;
        }
        if let Some(spec) = base.spec.as_mut() {
            for container in &mut spec.containers {
                container.env.extend(self.env.iter().cloned());
            }
        }
    }
}
