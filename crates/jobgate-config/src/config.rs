//! Static service configuration.

use jobgate_core::job::{
    Brancher, DEFAULT_CLUSTER, JobBase, JobType, Periodic, Postsubmit, Presubmit, Preset,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::{ConfigError, ConfigResult};

/// Repository configuration settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InRepoSettings {
    /// Keyed by `*`, `org` or `org/repo`; the most specific entry wins.
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
    /// Clusters repository-declared jobs may use, keyed like `enabled`.
    #[serde(default)]
    pub allowed_clusters: HashMap<String, Vec<String>>,
}

impl InRepoSettings {
    /// Whether repository configuration is read for `org/repo`.
    ///
    /// Repositories not covered by any entry are enabled.
    pub fn enabled_for(&self, identifier: &str) -> bool {
        let org = identifier.split('/').next().unwrap_or(identifier);
        [identifier, org, "*"]
            .iter()
            .find_map(|key| self.enabled.get(*key).copied())
            .unwrap_or(true)
    }

    /// Union of the clusters allowed for `org/repo`, its org and `*`.
    pub fn allowed_clusters_for(&self, identifier: &str) -> Vec<String> {
        if self.allowed_clusters.is_empty() {
            return vec![DEFAULT_CLUSTER.to_string()];
        }
        let org = identifier.split('/').next().unwrap_or(identifier);
        let mut clusters: Vec<String> = Vec::new();
        for key in ["*", org, identifier] {
            for cluster in self.allowed_clusters.get(key).into_iter().flatten() {
                if !clusters.contains(cluster) {
                    clusters.push(cluster.clone());
                }
            }
        }
        clusters
    }
}

/// A message-bus subscription that triggers jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PubsubTrigger {
    /// Project (NATS stream) the subscriptions belong to.
    pub project: String,
    pub subscriptions: Vec<String>,
    /// Clusters jobs triggered through these subscriptions may run on.
    /// `*` admits any cluster.
    #[serde(default)]
    pub allowed_clusters: Vec<String>,
    #[serde(default)]
    pub max_outstanding_messages: Option<i64>,
}

/// Service configuration and the static job catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Namespace job pods run in when a job does not set one.
    #[serde(default)]
    pub pod_namespace: Option<String>,
    #[serde(default)]
    pub in_repo_config: InRepoSettings,
    #[serde(default)]
    pub pubsub_triggers: Vec<PubsubTrigger>,
    #[serde(default)]
    pub periodics: Vec<Periodic>,
    /// Presubmits keyed by `org/repo`.
    #[serde(default)]
    pub presubmits: HashMap<String, Vec<Presubmit>>,
    /// Postsubmits keyed by `org/repo`.
    #[serde(default)]
    pub postsubmits: HashMap<String, Vec<Postsubmit>>,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

impl Config {
    /// Parse, default and validate a KDL configuration.
    pub fn parse(kdl: &str) -> ConfigResult<Self> {
        let mut config = crate::parse::parse_config(kdl)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::parse(&text)
    }

    /// Apply presets and the default namespace to every static job.
    pub fn apply_defaults(&mut self) {
        let presets = self.presets.clone();
        let namespace = self.pod_namespace.clone();
        let bases = self
            .periodics
            .iter_mut()
            .map(|j| &mut j.base)
            .chain(self.presubmits.values_mut().flatten().map(|j| &mut j.base))
            .chain(self.postsubmits.values_mut().flatten().map(|j| &mut j.base));
        for base in bases {
            default_base(base, &presets, namespace.as_deref());
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for periodic in &self.periodics {
            if !names.insert(periodic.base.name.as_str()) {
                return Err(ConfigError::DuplicateJob {
                    kind: JobType::Periodic,
                    name: periodic.base.name.clone(),
                });
            }
            if periodic.cron.is_none() && periodic.interval.is_none() {
                return Err(ConfigError::MissingField(format!(
                    "cron or interval for periodic '{}'",
                    periodic.base.name
                )));
            }
        }

        for (repo, jobs) in &self.presubmits {
            validate_identifier(repo)?;
            check_unique(JobType::Presubmit, jobs.iter().map(|j| &j.base.name), [])?;
            for job in jobs {
                validate_branches(&job.base, &job.brancher)?;
            }
        }
        for (repo, jobs) in &self.postsubmits {
            validate_identifier(repo)?;
            check_unique(JobType::Postsubmit, jobs.iter().map(|j| &j.base.name), [])?;
            for job in jobs {
                validate_branches(&job.base, &job.brancher)?;
            }
        }

        for trigger in &self.pubsub_triggers {
            if trigger.subscriptions.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "subscriptions for pubsub trigger '{}'",
                    trigger.project
                )));
            }
        }
        Ok(())
    }

    /// Find the trigger settings for a subscription.
    pub fn pubsub_trigger(&self, subscription: &str) -> Option<&PubsubTrigger> {
        self.pubsub_triggers
            .iter()
            .find(|t| t.subscriptions.iter().any(|s| s == subscription))
    }
}

/// Split an `org/repo` identifier.
pub fn split_identifier(identifier: &str) -> ConfigResult<(&str, &str)> {
    let parts: Vec<&str> = identifier.split('/').collect();
    match parts.as_slice() {
        [org, repo] => Ok((*org, *repo)),
        _ => Err(ConfigError::InvalidIdentifier(identifier.to_string())),
    }
}

fn validate_identifier(identifier: &str) -> ConfigResult<()> {
    split_identifier(identifier).map(|_| ())
}

pub(crate) fn default_base(base: &mut JobBase, presets: &[Preset], namespace: Option<&str>) {
    for preset in presets {
        preset.apply(base);
    }
    if base.namespace.is_none() {
        base.namespace = namespace.map(str::to_string);
    }
}

pub(crate) fn validate_branches(base: &JobBase, brancher: &Brancher) -> ConfigResult<()> {
    brancher
        .validate()
        .map_err(|message| ConfigError::InvalidValue {
            field: format!("branches of job '{}'", base.name),
            message,
        })
}

/// Fail on the first name seen twice. `seeded` names count as already seen.
pub(crate) fn check_unique<'a>(
    kind: JobType,
    names: impl IntoIterator<Item = &'a String>,
    seeded: impl IntoIterator<Item = &'a String>,
) -> ConfigResult<()> {
    let mut seen: HashSet<&str> = seeded.into_iter().map(String::as_str).collect();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::DuplicateJob {
                kind,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(allowed: &[(&str, &[&str])]) -> InRepoSettings {
        InRepoSettings {
            allowed_clusters: allowed
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_allowed_clusters_union() {
        let s = settings(&[("*", &["default"]), ("org", &["build01"]), ("org/repo", &["gpu"])]);
        assert_eq!(
            s.allowed_clusters_for("org/repo"),
            vec!["default", "build01", "gpu"]
        );
        assert_eq!(s.allowed_clusters_for("other/repo"), vec!["default"]);
    }

    #[test]
    fn test_allowed_clusters_fall_back_to_default() {
        assert_eq!(
            InRepoSettings::default().allowed_clusters_for("org/repo"),
            vec![DEFAULT_CLUSTER]
        );
    }

    #[test]
    fn test_enabled_most_specific_wins() {
        let mut s = InRepoSettings::default();
        assert!(s.enabled_for("org/repo"));
        s.enabled.insert("*".to_string(), false);
        s.enabled.insert("org/repo".to_string(), true);
        assert!(s.enabled_for("org/repo"));
        assert!(!s.enabled_for("org/other"));
    }

    #[test]
    fn test_split_identifier() {
        assert_eq!(split_identifier("org/repo").unwrap(), ("org", "repo"));
        let err = split_identifier("my-repo").unwrap_err();
        assert_eq!(
            err.to_string(),
            "didn't get two results when splitting repo identifier \"my-repo\""
        );
        assert!(split_identifier("a/b/c").is_err());
    }

    #[test]
    fn test_parse_applies_defaults_and_validates() {
        let config = Config::parse(
            r#"
            pod-namespace "pods"
            preset {
                label "preset-a" "true"
                env "A" "1"
            }
            periodic "p" cron="@daily" {
                label "preset-a" "true"
                container "alpine"
            }
            "#,
        )
        .unwrap();
        let base = &config.periodics[0].base;
        assert_eq!(base.namespace.as_deref(), Some("pods"));
        assert_eq!(base.spec.as_ref().unwrap().containers[0].env.len(), 1);

        let err = Config::parse(
            r#"
            presubmit "org/repo" "unit"
            presubmit "org/repo" "unit"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "duplicated presubmit job: unit");

        assert!(matches!(
            Config::parse(r#"periodic "p""#),
            Err(ConfigError::MissingField(_))
        ));
        assert!(matches!(
            Config::parse(r#"presubmit "repo" "unit""#),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_pubsub_trigger_lookup() {
        let config = Config {
            pubsub_triggers: vec![PubsubTrigger {
                project: "ci".to_string(),
                subscriptions: vec!["a".to_string(), "b".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(config.pubsub_trigger("b").unwrap().project, "ci");
        assert!(config.pubsub_trigger("c").is_none());
    }

    #[test]
    fn test_check_unique_with_seeded_names() {
        let seeded = vec!["hans".to_string()];
        let names = vec!["hans".to_string()];
        let err = check_unique(JobType::Presubmit, &names, &seeded).unwrap_err();
        assert_eq!(err.to_string(), "duplicated presubmit job: hans");
    }
}
