//! Job configuration checked into the repository under test.
//!
//! A repository declares jobs either in a single `.prow.yaml` file or in any
//! number of YAML files below a `.prow/` directory. The directory wins when
//! both exist. The configuration is read at the base revision with the
//! change's head revisions merged on top, so a change can add or modify its
//! own jobs.

use jobgate_core::job::{DEFAULT_CLUSTER, JobBase, JobType, Postsubmit, Presubmit, Preset};
use jobgate_git::{CachedRepo, RepoConfigCache};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{
    Config, InRepoSettings, check_unique, default_base, split_identifier, validate_branches,
};
use crate::{ConfigError, ConfigResult};

/// Single-file configuration name.
pub const IN_REPO_CONFIG_FILE: &str = ".prow.yaml";
/// Directory of configuration fragments.
pub const IN_REPO_CONFIG_DIR: &str = ".prow";

/// Jobs and presets declared by a repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InRepoConfig {
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub presubmits: Vec<Presubmit>,
    #[serde(default)]
    pub postsubmits: Vec<Postsubmit>,
}

impl InRepoConfig {
    /// Parse one YAML document. Unknown fields are ignored; `source` names
    /// the document in errors.
    pub fn parse(source: &str, text: &str) -> ConfigResult<Self> {
        let yaml_error = |source_err| ConfigError::Yaml {
            path: source.to_string(),
            source: source_err,
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(yaml_error)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(yaml_error)
    }

    /// Read the configuration from a working tree without defaulting or
    /// validating it. A tree without configuration yields an empty result.
    pub async fn read_from(root: &Path) -> ConfigResult<Self> {
        let dir = root.join(IN_REPO_CONFIG_DIR);
        if tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            let mut files = Vec::new();
            collect_yaml_files(&dir, &mut files).await?;
            files.sort();

            let mut config = Self::default();
            for file in &files {
                let label = file
                    .strip_prefix(root)
                    .unwrap_or(file)
                    .to_string_lossy()
                    .to_string();
                debug!(path = %label, "Reading configuration fragment");
                let text = tokio::fs::read_to_string(file).await?;
                config.extend(Self::parse(&label, &text)?);
            }
            return Ok(config);
        }

        let file = root.join(IN_REPO_CONFIG_FILE);
        match tokio::fs::read_to_string(&file).await {
            Ok(text) => Self::parse(IN_REPO_CONFIG_FILE, &text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn extend(&mut self, other: Self) {
        self.presets.extend(other.presets);
        self.presubmits.extend(other.presubmits);
        self.postsubmits.extend(other.postsubmits);
    }

    /// Fill in presets, namespace, cluster and status context.
    pub fn apply_defaults(&mut self, config: &Config) {
        let presets: Vec<Preset> = config
            .presets
            .iter()
            .chain(&self.presets)
            .cloned()
            .collect();
        let namespace = config.pod_namespace.as_deref();

        for job in &mut self.presubmits {
            default_job(&mut job.base, &presets, namespace);
            if job.reporter.context.is_empty() {
                job.reporter.context = job.base.name.clone();
            }
        }
        for job in &mut self.postsubmits {
            default_job(&mut job.base, &presets, namespace);
            if job.reporter.context.is_empty() {
                job.reporter.context = job.base.name.clone();
            }
        }
    }

    /// Reject duplicates (including the static jobs of the repository),
    /// jobs without containers and invalid branch patterns.
    pub fn validate(&self, config: &Config, identifier: &str) -> ConfigResult<()> {
        let static_presubmits = config.presubmits.get(identifier).into_iter().flatten();
        check_unique(
            JobType::Presubmit,
            self.presubmits.iter().map(|j| &j.base.name),
            static_presubmits.map(|j| &j.base.name),
        )?;
        let static_postsubmits = config.postsubmits.get(identifier).into_iter().flatten();
        check_unique(
            JobType::Postsubmit,
            self.postsubmits.iter().map(|j| &j.base.name),
            static_postsubmits.map(|j| &j.base.name),
        )?;

        for job in &self.presubmits {
            validate_job(&job.base)?;
            validate_branches(&job.base, &job.brancher)?;
        }
        for job in &self.postsubmits {
            validate_job(&job.base)?;
            validate_branches(&job.base, &job.brancher)?;
        }
        Ok(())
    }

    /// Every job must run on a cluster allowed for the repository.
    pub fn check_clusters(&self, settings: &InRepoSettings, identifier: &str) -> ConfigResult<()> {
        let allowed = settings.allowed_clusters_for(identifier);
        let clusters = self
            .presubmits
            .iter()
            .map(|j| j.base.cluster())
            .chain(self.postsubmits.iter().map(|j| j.base.cluster()));
        for cluster in clusters {
            if !allowed.iter().any(|c| c == cluster) {
                return Err(ConfigError::ClusterNotAllowed {
                    cluster: cluster.to_string(),
                    repo: identifier.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Default, validate and admit freshly read configuration.
    pub fn finalize(mut self, config: &Config, identifier: &str) -> ConfigResult<Self> {
        self.apply_defaults(config);
        self.validate(config, identifier)?;
        self.check_clusters(&config.in_repo_config, identifier)?;
        Ok(self)
    }
}

fn default_job(base: &mut JobBase, presets: &[Preset], namespace: Option<&str>) {
    default_base(base, presets, namespace);
    if base.cluster.is_empty() {
        base.cluster = DEFAULT_CLUSTER.to_string();
    }
}

fn validate_job(base: &JobBase) -> ConfigResult<()> {
    let has_containers = base.spec.as_ref().is_some_and(|s| !s.containers.is_empty());
    if !has_containers {
        return Err(ConfigError::InvalidValue {
            field: format!("spec of job '{}'", base.name),
            message: "at least one container is required".to_string(),
        });
    }
    Ok(())
}

#[async_recursion::async_recursion]
async fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> ConfigResult<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            collect_yaml_files(&path, files).await?;
        } else if is_yaml(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Load the configuration of `org/repo` as of `base_sha` with `head_shas`
/// merged on top, then default, validate and admit it.
pub async fn load_in_repo_config(
    config: &Config,
    cache: &RepoConfigCache,
    identifier: &str,
    base_sha: &str,
    head_shas: &[String],
) -> ConfigResult<InRepoConfig> {
    if !cache.is_enabled() {
        return Err(ConfigError::NoGitClient);
    }
    let (org, repo) = split_identifier(identifier)?;

    let copy = cache.acquire(org, repo).await?;
    let read = read_at_revision(&copy, base_sha, head_shas).await;
    copy.release().await;

    let in_repo = read?.finalize(config, identifier)?;
    info!(
        repo = identifier,
        base_sha,
        presubmits = in_repo.presubmits.len(),
        postsubmits = in_repo.postsubmits.len(),
        "Loaded repository configuration"
    );
    Ok(in_repo)
}

async fn read_at_revision(
    copy: &CachedRepo,
    base_sha: &str,
    head_shas: &[String],
) -> ConfigResult<InRepoConfig> {
    copy.merge_and_checkout(base_sha, head_shas).await?;
    InRepoConfig::read_from(copy.directory()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobgate_core::job::{Container, EnvVar, PodSpec};
    use jobgate_git::{GitError, GitResult, RepoClient, RepoClientFactory};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    type Files = Vec<(&'static str, &'static str)>;

    /// Working copy whose revisions are in-memory file sets. Merging
    /// overlays each head's files on the base.
    struct FakeRepo {
        dir: PathBuf,
        revisions: HashMap<String, Files>,
        cleans: Arc<AtomicUsize>,
    }

    impl FakeRepo {
        fn reset(&self) -> GitResult<()> {
            if self.dir.exists() {
                std::fs::remove_dir_all(&self.dir)?;
            }
            std::fs::create_dir_all(&self.dir)?;
            Ok(())
        }

        fn write(&self, revision: &str) -> GitResult<()> {
            let files = self
                .revisions
                .get(revision)
                .ok_or_else(|| GitError::CommandFailed {
                    command: "checkout".to_string(),
                    stderr: format!("unknown revision {revision}"),
                })?;
            for (name, content) in files {
                let path = self.dir.join(name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, content)?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RepoClient for FakeRepo {
        fn directory(&self) -> &Path {
            &self.dir
        }

        async fn fetch(&self) -> GitResult<()> {
            Ok(())
        }

        async fn checkout(&self, revision: &str) -> GitResult<()> {
            self.reset()?;
            self.write(revision)
        }

        async fn merge_and_checkout(&self, base: &str, heads: &[String]) -> GitResult<()> {
            self.checkout(base).await?;
            for head in heads {
                self.write(head)?;
            }
            Ok(())
        }

        async fn clean(&self) -> GitResult<()> {
            self.cleans.fetch_add(1, Ordering::SeqCst);
            self.reset()
        }

        async fn close(&self) -> GitResult<()> {
            Ok(())
        }
    }

    struct FakeFactory {
        root: TempDir,
        revisions: HashMap<String, Files>,
        cleans: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RepoClientFactory for FakeFactory {
        async fn client_for(&self, org: &str, repo: &str) -> GitResult<Box<dyn RepoClient>> {
            let dir = self.root.path().join(org).join(repo);
            std::fs::create_dir_all(&dir)?;
            Ok(Box::new(FakeRepo {
                dir,
                revisions: self.revisions.clone(),
                cleans: Arc::clone(&self.cleans),
            }))
        }
    }

    fn cache_with(revisions: Vec<(&str, Files)>) -> (RepoConfigCache, Arc<AtomicUsize>) {
        let cleans = Arc::new(AtomicUsize::new(0));
        let factory = FakeFactory {
            root: tempfile::tempdir().unwrap(),
            revisions: revisions
                .into_iter()
                .map(|(sha, files)| (sha.to_string(), files))
                .collect(),
            cleans: Arc::clone(&cleans),
        };
        (RepoConfigCache::new(Arc::new(factory)), cleans)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config
            .in_repo_config
            .allowed_clusters
            .insert("*".to_string(), vec!["default".to_string()]);
        config
    }

    const HANS: &str = r#"
presubmits:
- name: hans
  spec:
    containers:
    - image: "alpine:3"
"#;

    async fn load(
        config: &Config,
        revisions: Vec<(&str, Files)>,
        heads: &[&str],
    ) -> ConfigResult<InRepoConfig> {
        let (cache, _) = cache_with(revisions);
        let heads: Vec<String> = heads.iter().map(|h| h.to_string()).collect();
        load_in_repo_config(config, &cache, "org/repo", "base", &heads).await
    }

    #[tokio::test]
    async fn test_no_config_is_empty() {
        let result = load(&config(), vec![("base", vec![("README.md", "hi")])], &[])
            .await
            .unwrap();
        assert_eq!(result, InRepoConfig::default());
    }

    #[tokio::test]
    async fn test_single_file_is_read_and_defaulted() {
        let result = load(&config(), vec![("base", vec![(".prow.yaml", HANS)])], &[])
            .await
            .unwrap();
        assert_eq!(result.presubmits.len(), 1);
        let job = &result.presubmits[0];
        assert_eq!(job.base.name, "hans");
        assert_eq!(job.reporter.context, "hans");
        assert_eq!(job.base.cluster, DEFAULT_CLUSTER);
    }

    #[tokio::test]
    async fn test_head_changes_are_merged() {
        let result = load(
            &config(),
            vec![("base", vec![]), ("head", vec![(".prow.yaml", HANS)])],
            &["head"],
        )
        .await
        .unwrap();
        assert_eq!(result.presubmits[0].base.name, "hans");
    }

    #[tokio::test]
    async fn test_directory_fragments_in_path_order() {
        let files = vec![
            (
                ".prow/sub3/b.yaml",
                "presubmits:\n- name: third\n  spec:\n    containers:\n    - image: a\n",
            ),
            (
                ".prow/sub1/sub2/a.yml",
                "presubmits:\n- name: second\n  spec:\n    containers:\n    - image: a\n",
            ),
            (
                ".prow/a.yaml",
                "presubmits:\n- name: first\n  spec:\n    containers:\n    - image: a\n",
            ),
            (".prow/notes.txt", "presubmits: [not, yaml"),
        ];
        let result = load(&config(), vec![("base", files)], &[]).await.unwrap();
        let names: Vec<&str> = result
            .presubmits
            .iter()
            .map(|j| j.base.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_directory_wins_over_file() {
        let files = vec![
            (".prow.yaml", HANS),
            (
                ".prow/jobs.yaml",
                "postsubmits:\n- name: deploy\n  spec:\n    containers:\n    - image: a\n",
            ),
        ];
        let result = load(&config(), vec![("base", files)], &[]).await.unwrap();
        assert!(result.presubmits.is_empty());
        assert_eq!(result.postsubmits[0].base.name, "deploy");
    }

    #[tokio::test]
    async fn test_duplicate_with_static_job() {
        let mut config = config();
        config
            .presubmits
            .insert("org/repo".to_string(), vec![Presubmit {
                base: JobBase::new("hans"),
                ..Default::default()
            }]);
        let err = load(&config, vec![("base", vec![(".prow.yaml", HANS)])], &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicated presubmit job: hans");
    }

    #[tokio::test]
    async fn test_duplicate_across_fragments() {
        let files = vec![(".prow/a.yaml", HANS), (".prow/b.yaml", HANS)];
        let err = load(&config(), vec![("base", files)], &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "duplicated presubmit job: hans");
    }

    #[tokio::test]
    async fn test_cluster_not_allowed() {
        let yaml = "presubmits:\n- name: hans\n  cluster: privileged\n  spec:\n    containers:\n    - image: a\n";
        let err = load(&config(), vec![("base", vec![(".prow.yaml", yaml)])], &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cluster \"privileged\" is not allowed for repository \"org/repo\""
        );
    }

    #[tokio::test]
    async fn test_cluster_allowed_for_repo() {
        let mut config = config();
        config
            .in_repo_config
            .allowed_clusters
            .insert("org/repo".to_string(), vec!["privileged".to_string()]);
        let yaml = "presubmits:\n- name: hans\n  cluster: privileged\n  spec:\n    containers:\n    - image: a\n";
        let result = load(&config, vec![("base", vec![(".prow.yaml", yaml)])], &[])
            .await
            .unwrap();
        assert_eq!(result.presubmits[0].base.cluster, "privileged");
    }

    #[tokio::test]
    async fn test_unknown_fields_are_ignored() {
        let yaml = "presubmits:\n- name: hans\n  never_heard_of: 1\n  spec:\n    containers:\n    - image: a\n";
        let result = load(&config(), vec![("base", vec![(".prow.yaml", yaml)])], &[])
            .await
            .unwrap();
        assert_eq!(result.presubmits.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_yaml_is_error() {
        let err = load(
            &config(),
            vec![("base", vec![(".prow.yaml", "presubmits: [name: {")])],
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[tokio::test]
    async fn test_job_without_containers_is_rejected() {
        let err = load(
            &config(),
            vec![("base", vec![(".prow.yaml", "presubmits:\n- name: hans\n")])],
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_presets_are_applied() {
        let yaml = r#"
presets:
- labels:
    preset-foo: "true"
  env:
  - name: FOO
    value: bar
presubmits:
- name: hans
  labels:
    preset-foo: "true"
  spec:
    containers:
    - image: a
"#;
        let result = load(&config(), vec![("base", vec![(".prow.yaml", yaml)])], &[])
            .await
            .unwrap();
        let env = &result.presubmits[0].base.spec.as_ref().unwrap().containers[0].env;
        assert_eq!(env, &vec![EnvVar::new("FOO", "bar")]);
    }

    #[tokio::test]
    async fn test_invalid_identifier() {
        let (cache, _) = cache_with(vec![]);
        let err = load_in_repo_config(&config(), &cache, "my-repo", "base", &[])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "didn't get two results when splitting repo identifier \"my-repo\""
        );
    }

    #[tokio::test]
    async fn test_missing_git_client() {
        let cache = RepoConfigCache::disabled();
        let err = load_in_repo_config(&config(), &cache, "org/repo", "base", &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "git client is nil");
    }

    #[tokio::test]
    async fn test_copy_released_after_checkout_failure() {
        let (cache, cleans) = cache_with(vec![]);
        let err = load_in_repo_config(&config(), &cache, "org/repo", "missing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Git(_)));
        // Released (and cleaned) even though the read failed.
        assert_eq!(cleans.load(Ordering::SeqCst), 1);
        let again = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.acquire("org", "repo"),
        )
        .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_read_from_plain_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IN_REPO_CONFIG_FILE), HANS).unwrap();
        let read = InRepoConfig::read_from(dir.path()).await.unwrap();
        assert_eq!(read.presubmits[0].base.name, "hans");
        // Not defaulted until finalized.
        assert!(read.presubmits[0].reporter.context.is_empty());

        let expected = PodSpec {
            containers: vec![Container {
                image: "alpine:3".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(read.presubmits[0].base.spec.as_ref(), Some(&expected));
    }
}
