//! Job lookup for the trigger path.

use async_trait::async_trait;
use jobgate_core::job::{Periodic, Postsubmit, Presubmit};
use jobgate_git::RepoConfigCache;
use tracing::debug;

use crate::ConfigResult;
use crate::config::Config;
use crate::inrepo::load_in_repo_config;

/// Source of job definitions.
///
/// The static accessors never fail. The dynamic ones return the static
/// jobs of the repository followed by the jobs it declares itself.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    fn all_periodics(&self) -> &[Periodic];

    fn presubmits_static(&self, identifier: &str) -> &[Presubmit];

    fn postsubmits_static(&self, identifier: &str) -> &[Postsubmit];

    async fn presubmits(
        &self,
        cache: &RepoConfigCache,
        identifier: &str,
        base_sha: &str,
        head_shas: &[String],
    ) -> ConfigResult<Vec<Presubmit>>;

    async fn postsubmits(
        &self,
        cache: &RepoConfigCache,
        identifier: &str,
        base_sha: &str,
    ) -> ConfigResult<Vec<Postsubmit>>;
}

#[async_trait]
impl JobCatalog for Config {
    fn all_periodics(&self) -> &[Periodic] {
        &self.periodics
    }

    fn presubmits_static(&self, identifier: &str) -> &[Presubmit] {
        self.presubmits
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn postsubmits_static(&self, identifier: &str) -> &[Postsubmit] {
        self.postsubmits
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    async fn presubmits(
        &self,
        cache: &RepoConfigCache,
        identifier: &str,
        base_sha: &str,
        head_shas: &[String],
    ) -> ConfigResult<Vec<Presubmit>> {
        let mut jobs = self.presubmits_static(identifier).to_vec();
        if !self.in_repo_config.enabled_for(identifier) {
            debug!(repo = identifier, "Repository configuration disabled");
            return Ok(jobs);
        }
        let in_repo = load_in_repo_config(self, cache, identifier, base_sha, head_shas).await?;
        jobs.extend(in_repo.presubmits);
        Ok(jobs)
    }

    async fn postsubmits(
        &self,
        cache: &RepoConfigCache,
        identifier: &str,
        base_sha: &str,
    ) -> ConfigResult<Vec<Postsubmit>> {
        let mut jobs = self.postsubmits_static(identifier).to_vec();
        if !self.in_repo_config.enabled_for(identifier) {
            debug!(repo = identifier, "Repository configuration disabled");
            return Ok(jobs);
        }
        let in_repo = load_in_repo_config(self, cache, identifier, base_sha, &[]).await?;
        jobs.extend(in_repo.postsubmits);
        Ok(jobs)
    }
}
