//! Resolve a trigger event to the job spec it names.

use async_trait::async_trait;
use jobgate_config::JobCatalog;
use jobgate_core::event::{EventType, JobEvent, Refs};
use jobgate_core::job::JobType;
use jobgate_core::record::JobSpec;
use jobgate_git::RepoConfigCache;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{TriggerError, TriggerResult};

/// A resolved job: its spec plus the labels declared on the job.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub spec: JobSpec,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait JobResolver: Send + Sync {
    async fn resolve(
        &self,
        catalog: &dyn JobCatalog,
        event: &JobEvent,
    ) -> TriggerResult<Resolution>;
}

/// Looks a periodic up by exact name. Repository configuration is not
/// consulted.
pub struct PeriodicResolver;

#[async_trait]
impl JobResolver for PeriodicResolver {
    async fn resolve(
        &self,
        catalog: &dyn JobCatalog,
        event: &JobEvent,
    ) -> TriggerResult<Resolution> {
        let job = catalog
            .all_periodics()
            .iter()
            .find(|job| job.base.name == event.name)
            .ok_or_else(|| TriggerError::JobNotFound {
                kind: JobType::Periodic,
                name: event.name.clone(),
            })?;
        Ok(Resolution {
            spec: JobSpec::periodic(job),
            labels: job.base.labels.clone(),
        })
    }
}

/// Resolves presubmits against the static catalog or, when a cache is
/// configured, the catalog including the repository's own jobs.
pub struct PresubmitResolver {
    cache: Option<Arc<RepoConfigCache>>,
}

impl PresubmitResolver {
    pub fn new(cache: Option<Arc<RepoConfigCache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl JobResolver for PresubmitResolver {
    async fn resolve(
        &self,
        catalog: &dyn JobCatalog,
        event: &JobEvent,
    ) -> TriggerResult<Resolution> {
        let refs = required_refs(event, true)?;
        let identifier = refs.org_repo();

        let mut candidates = catalog.presubmits_static(&identifier).to_vec();
        if let Some(cache) = enabled(&self.cache) {
            let heads = refs.head_shas();
            match catalog
                .presubmits(cache, &identifier, &refs.base_sha, &heads)
                .await
            {
                Ok(jobs) => candidates = jobs,
                Err(e) => warn!(
                    repo = %identifier,
                    error = %e,
                    "Failed to load repository configuration, using static presubmits"
                ),
            }
        }

        let matches = candidates
            .iter()
            .filter(|job| job.could_run(&refs.base_ref))
            .filter(|job| job.base.name == event.name);
        let job = select_one(JobType::Presubmit, &event.name, matches)?;

        Ok(Resolution {
            spec: JobSpec::presubmit(job, refs.clone()),
            labels: job.base.labels.clone(),
        })
    }
}

/// Resolves postsubmits; like [`PresubmitResolver`] but without pulls.
pub struct PostsubmitResolver {
    cache: Option<Arc<RepoConfigCache>>,
}

impl PostsubmitResolver {
    pub fn new(cache: Option<Arc<RepoConfigCache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl JobResolver for PostsubmitResolver {
    async fn resolve(
        &self,
        catalog: &dyn JobCatalog,
        event: &JobEvent,
    ) -> TriggerResult<Resolution> {
        let refs = required_refs(event, false)?;
        let identifier = refs.org_repo();

        let mut candidates = catalog.postsubmits_static(&identifier).to_vec();
        if let Some(cache) = enabled(&self.cache) {
            match catalog
                .postsubmits(cache, &identifier, &refs.base_sha)
                .await
            {
                Ok(jobs) => candidates = jobs,
                Err(e) => warn!(
                    repo = %identifier,
                    error = %e,
                    "Failed to load repository configuration, using static postsubmits"
                ),
            }
        }

        let matches = candidates
            .iter()
            .filter(|job| job.could_run(&refs.base_ref))
            .filter(|job| job.base.name == event.name);
        let job = select_one(JobType::Postsubmit, &event.name, matches)?;

        Ok(Resolution {
            spec: JobSpec::postsubmit(job, refs.clone()),
            labels: job.base.labels.clone(),
        })
    }
}

/// Resolver chosen by the event type.
pub enum Resolver {
    Periodic(PeriodicResolver),
    Presubmit(PresubmitResolver),
    Postsubmit(PostsubmitResolver),
}

impl Resolver {
    pub fn for_event(event_type: EventType, cache: Option<Arc<RepoConfigCache>>) -> Self {
        match event_type {
            EventType::Periodic => Resolver::Periodic(PeriodicResolver),
            EventType::Presubmit => Resolver::Presubmit(PresubmitResolver::new(cache)),
            EventType::Postsubmit => Resolver::Postsubmit(PostsubmitResolver::new(cache)),
        }
    }
}

#[async_trait]
impl JobResolver for Resolver {
    async fn resolve(
        &self,
        catalog: &dyn JobCatalog,
        event: &JobEvent,
    ) -> TriggerResult<Resolution> {
        match self {
            Resolver::Periodic(r) => r.resolve(catalog, event).await,
            Resolver::Presubmit(r) => r.resolve(catalog, event).await,
            Resolver::Postsubmit(r) => r.resolve(catalog, event).await,
        }
    }
}

fn enabled(cache: &Option<Arc<RepoConfigCache>>) -> Option<&RepoConfigCache> {
    cache.as_deref().filter(|c| c.is_enabled())
}

fn required_refs(event: &JobEvent, needs_pulls: bool) -> TriggerResult<&Refs> {
    let refs = event.refs.as_ref().ok_or(TriggerError::MissingRefs)?;
    if refs.org.is_empty() {
        return Err(TriggerError::MissingRefField("org"));
    }
    if refs.repo.is_empty() {
        return Err(TriggerError::MissingRefField("repo"));
    }
    if needs_pulls && refs.pulls.is_empty() {
        return Err(TriggerError::MissingPulls);
    }
    if refs.base_sha.is_empty() {
        return Err(TriggerError::MissingRefField("base_sha"));
    }
    if refs.base_ref.is_empty() {
        return Err(TriggerError::MissingRefField("base_ref"));
    }
    Ok(refs)
}

/// Exactly one match is required.
fn select_one<'a, T>(
    kind: JobType,
    name: &str,
    mut matches: impl Iterator<Item = &'a T>,
) -> TriggerResult<&'a T> {
    let found = matches.next().ok_or_else(|| TriggerError::JobNotFound {
        kind,
        name: name.to_string(),
    })?;
    if matches.next().is_some() {
        debug!(job = name, %kind, "Job name is ambiguous");
        return Err(TriggerError::AmbiguousJob(name.to_string()));
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobgate_config::{ConfigError, ConfigResult};
    use jobgate_core::event::Pull;
    use jobgate_core::job::{Brancher, JobBase, Periodic, Postsubmit, Presubmit};
    use jobgate_git::{GitResult, RepoClient, RepoClientFactory};
    use std::sync::Mutex;

    /// Catalog with canned static and dynamic jobs.
    #[derive(Default)]
    struct FakeCatalog {
        periodics: Vec<Periodic>,
        presubmits: Vec<Presubmit>,
        postsubmits: Vec<Postsubmit>,
        dynamic_presubmits: Option<Vec<Presubmit>>,
        dynamic_postsubmits: Option<Vec<Postsubmit>>,
        dynamic_calls: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    #[async_trait]
    impl JobCatalog for FakeCatalog {
        fn all_periodics(&self) -> &[Periodic] {
            &self.periodics
        }

        fn presubmits_static(&self, _identifier: &str) -> &[Presubmit] {
            &self.presubmits
        }

        fn postsubmits_static(&self, _identifier: &str) -> &[Postsubmit] {
            &self.postsubmits
        }

        async fn presubmits(
            &self,
            _cache: &RepoConfigCache,
            identifier: &str,
            base_sha: &str,
            head_shas: &[String],
        ) -> ConfigResult<Vec<Presubmit>> {
            self.dynamic_calls.lock().unwrap().push((
                identifier.to_string(),
                base_sha.to_string(),
                head_shas.to_vec(),
            ));
            self.dynamic_presubmits
                .clone()
                .ok_or(ConfigError::NoGitClient)
        }

        async fn postsubmits(
            &self,
            _cache: &RepoConfigCache,
            identifier: &str,
            base_sha: &str,
        ) -> ConfigResult<Vec<Postsubmit>> {
            self.dynamic_calls.lock().unwrap().push((
                identifier.to_string(),
                base_sha.to_string(),
                Vec::new(),
            ));
            self.dynamic_postsubmits
                .clone()
                .ok_or(ConfigError::NoGitClient)
        }
    }

    /// The resolver only checks that a cache is enabled; it never acquires.
    struct NoopFactory;

    #[async_trait]
    impl RepoClientFactory for NoopFactory {
        async fn client_for(&self, _org: &str, _repo: &str) -> GitResult<Box<dyn RepoClient>> {
            unreachable!("resolver tests never acquire a working copy")
        }
    }

    fn cache() -> Option<Arc<RepoConfigCache>> {
        Some(Arc::new(RepoConfigCache::new(Arc::new(NoopFactory))))
    }

    fn presubmit(name: &str, branches: &[&str]) -> Presubmit {
        let mut base = JobBase::new(name);
        base.labels.insert("origin".to_string(), "static".to_string());
        Presubmit {
            base,
            brancher: Brancher {
                branches: branches.iter().map(|b| b.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn postsubmit(name: &str) -> Postsubmit {
        Postsubmit {
            base: JobBase::new(name),
            ..Default::default()
        }
    }

    fn refs() -> Refs {
        Refs {
            org: "org".to_string(),
            repo: "repo".to_string(),
            base_ref: "main".to_string(),
            base_sha: "base".to_string(),
            pulls: vec![Pull {
                number: 1,
                sha: "head".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn event(name: &str, refs: Option<Refs>) -> JobEvent {
        JobEvent {
            refs,
            ..JobEvent::new(name)
        }
    }

    #[tokio::test]
    async fn test_periodic_found() {
        let mut periodic = Periodic {
            base: JobBase::new("nightly"),
            ..Default::default()
        };
        periodic.base.labels.insert("team".to_string(), "infra".to_string());
        let catalog = FakeCatalog {
            periodics: vec![periodic],
            ..Default::default()
        };

        let resolution = PeriodicResolver
            .resolve(&catalog, &JobEvent::new("nightly"))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job, "nightly");
        assert_eq!(resolution.spec.job_type, Some(JobType::Periodic));
        assert_eq!(resolution.labels["team"], "infra");
    }

    #[tokio::test]
    async fn test_periodic_not_found() {
        let err = PeriodicResolver
            .resolve(&FakeCatalog::default(), &JobEvent::new("nightly"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to find associated periodic job \"nightly\""
        );
    }

    #[tokio::test]
    async fn test_presubmit_requires_refs() {
        let resolver = PresubmitResolver::new(None);
        let catalog = FakeCatalog::default();
        let cases: Vec<(Option<Refs>, &str)> = vec![
            (None, "refs must be supplied"),
            (Some(Refs { org: String::new(), ..refs() }), "org must be supplied"),
            (Some(Refs { repo: String::new(), ..refs() }), "repo must be supplied"),
            (Some(Refs { pulls: vec![], ..refs() }), "at least 1 pull is required"),
            (Some(Refs { base_sha: String::new(), ..refs() }), "base_sha must be supplied"),
            (Some(Refs { base_ref: String::new(), ..refs() }), "base_ref must be supplied"),
        ];
        for (refs, expected) in cases {
            let err = resolver
                .resolve(&catalog, &event("unit", refs))
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[tokio::test]
    async fn test_postsubmit_does_not_require_pulls() {
        let catalog = FakeCatalog {
            postsubmits: vec![postsubmit("deploy")],
            ..Default::default()
        };
        let resolution = PostsubmitResolver::new(None)
            .resolve(&catalog, &event("deploy", Some(Refs { pulls: vec![], ..refs() })))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job_type, Some(JobType::Postsubmit));
        assert_eq!(resolution.spec.context.as_deref(), Some("deploy"));
    }

    #[tokio::test]
    async fn test_presubmit_found_filters_by_branch() {
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &["release-.*"]), presubmit("unit", &["main"])],
            ..Default::default()
        };
        let resolution = PresubmitResolver::new(None)
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job, "unit");
        assert_eq!(resolution.spec.refs, Some(refs()));
        assert_eq!(resolution.labels["origin"], "static");
    }

    #[tokio::test]
    async fn test_presubmit_ambiguous() {
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &[]), presubmit("unit", &["main"])],
            ..Default::default()
        };
        let err = PresubmitResolver::new(None)
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unit matches multiple jobs");
    }

    #[tokio::test]
    async fn test_presubmit_not_found() {
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &["release-.*"])],
            ..Default::default()
        };
        let err = PresubmitResolver::new(None)
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to find associated presubmit job \"unit\""
        );
    }

    #[tokio::test]
    async fn test_dynamic_catalog_replaces_static() {
        let mut dynamic = presubmit("from-repo", &[]);
        dynamic.base.labels.insert("origin".to_string(), "repo".to_string());
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &[])],
            dynamic_presubmits: Some(vec![dynamic]),
            ..Default::default()
        };
        let resolver = PresubmitResolver::new(cache());

        let resolution = resolver
            .resolve(&catalog, &event("from-repo", Some(refs())))
            .await
            .unwrap();
        assert_eq!(resolution.labels["origin"], "repo");

        // The dynamic set replaces the static one entirely.
        let err = resolver
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::JobNotFound { .. }));

        let calls = catalog.dynamic_calls.lock().unwrap();
        assert_eq!(
            calls[0],
            ("org/repo".to_string(), "base".to_string(), vec!["head".to_string()])
        );
    }

    #[tokio::test]
    async fn test_dynamic_failure_falls_back_to_static() {
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &[])],
            postsubmits: vec![postsubmit("deploy")],
            ..Default::default()
        };

        let resolution = PresubmitResolver::new(cache())
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job, "unit");

        let resolution = PostsubmitResolver::new(cache())
            .resolve(&catalog, &event("deploy", Some(refs())))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job, "deploy");
        assert_eq!(catalog.dynamic_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_skips_dynamic_lookup() {
        let catalog = FakeCatalog {
            presubmits: vec![presubmit("unit", &[])],
            ..Default::default()
        };
        let resolver = PresubmitResolver::new(Some(Arc::new(RepoConfigCache::disabled())));
        resolver
            .resolve(&catalog, &event("unit", Some(refs())))
            .await
            .unwrap();
        assert!(catalog.dynamic_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_for_event() {
        let catalog = FakeCatalog {
            postsubmits: vec![postsubmit("deploy")],
            ..Default::default()
        };
        let resolver = Resolver::for_event(EventType::Postsubmit, None);
        assert!(matches!(resolver, Resolver::Postsubmit(_)));
        let resolution = resolver
            .resolve(&catalog, &event("deploy", Some(refs())))
            .await
            .unwrap();
        assert_eq!(resolution.spec.job, "deploy");
    }
}
