//! Keyed pool of reusable working copies.
//!
//! Cloning is expensive, so each repository is checked out once and then
//! handed out exclusively: one lock per `org/repo` key, created lazily and
//! kept for the life of the process. Waiting only ever happens on the same
//! key; different repositories are served in parallel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::client::{RepoClient, RepoClientFactory};
use crate::{GitError, GitResult};

type Slot = Arc<Mutex<Option<Arc<dyn RepoClient>>>>;

/// Pool of working copies, one per repository.
pub struct RepoConfigCache {
    factory: Option<Arc<dyn RepoClientFactory>>,
    /// Per-repository locks; never removed.
    repos: Mutex<HashMap<String, Slot>>,
}

impl RepoConfigCache {
    pub fn new(factory: Arc<dyn RepoClientFactory>) -> Self {
        Self::from_factory(Some(factory))
    }

    /// A cache that refuses every acquisition.
    pub fn disabled() -> Self {
        Self::from_factory(None)
    }

    pub fn from_factory(factory: Option<Arc<dyn RepoClientFactory>>) -> Self {
        Self {
            factory,
            repos: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a checkout factory is configured.
    pub fn is_enabled(&self) -> bool {
        self.factory.is_some()
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut repos = self.repos.lock().await;
        repos
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Get exclusive use of the working copy for `org/repo`.
    ///
    /// Blocks while another caller holds the same repository. The first call
    /// for a key creates the copy; later calls clean and fetch the cached one.
    pub async fn acquire(&self, org: &str, repo: &str) -> GitResult<CachedRepo> {
        let factory = self.factory.as_ref().ok_or(GitError::NoClientFactory)?;
        let key = format!("{org}/{repo}");

        let mut guard = self.slot(&key).await.lock_owned().await;

        let cached = (*guard).clone();
        let client = match cached {
            Some(client) => {
                if let Err(err) = refresh(client.as_ref()).await {
                    // Drop the copy so the next caller starts from the factory.
                    warn!(repo = %key, error = %err, "Evicting unusable working copy");
                    *guard = None;
                    return Err(err);
                }
                debug!(repo = %key, "Reusing cached working copy");
                client
            }
            None => {
                info!(repo = %key, "Creating working copy");
                let client: Arc<dyn RepoClient> = Arc::from(factory.client_for(org, repo).await?);
                *guard = Some(Arc::clone(&client));
                client
            }
        };

        Ok(CachedRepo {
            key,
            client,
            _guard: guard,
        })
    }
}

async fn refresh(client: &dyn RepoClient) -> GitResult<()> {
    client.clean().await?;
    client.fetch().await
}

/// Exclusive handle to a cached working copy.
///
/// The repository stays locked until the handle is released or dropped.
pub struct CachedRepo {
    key: String,
    client: Arc<dyn RepoClient>,
    _guard: OwnedMutexGuard<Option<Arc<dyn RepoClient>>>,
}

impl CachedRepo {
    /// `org/repo` key of this copy.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn directory(&self) -> &Path {
        self.client.directory()
    }

    pub async fn checkout(&self, revision: &str) -> GitResult<()> {
        self.client.checkout(revision).await
    }

    pub async fn merge_and_checkout(&self, base: &str, heads: &[String]) -> GitResult<()> {
        self.client.merge_and_checkout(base, heads).await
    }

    /// Clean the copy and hand it back to the pool.
    pub async fn release(self) {
        if let Err(err) = self.client.clean().await {
            // The next acquire cleans again before handing it out.
            warn!(repo = %self.key, error = %err, "Failed to clean working copy on release");
        }
    }
}
