//! The checkout contract used by the cache and the config loader.

use async_trait::async_trait;
use std::path::Path;

use crate::GitResult;

/// A working copy of one repository.
///
/// `clean` is cheap and leaves the copy reusable; `close` destroys it.
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Filesystem path of the working tree.
    fn directory(&self) -> &Path;

    /// Update remote-tracking state.
    async fn fetch(&self) -> GitResult<()>;

    /// Check out a revision in detached mode.
    async fn checkout(&self, revision: &str) -> GitResult<()>;

    /// Check out `base` and merge `heads` on top of it, in order.
    async fn merge_and_checkout(&self, base: &str, heads: &[String]) -> GitResult<()>;

    /// Discard local modifications and untracked files.
    async fn clean(&self) -> GitResult<()>;

    /// Tear the working copy down. Never called while a cache owns it.
    async fn close(&self) -> GitResult<()>;
}

/// Produces working copies; creating one may clone over the network.
#[async_trait]
pub trait RepoClientFactory: Send + Sync {
    async fn client_for(&self, org: &str, repo: &str) -> GitResult<Box<dyn RepoClient>>;
}
