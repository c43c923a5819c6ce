//! Git working copies for reading repository-declared job configuration.
//!
//! - [`RepoClient`] / [`RepoClientFactory`]: the checkout contract
//! - [`GitCliFactory`]: implementation backed by the `git` binary
//! - [`RepoConfigCache`]: keyed pool of exclusive, reusable working copies

pub mod cache;
pub mod cli;
pub mod client;
pub mod error;

pub use cache::{CachedRepo, RepoConfigCache};
pub use cli::{GitCliClient, GitCliFactory};
pub use client::{RepoClient, RepoClientFactory};
pub use error::{GitError, GitResult};
