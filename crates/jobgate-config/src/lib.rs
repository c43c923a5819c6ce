//! Job configuration for jobgate.
//!
//! This crate handles:
//! - The static service configuration and job catalog (`jobgate.kdl`)
//! - Repository-declared job configuration (`.prow.yaml` / `.prow/`)
//! - The [`JobCatalog`] queries used by the trigger path

pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod inrepo;
pub mod parse;

pub use agent::ConfigAgent;
pub use catalog::JobCatalog;
pub use config::{Config, InRepoSettings, PubsubTrigger, split_identifier};
pub use error::{ConfigError, ConfigResult};
pub use inrepo::{IN_REPO_CONFIG_DIR, IN_REPO_CONFIG_FILE, InRepoConfig, load_in_repo_config};
