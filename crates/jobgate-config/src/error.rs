//! Configuration errors.

use jobgate_core::job::JobType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicated {kind} job: {name}")]
    DuplicateJob { kind: JobType, name: String },

    #[error("cluster {cluster:?} is not allowed for repository {repo:?}")]
    ClusterNotAllowed { cluster: String, repo: String },

    #[error("didn't get two results when splitting repo identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("git client is nil")]
    NoGitClient,

    #[error(transparent)]
    Git(#[from] jobgate_git::GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
