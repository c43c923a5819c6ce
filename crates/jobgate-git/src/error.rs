//! Git operation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("merge of {heads} onto {base} failed: {stderr}")]
    MergeConflict {
        base: String,
        heads: String,
        stderr: String,
    },

    #[error("git client factory is not configured")]
    NoClientFactory,

    #[error("invalid repository identifier: {0}")]
    InvalidIdentifier(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;
