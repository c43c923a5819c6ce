//! Error types for jobgate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("report failed: {0}")]
    Report(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
