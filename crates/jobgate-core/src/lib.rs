//! Core domain types and traits for the jobgate trigger service.
//!
//! This crate contains:
//! - Job definitions (periodic, presubmit, postsubmit) and pod templates
//! - Inbound trigger events and their git references
//! - Job records submitted to the execution backend
//! - Collaborator traits for the execution backend and status reporting

pub mod backend;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod record;
pub mod reporter;

pub use error::{Error, Result};
pub use id::JobId;
