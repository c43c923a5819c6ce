//! Execution backends for jobgate.
//!
//! Provides [`JobClient`] implementations:
//! - Kubernetes custom resources (production)
//! - Log-only acceptance (dry runs and local development)

pub mod dry_run;
pub mod kubernetes;

pub use dry_run::DryRunJobClient;
pub use jobgate_core::backend::JobClient;
pub use kubernetes::KubernetesJobClient;
