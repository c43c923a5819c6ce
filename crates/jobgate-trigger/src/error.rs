//! Errors raised while handling a trigger event.

use jobgate_core::job::JobType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unable to find {0:?} from the attributes")]
    MissingAttribute(String),

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("refs must be supplied")]
    MissingRefs,

    #[error("{0} must be supplied")]
    MissingRefField(&'static str),

    #[error("at least 1 pull is required")]
    MissingPulls,

    #[error("failed to find associated {kind} job {name:?}")]
    JobNotFound { kind: JobType, name: String },

    #[error("{0} matches multiple jobs")]
    AmbiguousJob(String),

    #[error(
        "cluster {0} is not allowed. Can be fixed by defining this cluster under pubsub-trigger -> allowed-clusters"
    )]
    ClusterNotAllowed(String),

    #[error(transparent)]
    Backend(#[from] jobgate_core::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

impl TriggerError {
    /// Errors caused by the event's content rather than by this service.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TriggerError::MissingAttribute(_)
                | TriggerError::UnsupportedEventType(_)
                | TriggerError::Payload(_)
                | TriggerError::MissingRefs
                | TriggerError::MissingRefField(_)
                | TriggerError::MissingPulls
                | TriggerError::JobNotFound { .. }
                | TriggerError::AmbiguousJob(_)
        )
    }
}

pub type TriggerResult<T> = std::result::Result<T, TriggerError>;
