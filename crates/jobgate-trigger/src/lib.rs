//! Trigger path for jobgate.
//!
//! A message arrives on a subscription, is classified by its event type
//! attribute, resolved against the job catalog, admitted against the
//! subscription's allowed clusters and handed to the execution backend.
//!
//! - [`resolver`]: event to job spec, per job kind
//! - [`dispatch`]: admission, record building, submission, reporting
//! - [`subscriber`]: per-message handling, ack/nack, metrics
//! - [`nats`]: JetStream transport
//! - [`reporter`]: status reporters

pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod nats;
pub mod reporter;
pub mod resolver;
pub mod subscriber;

pub use dispatch::Dispatcher;
pub use error::{TriggerError, TriggerResult};
pub use resolver::{JobResolver, Resolution, Resolver};
pub use subscriber::{Message, Subscriber};
