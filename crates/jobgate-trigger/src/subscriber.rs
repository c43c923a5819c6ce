//! Per-message handling.

use async_trait::async_trait;
use jobgate_config::ConfigAgent;
use jobgate_core::event::{EVENT_TYPE_ATTRIBUTE, EventType, JobEvent};
use jobgate_core::record::JobRecord;
use jobgate_git::RepoConfigCache;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::dispatch::Dispatcher;
use crate::metrics;
use crate::resolver::{JobResolver, Resolver};
use crate::{TriggerError, TriggerResult};

/// An inbound message, independent of the transport.
#[async_trait]
pub trait Message: Send + Sync {
    fn id(&self) -> &str;

    fn attributes(&self) -> &HashMap<String, String>;

    fn payload(&self) -> &[u8];

    /// Acknowledge; the message will not be delivered again.
    async fn ack(&self);

    /// Reject; the transport may redeliver.
    async fn nack(&self);
}

/// Handles trigger messages for every subscription.
pub struct Subscriber {
    config: Arc<ConfigAgent>,
    dispatcher: Dispatcher,
    /// Present when repository configuration may be read.
    cache: Option<Arc<RepoConfigCache>>,
}

impl Subscriber {
    pub fn new(config: Arc<ConfigAgent>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RepoConfigCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &Arc<ConfigAgent> {
        &self.config
    }

    /// Handle one message and ack or nack it.
    pub async fn process(
        &self,
        msg: &dyn Message,
        subscription: &str,
        allowed_clusters: &[String],
    ) {
        match self.handle_message(msg, subscription, allowed_clusters).await {
            Ok(_) => msg.ack().await,
            Err(_) => msg.nack().await,
        }
    }

    /// Classify, decode, resolve and dispatch one message.
    ///
    /// Every message is counted; every error is counted once more.
    #[instrument(skip_all, fields(subscription = %subscription, message_id = %msg.id()))]
    pub async fn handle_message(
        &self,
        msg: &dyn Message,
        subscription: &str,
        allowed_clusters: &[String],
    ) -> TriggerResult<JobRecord> {
        metrics::record_message(subscription);
        info!("Received message");

        let result = self.handle(msg, allowed_clusters).await;
        if let Err(e) = &result {
            metrics::record_error(subscription);
            if e.is_user_error() {
                debug!(error = %e, "Rejected message");
            } else {
                error!(error = %e, "Failed to handle message");
            }
        }
        result
    }

    async fn handle(
        &self,
        msg: &dyn Message,
        allowed_clusters: &[String],
    ) -> TriggerResult<JobRecord> {
        let event_type = event_type(msg.attributes())?;
        let event = JobEvent::from_payload(msg.payload())?;
        debug!(job = %event.name, event_type = ?event_type, "Decoded event");

        let config = self.config.config();
        let resolver = Resolver::for_event(event_type, self.cache.clone());
        let resolution = resolver.resolve(&*config, &event).await;
        self.dispatcher
            .dispatch(&event, resolution, allowed_clusters)
            .await
    }
}

fn event_type(attributes: &HashMap<String, String>) -> TriggerResult<EventType> {
    let value = attributes
        .get(EVENT_TYPE_ATTRIBUTE)
        .ok_or_else(|| TriggerError::MissingAttribute(EVENT_TYPE_ATTRIBUTE.to_string()))?;
    value
        .parse()
        .map_err(|_| TriggerError::UnsupportedEventType(value.clone()))
}
