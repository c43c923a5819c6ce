//! NATS JetStream transport.
//!
//! Each configured pubsub trigger maps to a stream (its project) and one
//! durable pull consumer per subscription. Every delivered message is
//! handled on its own task.

use async_nats::HeaderMap;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer, pull};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use jobgate_config::PubsubTrigger;
use jobgate_core::event::{EVENT_TYPE_ATTRIBUTE, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::subscriber::{Message, Subscriber};
use crate::{TriggerError, TriggerResult};

/// Header JetStream uses for deduplication; doubles as the message id.
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Consumer setting used when a trigger does not limit outstanding messages.
pub const DEFAULT_MAX_ACK_PENDING: i64 = 1000;

const ATTRIBUTE_HEADERS: [&str; 2] = [EVENT_TYPE_ATTRIBUTE, MSG_ID_HEADER];

/// A JetStream message seen through the transport-neutral [`Message`] trait.
pub struct NatsMessage {
    inner: jetstream::Message,
    id: String,
    attributes: HashMap<String, String>,
}

impl NatsMessage {
    pub fn new(inner: jetstream::Message) -> Self {
        let attributes = inner
            .headers
            .as_ref()
            .map(headers_to_attributes)
            .unwrap_or_default();
        let id = attributes
            .get(MSG_ID_HEADER)
            .cloned()
            .or_else(|| inner.info().ok().map(|i| i.stream_sequence.to_string()))
            .unwrap_or_default();
        Self {
            inner,
            id,
            attributes,
        }
    }
}

#[async_trait]
impl Message for NatsMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    async fn ack(&self) {
        if let Err(e) = self.inner.ack().await {
            warn!(message_id = %self.id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn nack(&self) {
        if let Err(e) = self.inner.ack_with(AckKind::Nak(None)).await {
            warn!(message_id = %self.id, error = %e, "Failed to negatively acknowledge message");
        }
    }
}

/// Copy the headers that carry message attributes.
pub fn headers_to_attributes(headers: &HeaderMap) -> HashMap<String, String> {
    ATTRIBUTE_HEADERS
        .iter()
        .filter_map(|key| {
            headers
                .get(*key)
                .map(|value| (key.to_string(), value.as_str().to_string()))
        })
        .collect()
}

/// Consumes every configured subscription and feeds the [`Subscriber`].
pub struct NatsListener {
    jetstream: jetstream::Context,
    subscriber: Arc<Subscriber>,
}

impl NatsListener {
    pub fn new(client: async_nats::Client, subscriber: Arc<Subscriber>) -> Self {
        Self {
            jetstream: jetstream::new(client),
            subscriber,
        }
    }

    #[instrument(skip(subscriber))]
    pub async fn connect(url: &str, subscriber: Arc<Subscriber>) -> TriggerResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TriggerError::Transport(format!("failed to connect to NATS: {e}")))?;
        info!("Connected to NATS server");
        Ok(Self::new(client, subscriber))
    }

    /// Listen until every subscription's stream ends or one fails to start.
    pub async fn run(&self) -> TriggerResult<()> {
        let config = self.subscriber.config().config();
        if config.pubsub_triggers.is_empty() {
            warn!("No pubsub triggers configured, nothing to listen to");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for trigger in &config.pubsub_triggers {
            for subscription in &trigger.subscriptions {
                let consumer = self.consumer(trigger, subscription).await?;
                tasks.spawn(listen(
                    consumer,
                    Arc::clone(&self.subscriber),
                    subscription.clone(),
                ));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => error!(error = %e, "Subscription task panicked"),
            }
        }
        Ok(())
    }

    async fn consumer(
        &self,
        trigger: &PubsubTrigger,
        subscription: &str,
    ) -> TriggerResult<PullConsumer> {
        let stream = self
            .jetstream
            .get_stream(&trigger.project)
            .await
            .map_err(|e| {
                TriggerError::Transport(format!("stream {} not found: {e}", trigger.project))
            })?;

        let consumer_config = pull::Config {
            durable_name: Some(subscription.to_string()),
            ack_policy: AckPolicy::Explicit,
            max_ack_pending: trigger
                .max_outstanding_messages
                .unwrap_or(DEFAULT_MAX_ACK_PENDING),
            ..Default::default()
        };
        stream
            .get_or_create_consumer(subscription, consumer_config)
            .await
            .map_err(|e| {
                TriggerError::Transport(format!("failed to create consumer {subscription}: {e}"))
            })
    }

    /// Publish an event envelope; attributes travel as headers.
    pub async fn publish(&self, subject: String, envelope: Envelope) -> TriggerResult<()> {
        publish(&self.jetstream, subject, envelope).await
    }
}

pub async fn publish(
    jetstream: &jetstream::Context,
    subject: String,
    envelope: Envelope,
) -> TriggerResult<()> {
    let mut headers = HeaderMap::new();
    for (key, value) in &envelope.attributes {
        headers.insert(key.as_str(), value.as_str());
    }
    let ack = jetstream
        .publish_with_headers(subject.clone(), headers, envelope.data.into())
        .await
        .map_err(|e| TriggerError::Transport(format!("failed to publish: {e}")))?;
    ack.await
        .map_err(|e| TriggerError::Transport(format!("publish not acknowledged: {e}")))?;
    info!(subject = %subject, "Event published");
    Ok(())
}

async fn listen(
    consumer: PullConsumer,
    subscriber: Arc<Subscriber>,
    subscription: String,
) -> TriggerResult<()> {
    let mut messages = consumer.messages().await.map_err(|e| {
        TriggerError::Transport(format!("failed to open message stream for {subscription}: {e}"))
    })?;
    info!(subscription = %subscription, "Listening for trigger events");

    while let Some(next) = messages.next().await {
        match next {
            Ok(message) => {
                let subscriber = Arc::clone(&subscriber);
                let subscription = subscription.clone();
                tokio::spawn(async move {
                    // Read the live configuration so reloads apply to new messages.
                    let allowed = subscriber
                        .config()
                        .config()
                        .pubsub_trigger(&subscription)
                        .map(|t| t.allowed_clusters.clone())
                        .unwrap_or_default();
                    let message = NatsMessage::new(message);
                    subscriber.process(&message, &subscription, &allowed).await;
                });
            }
            Err(e) => {
                error!(subscription = %subscription, error = %e, "Error receiving message");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    warn!(subscription = %subscription, "Message stream ended");
    Ok(())
}
