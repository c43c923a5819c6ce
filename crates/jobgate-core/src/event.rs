//! Inbound trigger events.
//!
//! An event asks for one named job to be triggered. The job kind travels
//! as a message attribute; the payload is a JSON encoded [`JobEvent`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Message attribute that carries the event type.
pub const EVENT_TYPE_ATTRIBUTE: &str = "jobgate.dev/pubsub.EventType";

/// Kind of trigger event, as declared by the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Periodic,
    Presubmit,
    Postsubmit,
}

impl EventType {
    /// Attribute value identifying this event type.
    pub fn as_attribute(&self) -> &'static str {
        match self {
            EventType::Periodic => "jobgate.dev/pubsub.PeriodicJobEvent",
            EventType::Presubmit => "jobgate.dev/pubsub.PresubmitJobEvent",
            EventType::Postsubmit => "jobgate.dev/pubsub.PostsubmitJobEvent",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [EventType::Periodic, EventType::Presubmit, EventType::Postsubmit]
            .into_iter()
            .find(|t| t.as_attribute() == s)
            .ok_or_else(|| format!("unsupported event type: {}", s))
    }
}

/// A pull request under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pull {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub head_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Git references a job runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Refs {
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_link: Option<String>,
    #[serde(default)]
    pub base_ref: String,
    #[serde(default)]
    pub base_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pulls: Vec<Pull>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,
}

impl Refs {
    /// `org/repo` identifier of the repository.
    pub fn org_repo(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Head SHAs of the pulls, in order.
    pub fn head_shas(&self) -> Vec<String> {
        self.pulls.iter().map(|p| p.sha.clone()).collect()
    }
}

/// The minimum information required to trigger a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl JobEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Decode an event from a message payload. Unknown fields are ignored.
    pub fn from_payload(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Encode this event as a message envelope of the given type.
    pub fn to_envelope(&self, event_type: EventType) -> serde_json::Result<Envelope> {
        let data = serde_json::to_vec(self)?;
        let attributes = HashMap::from([(
            EVENT_TYPE_ATTRIBUTE.to_string(),
            event_type.as_attribute().to_string(),
        )]);
        Ok(Envelope { attributes, data })
    }
}

/// Transport-neutral message body plus attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub attributes: HashMap<String, String>,
    pub data: Vec<u8>,
}
