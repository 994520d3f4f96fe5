use std::string::FromUtf8Error;

use prost::DecodeError;
use sparkbus_types::{
    constants::{STATE_OFFLINE, STATE_ONLINE},
    payload::Payload,
    topic::{state_host_topic, NodeMessage as NodeMessageType, NodeTopic, QoS},
};
use thiserror::Error;

/// Error conditions raised while turning an inbound MQTT publish into a
/// Sparkplug event.
#[derive(Error, Debug, PartialEq)]
pub enum MessageError {
    #[error("There was an error decoding the payload: {0}")]
    DecodePayloadError(#[from] DecodeError),
    #[error("The topic was invalid")]
    InvalidSparkplugTopic,
    #[error("Topic parts utf8 decode error: {0}")]
    TopicUtf8Error(#[from] FromUtf8Error),
    #[error("Payload decompression failed: {0}")]
    Decompression(String),
    #[error("State payload was not the ONLINE or OFFLINE literal")]
    InvalidStatePayload,
}

/// The verb of a Sparkplug message, shared between the node and device
/// topic families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageKind {
    Birth,
    Death,
    Data,
    Cmd,
}

/// A decoded payload tagged with the verb it arrived under.
#[derive(Debug, PartialEq)]
pub struct Message {
    pub payload: Payload,
    pub kind: MessageKind,
}

/// The retained host state announcement: the ASCII literal `ONLINE` or
/// `OFFLINE` on `STATE/<primary host id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePayload {
    Online,
    Offline,
}

impl StatePayload {
    /// QoS and retain settings a state message is published with.
    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        (QoS::AtMostOnce, true)
    }
}

impl From<StatePayload> for Vec<u8> {
    fn from(value: StatePayload) -> Self {
        match value {
            StatePayload::Online => STATE_ONLINE.as_bytes().to_vec(),
            StatePayload::Offline => STATE_OFFLINE.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<&[u8]> for StatePayload {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value == STATE_ONLINE.as_bytes() {
            Ok(StatePayload::Online)
        } else if value == STATE_OFFLINE.as_bytes() {
            Ok(StatePayload::Offline)
        } else {
            Err(MessageError::InvalidStatePayload)
        }
    }
}

/// A message observed on a node topic.
#[derive(Debug, PartialEq)]
pub struct NodeMessage {
    pub group_id: String,
    pub node_id: String,
    pub message: Message,
}

/// A message observed on a device topic.
#[derive(Debug, PartialEq)]
pub struct DeviceMessage {
    pub group_id: String,
    pub node_id: String,
    pub device_id: String,
    pub message: Message,
}

/// Events an [EventLoop](crate::EventLoop) implementation can produce.
#[derive(Debug, PartialEq)]
pub enum Event {
    Offline,
    Online,
    Node(NodeMessage),
    Device(DeviceMessage),
    State {
        host_id: String,
        payload: StatePayload,
    },
    /// A publish arrived that could not be understood. The raw topic and
    /// body are surfaced so the application can observe it; state is not
    /// disturbed.
    InvalidPublish {
        reason: MessageError,
        topic: Vec<u8>,
        payload: Vec<u8>,
    },
}

/// The last will registered with the broker before connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub retain: bool,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

impl LastWill {
    /// The edge node will: an NDEATH carrying the session bdSeq.
    pub fn new_node(group: &str, node_id: &str, payload: Payload) -> Self {
        let topic = NodeTopic::new(group, NodeMessageType::NDeath, node_id);
        let (qos, retain) = topic.get_publish_quality_retain();
        Self {
            retain,
            qos,
            payload: payload.into(),
            topic: topic.topic,
        }
    }

    /// The host will: retained `OFFLINE` on the reserved state topic.
    pub fn new_host(host_id: &str) -> Self {
        let (qos, retain) = StatePayload::Offline.get_publish_quality_retain();
        Self {
            topic: state_host_topic(host_id),
            retain,
            qos,
            payload: StatePayload::Offline.into(),
        }
    }
}
