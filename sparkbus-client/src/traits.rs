use async_trait::async_trait;
use sparkbus_types::{
    payload::Payload,
    topic::{DeviceTopic, NodeTopic, StateTopic, TopicFilter},
};

use crate::{Event, LastWill, StatePayload};

/// The outbound half of an MQTT connection.
///
/// `publish_*` methods yield until the client has accepted the message;
/// `try_publish_*` variants may return early, e.g. when the client's queue
/// is full. All methods return `Err(())` when the transport rejected the
/// operation; the caller decides how that surfaces.
#[async_trait]
pub trait Client {
    /// Request a disconnect from the broker.
    async fn disconnect(&self) -> Result<(), ()>;

    /// Publish a host state announcement on a `STATE/<host id>` topic.
    async fn publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()>;

    async fn try_publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()>;

    /// Publish a payload on a node topic.
    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()>;

    async fn try_publish_node_message(&self, topic: NodeTopic, payload: Payload)
        -> Result<(), ()>;

    /// Publish a payload on a device topic.
    async fn publish_device_message(&self, topic: DeviceTopic, payload: Payload)
        -> Result<(), ()>;

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()>;

    /// Subscribe to a single topic filter.
    async fn subscribe(&self, topic: TopicFilter) -> Result<(), ()> {
        self.subscribe_many(vec![topic]).await
    }

    /// Subscribe to a set of topic filters in one operation.
    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()>;
}

pub type DynClient = dyn Client + Send + Sync;

/// The inbound half of an MQTT connection: a stream of connection and
/// publish events, plus control of the last will registered before the next
/// connection attempt.
#[async_trait]
pub trait EventLoop {
    async fn poll(&mut self) -> Event;
    fn set_last_will(&mut self, will: LastWill);
}

pub type DynEventLoop = dyn EventLoop + Send;
