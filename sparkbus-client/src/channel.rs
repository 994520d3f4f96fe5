use std::sync::{Arc, Mutex};

use crate::{Event, LastWill, StatePayload};
use async_trait::async_trait;
use sparkbus_types::{
    payload::Payload,
    topic::{DeviceTopic, NodeTopic, StateTopic, TopicFilter},
};
use tokio::sync::mpsc;

/// A [Client](crate::Client) implementation backed by channels.
///
/// Together with [ChannelEventLoop] this stands in for a real broker in
/// tests: outbound traffic is recorded as [OutboundMessage]s, inbound
/// events are injected through the [ChannelBroker].
#[derive(Clone)]
pub struct ChannelClient {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

#[async_trait]
impl crate::Client for ChannelClient {
    async fn disconnect(&self) -> Result<(), ()> {
        self.tx.send(OutboundMessage::Disconnect).map_err(|_| ())
    }

    async fn publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        self.tx
            .send(OutboundMessage::StateMessage { topic, payload })
            .map_err(|_| ())
    }

    async fn try_publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        self.publish_state_message(topic, payload).await
    }

    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        self.tx
            .send(OutboundMessage::NodeMessage { topic, payload })
            .map_err(|_| ())
    }

    async fn try_publish_node_message(
        &self,
        topic: NodeTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        self.publish_node_message(topic, payload).await
    }

    async fn publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        self.tx
            .send(OutboundMessage::DeviceMessage { topic, payload })
            .map_err(|_| ())
    }

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        self.publish_device_message(topic, payload).await
    }

    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()> {
        self.tx
            .send(OutboundMessage::Subscribe(topics))
            .map_err(|_| ())
    }
}

/// Messages and requests a [ChannelClient] records.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Disconnect,
    StateMessage {
        topic: StateTopic,
        payload: StatePayload,
    },
    NodeMessage {
        topic: NodeTopic,
        payload: Payload,
    },
    DeviceMessage {
        topic: DeviceTopic,
        payload: Payload,
    },
    Subscribe(Vec<TopicFilter>),
}

/// The test-side handle pairing a [ChannelClient] with a
/// [ChannelEventLoop]: inject events, inspect outbound traffic and the
/// currently registered last will.
pub struct ChannelBroker {
    pub rx_outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub tx_event: mpsc::UnboundedSender<Event>,
    last_will: Arc<Mutex<Option<LastWill>>>,
}

impl ChannelBroker {
    pub fn last_will(&self) -> Option<LastWill> {
        self.last_will.lock().unwrap().clone()
    }
}

/// An [EventLoop](crate::EventLoop) implementation backed by channels.
pub struct ChannelEventLoop {
    rx: mpsc::UnboundedReceiver<Event>,
    closed: bool,
    last_will: Arc<Mutex<Option<LastWill>>>,
}

impl ChannelEventLoop {
    /// Create an event loop together with its client and broker handle.
    pub fn new() -> (Self, ChannelClient, ChannelBroker) {
        let (tx_event, rx_event) = mpsc::unbounded_channel();
        let (tx_outbound, rx_outbound) = mpsc::unbounded_channel();
        let last_will = Arc::new(Mutex::new(None));
        let el = Self {
            rx: rx_event,
            closed: false,
            last_will: last_will.clone(),
        };
        (
            el,
            ChannelClient { tx: tx_outbound },
            ChannelBroker {
                rx_outbound,
                tx_event,
                last_will,
            },
        )
    }
}

#[async_trait]
impl crate::EventLoop for ChannelEventLoop {
    async fn poll(&mut self) -> Event {
        if self.closed {
            return std::future::pending().await;
        }
        match self.rx.recv().await {
            Some(event) => event,
            None => {
                // A dropped broker ends the session: report the loss once,
                // then park.
                self.closed = true;
                Event::Offline
            }
        }
    }

    fn set_last_will(&mut self, will: LastWill) {
        let mut lw = self.last_will.lock().unwrap();
        *lw = Some(will)
    }
}
