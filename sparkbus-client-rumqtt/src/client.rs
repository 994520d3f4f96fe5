use async_trait::async_trait;
use log::{debug, error, trace};
use rumqttc::{
    v5::{
        mqttbytes::{
            v5::{ConnectProperties, Filter, Packet},
            QoS,
        },
        AsyncClient as RuClient, EventLoop as RuEventLoop, MqttOptions as RuMqttOptions,
    },
    Outgoing,
};
use sparkbus_client::{topic_and_payload_to_event, Event, LastWill, StatePayload};
use sparkbus_types::{
    payload::{Message, Payload},
    topic::{DeviceTopic, NodeTopic, StateTopic, TopicFilter},
};

use crate::options::MqttOptions;

fn qos_to_mqtt_qos(qos: sparkbus_types::topic::QoS) -> QoS {
    match qos {
        sparkbus_types::topic::QoS::AtMostOnce => QoS::AtMostOnce,
        sparkbus_types::topic::QoS::AtLeastOnce => QoS::AtLeastOnce,
        sparkbus_types::topic::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn topic_filter_to_mqtt_filter(topic_filter: TopicFilter) -> Filter {
    let qos = qos_to_mqtt_qos(topic_filter.qos);
    Filter::new(topic_filter.render(), qos)
}

/// A [sparkbus_client::Client] implementation using [rumqttc].
#[derive(Clone)]
pub struct Client {
    client: RuClient,
}

impl Client {
    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|_| ())
    }

    fn try_publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ()> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|_| ())
    }
}

#[async_trait]
impl sparkbus_client::Client for Client {
    async fn disconnect(&self) -> Result<(), ()> {
        self.client.disconnect().await.map_err(|_| ())
    }

    async fn publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        let (qos, retain) = payload.get_publish_quality_retain();
        self.publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            Vec::<u8>::from(payload),
        )
        .await
    }

    async fn try_publish_state_message(
        &self,
        topic: StateTopic,
        payload: StatePayload,
    ) -> Result<(), ()> {
        let (qos, retain) = payload.get_publish_quality_retain();
        self.try_publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            Vec::<u8>::from(payload),
        )
    }

    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            payload.encode_to_vec(),
        )
        .await
    }

    async fn try_publish_node_message(
        &self,
        topic: NodeTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.try_publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            payload.encode_to_vec(),
        )
    }

    async fn publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            payload.encode_to_vec(),
        )
        .await
    }

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.try_publish(
            topic.topic,
            qos_to_mqtt_qos(qos),
            retain,
            payload.encode_to_vec(),
        )
    }

    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()> {
        let filters: Vec<Filter> = topics.into_iter().map(topic_filter_to_mqtt_filter).collect();
        self.client.subscribe_many(filters).await.map_err(|_| ())
    }
}

enum ConnectionState {
    Disconnected,
    ManualDisconnected,
    Connected,
}

/// An [sparkbus_client::EventLoop] implementation using [rumqttc].
///
/// Reconnecting after a failure is the transport's affair: continuing to
/// poll re-dials the broker with the most recently registered last will.
pub struct EventLoop {
    state: ConnectionState,
    el: RuEventLoop,
}

impl EventLoop {
    /// Create an event loop and client from the provided options.
    ///
    /// `cap` is the capacity of the client's bounded request channel. Some
    /// options are overridden for protocol compliance: sessions are always
    /// clean and expire immediately.
    pub fn new(options: MqttOptions, cap: usize) -> (Self, Client) {
        let mut ru_options =
            RuMqttOptions::new(options.client_id, options.broker_addr, options.port);
        let mut connect_properties = ConnectProperties::new();
        connect_properties.session_expiry_interval = Some(0);
        ru_options
            .set_keep_alive(options.keepalive)
            .set_clean_start(true)
            .set_connect_properties(connect_properties);
        if let Some((username, password)) = options.credentials {
            ru_options.set_credentials(username, password);
        }

        let (client, mut eventloop) = RuClient::new(ru_options, cap);
        eventloop
            .options
            .set_connection_timeout(options.connect_timeout.as_secs());
        (
            EventLoop {
                el: eventloop,
                state: ConnectionState::Disconnected,
            },
            Client { client },
        )
    }

    async fn poll_rumqtt(&mut self) -> Option<Event> {
        let event = self.el.poll().await;
        match event {
            Ok(event) => {
                trace!("{event:?}");
                match event {
                    rumqttc::v5::Event::Incoming(Packet::ConnAck(_)) => {
                        self.state = ConnectionState::Connected;
                        Some(Event::Online)
                    }
                    rumqttc::v5::Event::Incoming(Packet::Disconnect(_)) => {
                        self.state = ConnectionState::Disconnected;
                        Some(Event::Offline)
                    }
                    rumqttc::v5::Event::Incoming(Packet::Publish(publish)) => Some(
                        topic_and_payload_to_event(
                            publish.topic.to_vec(),
                            publish.payload.to_vec(),
                        ),
                    ),
                    rumqttc::v5::Event::Outgoing(Outgoing::Disconnect) => {
                        self.state = ConnectionState::ManualDisconnected;
                        Some(Event::Offline)
                    }
                    _ => None,
                }
            }
            Err(e) => match self.state {
                ConnectionState::Connected => {
                    error!("Client error: {e}");
                    self.state = ConnectionState::Disconnected;
                    Some(Event::Offline)
                }
                ConnectionState::Disconnected => {
                    error!("Client error on reconnect attempt: {e}");
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    None
                }
                ConnectionState::ManualDisconnected => {
                    // Expected while the connection winds down; pace the
                    // re-dial rather than spinning on the dead socket.
                    debug!("Client error after manual disconnect: {e}");
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    None
                }
            },
        }
    }
}

#[async_trait]
impl sparkbus_client::EventLoop for EventLoop {
    async fn poll(&mut self) -> Event {
        loop {
            if let Some(event) = self.poll_rumqtt().await {
                return event;
            }
        }
    }

    fn set_last_will(&mut self, will: LastWill) {
        let qos = qos_to_mqtt_qos(will.qos);
        let mqtt_will = rumqttc::v5::mqttbytes::v5::LastWill::new(
            will.topic,
            will.payload,
            qos,
            will.retain,
            None,
        );
        self.el.options.set_last_will(mqtt_will);
    }
}
