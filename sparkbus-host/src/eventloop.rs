use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use sparkbus_client::{
    Client, DeviceMessage, DynClient, DynEventLoop, Event, EventLoop, MessageError, NodeMessage,
    StatePayload,
};
use sparkbus_types::constants::NODE_CONTROL_REBIRTH;
use sparkbus_types::payload::Payload;
use sparkbus_types::sequence::SeqCounter;
use sparkbus_types::topic::{DeviceTopic, NodeTopic, StateTopic, TopicFilter};
use sparkbus_types::utils::{self, timestamp};
use sparkbus_types::MetricId;
use tokio::select;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task;
use tokio::time::timeout;

use crate::config::SubscriptionConfig;
use crate::events::{AppDeviceEvent, AppNodeEvent, PayloadErrorDetails};
use crate::metrics::PublishMetric;

struct Shutdown;

#[derive(Debug, Clone)]
enum PublishTopicKind {
    NodeTopic(NodeTopic),
    DeviceTopic(DeviceTopic),
}

/// A CMD topic for the host to publish metrics on.
#[derive(Debug, Clone)]
pub struct PublishTopic(PublishTopicKind);

impl PublishTopic {
    pub fn new_device_cmd(group_id: &str, node_id: &str, device_id: &str) -> Self {
        PublishTopic(PublishTopicKind::DeviceTopic(DeviceTopic::new(
            group_id,
            sparkbus_types::topic::DeviceMessage::DCmd,
            node_id,
            device_id,
        )))
    }

    pub fn new_node_cmd(group_id: &str, node_id: &str) -> Self {
        PublishTopic(PublishTopicKind::NodeTopic(NodeTopic::new(
            group_id,
            sparkbus_types::topic::NodeMessage::NCmd,
            node_id,
        )))
    }
}

struct AppState {
    host_id: String,
    published_online_state: AtomicBool,
}

/// The client half of a host application: command publishing and shutdown.
#[derive(Clone)]
pub struct AppClient {
    client: Arc<DynClient>,
    sender: mpsc::Sender<Shutdown>,
    state: Arc<AppState>,
    cmd_seq: Arc<SeqCounter>,
}

impl AppClient {
    /// Stop all operations: announce OFFLINE on the state topic and
    /// disconnect. Produces [AppEvent::Cancelled] on the event loop once
    /// the disconnect has gone through.
    pub async fn cancel(&self) {
        info!("Host stopping. Host = {}", self.state.host_id);
        let topic = StateTopic::new_host(&self.state.host_id);
        if self
            .client
            .try_publish_state_message(topic, StatePayload::Offline)
            .await
            .is_err()
        {
            debug!("Unable to publish state offline on exit");
        }
        _ = self.sender.send(Shutdown).await;
        _ = self.client.disconnect().await;
    }

    /// Request a full re-announcement from an edge node.
    pub async fn publish_node_rebirth(&self, group_id: &str, node_id: &str) -> Result<(), ()> {
        let topic = PublishTopic::new_node_cmd(group_id, node_id);
        let rebirth_cmd = PublishMetric::new(MetricId::Name(NODE_CONTROL_REBIRTH.into()), true);
        self.publish_metrics(topic, vec![rebirth_cmd]).await
    }

    fn metrics_to_payload(&self, metrics: Vec<PublishMetric>) -> Payload {
        let mut payload_metrics = Vec::with_capacity(metrics.len());
        for metric in metrics {
            payload_metrics.push(metric.into());
        }
        Payload {
            timestamp: Some(timestamp()),
            metrics: payload_metrics,
            seq: Some(self.cmd_seq.next()),
            uuid: None,
            body: None,
        }
    }

    /// Publish metrics on a CMD topic.
    pub async fn publish_metrics(
        &self,
        topic: PublishTopic,
        metrics: Vec<PublishMetric>,
    ) -> Result<(), ()> {
        let payload = self.metrics_to_payload(metrics);
        match topic.0 {
            PublishTopicKind::NodeTopic(topic) => {
                self.client.publish_node_message(topic, payload).await
            }
            PublishTopicKind::DeviceTopic(topic) => {
                self.client.publish_device_message(topic, payload).await
            }
        }
    }

    /// Publish metrics on a CMD topic without yielding for queue space.
    pub async fn try_publish_metrics(
        &self,
        topic: PublishTopic,
        metrics: Vec<PublishMetric>,
    ) -> Result<(), ()> {
        let payload = self.metrics_to_payload(metrics);
        match topic.0 {
            PublishTopicKind::NodeTopic(topic) => {
                self.client.try_publish_node_message(topic, payload).await
            }
            PublishTopicKind::DeviceTopic(topic) => {
                self.client.try_publish_device_message(topic, payload).await
            }
        }
    }
}

/// An event produced by the [AppEventLoop].
#[derive(Debug)]
pub enum AppEvent {
    /// Connected to the broker; ONLINE has been announced.
    Online,
    /// Disconnected from the broker.
    Offline,
    Node(AppNodeEvent),
    Device(AppDeviceEvent),
    /// Some host's STATE announcement changed.
    State { host_id: String, online: bool },
    /// A payload from a known node failed to convert; a rebirth may be in
    /// order.
    InvalidPayload(PayloadErrorDetails),
    /// A publish arrived that could not be understood at all. State is not
    /// disturbed; the raw body is surfaced for observability.
    InvalidPublish {
        reason: MessageError,
        topic: Vec<u8>,
        payload: Vec<u8>,
    },
    Cancelled,
}

/// The host side event loop.
///
/// On top of the transport events it owns the host lifecycle: namespace
/// subscriptions, the retained ONLINE/OFFLINE state announcement, and the
/// conversion of raw publishes into typed application events.
pub struct AppEventLoop {
    online: bool,
    state: Arc<AppState>,
    subscription_config: SubscriptionConfig,
    client: AppClient,
    eventloop: Box<DynEventLoop>,
    shutdown_rx: Receiver<Shutdown>,
}

impl AppEventLoop {
    /// Create an event loop and its client.
    ///
    /// Panics when `host_id` is not a valid topic segment; a host cannot
    /// be constructed misconfigured.
    pub fn new<S, E, C>(
        host_id: S,
        subscription_config: SubscriptionConfig,
        eventloop: E,
        client: C,
    ) -> (Self, AppClient)
    where
        S: Into<String>,
        E: EventLoop + Send + 'static,
        C: Client + Send + Sync + 'static,
    {
        let host_id: String = host_id.into();
        if let Err(e) = utils::validate_name(&host_id) {
            panic!("Invalid host id: {e}");
        }

        let (tx, rx) = mpsc::channel(1);
        let app_state = Arc::new(AppState {
            host_id,
            published_online_state: AtomicBool::new(false),
        });
        let client = AppClient {
            client: Arc::new(client),
            sender: tx,
            state: app_state.clone(),
            cmd_seq: Arc::new(SeqCounter::new()),
        };
        let mut app = Self {
            online: false,
            state: app_state,
            client: client.clone(),
            eventloop: Box::new(eventloop),
            subscription_config,
            shutdown_rx: rx,
        };
        app.eventloop
            .set_last_will(sparkbus_client::LastWill::new_host(&app.state.host_id));
        (app, client)
    }

    fn handle_online(&mut self) -> Option<AppEvent> {
        if self.online {
            return None;
        }
        info!("Host online. Host = {}", self.state.host_id);
        self.online = true;

        let client = self.client.client.clone();
        let state_topic = StateTopic::new_host(&self.state.host_id);
        let topics: Vec<TopicFilter> = self.subscription_config.clone().into();
        let app_state = self.state.clone();
        task::spawn(async move {
            _ = client.subscribe_many(topics).await;
            _ = client
                .publish_state_message(state_topic, StatePayload::Online)
                .await;
            app_state
                .published_online_state
                .store(true, Ordering::SeqCst);
        });
        Some(AppEvent::Online)
    }

    fn handle_offline(&mut self) -> Option<AppEvent> {
        if !self.online {
            return None;
        }
        info!("Host offline. Host = {}", self.state.host_id);
        self.online = false;
        self.state
            .published_online_state
            .store(false, Ordering::SeqCst);
        Some(AppEvent::Offline)
    }

    fn handle_node_message(message: NodeMessage) -> AppEvent {
        match AppNodeEvent::try_from(message) {
            Ok(event) => AppEvent::Node(event),
            Err(details) => AppEvent::InvalidPayload(details),
        }
    }

    fn handle_device_message(message: DeviceMessage) -> AppEvent {
        match AppDeviceEvent::try_from(message) {
            Ok(event) => AppEvent::Device(event),
            Err(details) => AppEvent::InvalidPayload(details),
        }
    }

    fn handle_state(&mut self, host_id: String, payload: StatePayload) -> Option<AppEvent> {
        // Someone (a retained stale will, another publisher) knocked our
        // own state to OFFLINE while we are online: re-assert it.
        if host_id == self.state.host_id
            && payload == StatePayload::Offline
            && self.state.published_online_state.load(Ordering::SeqCst)
        {
            let topic = StateTopic::new_host(&self.state.host_id);
            let client = self.client.client.clone();
            task::spawn(async move {
                _ = client
                    .publish_state_message(topic, StatePayload::Online)
                    .await;
            });
        }
        Some(AppEvent::State {
            host_id,
            online: payload == StatePayload::Online,
        })
    }

    fn handle_event(&mut self, event: Event) -> Option<AppEvent> {
        match event {
            Event::Online => self.handle_online(),
            Event::Offline => self.handle_offline(),
            Event::Node(message) => Some(Self::handle_node_message(message)),
            Event::Device(message) => Some(Self::handle_device_message(message)),
            Event::State { host_id, payload } => self.handle_state(host_id, payload),
            Event::InvalidPublish {
                reason,
                topic,
                payload,
            } => Some(AppEvent::InvalidPublish {
                reason,
                topic,
                payload,
            }),
        }
    }

    async fn poll_until_offline(&mut self) {
        while self.online {
            if Event::Offline == self.eventloop.poll().await {
                self.handle_offline();
            }
        }
    }

    /// Progress the host. Continuing to poll reconnects after a
    /// disconnection.
    pub async fn poll(&mut self) -> AppEvent {
        loop {
            select! {
                event = self.eventloop.poll() => {
                    if let Some(app_event) = self.handle_event(event) {
                        return app_event;
                    }
                }
                Some(_) = self.shutdown_rx.recv() => {
                    _ = timeout(Duration::from_secs(1), self.poll_until_offline()).await;
                    return AppEvent::Cancelled;
                }
            }
        }
    }
}
