use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use sparkbus_client::{
    DeviceMessage, DynClient, DynEventLoop, Event, LastWill, Message, MessageKind,
};
use sparkbus_types::compress::{compress_payload, Algorithm};
use sparkbus_types::constants::{BDSEQ, NODE_CONTROL_PREFIX, NODE_CONTROL_REBIRTH};
use sparkbus_types::payload::{metric::Value, DataType, Metric, Payload};
use sparkbus_types::sequence::{BdSeqCounter, SeqCounter};
use sparkbus_types::topic::{
    DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
    QoS, StateTopic, Topic, TopicFilter,
};
use sparkbus_types::utils::timestamp;
use sparkbus_types::MetricValue;
use tokio::select;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::timeout;

use crate::builder::{EdgeCallbacks, EoNBuilder};
use crate::device::{DeviceHandle, DeviceMap};
use crate::error::{DeviceRegistrationError, PublishError};
use crate::metric::{MessageMetrics, MetricSet, PublishMetric};
use crate::scheduler::ScanTimers;

/// Whether a birth opens a session or re-announces inside one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BirthType {
    Birth,
    Rebirth,
}

pub(crate) struct EoNConfig {
    pub rebirth_cooldown: Duration,
}

/// Shared session state of one edge node.
///
/// The node is in exactly one of three states: disconnected
/// (`!online`), connected-dead (`online && !birthed`) or connected-born
/// (`online && birthed`).
pub(crate) struct EoNState {
    pub seq: SeqCounter,
    pub bdseq: BdSeqCounter,
    online: AtomicBool,
    birthed: AtomicBool,
    pub group_id: String,
    pub edge_node_id: String,
    pub ndata_topic: NodeTopic,
    compression: Option<Algorithm>,
}

impl EoNState {
    pub(crate) fn get_seq(&self) -> u64 {
        self.seq.next()
    }

    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn birthed(&self) -> bool {
        self.birthed.load(Ordering::SeqCst)
    }

    fn set_birthed(&self, birthed: bool) {
        self.birthed.store(birthed, Ordering::SeqCst);
    }

    fn birth_topic(&self) -> NodeTopic {
        NodeTopic::new(&self.group_id, NodeMessageType::NBirth, &self.edge_node_id)
    }

    fn death_topic(&self) -> NodeTopic {
        NodeTopic::new(&self.group_id, NodeMessageType::NDeath, &self.edge_node_id)
    }

    fn sub_topics(&self) -> Vec<TopicFilter> {
        vec![
            TopicFilter::new_with_qos(
                Topic::NodeTopic(NodeTopic::new(
                    &self.group_id,
                    NodeMessageType::NCmd,
                    &self.edge_node_id,
                )),
                QoS::AtLeastOnce,
            ),
            TopicFilter::new_with_qos(
                Topic::DeviceTopic(DeviceTopic::new(
                    &self.group_id,
                    DeviceMessageType::DCmd,
                    &self.edge_node_id,
                    "+",
                )),
                QoS::AtLeastOnce,
            ),
            TopicFilter::new_with_qos(Topic::State(StateTopic::wildcard()), QoS::AtLeastOnce),
        ]
    }

    /// Apply the configured outbound compression, if any. A compression
    /// failure falls back to the plain payload rather than losing data.
    pub(crate) fn maybe_compress(&self, payload: Payload) -> Payload {
        let algorithm = match self.compression {
            Some(algorithm) => algorithm,
            None => return payload,
        };
        match compress_payload(&payload, algorithm) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Payload compression failed ({e}) - publishing uncompressed");
                payload
            }
        }
    }
}

#[derive(Debug)]
struct EoNShutdown;

enum EoNNodeMessage {
    Online,
    Offline(oneshot::Sender<LastWill>),
    NodeMsg(Message),
    DeviceMsg(DeviceMessage),
    Stopped,
}

pub(crate) struct Node {
    metrics: MetricSet,
    client: Arc<DynClient>,
    devices: Mutex<DeviceMap>,
    pub(crate) state: Arc<EoNState>,
    config: Arc<EoNConfig>,
    stop_tx: Sender<EoNShutdown>,
    scan_tx: UnboundedSender<Duration>,
    timers: Mutex<ScanTimers>,
    last_rebirth_cmd: AtomicU64,
    // Stops a birth triggered from the handle racing a birth or death in
    // progress due to an event from the event loop.
    birth_guard: tokio::sync::Mutex<()>,
    callbacks: EdgeCallbacks,
}

impl Node {
    async fn generate_birth_payload(&self) -> (Payload, Vec<crate::metric::EvaluatedMetric>, u64) {
        // An NBIRTH always carries seq 0; the accountant restarts here.
        self.state.seq.reset();
        let ts = timestamp();
        let evaluated = self.metrics.evaluate_all().await;

        let mut metrics = Vec::with_capacity(evaluated.len() + 2);
        let mut bdseq_metric = Metric::new();
        bdseq_metric
            .set_name(BDSEQ.to_string())
            .set_datatype(DataType::UInt64)
            .set_timestamp(ts)
            .set_value(MetricValue::from(self.state.bdseq.current() as u64).into());
        metrics.push(bdseq_metric);

        let mut rebirth_metric = Metric::new();
        rebirth_metric
            .set_name(NODE_CONTROL_REBIRTH.to_string())
            .set_datatype(DataType::Boolean)
            .set_timestamp(ts)
            .set_value(Value::BooleanValue(false));
        metrics.push(rebirth_metric);

        for metric in &evaluated {
            metrics.push(metric.to_birth_metric(ts));
        }

        let payload = Payload {
            seq: Some(self.state.get_seq()),
            timestamp: Some(ts),
            metrics,
            uuid: None,
            body: None,
        };
        (payload, evaluated, ts)
    }

    fn generate_death_payload(&self) -> Payload {
        // The NDEATH carries no seq, only the session bdSeq.
        let mut metric = Metric::new();
        metric
            .set_name(BDSEQ.to_string())
            .set_datatype(DataType::UInt64)
            .set_timestamp(timestamp())
            .set_value(MetricValue::from(self.state.bdseq.current() as u64).into());
        Payload {
            seq: None,
            metrics: vec![metric],
            uuid: None,
            timestamp: Some(timestamp()),
            body: None,
        }
    }

    pub(crate) fn create_last_will(&self) -> LastWill {
        LastWill::new_node(
            &self.state.group_id,
            &self.state.edge_node_id,
            self.generate_death_payload(),
        )
    }

    async fn node_birth(&self) {
        self.state.set_birthed(false);
        let (payload, evaluated, ts) = self.generate_birth_payload().await;
        let topic = self.state.birth_topic();
        let payload = self.state.maybe_compress(payload);
        match self.client.publish_node_message(topic, payload).await {
            Ok(_) => {
                for metric in &evaluated {
                    metric.mark_published(ts);
                }
                self.state.set_birthed(true);
            }
            Err(_) => error!("Publishing birth message failed"),
        }
    }

    pub(crate) async fn birth(&self, birth_type: BirthType) {
        let guard = self.birth_guard.lock().await;
        info!(
            "Birthing node. Node = {}, Type = {:?}",
            self.state.edge_node_id, birth_type
        );
        self.node_birth().await;
        if self.state.birthed() {
            let devices = self.devices.lock().unwrap().all();
            for device in devices {
                if birth_type == BirthType::Rebirth && device.birthed() {
                    device.death().await;
                }
                device.birth().await;
            }
            self.start_scan_timers();
        }
        drop(guard)
    }

    /// Publish the node death certificate inside a live session.
    async fn death_publish(&self) {
        let payload = self.generate_death_payload();
        if self
            .client
            .publish_node_message(self.state.death_topic(), payload)
            .await
            .is_err()
        {
            debug!("Unable to publish node death certificate");
        }
        self.state.set_birthed(false);
    }

    pub(crate) fn start_scan_timers(&self) {
        let mut rates = HashSet::new();
        self.metrics.scan_rates(&mut rates);
        self.devices.lock().unwrap().scan_rates(&mut rates);
        let mut rates: Vec<Duration> = rates.into_iter().collect();
        rates.sort();
        self.timers.lock().unwrap().start(rates, self.scan_tx.clone());
    }

    fn stop_scan_timers(&self) {
        self.timers.lock().unwrap().stop();
    }

    async fn on_online(&self) {
        if self.state.online.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Edge node online. Node = {}", self.state.edge_node_id);
        if self.client.subscribe_many(self.state.sub_topics()).await.is_ok() {
            self.birth(BirthType::Birth).await;
        }
        if let Some(cb) = &self.callbacks.online {
            cb()
        }
    }

    async fn on_offline(&self, will_sender: oneshot::Sender<LastWill>) {
        if !self.state.online.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Edge node offline. Node = {}", self.state.edge_node_id);
        self.stop_scan_timers();
        self.state.set_birthed(false);
        self.devices.lock().unwrap().mark_all_dead();
        // Next connection attempt is a new session.
        self.state.bdseq.bump();
        _ = will_sender.send(self.create_last_will());
        if let Some(cb) = &self.callbacks.offline {
            cb()
        }
    }

    async fn on_scan_tick(&self, rate: Duration) {
        if !self.state.is_online() || !self.state.birthed() {
            return;
        }
        let now = timestamp();

        let due = self.metrics.evaluate_due(rate, now).await;
        if !due.is_empty() {
            let payload = Payload {
                timestamp: Some(now),
                metrics: due.iter().map(|m| m.to_data_metric(now)).collect(),
                seq: Some(self.state.get_seq()),
                uuid: None,
                body: None,
            };
            let payload = self.state.maybe_compress(payload);
            match self
                .client
                .publish_node_message(self.state.ndata_topic.clone(), payload)
                .await
            {
                Ok(_) => {
                    for metric in &due {
                        metric.mark_published(now);
                    }
                }
                Err(_) => error!("Publishing node data failed"),
            }
        }

        let devices = self.devices.lock().unwrap().all();
        for device in devices {
            device.publish_due(rate, now).await;
        }
    }

    async fn on_sparkplug_message(&self, message: Message, handle: NodeHandle) {
        if message.kind != MessageKind::Cmd {
            return;
        }
        let payload = message.payload;
        let timestamp_field = payload.timestamp;

        let (control, rest): (Vec<Metric>, Vec<Metric>) =
            payload.metrics.into_iter().partition(|m| {
                m.name
                    .as_deref()
                    .is_some_and(|n| n.starts_with(NODE_CONTROL_PREFIX))
            });

        let mut rebirth = false;
        for metric in &control {
            let name = metric.name.as_deref().unwrap_or_default();
            match name.strip_prefix(NODE_CONTROL_PREFIX) {
                Some("Rebirth") => {
                    rebirth = matches!(metric.value, Some(Value::BooleanValue(true)));
                    if !rebirth {
                        warn!("Received invalid CMD Rebirth metric - ignoring request");
                    }
                }
                Some(other) => warn!("Unknown node control command '{other}' - ignoring"),
                None => (),
            }
        }

        if !rest.is_empty() {
            if let Some(cb) = &self.callbacks.ncmd {
                let app_payload = Payload {
                    timestamp: timestamp_field,
                    metrics: rest,
                    seq: None,
                    uuid: None,
                    body: None,
                };
                match MessageMetrics::try_from(app_payload) {
                    Ok(metrics) => cb(handle, metrics),
                    Err(_) => warn!("Received invalid CMD payload - ignoring request"),
                }
            }
        }

        if rebirth {
            let now = timestamp();
            let since_last = now.saturating_sub(self.last_rebirth_cmd.load(Ordering::Relaxed));
            if since_last < self.config.rebirth_cooldown.as_millis() as u64 {
                info!("Got Rebirth CMD but cooldown time not expired. Ignoring");
                return;
            }
            self.last_rebirth_cmd.store(now, Ordering::Relaxed);
            info!("Got Rebirth CMD - cycling the session");
            // Death, then a transport-level disconnect. Polling the event
            // loop re-dials with the updated will; the fresh connack drives
            // the new birth.
            self.death_publish().await;
            _ = self.client.disconnect().await;
        }
    }

    async fn on_device_message(&self, message: DeviceMessage) {
        if message.message.kind != MessageKind::Cmd {
            return;
        }
        let device = self.devices.lock().unwrap().get(&message.device_id);
        let device = match device {
            Some(device) => device,
            None => {
                warn!("Got CMD for unknown device {} - ignoring", message.device_id);
                return;
            }
        };
        if let Some(cb) = &self.callbacks.dcmd {
            match MessageMetrics::try_from(message.message.payload) {
                Ok(metrics) => cb(DeviceHandle { device }, metrics),
                Err(_) => warn!("Received invalid DCMD payload - ignoring"),
            }
        }
    }
}

/// A handle for interacting with a running edge node: lifecycle control,
/// device management and event driven publishing.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) node: Arc<Node>,
}

impl NodeHandle {
    /// Stop all operations: publish the death certificate and disconnect.
    ///
    /// Cancels [EoN::run()].
    pub async fn cancel(&self) {
        info!("Edge node stopping. Node = {}", self.node.state.edge_node_id);
        let payload = self.node.generate_death_payload();
        if self
            .node
            .client
            .try_publish_node_message(self.node.state.death_topic(), payload)
            .await
            .is_err()
        {
            debug!("Unable to publish node death certificate on exit");
        }
        _ = self.node.stop_tx.send(EoNShutdown).await;
        _ = self.node.client.disconnect().await;
    }

    /// Re-announce the node and all devices inside the current session.
    pub async fn rebirth(&self) {
        self.node.birth(BirthType::Rebirth).await;
    }

    /// Register a new device. If the node is currently born the device is
    /// birthed immediately and the scan timers pick up its rates.
    pub async fn register_device<S: Into<String>>(
        &self,
        name: S,
        metrics: MetricSet,
    ) -> Result<DeviceHandle, DeviceRegistrationError> {
        let name = name.into();
        if let Err(e) = sparkbus_types::utils::validate_name(&name) {
            return Err(DeviceRegistrationError::InvalidName(e));
        }
        let handle = self.node.devices.lock().unwrap().add_device(
            &self.node.state.group_id,
            &self.node.state.edge_node_id,
            name,
            metrics,
            self.node.state.clone(),
            self.node.client.clone(),
        )?;
        if self.node.state.birthed() {
            handle.device.birth().await;
            self.node.start_scan_timers();
        }
        Ok(handle)
    }

    /// Unregister a device, publishing its death if it is born.
    pub async fn unregister_device(&self, handle: DeviceHandle) {
        self.unregister_device_named(handle.name().to_string().as_str()).await;
    }

    pub async fn unregister_device_named(&self, name: &str) {
        let device = self.node.devices.lock().unwrap().remove_device(name);
        if let Some(device) = device {
            if device.birthed() {
                device.death().await;
            }
            if self.node.state.birthed() {
                self.node.start_scan_timers();
            }
        }
    }

    /// Publish event-driven NDATA outside the scan scheduler.
    pub async fn publish_metrics(&self, metrics: Vec<PublishMetric>) -> Result<(), PublishError> {
        if metrics.is_empty() {
            return Err(PublishError::NoMetrics);
        }
        if !self.node.state.is_online() {
            warn!("Refusing node data publish: node is offline");
            return Err(PublishError::Offline);
        }
        if !self.node.state.birthed() {
            warn!("Refusing node data publish: node is not born");
            return Err(PublishError::NotBorn);
        }
        let ts = timestamp();
        let payload = Payload {
            timestamp: Some(ts),
            metrics: metrics.iter().map(|m| m.to_metric(ts)).collect(),
            seq: Some(self.node.state.get_seq()),
            uuid: None,
            body: None,
        };
        let payload = self.node.state.maybe_compress(payload);
        match self
            .node
            .client
            .publish_node_message(self.node.state.ndata_topic.clone(), payload)
            .await
        {
            Ok(_) => {
                for metric in &metrics {
                    if let Some(state) = self.node.metrics.find(&metric.name) {
                        let mut locked = state.lock().unwrap();
                        locked.last_published = Some(crate::metric::LastPublished {
                            timestamp: metric.timestamp.unwrap_or(ts),
                            value: Some(metric.value.clone()),
                        });
                    }
                }
                Ok(())
            }
            Err(_) => Err(PublishError::Transport),
        }
    }
}

/// A Sparkplug edge node instance.
///
/// Created through [EoNBuilder]; driven by [EoN::run()].
pub struct EoN {
    eventloop: Box<DynEventLoop>,
    node: Arc<Node>,
    stop_rx: mpsc::Receiver<EoNShutdown>,
    scan_rx: Option<UnboundedReceiver<Duration>>,
}

impl EoN {
    pub(crate) fn new_from_builder(builder: EoNBuilder) -> Result<(Self, NodeHandle), String> {
        let group_id = builder
            .group_id
            .ok_or("group id must be provided".to_string())?;
        let node_id = builder
            .node_id
            .ok_or("node id must be provided".to_string())?;
        sparkbus_types::utils::validate_name(&group_id)?;
        sparkbus_types::utils::validate_name(&node_id)?;

        let (eventloop, client) = builder.eventloop_client;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();

        let state = Arc::new(EoNState {
            seq: SeqCounter::new(),
            bdseq: BdSeqCounter::new(),
            online: AtomicBool::new(false),
            birthed: AtomicBool::new(false),
            ndata_topic: NodeTopic::new(&group_id, NodeMessageType::NData, &node_id),
            group_id,
            edge_node_id: node_id,
            compression: builder.compression,
        });

        let mut devices = DeviceMap::new();
        for (name, metrics) in builder.devices {
            sparkbus_types::utils::validate_name(&name)?;
            devices
                .add_device(
                    &state.group_id,
                    &state.edge_node_id,
                    name,
                    metrics,
                    state.clone(),
                    client.clone(),
                )
                .map_err(|e| e.to_string())?;
        }

        let node = Arc::new(Node {
            metrics: builder.metrics,
            client,
            devices: Mutex::new(devices),
            state,
            config: Arc::new(EoNConfig {
                rebirth_cooldown: builder.rebirth_cooldown,
            }),
            stop_tx,
            scan_tx,
            timers: Mutex::new(ScanTimers::new()),
            last_rebirth_cmd: AtomicU64::new(0),
            birth_guard: tokio::sync::Mutex::new(()),
            callbacks: builder.callbacks,
        });

        let eon = Self {
            node,
            eventloop,
            stop_rx,
            scan_rx: Some(scan_rx),
        };
        let handle = NodeHandle {
            node: eon.node.clone(),
        };
        Ok((eon, handle))
    }

    fn update_last_will(&mut self, lastwill: LastWill) {
        self.eventloop.set_last_will(lastwill);
    }

    async fn on_offline(&mut self, node_tx: &UnboundedSender<EoNNodeMessage>) {
        let (lastwill_tx, lastwill_rx) = oneshot::channel();
        _ = node_tx.send(EoNNodeMessage::Offline(lastwill_tx));
        if let Ok(will) = lastwill_rx.await {
            self.update_last_will(will)
        }
    }

    async fn handle_event(&mut self, event: Event, node_tx: &UnboundedSender<EoNNodeMessage>) {
        match event {
            Event::Online => {
                _ = node_tx.send(EoNNodeMessage::Online);
            }
            Event::Offline => self.on_offline(node_tx).await,
            Event::Node(node_message) => {
                _ = node_tx.send(EoNNodeMessage::NodeMsg(node_message.message));
            }
            Event::Device(device_message) => {
                _ = node_tx.send(EoNNodeMessage::DeviceMsg(device_message));
            }
            Event::State { .. } => (),
            Event::InvalidPublish { .. } => (),
        }
    }

    async fn poll_until_offline(&mut self, node_tx: &UnboundedSender<EoNNodeMessage>) {
        while self.node.state.is_online() {
            if Event::Offline == self.eventloop.poll().await {
                self.on_offline(node_tx).await;
                break;
            }
        }
    }

    /// Run the edge node until [NodeHandle::cancel()] is called.
    pub async fn run(&mut self) {
        info!("Edge node running. Node = {}", self.node.state.edge_node_id);

        let mut scan_rx = match self.scan_rx.take() {
            Some(rx) => rx,
            None => {
                error!("run() called more than once");
                return;
            }
        };
        let (node_tx, mut node_rx) = mpsc::unbounded_channel();

        self.update_last_will(self.node.create_last_will());

        let node = self.node.clone();
        task::spawn(async move {
            loop {
                select! {
                    msg = node_rx.recv() => match msg {
                        Some(EoNNodeMessage::Online) => node.on_online().await,
                        Some(EoNNodeMessage::Offline(sender)) => node.on_offline(sender).await,
                        Some(EoNNodeMessage::NodeMsg(message)) => {
                            let handle = NodeHandle { node: node.clone() };
                            node.on_sparkplug_message(message, handle).await
                        }
                        Some(EoNNodeMessage::DeviceMsg(message)) => {
                            node.on_device_message(message).await
                        }
                        Some(EoNNodeMessage::Stopped) | None => break,
                    },
                    Some(rate) = scan_rx.recv() => node.on_scan_tick(rate).await,
                }
            }
            node.stop_scan_timers();
        });

        loop {
            select! {
                event = self.eventloop.poll() => self.handle_event(event, &node_tx).await,
                Some(_) = self.stop_rx.recv() => break,
            }
        }

        if timeout(Duration::from_secs(1), self.poll_until_offline(&node_tx))
            .await
            .is_err()
        {
            self.on_offline(&node_tx).await;
        }

        _ = node_tx.send(EoNNodeMessage::Stopped);
        info!("Edge node stopped. Node = {}", self.node.state.edge_node_id);
    }
}
