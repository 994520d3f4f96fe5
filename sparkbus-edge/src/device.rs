use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use sparkbus_client::DynClient;
use sparkbus_types::payload::Payload;
use sparkbus_types::topic::{DeviceMessage as DeviceMessageType, DeviceTopic};
use sparkbus_types::utils::timestamp;

use crate::error::{DeviceRegistrationError, PublishError};
use crate::metric::{EvaluatedMetric, MetricSet, PublishMetric};
use crate::node::EoNState;

pub(crate) struct DeviceInfo {
    pub name: Arc<String>,
    pub ddata_topic: DeviceTopic,
}

/// A device attached to an edge node.
///
/// A device is a two state machine: dead on creation, born after a DBIRTH,
/// dead again after a DDEATH. A device can only be born while its owning
/// node is born; transitions that do not apply are no-ops with a warning.
pub(crate) struct Device {
    pub(crate) info: DeviceInfo,
    birthed: AtomicBool,
    birth_lock: tokio::sync::Mutex<()>,
    pub(crate) metrics: MetricSet,
    eon_state: Arc<EoNState>,
    client: Arc<DynClient>,
}

impl Device {
    pub(crate) fn birthed(&self) -> bool {
        self.birthed.load(Ordering::SeqCst)
    }

    /// Drop back to dead without publishing. Used when the node's session
    /// ends; the broker will announce the loss through the node's NDEATH.
    pub(crate) fn mark_dead(&self) {
        self.birthed.store(false, Ordering::SeqCst);
    }

    async fn generate_birth_payload(&self) -> (Payload, Vec<EvaluatedMetric>, u64) {
        let evaluated = self.metrics.evaluate_all().await;
        let ts = timestamp();
        let metrics = evaluated.iter().map(|m| m.to_birth_metric(ts)).collect();
        let payload = Payload {
            seq: Some(self.eon_state.get_seq()),
            timestamp: Some(ts),
            metrics,
            uuid: None,
            body: None,
        };
        (payload, evaluated, ts)
    }

    fn generate_death_payload(&self) -> Payload {
        Payload {
            seq: Some(self.eon_state.get_seq()),
            timestamp: Some(timestamp()),
            metrics: Vec::new(),
            uuid: None,
            body: None,
        }
    }

    pub(crate) async fn birth(&self) {
        let _guard = self.birth_lock.lock().await;
        if !self.eon_state.birthed() {
            warn!(
                "Cannot birth device {} while its node is not born",
                self.info.name
            );
            return;
        }
        if self.birthed.load(Ordering::SeqCst) {
            warn!("Device {} is already born - ignoring birth", self.info.name);
            return;
        }
        let (payload, evaluated, ts) = self.generate_birth_payload().await;
        let payload = self.eon_state.maybe_compress(payload);
        let topic = DeviceTopic::new(
            &self.eon_state.group_id,
            DeviceMessageType::DBirth,
            &self.eon_state.edge_node_id,
            &self.info.name,
        );
        match self.client.publish_device_message(topic, payload).await {
            Ok(_) => {
                for metric in &evaluated {
                    metric.mark_published(ts);
                }
                self.birthed.store(true, Ordering::SeqCst);
            }
            Err(_) => error!("Publishing birth for device {} failed", self.info.name),
        }
    }

    pub(crate) async fn death(&self) {
        let _guard = self.birth_lock.lock().await;
        if !self.birthed.load(Ordering::SeqCst) {
            warn!("Device {} is not born - ignoring death", self.info.name);
            return;
        }
        let payload = self.generate_death_payload();
        let topic = DeviceTopic::new(
            &self.eon_state.group_id,
            DeviceMessageType::DDeath,
            &self.eon_state.edge_node_id,
            &self.info.name,
        );
        match self.client.publish_device_message(topic, payload).await {
            Ok(_) => self.birthed.store(false, Ordering::SeqCst),
            Err(_) => error!("Publishing death for device {} failed", self.info.name),
        }
    }

    /// Publish a tick's worth of scheduler-selected metrics as DDATA.
    pub(crate) async fn publish_due(&self, rate: Duration, now: u64) {
        if !self.birthed() {
            return;
        }
        let due = self.metrics.evaluate_due(rate, now).await;
        if due.is_empty() {
            return;
        }
        let payload = Payload {
            timestamp: Some(now),
            metrics: due.iter().map(|m| m.to_data_metric(now)).collect(),
            seq: Some(self.eon_state.get_seq()),
            uuid: None,
            body: None,
        };
        let payload = self.eon_state.maybe_compress(payload);
        match self
            .client
            .publish_device_message(self.info.ddata_topic.clone(), payload)
            .await
        {
            Ok(_) => {
                for metric in &due {
                    metric.mark_published(now);
                }
            }
            Err(_) => error!("Publishing data for device {} failed", self.info.name),
        }
    }
}

/// A handle for driving one device's lifecycle and data from application
/// code.
#[derive(Clone)]
pub struct DeviceHandle {
    pub(crate) device: Arc<Device>,
}

impl DeviceHandle {
    pub fn name(&self) -> &str {
        &self.device.info.name
    }

    /// Publish a DBIRTH, if the device is dead and the node is born.
    pub async fn birth(&self) {
        self.device.birth().await;
    }

    /// Publish a DDEATH, if the device is born.
    pub async fn death(&self) {
        self.device.death().await;
    }

    /// Publish event-driven DDATA outside the scan scheduler.
    ///
    /// Refused unless both the node and the device are born.
    pub async fn publish_data(&self, metrics: Vec<PublishMetric>) -> Result<(), PublishError> {
        if metrics.is_empty() {
            return Err(PublishError::NoMetrics);
        }
        if !self.device.eon_state.is_online() {
            warn!("Refusing device data publish: node is offline");
            return Err(PublishError::Offline);
        }
        if !self.device.eon_state.birthed() {
            warn!("Refusing device data publish: node is not born");
            return Err(PublishError::NotBorn);
        }
        if !self.device.birthed() {
            warn!(
                "Refusing device data publish: device {} is not born",
                self.device.info.name
            );
            return Err(PublishError::DeviceNotBorn);
        }

        let ts = timestamp();
        let payload = Payload {
            timestamp: Some(ts),
            metrics: metrics.iter().map(|m| m.to_metric(ts)).collect(),
            seq: Some(self.device.eon_state.get_seq()),
            uuid: None,
            body: None,
        };
        let payload = self.device.eon_state.maybe_compress(payload);
        match self
            .client_publish(self.device.info.ddata_topic.clone(), payload)
            .await
        {
            Ok(_) => {
                for metric in &metrics {
                    if let Some(state) = self.device.metrics.find(&metric.name) {
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

    async fn client_publish(&self, topic: DeviceTopic, payload: Payload) -> Result<(), ()> {
        self.device.client.publish_device_message(topic, payload).await
    }
}

/// The devices owned by one node, keyed by id.
///
/// A BTreeMap keeps birth order stable across sessions.
pub(crate) struct DeviceMap {
    devices: BTreeMap<String, Arc<Device>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_device(
        &mut self,
        group_id: &str,
        node_id: &str,
        name: String,
        metrics: MetricSet,
        eon_state: Arc<EoNState>,
        client: Arc<DynClient>,
    ) -> Result<DeviceHandle, DeviceRegistrationError> {
        if self.devices.contains_key(&name) {
            return Err(DeviceRegistrationError::Duplicate);
        }
        let name = Arc::new(name);
        let ddata_topic =
            DeviceTopic::new(group_id, DeviceMessageType::DData, node_id, &name);
        let device = Arc::new(Device {
            info: DeviceInfo {
                name: name.clone(),
                ddata_topic,
            },
            birth_lock: tokio::sync::Mutex::new(()),
            birthed: AtomicBool::new(false),
            metrics,
            eon_state,
            client,
        });
        self.devices.insert((*name).clone(), device.clone());
        Ok(DeviceHandle { device })
    }

    pub fn remove_device(&mut self, name: &str) -> Option<Arc<Device>> {
        self.devices.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.get(name).cloned()
    }

    /// Snapshot of all devices, in stable id order.
    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.values().cloned().collect()
    }

    pub fn mark_all_dead(&self) {
        for device in self.devices.values() {
            device.mark_dead();
        }
    }

    pub fn scan_rates(&self, into: &mut HashSet<Duration>) {
        for device in self.devices.values() {
            device.metrics.scan_rates(into);
        }
    }
}
