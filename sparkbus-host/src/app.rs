use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use log::{debug, info, trace, warn};
use sparkbus_client::{Client, EventLoop};
use sparkbus_types::utils::timestamp;

use crate::config::{RebirthConfig, SubscriptionConfig};
use crate::events::{
    AppDeviceEvent, AppNodeEvent, DBirth, DData, DDeath, DeviceEvent, NBirth, NData, NDeath,
    NodeEvent, NodeIdentifier, ObservedCmd,
};
use crate::eventloop::{AppClient, AppEvent, AppEventLoop};
use crate::mirror::{FlatGroup, GapReason, TopologyMirror};

pub type OnlineCallback = Pin<Box<dyn Fn() + Send + Sync>>;
pub type OfflineCallback = Pin<Box<dyn Fn() + Send + Sync>>;
pub type StateCallback = Pin<Box<dyn Fn(&str, bool) + Send + Sync>>;
pub type NodeBirthCallback = Pin<Box<dyn Fn(&NodeIdentifier, &NBirth) + Send + Sync>>;
pub type NodeDataCallback = Pin<Box<dyn Fn(&NodeIdentifier, &NData) + Send + Sync>>;
pub type NodeDeathCallback = Pin<Box<dyn Fn(&NodeIdentifier, &NDeath) + Send + Sync>>;
pub type DeviceBirthCallback = Pin<Box<dyn Fn(&NodeIdentifier, &str, &DBirth) + Send + Sync>>;
pub type DeviceDataCallback = Pin<Box<dyn Fn(&NodeIdentifier, &str, &DData) + Send + Sync>>;
pub type DeviceDeathCallback = Pin<Box<dyn Fn(&NodeIdentifier, &str, &DDeath) + Send + Sync>>;
pub type NodeCmdCallback = Pin<Box<dyn Fn(&NodeIdentifier, &ObservedCmd) + Send + Sync>>;
pub type DeviceCmdCallback = Pin<Box<dyn Fn(&NodeIdentifier, &str, &ObservedCmd) + Send + Sync>>;

struct AppCallbacks {
    online: Option<OnlineCallback>,
    offline: Option<OfflineCallback>,
    state: Option<StateCallback>,
    nbirth: Option<NodeBirthCallback>,
    ndata: Option<NodeDataCallback>,
    ndeath: Option<NodeDeathCallback>,
    dbirth: Option<DeviceBirthCallback>,
    ddata: Option<DeviceDataCallback>,
    ddeath: Option<DeviceDeathCallback>,
    ncmd: Option<NodeCmdCallback>,
    dcmd: Option<DeviceCmdCallback>,
}

impl AppCallbacks {
    fn new() -> Self {
        Self {
            online: None,
            offline: None,
            state: None,
            nbirth: None,
            ndata: None,
            ndeath: None,
            dbirth: None,
            ddata: None,
            ddeath: None,
            ncmd: None,
            dcmd: None,
        }
    }
}

/// A shared, read-only view onto the application's topology mirror.
#[derive(Clone)]
pub struct TopologyHandle {
    mirror: Arc<Mutex<TopologyMirror>>,
}

impl TopologyHandle {
    /// The flattened projection of the whole mirror.
    pub fn flatten(&self) -> Vec<FlatGroup> {
        self.mirror.lock().unwrap().flatten()
    }

    /// Run a closure against the mirror. Keep it short; the application
    /// task updates the mirror through the same lock.
    pub fn with_mirror<R>(&self, f: impl FnOnce(&TopologyMirror) -> R) -> R {
        f(&self.mirror.lock().unwrap())
    }
}

/// The host application.
///
/// Owns the topology mirror and the rebirth policy; surfaces every observed
/// namespace event through its typed callbacks. Driven by [Application::run].
pub struct Application {
    eventloop: AppEventLoop,
    client: AppClient,
    mirror: Arc<Mutex<TopologyMirror>>,
    rebirth_config: RebirthConfig,
    last_rebirth: HashMap<NodeIdentifier, u64>,
    cbs: AppCallbacks,
}

impl Application {
    /// Create an application identified by `host_id` (the primary host id
    /// carried in the STATE topic).
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
        let (eventloop, client) = AppEventLoop::new(host_id, subscription_config, eventloop, client);
        let app = Self {
            eventloop,
            client: client.clone(),
            mirror: Arc::new(Mutex::new(TopologyMirror::new())),
            rebirth_config: RebirthConfig::default(),
            last_rebirth: HashMap::new(),
            cbs: AppCallbacks::new(),
        };
        (app, client)
    }

    /// A handle for reading the mirror from outside the application task.
    pub fn topology(&self) -> TopologyHandle {
        TopologyHandle {
            mirror: self.mirror.clone(),
        }
    }

    pub fn with_rebirth_config(mut self, config: RebirthConfig) -> Self {
        self.rebirth_config = config;
        self
    }

    pub fn on_online<F: Fn() + Send + Sync + 'static>(mut self, cb: F) -> Self {
        self.cbs.online = Some(Box::pin(cb));
        self
    }

    pub fn on_offline<F: Fn() + Send + Sync + 'static>(mut self, cb: F) -> Self {
        self.cbs.offline = Some(Box::pin(cb));
        self
    }

    /// Observe other hosts' STATE announcements.
    pub fn on_state<F: Fn(&str, bool) + Send + Sync + 'static>(mut self, cb: F) -> Self {
        self.cbs.state = Some(Box::pin(cb));
        self
    }

    pub fn on_nbirth<F: Fn(&NodeIdentifier, &NBirth) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.nbirth = Some(Box::pin(cb));
        self
    }

    pub fn on_ndata<F: Fn(&NodeIdentifier, &NData) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.ndata = Some(Box::pin(cb));
        self
    }

    pub fn on_ndeath<F: Fn(&NodeIdentifier, &NDeath) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.ndeath = Some(Box::pin(cb));
        self
    }

    pub fn on_dbirth<F: Fn(&NodeIdentifier, &str, &DBirth) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.dbirth = Some(Box::pin(cb));
        self
    }

    pub fn on_ddata<F: Fn(&NodeIdentifier, &str, &DData) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.ddata = Some(Box::pin(cb));
        self
    }

    pub fn on_ddeath<F: Fn(&NodeIdentifier, &str, &DDeath) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.ddeath = Some(Box::pin(cb));
        self
    }

    pub fn on_ncmd<F: Fn(&NodeIdentifier, &ObservedCmd) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.ncmd = Some(Box::pin(cb));
        self
    }

    pub fn on_dcmd<F: Fn(&NodeIdentifier, &str, &ObservedCmd) + Send + Sync + 'static>(
        mut self,
        cb: F,
    ) -> Self {
        self.cbs.dcmd = Some(Box::pin(cb));
        self
    }

    async fn issue_rebirth(&mut self, id: &NodeIdentifier, reason: GapReason) {
        let now = timestamp();
        if let Some(last) = self.last_rebirth.get(id) {
            if now.saturating_sub(*last) < self.rebirth_config.cooldown.as_millis() as u64 {
                trace!(
                    "Skipping rebirth for ({}/{}): cooldown not expired",
                    id.group,
                    id.node
                );
                return;
            }
        }
        self.last_rebirth.insert(id.clone(), now);
        info!(
            "Issuing rebirth for ({}/{}), reason = {:?}",
            id.group, id.node, reason
        );
        _ = self.client.publish_node_rebirth(&id.group, &id.node).await;
    }

    async fn handle_node_event(&mut self, event: AppNodeEvent) {
        let id = event.id;
        match event.event {
            NodeEvent::Birth(birth) => {
                self.mirror.lock().unwrap().apply_nbirth(&id, &birth);
                if let Some(cb) = &self.cbs.nbirth {
                    cb(&id, &birth)
                }
            }
            NodeEvent::Death(death) => {
                let result = self.mirror.lock().unwrap().apply_ndeath(&id, &death);
                if let Err(gap) = result {
                    self.issue_rebirth(&gap.id, gap.reason).await;
                }
                if let Some(cb) = &self.cbs.ndeath {
                    cb(&id, &death)
                }
            }
            NodeEvent::Data(data) => {
                let result = self.mirror.lock().unwrap().apply_ndata(&id, &data);
                if let Err(gap) = result {
                    self.issue_rebirth(&gap.id, gap.reason).await;
                } else if let Some(cb) = &self.cbs.ndata {
                    cb(&id, &data)
                }
            }
            NodeEvent::Cmd(cmd) => {
                if let Some(cb) = &self.cbs.ncmd {
                    cb(&id, &cmd)
                }
            }
        }
    }

    async fn handle_device_event(&mut self, event: AppDeviceEvent) {
        let id = event.id;
        let device = event.device;
        match event.event {
            DeviceEvent::Birth(birth) => {
                let result = self
                    .mirror
                    .lock()
                    .unwrap()
                    .apply_dbirth(&id, &device, &birth);
                if let Err(gap) = result {
                    self.issue_rebirth(&gap.id, gap.reason).await;
                } else if let Some(cb) = &self.cbs.dbirth {
                    cb(&id, &device, &birth)
                }
            }
            DeviceEvent::Death(death) => {
                let result = self
                    .mirror
                    .lock()
                    .unwrap()
                    .apply_ddeath(&id, &device, &death);
                if let Err(gap) = result {
                    self.issue_rebirth(&gap.id, gap.reason).await;
                } else if let Some(cb) = &self.cbs.ddeath {
                    cb(&id, &device, &death)
                }
            }
            DeviceEvent::Data(data) => {
                let result = self
                    .mirror
                    .lock()
                    .unwrap()
                    .apply_ddata(&id, &device, &data);
                if let Err(gap) = result {
                    self.issue_rebirth(&gap.id, gap.reason).await;
                } else if let Some(cb) = &self.cbs.ddata {
                    cb(&id, &device, &data)
                }
            }
            DeviceEvent::Cmd(cmd) => {
                if let Some(cb) = &self.cbs.dcmd {
                    cb(&id, &device, &cmd)
                }
            }
        }
    }

    async fn handle_event(&mut self, event: AppEvent) -> bool {
        trace!("Host event = ({event:?})");
        match event {
            AppEvent::Online => {
                if let Some(cb) = &self.cbs.online {
                    cb()
                }
            }
            AppEvent::Offline => {
                self.mirror.lock().unwrap().mark_all_stale();
                if let Some(cb) = &self.cbs.offline {
                    cb()
                }
            }
            AppEvent::Node(event) => self.handle_node_event(event).await,
            AppEvent::Device(event) => self.handle_device_event(event).await,
            AppEvent::State { host_id, online } => {
                if let Some(cb) = &self.cbs.state {
                    cb(&host_id, online)
                }
            }
            AppEvent::InvalidPayload(details) => {
                warn!(
                    "Got invalid payload from ({}/{}): {}",
                    details.node_id.group, details.node_id.node, details.error
                );
                if self.rebirth_config.invalid_payload {
                    self.issue_rebirth(&details.node_id, GapReason::StaleState)
                        .await;
                }
            }
            AppEvent::InvalidPublish { reason, topic, .. } => {
                debug!(
                    "Undecodable publish on topic {:?}: {}",
                    String::from_utf8_lossy(&topic),
                    reason
                );
            }
            AppEvent::Cancelled => return false,
        }
        true
    }

    /// Run the application until [AppClient::cancel()] is called.
    pub async fn run(mut self) {
        loop {
            let event = self.eventloop.poll().await;
            if !self.handle_event(event).await {
                break;
            }
        }
    }
}
