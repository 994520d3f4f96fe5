use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sparkbus_client::{Client, DynClient, DynEventLoop, EventLoop};
use sparkbus_types::compress::Algorithm;

use crate::device::DeviceHandle;
use crate::metric::{MessageMetrics, MetricSet};
use crate::node::{EoN, NodeHandle};

pub type OnlineCallback = Pin<Box<dyn Fn() + Send + Sync>>;
pub type OfflineCallback = Pin<Box<dyn Fn() + Send + Sync>>;
pub type NCmdCallback = Pin<Box<dyn Fn(NodeHandle, MessageMetrics) + Send + Sync>>;
pub type DCmdCallback = Pin<Box<dyn Fn(DeviceHandle, MessageMetrics) + Send + Sync>>;

pub(crate) struct EdgeCallbacks {
    pub online: Option<OnlineCallback>,
    pub offline: Option<OfflineCallback>,
    pub ncmd: Option<NCmdCallback>,
    pub dcmd: Option<DCmdCallback>,
}

impl EdgeCallbacks {
    fn new() -> Self {
        Self {
            online: None,
            offline: None,
            ncmd: None,
            dcmd: None,
        }
    }
}

/// Builder for an edge node instance.
pub struct EoNBuilder {
    pub(crate) group_id: Option<String>,
    pub(crate) node_id: Option<String>,
    pub(crate) eventloop_client: (Box<DynEventLoop>, Arc<DynClient>),
    pub(crate) metrics: MetricSet,
    pub(crate) devices: Vec<(String, MetricSet)>,
    pub(crate) compression: Option<Algorithm>,
    pub(crate) rebirth_cooldown: Duration,
    pub(crate) callbacks: EdgeCallbacks,
}

impl EoNBuilder {
    pub fn new<E: EventLoop + Send + 'static, C: Client + Send + Sync + 'static>(
        eventloop: E,
        client: C,
    ) -> Self {
        Self {
            group_id: None,
            node_id: None,
            eventloop_client: (Box::new(eventloop), Arc::new(client)),
            metrics: MetricSet::new(),
            devices: Vec::new(),
            compression: None,
            rebirth_cooldown: Duration::from_secs(5),
            callbacks: EdgeCallbacks::new(),
        }
    }

    /// The group this node publishes under.
    pub fn with_group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// The node's identifier, unique within its group.
    pub fn with_node_id<S: Into<String>>(mut self, node_id: S) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// The node's own metric set.
    pub fn with_metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach a device with its metric set. More devices can be registered
    /// later through [NodeHandle::register_device].
    pub fn with_device<S: Into<String>>(mut self, name: S, metrics: MetricSet) -> Self {
        self.devices.push((name.into(), metrics));
        self
    }

    /// Compress outbound BIRTH/DATA payload bodies with the given
    /// algorithm.
    pub fn with_compression(mut self, algorithm: Algorithm) -> Self {
        self.compression = Some(algorithm);
        self
    }

    /// Minimum spacing between honoured inbound rebirth commands.
    pub fn with_rebirth_cooldown(mut self, cooldown: Duration) -> Self {
        self.rebirth_cooldown = cooldown;
        self
    }

    /// Called after the node comes online and its births are out.
    pub fn on_online<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.online = Some(Box::pin(cb));
        self
    }

    /// Called when the session is lost or closed.
    pub fn on_offline<F>(mut self, cb: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.offline = Some(Box::pin(cb));
        self
    }

    /// Called with the non-control metrics of each inbound NCMD.
    ///
    /// The callback runs on the node task; blocking it blocks the node.
    pub fn on_ncmd<F>(mut self, cb: F) -> Self
    where
        F: Fn(NodeHandle, MessageMetrics) + Send + Sync + 'static,
    {
        self.callbacks.ncmd = Some(Box::pin(cb));
        self
    }

    /// Called with the metrics of each inbound DCMD. Interpreting device
    /// commands is the application's affair.
    pub fn on_dcmd<F>(mut self, cb: F) -> Self
    where
        F: Fn(DeviceHandle, MessageMetrics) + Send + Sync + 'static,
    {
        self.callbacks.dcmd = Some(Box::pin(cb));
        self
    }

    /// Build the node and its handle. Fails on missing or invalid
    /// configuration.
    pub fn build(self) -> Result<(EoN, NodeHandle), String> {
        EoN::new_from_builder(self)
    }
}
