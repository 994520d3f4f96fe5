mod app;
mod config;
mod eventloop;
mod events;
mod metrics;
mod mirror;

pub use app::{Application, TopologyHandle};
pub use config::{RebirthConfig, SubscriptionConfig};
pub use eventloop::{AppClient, AppEvent, AppEventLoop, PublishTopic};
pub use events::{
    AppDeviceEvent, AppNodeEvent, DBirth, DData, DDeath, DeviceEvent, NBirth, NData, NDeath,
    NodeEvent, NodeIdentifier, ObservedCmd, PayloadError, PayloadErrorDetails,
};
pub use metrics::{MetricBirthDetails, MetricDetails, PublishMetric};
pub use mirror::{
    DeviceView, FlatDevice, FlatGroup, FlatNode, GapReason, GroupView, MetricView, NodeView,
    ProtocolGap, TopologyMirror,
};
