mod builder;
mod device;
mod error;
mod metric;
mod node;
mod scheduler;

pub use builder::{DCmdCallback, EoNBuilder, NCmdCallback, OfflineCallback, OnlineCallback};
pub use device::DeviceHandle;
pub use error::{DeviceRegistrationError, MetricRegistrationError, PublishError};
pub use metric::{
    Deadband, LastPublished, MessageMetric, MessageMetrics, MetricHandle, MetricSet, MetricSpec,
    PublishMetric, ValueSource,
};
pub use node::{BirthType, EoN, NodeHandle};
