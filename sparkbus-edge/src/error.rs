use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PublishError {
    #[error("No metrics provided.")]
    NoMetrics,
    #[error("The node is not connected.")]
    Offline,
    #[error("The node has not been birthed.")]
    NotBorn,
    #[error("The device has not been birthed.")]
    DeviceNotBorn,
    #[error("The transport rejected the publish.")]
    Transport,
}

#[derive(Debug, Error, PartialEq)]
pub enum DeviceRegistrationError {
    #[error("Invalid device name: {0}")]
    InvalidName(String),
    #[error("A device with that name is already registered")]
    Duplicate,
}

#[derive(Debug, Error, PartialEq)]
pub enum MetricRegistrationError {
    #[error("Invalid metric name: {0}")]
    InvalidName(String),
    #[error("A metric with that name is already registered")]
    Duplicate,
}
