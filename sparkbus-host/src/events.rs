use sparkbus_client::{DeviceMessage, Message, MessageKind, NodeMessage};
use sparkbus_types::constants::BDSEQ;
use sparkbus_types::payload::{metric, Payload};
use sparkbus_types::MetricId;
use thiserror::Error;

use crate::metrics::{
    birth_details_from_metrics, id_details_from_metrics, MetricBirthDetails, MetricDetails,
};

/// The `(group, node)` pair that identifies an edge node in the namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeIdentifier {
    pub group: String,
    pub node: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Payload is missing its timestamp")]
    MissingTimestamp,
    #[error("Payload is missing its seq")]
    MissingSeq,
    #[error("Birth/death payload is missing its bdSeq metric")]
    MissingBdSeq,
    #[error("Payload contained invalid metrics")]
    BadMetrics,
}

/// Details of a payload that could not be converted, surfaced so the
/// application can decide whether to force a rebirth.
#[derive(Debug)]
pub struct PayloadErrorDetails {
    pub node_id: NodeIdentifier,
    pub error: PayloadError,
}

#[derive(Debug)]
pub struct NBirth {
    pub timestamp: u64,
    pub bdseq: u64,
    pub metrics: Vec<(MetricBirthDetails, MetricDetails)>,
}

#[derive(Debug)]
pub struct NDeath {
    pub bdseq: u64,
}

#[derive(Debug)]
pub struct NData {
    pub timestamp: u64,
    pub seq: u64,
    pub metrics: Vec<(MetricId, MetricDetails)>,
}

#[derive(Debug)]
pub struct DBirth {
    pub timestamp: u64,
    pub seq: u64,
    pub metrics: Vec<(MetricBirthDetails, MetricDetails)>,
}

#[derive(Debug)]
pub struct DDeath {
    pub seq: u64,
}

#[derive(Debug)]
pub struct DData {
    pub timestamp: u64,
    pub seq: u64,
    pub metrics: Vec<(MetricId, MetricDetails)>,
}

/// A command observed on the namespace, issued by some host.
#[derive(Debug)]
pub struct ObservedCmd {
    pub metrics: Vec<(MetricId, MetricDetails)>,
}

#[derive(Debug)]
pub enum NodeEvent {
    Birth(NBirth),
    Death(NDeath),
    Data(NData),
    Cmd(ObservedCmd),
}

#[derive(Debug)]
pub enum DeviceEvent {
    Birth(DBirth),
    Death(DDeath),
    Data(DData),
    Cmd(ObservedCmd),
}

#[derive(Debug)]
pub struct AppNodeEvent {
    pub id: NodeIdentifier,
    pub event: NodeEvent,
}

#[derive(Debug)]
pub struct AppDeviceEvent {
    pub id: NodeIdentifier,
    pub device: String,
    pub event: DeviceEvent,
}

fn find_bdseq(payload: &Payload) -> Result<u64, PayloadError> {
    for m in &payload.metrics {
        let name = match m.name.as_deref() {
            Some(name) => name,
            None => continue,
        };
        if !name.eq_ignore_ascii_case(BDSEQ) {
            continue;
        }
        return match &m.value {
            Some(metric::Value::LongValue(v)) => Ok(*v),
            Some(metric::Value::IntValue(v)) => Ok(*v as u64),
            _ => Err(PayloadError::MissingBdSeq),
        };
    }
    Err(PayloadError::MissingBdSeq)
}

fn node_event_from_message(message: Message) -> Result<NodeEvent, PayloadError> {
    let payload = message.payload;
    match message.kind {
        MessageKind::Birth => {
            let timestamp = payload.timestamp.ok_or(PayloadError::MissingTimestamp)?;
            let bdseq = find_bdseq(&payload)?;
            let metrics = birth_details_from_metrics(&payload.metrics, timestamp)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(NodeEvent::Birth(NBirth {
                timestamp,
                bdseq,
                metrics,
            }))
        }
        MessageKind::Death => {
            let bdseq = find_bdseq(&payload)?;
            Ok(NodeEvent::Death(NDeath { bdseq }))
        }
        MessageKind::Data => {
            let timestamp = payload.timestamp.ok_or(PayloadError::MissingTimestamp)?;
            let seq = payload.seq.ok_or(PayloadError::MissingSeq)?;
            let metrics = id_details_from_metrics(&payload.metrics, timestamp)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(NodeEvent::Data(NData {
                timestamp,
                seq,
                metrics,
            }))
        }
        MessageKind::Cmd => {
            let default_ts = payload.timestamp.unwrap_or(0);
            let metrics = id_details_from_metrics(&payload.metrics, default_ts)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(NodeEvent::Cmd(ObservedCmd { metrics }))
        }
    }
}

fn device_event_from_message(message: Message) -> Result<DeviceEvent, PayloadError> {
    let payload = message.payload;
    match message.kind {
        MessageKind::Birth => {
            let timestamp = payload.timestamp.ok_or(PayloadError::MissingTimestamp)?;
            let seq = payload.seq.ok_or(PayloadError::MissingSeq)?;
            let metrics = birth_details_from_metrics(&payload.metrics, timestamp)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(DeviceEvent::Birth(DBirth {
                timestamp,
                seq,
                metrics,
            }))
        }
        MessageKind::Death => {
            let seq = payload.seq.ok_or(PayloadError::MissingSeq)?;
            Ok(DeviceEvent::Death(DDeath { seq }))
        }
        MessageKind::Data => {
            let timestamp = payload.timestamp.ok_or(PayloadError::MissingTimestamp)?;
            let seq = payload.seq.ok_or(PayloadError::MissingSeq)?;
            let metrics = id_details_from_metrics(&payload.metrics, timestamp)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(DeviceEvent::Data(DData {
                timestamp,
                seq,
                metrics,
            }))
        }
        MessageKind::Cmd => {
            let default_ts = payload.timestamp.unwrap_or(0);
            let metrics = id_details_from_metrics(&payload.metrics, default_ts)
                .map_err(|_| PayloadError::BadMetrics)?;
            Ok(DeviceEvent::Cmd(ObservedCmd { metrics }))
        }
    }
}

impl TryFrom<NodeMessage> for AppNodeEvent {
    type Error = PayloadErrorDetails;

    fn try_from(value: NodeMessage) -> Result<Self, Self::Error> {
        let id = NodeIdentifier {
            group: value.group_id,
            node: value.node_id,
        };
        match node_event_from_message(value.message) {
            Ok(event) => Ok(AppNodeEvent { id, event }),
            Err(error) => Err(PayloadErrorDetails { node_id: id, error }),
        }
    }
}

impl TryFrom<DeviceMessage> for AppDeviceEvent {
    type Error = PayloadErrorDetails;

    fn try_from(value: DeviceMessage) -> Result<Self, Self::Error> {
        let id = NodeIdentifier {
            group: value.group_id,
            node: value.node_id,
        };
        match device_event_from_message(value.message) {
            Ok(event) => Ok(AppDeviceEvent {
                id,
                device: value.device_id,
                event,
            }),
            Err(error) => Err(PayloadErrorDetails { node_id: id, error }),
        }
    }
}
