#![allow(dead_code)]

use std::time::Duration;

use sparkbus_client::channel::{ChannelBroker, OutboundMessage};
use sparkbus_client::{DeviceMessage, Event, Message, MessageKind, NodeMessage};
use sparkbus_types::constants::BDSEQ;
use sparkbus_types::payload::{DataType, Metric, Payload};
use sparkbus_types::{MetricValue, traits};
use tokio::time::timeout;

pub async fn recv_outbound(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(1), broker.rx_outbound.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed")
}

pub fn scalar_metric<T: traits::MetricValue>(name: &str, datatype: DataType, value: T) -> Metric {
    let value: MetricValue = value.into();
    let mut metric = Metric::new();
    metric
        .set_name(name.to_string())
        .set_datatype(datatype)
        .set_timestamp(1)
        .set_value(value.into());
    metric
}

pub fn nbirth_payload(bdseq: u64, mut metrics: Vec<Metric>) -> Payload {
    let mut all = vec![scalar_metric(BDSEQ, DataType::UInt64, bdseq)];
    all.append(&mut metrics);
    Payload {
        timestamp: Some(1),
        metrics: all,
        seq: Some(0),
        uuid: None,
        body: None,
    }
}

pub fn ndeath_payload(bdseq: u64) -> Payload {
    Payload {
        timestamp: Some(1),
        metrics: vec![scalar_metric(BDSEQ, DataType::UInt64, bdseq)],
        seq: None,
        uuid: None,
        body: None,
    }
}

pub fn data_payload(seq: u64, metrics: Vec<Metric>) -> Payload {
    Payload {
        timestamp: Some(2),
        metrics,
        seq: Some(seq),
        uuid: None,
        body: None,
    }
}

pub fn data_metric<T: traits::MetricValue>(name: &str, value: T) -> Metric {
    let value: MetricValue = value.into();
    let mut metric = Metric::new();
    metric
        .set_name(name.to_string())
        .set_timestamp(2)
        .set_value(value.into());
    metric
}

pub fn node_event(group: &str, node: &str, kind: MessageKind, payload: Payload) -> Event {
    Event::Node(NodeMessage {
        group_id: group.to_string(),
        node_id: node.to_string(),
        message: Message { kind, payload },
    })
}

pub fn device_event(
    group: &str,
    node: &str,
    device: &str,
    kind: MessageKind,
    payload: Payload,
) -> Event {
    Event::Device(DeviceMessage {
        group_id: group.to_string(),
        node_id: node.to_string(),
        device_id: device.to_string(),
        message: Message { kind, payload },
    })
}

/// Poll until `predicate` holds or a second has passed.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

pub fn metric_value(metric: &Metric) -> Option<MetricValue> {
    metric.value.clone().map(MetricValue::from)
}
