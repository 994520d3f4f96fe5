#![allow(dead_code)]

use std::time::Duration;

use sparkbus_client::channel::{ChannelBroker, OutboundMessage};
use sparkbus_types::constants::{BDSEQ, NODE_CONTROL_REBIRTH};
use sparkbus_types::payload::{metric, DataType, Metric, Payload};
use sparkbus_types::topic::{
    DeviceMessage, DeviceTopic, NodeMessage, NodeTopic, QoS, StateTopic, Topic, TopicFilter,
};
use sparkbus_types::MetricValue;
use tokio::time::timeout;

pub async fn recv_outbound(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(1), broker.rx_outbound.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed")
}

pub fn verify_ndeath_payload(payload: &Payload, expected_bdseq: u64) {
    assert_eq!(payload.seq, None, "NDEATH must not carry a seq");
    assert_eq!(payload.metrics.len(), 1);
    let metric = &payload.metrics[0];
    assert_eq!(metric.name.as_deref(), Some(BDSEQ));
    assert_eq!(metric.datatype, Some(DataType::UInt64 as u32));
    assert_eq!(
        metric.value,
        Some(MetricValue::from(expected_bdseq).into())
    );
}

pub fn verify_nbirth_payload(payload: &Payload, expected_bdseq: u64) {
    // An NBIRTH always restarts the session sequence at 0.
    assert_eq!(payload.seq, Some(0));
    assert_ne!(payload.timestamp, None);

    let mut contains_node_control = false;
    let mut contains_bdseq = false;
    for metric in &payload.metrics {
        assert_ne!(metric.datatype, None);

        let metric_name = metric
            .name
            .as_deref()
            .expect("metric name is required in birth payload");

        if metric.value.is_some() {
            assert_eq!(metric.is_null, None)
        }
        if metric.is_null == Some(true) {
            assert_eq!(metric.value, None)
        }

        if metric_name == NODE_CONTROL_REBIRTH {
            contains_node_control = true;
            assert_eq!(metric.datatype, Some(DataType::Boolean as u32));
            assert_eq!(metric.value, Some(metric::Value::BooleanValue(false)));
        }

        if metric_name == BDSEQ {
            contains_bdseq = true;
            assert_eq!(metric.datatype, Some(DataType::UInt64 as u32));
            assert_eq!(
                metric.value,
                Some(MetricValue::from(expected_bdseq).into())
            );
        }
    }
    assert!(contains_node_control);
    assert!(contains_bdseq);
}

pub fn verify_dbirth_payload(payload: &Payload, expected_seq: u64) {
    assert_eq!(payload.seq, Some(expected_seq));
    assert_ne!(payload.timestamp, None);
}

pub fn expected_sub_filters(group_id: &str, node_id: &str) -> Vec<TopicFilter> {
    vec![
        TopicFilter::new_with_qos(
            Topic::NodeTopic(NodeTopic::new(group_id, NodeMessage::NCmd, node_id)),
            QoS::AtLeastOnce,
        ),
        TopicFilter::new_with_qos(
            Topic::DeviceTopic(DeviceTopic::new(
                group_id,
                DeviceMessage::DCmd,
                node_id,
                "+",
            )),
            QoS::AtLeastOnce,
        ),
        TopicFilter::new_with_qos(Topic::State(StateTopic::wildcard()), QoS::AtLeastOnce),
    ]
}

/// Drive the broker online and consume the subscription plus NBIRTH,
/// returning the NBIRTH payload for further inspection.
pub async fn test_node_online(
    broker: &mut ChannelBroker,
    group_id: &str,
    node_id: &str,
    expected_bdseq: u64,
) -> Payload {
    broker.tx_event.send(sparkbus_client::Event::Online).unwrap();

    let subscription = recv_outbound(broker).await;
    let filters = match subscription {
        OutboundMessage::Subscribe(filters) => filters,
        message => panic!("got {message:?}"),
    };
    let expected = expected_sub_filters(group_id, node_id);
    assert_eq!(filters.len(), expected.len());
    for filter in expected {
        assert!(
            filters.contains(&filter),
            "sub filters did not contain expected filter: {filter:?}"
        )
    }

    let birth = recv_outbound(broker).await;
    let (topic, payload) = match birth {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(
        topic,
        NodeTopic::new(group_id, NodeMessage::NBirth, node_id)
    );
    verify_nbirth_payload(&payload, expected_bdseq);
    payload
}

/// Consume one DBIRTH, returning its payload.
pub async fn verify_device_birth(
    broker: &mut ChannelBroker,
    group_id: &str,
    node_id: &str,
    device_name: &str,
    expected_seq: u64,
) -> Payload {
    let device_birth = recv_outbound(broker).await;
    let (topic, payload) = match device_birth {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(
        topic,
        DeviceTopic::new(group_id, DeviceMessage::DBirth, node_id, device_name)
    );
    verify_dbirth_payload(&payload, expected_seq);
    payload
}

pub fn create_rebirth_message(group_id: &str, node_id: &str) -> sparkbus_client::NodeMessage {
    let mut metric = Metric::new();
    metric
        .set_name(NODE_CONTROL_REBIRTH.to_string())
        .set_value(metric::Value::BooleanValue(true));
    sparkbus_client::NodeMessage {
        group_id: group_id.to_string(),
        node_id: node_id.to_string(),
        message: sparkbus_client::Message {
            kind: sparkbus_client::MessageKind::Cmd,
            payload: Payload {
                timestamp: Some(0),
                metrics: vec![metric],
                seq: None,
                uuid: None,
                body: None,
            },
        },
    }
}

pub fn metric_by_name<'a>(payload: &'a Payload, name: &str) -> &'a Metric {
    payload
        .metrics
        .iter()
        .find(|m| m.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("payload does not contain metric {name}"))
}
