mod utils;

use std::time::Duration;

use sparkbus_client::channel::{ChannelEventLoop, OutboundMessage};
use sparkbus_edge::{Deadband, EoNBuilder, MetricSet, MetricSpec, PublishMetric};
use sparkbus_types::compress::{maybe_decompress, Algorithm};
use sparkbus_types::constants::ALGORITHM;
use sparkbus_types::payload::{DataType, Payload};
use sparkbus_types::topic::{DeviceMessage, DeviceTopic, NodeMessage, NodeTopic};
use sparkbus_types::MetricValue;
use tokio::time::timeout;
use utils::{metric_by_name, recv_outbound, test_node_online, verify_device_birth};

const SCAN: Duration = Duration::from_millis(50);

#[tokio::test]
async fn unchanged_metrics_are_suppressed() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    node_metrics
        .register(MetricSpec::new("x", 0i32).scan_rate(SCAN))
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    test_node_online(&mut broker, group_id, node_id, 0).await;

    // Several scan periods with an unchanged value: nothing goes out.
    assert!(
        timeout(Duration::from_millis(250), broker.rx_outbound.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn changed_metric_publishes_ndata() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    let x = node_metrics
        .register(MetricSpec::new("x", 0i32).scan_rate(SCAN))
        .unwrap();
    let mut device_metrics = MetricSet::new();
    let y = device_metrics
        .register(MetricSpec::new("y", true).scan_rate(SCAN))
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .with_device("D", device_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    test_node_online(&mut broker, group_id, node_id, 0).await;
    verify_device_birth(&mut broker, group_id, node_id, "D", 1).await;

    // Mutate the node metric; the next tick publishes exactly it.
    x.set(1i32);
    let data = recv_outbound(&mut broker).await;
    let (topic, payload) = match data {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(topic, NodeTopic::new(group_id, NodeMessage::NData, node_id));
    assert_eq!(payload.seq, Some(2));
    assert_eq!(payload.metrics.len(), 1);
    let m = metric_by_name(&payload, "x");
    assert_eq!(m.value, Some(MetricValue::from(1i32).into()));

    // Mutate the device metric; a DDATA follows with the next seq.
    y.set(false);
    let data = recv_outbound(&mut broker).await;
    let (topic, payload) = match data {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(
        topic,
        DeviceTopic::new(group_id, DeviceMessage::DData, node_id, "D")
    );
    assert_eq!(payload.seq, Some(3));
    let m = metric_by_name(&payload, "y");
    assert_eq!(
        m.value,
        Some(sparkbus_types::payload::metric::Value::BooleanValue(false))
    );
}

#[tokio::test]
async fn deadband_gates_scheduled_publishes() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    let level = node_metrics
        .register(
            MetricSpec::new("level", 10.0f32)
                .scan_rate(SCAN)
                .deadband(Deadband::new(0.5)),
        )
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    test_node_online(&mut broker, group_id, node_id, 0).await;

    // Inside the deadband: suppressed.
    level.set(10.2f32);
    assert!(
        timeout(Duration::from_millis(250), broker.rx_outbound.recv())
            .await
            .is_err()
    );

    // Beyond the deadband: published.
    level.set(10.7f32);
    let data = recv_outbound(&mut broker).await;
    let payload = match data {
        OutboundMessage::NodeMessage { payload, .. } => payload,
        message => panic!("got {message:?}"),
    };
    let m = metric_by_name(&payload, "level");
    assert_eq!(m.value, Some(MetricValue::from(10.7f32).into()));
}

#[tokio::test]
async fn producer_metrics_are_evaluated_each_tick() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    let group_id = "G";
    let node_id = "N";

    let reading = Arc::new(AtomicU64::new(100));
    let source = reading.clone();
    let mut node_metrics = MetricSet::new();
    node_metrics
        .register(
            MetricSpec::producer("counter", move || source.load(Ordering::SeqCst))
                .scan_rate(SCAN),
        )
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    let nbirth = test_node_online(&mut broker, group_id, node_id, 0).await;
    let birth_metric = metric_by_name(&nbirth, "counter");
    assert_eq!(birth_metric.datatype, Some(DataType::UInt64 as u32));
    assert_eq!(birth_metric.value, Some(MetricValue::from(100u64).into()));

    // The producer reports a new value; the scheduler picks it up without
    // any explicit set().
    reading.store(101, Ordering::SeqCst);
    let data = recv_outbound(&mut broker).await;
    let payload = match data {
        OutboundMessage::NodeMessage { payload, .. } => payload,
        message => panic!("got {message:?}"),
    };
    let m = metric_by_name(&payload, "counter");
    assert_eq!(m.value, Some(MetricValue::from(101u64).into()));
}

#[tokio::test]
async fn scan_timers_stop_on_offline() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    let x = node_metrics
        .register(MetricSpec::new("x", 0i32).scan_rate(SCAN))
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    test_node_online(&mut broker, group_id, node_id, 0).await;
    broker.tx_event.send(sparkbus_client::Event::Offline).unwrap();
    // Wait out the offline handling, then change the value: with the
    // session gone no timer may fire and nothing may be published.
    tokio::time::sleep(Duration::from_millis(50)).await;
    x.set(42i32);
    assert!(
        timeout(Duration::from_millis(250), broker.rx_outbound.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn event_driven_publish_updates_the_rbe_baseline() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    let x = node_metrics
        .register(MetricSpec::new("x", 0i32).scan_rate(Duration::from_millis(200)))
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    test_node_online(&mut broker, group_id, node_id, 0).await;

    // Publish x=7 out of band, and set the stored value to match.
    x.set(7i32);
    handle
        .publish_metrics(vec![PublishMetric::new("x", 7i32)])
        .await
        .unwrap();
    let data = recv_outbound(&mut broker).await;
    let payload = match data {
        OutboundMessage::NodeMessage { payload, .. } => payload,
        message => panic!("got {message:?}"),
    };
    assert_eq!(payload.seq, Some(1));

    // The scheduler sees the same value as last published: suppressed.
    assert!(
        timeout(Duration::from_millis(450), broker.rx_outbound.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn compressed_births_decode_to_equal_payloads() {
    let group_id = "G";
    let node_id = "N";

    let mut node_metrics = MetricSet::new();
    node_metrics
        .register(MetricSpec::new("a", 12345u64))
        .unwrap();

    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (mut eon, _handle) = EoNBuilder::new(eventloop, client)
        .with_group_id(group_id)
        .with_node_id(node_id)
        .with_metrics(node_metrics)
        .with_compression(Algorithm::Gzip)
        .build()
        .unwrap();
    tokio::spawn(async move { eon.run().await });

    broker.tx_event.send(sparkbus_client::Event::Online).unwrap();
    let subscription = recv_outbound(&mut broker).await;
    assert!(matches!(subscription, OutboundMessage::Subscribe(_)));

    let birth = recv_outbound(&mut broker).await;
    let (topic, envelope) = match birth {
        OutboundMessage::NodeMessage { topic, payload } => (topic, payload),
        message => panic!("got {message:?}"),
    };
    assert_eq!(
        topic,
        NodeTopic::new(group_id, NodeMessage::NBirth, node_id)
    );

    // The wire payload is the envelope: algorithm metric plus body.
    assert!(envelope.body.is_some());
    let algorithm = metric_by_name(&envelope, ALGORITHM);
    assert_eq!(
        algorithm.value,
        Some(sparkbus_types::payload::metric::Value::StringValue(
            "GZIP".to_string()
        ))
    );

    // Decoding on the host side restores the full birth.
    let inner: Payload = maybe_decompress(envelope).unwrap();
    assert_eq!(inner.seq, Some(0));
    let a = metric_by_name(&inner, "a");
    assert_eq!(a.value, Some(MetricValue::from(12345u64).into()));
    utils::verify_nbirth_payload(&inner, 0);
}
