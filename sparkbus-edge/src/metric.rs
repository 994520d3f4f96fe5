use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use sparkbus_types::payload::{DataType, Metric as ProtoMetric, Payload};
use sparkbus_types::{numeric_as_f64, traits, MetricId, MetricValue, PropertySet};

use crate::error::MetricRegistrationError;

type ProducerFn = Arc<dyn Fn() -> MetricValue + Send + Sync>;
type AsyncProducerFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = MetricValue> + Send>> + Send + Sync>;

/// Where a metric's current value comes from.
///
/// Producers are invoked on every publish consideration; the scheduler
/// resolves all of a tick's producers before assembling the payload so one
/// payload reflects one snapshot.
#[derive(Clone)]
pub enum ValueSource {
    Static(MetricValue),
    Producer(ProducerFn),
    AsyncProducer(AsyncProducerFn),
}

impl ValueSource {
    pub(crate) async fn evaluate(&self) -> MetricValue {
        match self {
            ValueSource::Static(value) => value.clone(),
            ValueSource::Producer(producer) => producer(),
            ValueSource::AsyncProducer(producer) => producer().await,
        }
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Static(value) => f.debug_tuple("Static").field(value).finish(),
            ValueSource::Producer(_) => f.write_str("Producer"),
            ValueSource::AsyncProducer(_) => f.write_str("AsyncProducer"),
        }
    }
}

/// Report-by-exception deadband: publish only when the value moves more
/// than `value` from the last published value, or when `max_time` has
/// elapsed since the last publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadband {
    pub value: f64,
    pub max_time: Option<Duration>,
}

impl Deadband {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            max_time: None,
        }
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// What actually went out on the wire for a metric, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct LastPublished {
    pub timestamp: u64,
    pub value: Option<MetricValue>,
}

/// Declaration of a metric owned by a node or device.
#[derive(Debug)]
pub struct MetricSpec {
    pub(crate) name: String,
    pub(crate) datatype: DataType,
    pub(crate) source: ValueSource,
    pub(crate) scan_rate: Option<Duration>,
    pub(crate) deadband: Option<Deadband>,
    pub(crate) properties: Option<PropertySet>,
}

impl MetricSpec {
    /// A metric holding a plain scalar, updated through its [MetricHandle].
    pub fn new<S, T>(name: S, initial: T) -> Self
    where
        S: Into<String>,
        T: traits::MetricValue,
    {
        Self {
            name: name.into(),
            datatype: T::default_datatype(),
            source: ValueSource::Static(initial.into()),
            scan_rate: None,
            deadband: None,
            properties: None,
        }
    }

    /// A metric whose value is produced by a synchronous callable.
    pub fn producer<S, T, F>(name: S, producer: F) -> Self
    where
        S: Into<String>,
        T: traits::MetricValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            datatype: T::default_datatype(),
            source: ValueSource::Producer(Arc::new(move || producer().into())),
            scan_rate: None,
            deadband: None,
            properties: None,
        }
    }

    /// A metric whose value is produced by an asynchronous callable.
    pub fn async_producer<S, T, F, Fut>(name: S, producer: F) -> Self
    where
        S: Into<String>,
        T: traits::MetricValue,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            name: name.into(),
            datatype: T::default_datatype(),
            source: ValueSource::AsyncProducer(Arc::new(move || {
                let fut = producer();
                Box::pin(async move { fut.await.into() })
            })),
            scan_rate: None,
            deadband: None,
            properties: None,
        }
    }

    /// Override the datatype inferred from the Rust value type.
    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    /// How often the metric becomes eligible for publish evaluation.
    pub fn scan_rate(mut self, rate: Duration) -> Self {
        self.scan_rate = Some(rate);
        self
    }

    pub fn deadband(mut self, deadband: Deadband) -> Self {
        self.deadband = Some(deadband);
        self
    }

    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = Some(properties);
        self
    }
}

#[derive(Debug)]
pub(crate) struct MetricState {
    pub spec: MetricSpec,
    pub last_published: Option<LastPublished>,
}

/// A handle for mutating a registered metric's value between scan ticks.
#[derive(Clone, Debug)]
pub struct MetricHandle {
    inner: Arc<Mutex<MetricState>>,
}

impl MetricHandle {
    pub fn name(&self) -> String {
        self.inner.lock().unwrap().spec.name.clone()
    }

    /// Replace the stored value of a static metric.
    ///
    /// Has no effect on producer metrics; the producer is the value.
    pub fn set<T: traits::MetricValue>(&self, value: T) {
        let mut state = self.inner.lock().unwrap();
        match state.spec.source {
            ValueSource::Static(_) => state.spec.source = ValueSource::Static(value.into()),
            _ => warn!(
                "Ignoring set() on producer metric {}",
                state.spec.name
            ),
        }
    }
}

/// The metric set owned by one node or one device.
///
/// Metrics keep their registration order, which is also the order they are
/// listed in birth and data payloads.
#[derive(Clone, Default)]
pub struct MetricSet {
    metrics: Vec<Arc<Mutex<MetricState>>>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: MetricSpec) -> Result<MetricHandle, MetricRegistrationError> {
        if let Err(e) = sparkbus_types::utils::validate_name(&spec.name) {
            return Err(MetricRegistrationError::InvalidName(e));
        }
        if self.find(&spec.name).is_some() {
            return Err(MetricRegistrationError::Duplicate);
        }
        let state = Arc::new(Mutex::new(MetricState {
            spec,
            last_published: None,
        }));
        self.metrics.push(state.clone());
        Ok(MetricHandle { inner: state })
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Arc<Mutex<MetricState>>> {
        self.metrics
            .iter()
            .find(|m| m.lock().unwrap().spec.name == name)
    }

    /// The distinct scan rates configured across this set.
    pub(crate) fn scan_rates(&self, into: &mut HashSet<Duration>) {
        for metric in &self.metrics {
            if let Some(rate) = metric.lock().unwrap().spec.scan_rate {
                into.insert(rate);
            }
        }
    }

    /// Evaluate every metric, for a birth snapshot.
    pub(crate) async fn evaluate_all(&self) -> Vec<EvaluatedMetric> {
        let mut evaluated = Vec::with_capacity(self.metrics.len());
        for state in &self.metrics {
            evaluated.push(EvaluatedMetric::evaluate(state).await);
        }
        evaluated
    }

    /// Evaluate the metrics scanned at `rate` and keep the ones the
    /// report-by-exception gate lets through.
    pub(crate) async fn evaluate_due(&self, rate: Duration, now: u64) -> Vec<EvaluatedMetric> {
        let mut evaluated = Vec::new();
        for state in &self.metrics {
            if state.lock().unwrap().spec.scan_rate != Some(rate) {
                continue;
            }
            let candidate = EvaluatedMetric::evaluate(state).await;
            if candidate.qualifies(now) {
                evaluated.push(candidate);
            }
        }
        evaluated
    }
}

/// One metric's resolved value for a single publish consideration.
pub(crate) struct EvaluatedMetric {
    state: Arc<Mutex<MetricState>>,
    pub name: String,
    pub datatype: DataType,
    pub value: MetricValue,
}

impl EvaluatedMetric {
    async fn evaluate(state: &Arc<Mutex<MetricState>>) -> Self {
        // Producer resolution happens outside the lock; async producers may
        // suspend.
        let (name, datatype, source) = {
            let locked = state.lock().unwrap();
            (
                locked.spec.name.clone(),
                locked.spec.datatype,
                locked.spec.source.clone(),
            )
        };
        let value = source.evaluate().await;
        Self {
            state: state.clone(),
            name,
            datatype,
            value,
        }
    }

    fn qualifies(&self, now: u64) -> bool {
        let locked = self.state.lock().unwrap();
        should_publish(
            self.datatype,
            locked.spec.deadband.as_ref(),
            locked.last_published.as_ref(),
            &self.value,
            now,
        )
    }

    /// Record that this evaluation went out on the wire.
    pub fn mark_published(&self, timestamp: u64) {
        self.state.lock().unwrap().last_published = Some(LastPublished {
            timestamp,
            value: Some(self.value.clone()),
        });
    }

    pub fn to_birth_metric(&self, timestamp: u64) -> ProtoMetric {
        let mut metric = ProtoMetric::new();
        metric
            .set_name(self.name.clone())
            .set_datatype(self.datatype)
            .set_timestamp(timestamp)
            .set_value(self.value.clone().into());
        metric.properties = self
            .state
            .lock()
            .unwrap()
            .spec
            .properties
            .clone()
            .map(PropertySet::into);
        metric
    }

    pub fn to_data_metric(&self, timestamp: u64) -> ProtoMetric {
        let mut metric = ProtoMetric::new();
        metric
            .set_name(self.name.clone())
            .set_timestamp(timestamp)
            .set_value(self.value.clone().into());
        metric
    }
}

/// The report-by-exception gate.
///
/// A metric qualifies to publish when any of the conditions below holds;
/// each condition is tried in order:
///
/// 1. nothing was ever published, or the last published value was null;
/// 2. the metric is non-numeric or has no deadband, and the value changed;
/// 3. the value moved further than the deadband from the last published
///    value;
/// 4. the deadband's max time has elapsed since the last publish.
pub(crate) fn should_publish(
    datatype: DataType,
    deadband: Option<&Deadband>,
    last: Option<&LastPublished>,
    current: &MetricValue,
    now: u64,
) -> bool {
    let last = match last {
        None => return true,
        Some(last) => last,
    };
    let last_value = match &last.value {
        None => return true,
        Some(value) => value,
    };

    let deadband = match deadband {
        Some(deadband) if datatype.is_numeric() => deadband,
        _ => return current != last_value,
    };

    let (current_n, last_n) = match (
        numeric_as_f64(datatype, &current.0),
        numeric_as_f64(datatype, &last_value.0),
    ) {
        (Some(c), Some(l)) => (c, l),
        // Carrier mismatch; fall back to plain change detection.
        _ => return current != last_value,
    };

    if (current_n - last_n).abs() > deadband.value {
        return true;
    }
    if let Some(max_time) = deadband.max_time {
        if now.saturating_sub(last.timestamp) > max_time.as_millis() as u64 {
            return true;
        }
    }
    false
}

/// A metric value to publish outside the scheduler, e.g. event driven data.
pub struct PublishMetric {
    pub(crate) name: String,
    pub(crate) value: MetricValue,
    pub(crate) timestamp: Option<u64>,
}

impl PublishMetric {
    pub fn new<S: Into<String>, T: traits::MetricValue>(name: S, value: T) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn to_metric(&self, default_timestamp: u64) -> ProtoMetric {
        let mut metric = ProtoMetric::new();
        metric
            .set_name(self.name.clone())
            .set_timestamp(self.timestamp.unwrap_or(default_timestamp))
            .set_value(self.value.clone().into());
        metric
    }
}

/// A metric from an inbound CMD message.
pub struct MessageMetric {
    pub id: MetricId,
    pub timestamp: Option<u64>,
    pub value: Option<MetricValue>,
}

impl TryFrom<ProtoMetric> for MessageMetric {
    type Error = ();

    fn try_from(value: ProtoMetric) -> Result<Self, Self::Error> {
        let id = if let Some(alias) = value.alias {
            MetricId::Alias(alias)
        } else if let Some(name) = value.name {
            MetricId::Name(name)
        } else {
            return Err(());
        };

        let metric_value = if value.value.is_some() {
            value.value.map(MetricValue::from)
        } else if value.is_null == Some(true) {
            None
        } else {
            return Err(());
        };

        Ok(MessageMetric {
            id,
            timestamp: value.timestamp,
            value: metric_value,
        })
    }
}

/// The metrics of an inbound CMD message.
pub struct MessageMetrics {
    pub timestamp: u64,
    pub metrics: Vec<MessageMetric>,
}

impl TryFrom<Payload> for MessageMetrics {
    type Error = ();

    fn try_from(value: Payload) -> Result<Self, Self::Error> {
        let timestamp = value.timestamp.ok_or(())?;
        let mut metrics = Vec::with_capacity(value.metrics.len());
        for metric in value.metrics {
            match metric.try_into() {
                Ok(metric) => metrics.push(metric),
                Err(_) => warn!("Got invalid or badly formed metric - skipping"),
            }
        }
        Ok(MessageMetrics { timestamp, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(timestamp: u64, value: impl Into<MetricValue>) -> Option<LastPublished> {
        Some(LastPublished {
            timestamp,
            value: Some(value.into()),
        })
    }

    #[test]
    fn unpublished_metric_qualifies() {
        let current = MetricValue::from(1i32);
        assert!(should_publish(DataType::Int32, None, None, &current, 0));
        let null_last = Some(LastPublished {
            timestamp: 0,
            value: None,
        });
        assert!(should_publish(
            DataType::Int32,
            None,
            null_last.as_ref(),
            &current,
            0
        ));
    }

    #[test]
    fn non_numeric_publishes_on_change_only() {
        let last = published(0, "stopped".to_string());
        let same = MetricValue::from("stopped".to_string());
        let changed = MetricValue::from("running".to_string());
        assert!(!should_publish(
            DataType::String,
            None,
            last.as_ref(),
            &same,
            100
        ));
        assert!(should_publish(
            DataType::String,
            None,
            last.as_ref(),
            &changed,
            100
        ));
    }

    #[test]
    fn numeric_without_deadband_publishes_on_change_only() {
        let last = published(0, 10i32);
        assert!(!should_publish(
            DataType::Int32,
            None,
            last.as_ref(),
            &MetricValue::from(10i32),
            100
        ));
        assert!(should_publish(
            DataType::Int32,
            None,
            last.as_ref(),
            &MetricValue::from(11i32),
            100
        ));
    }

    #[test]
    fn deadband_suppresses_small_moves() {
        // Scenario: Float 10.0 published at t0, deadband 0.5 / max 5000ms.
        let deadband = Deadband::new(0.5).with_max_time(Duration::from_millis(5000));
        let last = published(0, 10.0f32);

        // t0+100: 10.2 suppressed
        assert!(!should_publish(
            DataType::Float,
            Some(&deadband),
            last.as_ref(),
            &MetricValue::from(10.2f32),
            100
        ));
        // t0+200: 10.7 crosses the deadband
        assert!(should_publish(
            DataType::Float,
            Some(&deadband),
            last.as_ref(),
            &MetricValue::from(10.7f32),
            200
        ));
        // unchanged value inside the deadband, but max time exceeded
        assert!(should_publish(
            DataType::Float,
            Some(&deadband),
            last.as_ref(),
            &MetricValue::from(10.2f32),
            5300
        ));
    }

    #[test]
    fn deadband_boundary_is_exclusive() {
        let deadband = Deadband::new(0.5);
        let last = published(0, 10.0f64);
        // exactly the deadband does not qualify; the move must exceed it
        assert!(!should_publish(
            DataType::Double,
            Some(&deadband),
            last.as_ref(),
            &MetricValue::from(10.5f64),
            100
        ));
        assert!(should_publish(
            DataType::Double,
            Some(&deadband),
            last.as_ref(),
            &MetricValue::from(10.51f64),
            100
        ));
    }

    #[tokio::test]
    async fn producers_are_invoked_per_evaluation() {
        use std::sync::atomic::{AtomicI32, Ordering};
        let counter = Arc::new(AtomicI32::new(0));
        let counter_clone = counter.clone();
        let mut set = MetricSet::new();
        set.register(
            MetricSpec::producer("calls", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst) + 1
            })
            .scan_rate(Duration::from_millis(100)),
        )
        .unwrap();

        let first = set.evaluate_all().await;
        assert_eq!(first[0].value, MetricValue::from(1i32));
        let second = set.evaluate_all().await;
        assert_eq!(second[0].value, MetricValue::from(2i32));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_producers_resolve_before_payload_assembly() {
        let mut set = MetricSet::new();
        set.register(MetricSpec::async_producer("temp", || async { 21.5f64 }))
            .unwrap();
        let evaluated = set.evaluate_all().await;
        assert_eq!(evaluated[0].value, MetricValue::from(21.5f64));
    }

    #[tokio::test]
    async fn evaluate_due_filters_by_rate_and_gate() {
        let mut set = MetricSet::new();
        let fast = set
            .register(MetricSpec::new("fast", 1i32).scan_rate(Duration::from_millis(100)))
            .unwrap();
        set.register(MetricSpec::new("slow", 2i32).scan_rate(Duration::from_millis(1000)))
            .unwrap();

        let due = set.evaluate_due(Duration::from_millis(100), 0).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "fast");
        due[0].mark_published(0);

        // Unchanged: suppressed on the next tick.
        let due = set.evaluate_due(Duration::from_millis(100), 100).await;
        assert!(due.is_empty());

        // Mutated through the handle: published again.
        fast.set(5i32);
        let due = set.evaluate_due(Duration::from_millis(100), 200).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].value, MetricValue::from(5i32));
    }

    #[test]
    fn duplicate_metric_names_are_rejected() {
        let mut set = MetricSet::new();
        set.register(MetricSpec::new("x", 0i32)).unwrap();
        assert_eq!(
            set.register(MetricSpec::new("x", 1i32)).unwrap_err(),
            MetricRegistrationError::Duplicate
        );
        assert!(matches!(
            set.register(MetricSpec::new("a/b", 1i32)).unwrap_err(),
            MetricRegistrationError::InvalidName(_)
        ));
    }
}
