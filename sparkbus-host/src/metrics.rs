use std::collections::HashSet;

use sparkbus_types::payload::{self, DataType, MetaData, Metric};
use sparkbus_types::{traits, MetricId, MetricValue};

/// A metric value to publish on a CMD topic.
pub struct PublishMetric {
    metric_identifier: MetricId,
    value: MetricValue,
    timestamp: Option<u64>,
}

impl PublishMetric {
    pub fn new<T: traits::MetricValue>(metric_identifier: MetricId, value: T) -> Self {
        Self {
            metric_identifier,
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl From<PublishMetric> for Metric {
    fn from(value: PublishMetric) -> Self {
        let mut metric = Metric::new();
        match value.metric_identifier {
            MetricId::Name(name) => metric.set_name(name),
            MetricId::Alias(alias) => metric.set_alias(alias),
        };
        metric.set_value(value.value.into());
        metric.timestamp = value.timestamp;
        metric
    }
}

/// The birth-time identity of a metric: its name, the alias the session
/// bound to it, and the declared datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBirthDetails {
    pub name: String,
    pub alias: Option<u64>,
    pub datatype: DataType,
}

/// The per-message facts about a metric: its value and pass-through
/// protocol fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDetails {
    pub value: Option<MetricValue>,
    pub properties: Option<payload::PropertySet>,
    pub metadata: Option<MetaData>,
    pub timestamp: u64,
    pub is_historical: bool,
    pub is_transient: bool,
}

fn metric_details(metric: &Metric, default_timestamp: u64) -> Result<MetricDetails, ()> {
    let value = if let Some(value) = &metric.value {
        Some(MetricValue::from(value.clone()))
    } else if metric.is_null == Some(true) {
        None
    } else {
        return Err(());
    };
    Ok(MetricDetails {
        value,
        properties: metric.properties.clone(),
        metadata: metric.metadata.clone(),
        timestamp: metric.timestamp.unwrap_or(default_timestamp),
        is_historical: metric.is_historical.unwrap_or(false),
        is_transient: metric.is_transient.unwrap_or(false),
    })
}

/// Extract `(identity, details)` pairs from a BIRTH payload. Birth metrics
/// must carry a name and a valid datatype; names and aliases must be
/// unique.
pub(crate) fn birth_details_from_metrics(
    metrics: &[Metric],
    default_timestamp: u64,
) -> Result<Vec<(MetricBirthDetails, MetricDetails)>, ()> {
    let mut names = HashSet::with_capacity(metrics.len());
    let mut aliases = HashSet::with_capacity(metrics.len());
    let mut results = Vec::with_capacity(metrics.len());

    for metric in metrics {
        let datatype: DataType = metric.datatype.ok_or(())?.try_into()?;
        let name = metric.name.clone().ok_or(())?;
        if !names.insert(name.clone()) {
            return Err(());
        }
        if let Some(alias) = metric.alias {
            if !aliases.insert(alias) {
                return Err(());
            }
        }
        let details = metric_details(metric, default_timestamp)?;
        results.push((
            MetricBirthDetails {
                name,
                alias: metric.alias,
                datatype,
            },
            details,
        ));
    }
    Ok(results)
}

/// Extract `(id, details)` pairs from a DATA or CMD payload. Metrics are
/// identified by alias when one is present, by name otherwise.
pub(crate) fn id_details_from_metrics(
    metrics: &[Metric],
    default_timestamp: u64,
) -> Result<Vec<(MetricId, MetricDetails)>, ()> {
    let mut results = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let id = if let Some(alias) = metric.alias {
            MetricId::Alias(alias)
        } else if let Some(name) = metric.name.clone() {
            MetricId::Name(name)
        } else {
            return Err(());
        };
        let details = metric_details(metric, default_timestamp)?;
        results.push((id, details));
    }
    Ok(results)
}
