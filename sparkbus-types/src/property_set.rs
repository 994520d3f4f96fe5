use crate::payload::{self, property_value, DataType};

/// A builder-friendly property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl PropertyValue {
    fn datatype(&self) -> DataType {
        match self {
            PropertyValue::UInt32(_) => DataType::UInt32,
            PropertyValue::UInt64(_) => DataType::UInt64,
            PropertyValue::Float(_) => DataType::Float,
            PropertyValue::Double(_) => DataType::Double,
            PropertyValue::Boolean(_) => DataType::Boolean,
            PropertyValue::String(_) => DataType::String,
        }
    }
}

impl From<PropertyValue> for payload::PropertyValue {
    fn from(value: PropertyValue) -> Self {
        let datatype = value.datatype() as u32;
        let inner = match value {
            PropertyValue::UInt32(v) => property_value::Value::IntValue(v),
            PropertyValue::UInt64(v) => property_value::Value::LongValue(v),
            PropertyValue::Float(v) => property_value::Value::FloatValue(v),
            PropertyValue::Double(v) => property_value::Value::DoubleValue(v),
            PropertyValue::Boolean(v) => property_value::Value::BooleanValue(v),
            PropertyValue::String(v) => property_value::Value::StringValue(v),
        };
        payload::PropertyValue {
            r#type: Some(datatype),
            is_null: None,
            value: Some(inner),
        }
    }
}

/// An ordered set of named properties attached to a metric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertySet {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(mut self, key: S, value: PropertyValue) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<PropertySet> for payload::PropertySet {
    fn from(value: PropertySet) -> Self {
        let mut keys = Vec::with_capacity(value.entries.len());
        let mut values = Vec::with_capacity(value.entries.len());
        for (k, v) in value.entries {
            keys.push(k);
            values.push(v.into());
        }
        payload::PropertySet { keys, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_parallel_key_value_arrays() {
        let set = PropertySet::new()
            .insert("engUnit", PropertyValue::String("degC".into()))
            .insert("engHigh", PropertyValue::Double(100.0));
        let proto: payload::PropertySet = set.into();
        assert_eq!(proto.keys, vec!["engUnit".to_string(), "engHigh".to_string()]);
        assert_eq!(proto.values.len(), 2);
        assert_eq!(proto.values[1].r#type, Some(DataType::Double as u32));
    }
}
