use crate::payload::{metric, DataType};
use crate::traits::{self, HasDataType};

use thiserror::Error;

/// Wrapper around the protobuf metric value oneof.
///
/// Sparkplug packs every scalar into one of a handful of protobuf carriers;
/// the conversions below are width preserving: signed integers travel as
/// their two's complement bit pattern inside the unsigned carrier, and 64-bit
/// integers never pass through a floating point representation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue(pub metric::Value);

impl MetricValue {
    pub fn new(inner: metric::Value) -> Self {
        Self(inner)
    }
}

impl From<MetricValue> for metric::Value {
    fn from(value: MetricValue) -> Self {
        value.0
    }
}

impl From<metric::Value> for MetricValue {
    fn from(value: metric::Value) -> Self {
        MetricValue(value)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FromValueTypeError {
    #[error("Value variant type was invalid")]
    InvalidVariantType,
}

macro_rules! metric_value_conversions {
    ($ty:ty, $variant:ident, [$($dt:ident),+], $to:expr, $from:expr) => {
        impl HasDataType for $ty {
            fn supported_datatypes() -> &'static [DataType] {
                &[$(DataType::$dt),+]
            }
        }

        impl From<$ty> for MetricValue {
            fn from(value: $ty) -> Self {
                MetricValue(metric::Value::$variant(($to)(value)))
            }
        }

        impl TryFrom<MetricValue> for $ty {
            type Error = FromValueTypeError;

            fn try_from(value: MetricValue) -> Result<Self, Self::Error> {
                match value.0 {
                    metric::Value::$variant(v) => Ok(($from)(v)),
                    _ => Err(FromValueTypeError::InvalidVariantType),
                }
            }
        }

        impl traits::MetricValue for $ty {}
    };
}

metric_value_conversions!(
    i8, IntValue, [Int8],
    |v: i8| u32::from(v.to_le_bytes()[0]),
    |v: u32| i8::from_le_bytes([v.to_le_bytes()[0]])
);
metric_value_conversions!(
    i16, IntValue, [Int16],
    |v: i16| { let b = v.to_le_bytes(); u32::from_le_bytes([b[0], b[1], 0, 0]) },
    |v: u32| { let b = v.to_le_bytes(); i16::from_le_bytes([b[0], b[1]]) }
);
metric_value_conversions!(
    i32, IntValue, [Int32],
    |v: i32| u32::from_le_bytes(v.to_le_bytes()),
    |v: u32| i32::from_le_bytes(v.to_le_bytes())
);
metric_value_conversions!(
    i64, LongValue, [Int64],
    |v: i64| u64::from_le_bytes(v.to_le_bytes()),
    |v: u64| i64::from_le_bytes(v.to_le_bytes())
);
metric_value_conversions!(u8, IntValue, [UInt8], |v: u8| v as u32, |v: u32| v as u8);
metric_value_conversions!(u16, IntValue, [UInt16], |v: u16| v as u32, |v: u32| v as u16);
metric_value_conversions!(u32, IntValue, [UInt32], |v: u32| v, |v: u32| v);
metric_value_conversions!(u64, LongValue, [UInt64, DateTime], |v: u64| v, |v: u64| v);
metric_value_conversions!(f32, FloatValue, [Float], |v: f32| v, |v: f32| v);
metric_value_conversions!(f64, DoubleValue, [Double], |v: f64| v, |v: f64| v);
metric_value_conversions!(bool, BooleanValue, [Boolean], |v: bool| v, |v: bool| v);
metric_value_conversions!(
    String, StringValue, [String, Text, Uuid],
    |v: String| v,
    |v: String| v
);
metric_value_conversions!(
    Vec<u8>, BytesValue, [Bytes],
    |v: Vec<u8>| v,
    |v: Vec<u8>| v
);

/// Project a numeric metric value to `f64` for deadband comparison.
///
/// Returns `None` when the datatype is not numeric or the carrier variant
/// does not match the declared datatype. Only the report-by-exception gate
/// uses this projection; wire values keep their native width.
pub fn numeric_as_f64(datatype: DataType, value: &metric::Value) -> Option<f64> {
    use metric::Value::*;
    let v = match (datatype, value) {
        (DataType::Int8, IntValue(v)) => i8::from_le_bytes([v.to_le_bytes()[0]]) as f64,
        (DataType::Int16, IntValue(v)) => {
            let b = v.to_le_bytes();
            i16::from_le_bytes([b[0], b[1]]) as f64
        }
        (DataType::Int32, IntValue(v)) => i32::from_le_bytes(v.to_le_bytes()) as f64,
        (DataType::Int64, LongValue(v)) => i64::from_le_bytes(v.to_le_bytes()) as f64,
        (DataType::UInt8 | DataType::UInt16 | DataType::UInt32, IntValue(v)) => *v as f64,
        (DataType::UInt64, LongValue(v)) => *v as f64,
        (DataType::Float, FloatValue(v)) => *v as f64,
        (DataType::Double, DoubleValue(v)) => *v,
        _ => return None,
    };
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_values_round_trip_through_unsigned_carriers() {
        for v in [i8::MIN, -1, 0, 1, i8::MAX] {
            let mv = MetricValue::from(v);
            assert_eq!(i8::try_from(mv).unwrap(), v);
        }
        for v in [i16::MIN, -257, 0, i16::MAX] {
            let mv = MetricValue::from(v);
            assert_eq!(i16::try_from(mv).unwrap(), v);
        }
        for v in [i32::MIN, -1, 0, i32::MAX] {
            let mv = MetricValue::from(v);
            assert_eq!(i32::try_from(mv).unwrap(), v);
        }
        for v in [i64::MIN, -1, 0, i64::MAX] {
            let mv = MetricValue::from(v);
            assert_eq!(i64::try_from(mv).unwrap(), v);
        }
    }

    #[test]
    fn large_u64_survives_without_truncation() {
        // Above 2^53: would be mangled by a double representation.
        let v: u64 = (1 << 53) + 1;
        let mv = MetricValue::from(v);
        assert_eq!(u64::try_from(mv).unwrap(), v);
    }

    #[test]
    fn variant_mismatch_is_an_error() {
        let mv = MetricValue::from(1.5f64);
        assert_eq!(
            i32::try_from(mv),
            Err(FromValueTypeError::InvalidVariantType)
        );
    }

    #[test]
    fn numeric_projection() {
        assert_eq!(
            numeric_as_f64(DataType::Int8, &MetricValue::from(-5i8).into()),
            Some(-5.0)
        );
        assert_eq!(
            numeric_as_f64(DataType::Int64, &MetricValue::from(-42i64).into()),
            Some(-42.0)
        );
        assert_eq!(
            numeric_as_f64(DataType::Float, &MetricValue::from(1.5f32).into()),
            Some(1.5)
        );
        assert_eq!(
            numeric_as_f64(DataType::String, &MetricValue::from("x".to_string()).into()),
            None
        );
        // Declared datatype and carrier variant disagreeing is not numeric.
        assert_eq!(
            numeric_as_f64(DataType::Int32, &MetricValue::from(1.5f64).into()),
            None
        );
    }
}
