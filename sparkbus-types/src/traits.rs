use crate::payload::DataType;
use crate::value;

pub trait HasDataType {
    fn supported_datatypes() -> &'static [DataType];

    fn default_datatype() -> DataType {
        Self::supported_datatypes()[0]
    }
}

/// A Rust type that can be carried as a Sparkplug metric value.
pub trait MetricValue:
    TryFrom<value::MetricValue> + Into<value::MetricValue> + HasDataType
{
}
