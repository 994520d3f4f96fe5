pub mod compress;
pub mod constants;
pub mod payload;
pub mod property_set;
pub mod sequence;
pub mod topic;
pub mod traits;
pub mod utils;
mod value;

pub use property_set::{PropertySet, PropertyValue};
pub use value::*;

/// How a metric is identified in a payload: by name, or by the alias that a
/// birth message bound to the name.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum MetricId {
    Name(String),
    Alias(u64),
}
