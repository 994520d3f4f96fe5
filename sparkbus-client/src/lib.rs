mod traits;
mod types;
mod utils;

pub use traits::{Client, DynClient, DynEventLoop, EventLoop};
pub use types::*;
pub use utils::topic_and_payload_to_event;

/// A channel-backed [EventLoop] and [Client] pair.
///
/// Useful in tests where running a real MQTT client against a broker is not
/// appropriate.
pub mod channel;
