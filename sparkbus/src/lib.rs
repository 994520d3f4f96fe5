pub use sparkbus_edge as edge;
pub use sparkbus_host as host;
pub use sparkbus_types as types;

pub mod client {
    pub use sparkbus_client::*;

    pub mod mqtt_client {
        pub use sparkbus_client_rumqtt as rumqtt;
    }
}
