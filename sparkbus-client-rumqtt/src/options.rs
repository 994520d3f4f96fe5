use std::time::Duration;

/// Connection options for the rumqtt-backed client.
///
/// Carries the transport-level configuration an application supplies;
/// protocol-mandated settings (clean start, session expiry 0) are forced by
/// the event loop constructor regardless of what is set here.
pub struct MqttOptions {
    pub broker_addr: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keepalive: Duration,
    pub connect_timeout: Duration,
}

impl MqttOptions {
    pub fn new<S: Into<String>, S1: Into<String>>(client_id: S, addr: S1, port: u16) -> Self {
        Self {
            broker_addr: addr.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            keepalive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_credentials<S: Into<String>, S1: Into<String>>(
        mut self,
        username: S,
        password: S1,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
