use std::time::Duration;

use sparkbus_types::topic::{
    DeviceMessage, NodeMessage, QoS, StateTopic, Topic, TopicFilter,
};

/// How the host subscribes to the Sparkplug namespace.
///
/// Each command type gets its own filter so the high-volume data streams
/// can be spread over an MQTT 5 shared subscription group while the
/// low-volume control topics stay exclusive.
#[derive(Clone, Default)]
pub struct SubscriptionConfig {
    pub shared_group: Option<String>,
}

impl SubscriptionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the NDATA/DDATA filters as `$share/<group>/<filter>`.
    pub fn with_shared_group<S: Into<String>>(mut self, group: S) -> Self {
        self.shared_group = Some(group.into());
        self
    }
}

impl From<SubscriptionConfig> for Vec<TopicFilter> {
    fn from(value: SubscriptionConfig) -> Self {
        let shared = |filter: TopicFilter| match &value.shared_group {
            Some(group) => filter.shared(group.clone()),
            None => filter,
        };
        vec![
            TopicFilter::new_with_qos(Topic::State(StateTopic::wildcard()), QoS::AtLeastOnce),
            TopicFilter::new(Topic::NodeVerb(NodeMessage::NBirth)),
            TopicFilter::new(Topic::NodeVerb(NodeMessage::NCmd)),
            shared(TopicFilter::new(Topic::NodeVerb(NodeMessage::NData))),
            TopicFilter::new(Topic::NodeVerb(NodeMessage::NDeath)),
            TopicFilter::new(Topic::DeviceVerb(DeviceMessage::DBirth)),
            TopicFilter::new(Topic::DeviceVerb(DeviceMessage::DCmd)),
            shared(TopicFilter::new(Topic::DeviceVerb(DeviceMessage::DData))),
            TopicFilter::new(Topic::DeviceVerb(DeviceMessage::DDeath)),
        ]
    }
}

/// How the application reacts to conditions that call for a node rebirth.
#[derive(Clone)]
pub struct RebirthConfig {
    /// Minimum spacing between rebirth requests per node, so a burst of
    /// gap messages results in exactly one NCMD.
    pub cooldown: Duration,
    /// Also request a rebirth when a payload from a known node fails to
    /// decode.
    pub invalid_payload: bool,
}

impl Default for RebirthConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            invalid_payload: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_filters_are_shared_when_a_group_is_configured() {
        let filters: Vec<TopicFilter> =
            SubscriptionConfig::new().with_shared_group("hosts").into();
        let rendered: Vec<String> = filters.iter().map(|f| f.render()).collect();
        assert!(rendered.contains(&"STATE/#".to_string()));
        assert!(rendered.contains(&"$share/hosts/spBv1.0/+/NDATA/#".to_string()));
        assert!(rendered.contains(&"$share/hosts/spBv1.0/+/DDATA/#".to_string()));
        // Control topics stay exclusive.
        assert!(rendered.contains(&"spBv1.0/+/NBIRTH/+".to_string()));
        assert!(rendered.contains(&"spBv1.0/+/NDEATH/+".to_string()));
        assert_eq!(filters.len(), 9);
    }

    #[test]
    fn state_filter_is_at_least_once() {
        let filters: Vec<TopicFilter> = SubscriptionConfig::new().into();
        let state = filters
            .iter()
            .find(|f| f.render() == "STATE/#")
            .expect("state filter missing");
        assert_eq!(state.qos, QoS::AtLeastOnce);
    }
}
