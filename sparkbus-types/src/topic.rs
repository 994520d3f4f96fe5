use crate::constants::{
    DBIRTH, DCMD, DDATA, DDEATH, NBIRTH, NCMD, NDATA, NDEATH, SPBV10, STATE,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceMessage {
    DBirth,
    DDeath,
    DData,
    DCmd,
}

impl DeviceMessage {
    fn as_str(&self) -> &str {
        match self {
            DeviceMessage::DBirth => DBIRTH,
            DeviceMessage::DDeath => DDEATH,
            DeviceMessage::DData => DDATA,
            DeviceMessage::DCmd => DCMD,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeMessage {
    NBirth,
    NDeath,
    NData,
    NCmd,
}

impl NodeMessage {
    fn as_str(&self) -> &str {
        match self {
            NodeMessage::NBirth => NBIRTH,
            NodeMessage::NDeath => NDEATH,
            NodeMessage::NData => NDATA,
            NodeMessage::NCmd => NCMD,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeTopic {
    pub topic: String,
    pub message_type: NodeMessage,
}

impl NodeTopic {
    pub fn new(group_id: &str, message_type: NodeMessage, node_id: &str) -> Self {
        Self {
            topic: node_topic(group_id, &message_type, node_id),
            message_type,
        }
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        match self.message_type {
            NodeMessage::NBirth => (QoS::AtMostOnce, false),
            NodeMessage::NData => (QoS::AtMostOnce, false),
            NodeMessage::NCmd => (QoS::AtMostOnce, false),
            NodeMessage::NDeath => (QoS::AtMostOnce, false),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTopic {
    pub topic: String,
    pub message_type: DeviceMessage,
}

impl DeviceTopic {
    pub fn new(
        group_id: &str,
        message_type: DeviceMessage,
        node_id: &str,
        device_id: &str,
    ) -> Self {
        Self {
            topic: device_topic(group_id, &message_type, node_id, device_id),
            message_type,
        }
    }

    pub fn get_publish_quality_retain(&self) -> (QoS, bool) {
        match self.message_type {
            DeviceMessage::DBirth => (QoS::AtMostOnce, false),
            DeviceMessage::DData => (QoS::AtMostOnce, false),
            DeviceMessage::DCmd => (QoS::AtMostOnce, false),
            DeviceMessage::DDeath => (QoS::AtMostOnce, false),
        }
    }
}

/// The reserved host state topic. Lives outside the versioned namespace:
/// `STATE/<primary host id>`.
#[derive(Clone, Debug, PartialEq)]
pub struct StateTopic {
    pub topic: String,
}

impl StateTopic {
    pub fn new_host(host_id: &str) -> Self {
        Self {
            topic: state_host_topic(host_id),
        }
    }

    pub fn wildcard() -> Self {
        Self {
            topic: state_sub_topic(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Topic {
    NodeTopic(NodeTopic),
    DeviceTopic(DeviceTopic),
    State(StateTopic),
    /// `spBv1.0/+/<VERB>/+`, or `spBv1.0/+/NDATA/#` for the data verb so a
    /// single filter covers the high-volume stream.
    NodeVerb(NodeMessage),
    /// `spBv1.0/+/<VERB>/+/+`, or `spBv1.0/+/DDATA/#` for the data verb.
    DeviceVerb(DeviceMessage),
    Node {
        group_id: String,
        node_id: String,
    },
    Group {
        id: String,
    },
    Namespace,
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        match value {
            Topic::NodeTopic(node_topic) => node_topic.topic,
            Topic::DeviceTopic(device_topic) => device_topic.topic,
            Topic::State(state_topic) => state_topic.topic,
            Topic::NodeVerb(NodeMessage::NData) => format!("{}/+/{}/#", SPBV10, NDATA),
            Topic::NodeVerb(verb) => format!("{}/+/{}/+", SPBV10, verb.as_str()),
            Topic::DeviceVerb(DeviceMessage::DData) => format!("{}/+/{}/#", SPBV10, DDATA),
            Topic::DeviceVerb(verb) => format!("{}/+/{}/+/+", SPBV10, verb.as_str()),
            Topic::Node { group_id, node_id } => {
                format!("{}/{}/+/{}/#", SPBV10, group_id, node_id)
            }
            Topic::Group { id } => format!("{}/{}/#", SPBV10, id),
            Topic::Namespace => format!("{}/#", SPBV10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicFilter {
    pub topic: Topic,
    pub qos: QoS,
    /// MQTT 5 shared subscription group. When set, the rendered filter is
    /// wrapped as `$share/<group>/<filter>`.
    pub shared_group: Option<String>,
}

impl TopicFilter {
    pub fn new(topic: Topic) -> Self {
        Self::new_with_qos(topic, QoS::AtMostOnce)
    }

    pub fn new_with_qos(topic: Topic, qos: QoS) -> Self {
        Self {
            topic,
            qos,
            shared_group: None,
        }
    }

    pub fn shared<S: Into<String>>(mut self, group: S) -> Self {
        self.shared_group = Some(group.into());
        self
    }

    /// Render the filter string handed to the MQTT client.
    pub fn render(&self) -> String {
        let filter: String = self.topic.clone().into();
        match &self.shared_group {
            Some(group) => format!("$share/{}/{}", group, filter),
            None => filter,
        }
    }
}

pub fn node_topic_raw(group_id: &str, message_type: &str, node_id: &str) -> String {
    format!("{}/{}/{}/{}", SPBV10, group_id, message_type, node_id)
}

pub fn node_topic(group_id: &str, message_type: &NodeMessage, node_id: &str) -> String {
    node_topic_raw(group_id, message_type.as_str(), node_id)
}

pub fn device_topic(
    group_id: &str,
    message_type: &DeviceMessage,
    node_id: &str,
    device_id: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        SPBV10,
        group_id,
        message_type.as_str(),
        node_id,
        device_id
    )
}

pub fn state_host_topic(host_id: &str) -> String {
    format!("{}/{}", STATE, host_id)
}

pub fn state_sub_topic() -> String {
    state_host_topic("#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_and_device_topics() {
        assert_eq!(
            NodeTopic::new("G", NodeMessage::NBirth, "N").topic,
            "spBv1.0/G/NBIRTH/N"
        );
        assert_eq!(
            DeviceTopic::new("G", DeviceMessage::DData, "N", "D").topic,
            "spBv1.0/G/DDATA/N/D"
        );
    }

    #[test]
    fn state_topic_uses_reserved_prefix() {
        assert_eq!(StateTopic::new_host("scada1").topic, "STATE/scada1");
        assert_eq!(StateTopic::wildcard().topic, "STATE/#");
    }

    #[test]
    fn verb_filters() {
        let f: String = Topic::NodeVerb(NodeMessage::NBirth).into();
        assert_eq!(f, "spBv1.0/+/NBIRTH/+");
        let f: String = Topic::NodeVerb(NodeMessage::NData).into();
        assert_eq!(f, "spBv1.0/+/NDATA/#");
        let f: String = Topic::DeviceVerb(DeviceMessage::DBirth).into();
        assert_eq!(f, "spBv1.0/+/DBIRTH/+/+");
        let f: String = Topic::DeviceVerb(DeviceMessage::DData).into();
        assert_eq!(f, "spBv1.0/+/DDATA/#");
    }

    #[test]
    fn shared_group_wraps_filter() {
        let filter = TopicFilter::new(Topic::NodeVerb(NodeMessage::NData)).shared("hosts");
        assert_eq!(filter.render(), "$share/hosts/spBv1.0/+/NDATA/#");
        let filter = TopicFilter::new(Topic::NodeVerb(NodeMessage::NBirth));
        assert_eq!(filter.render(), "spBv1.0/+/NBIRTH/+");
    }
}
