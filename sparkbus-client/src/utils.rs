use prost::Message as ProstMessage;
use sparkbus_types::{
    compress::maybe_decompress,
    constants::{SPBV10, STATE},
    payload::Payload,
};

use crate::{DeviceMessage, Event, Message, MessageError, MessageKind, NodeMessage, StatePayload};

fn decode_payload(payload: &[u8]) -> Result<Payload, MessageError> {
    let decoded = Payload::decode(payload)?;
    maybe_decompress(decoded).map_err(|e| MessageError::Decompression(e.to_string()))
}

fn parse_message_kind(verb: &[u8]) -> Result<(bool, MessageKind), MessageError> {
    if verb.len() < 2 {
        return Err(MessageError::InvalidSparkplugTopic);
    }
    let device_level = match verb[0] {
        b'N' => false,
        b'D' => true,
        _ => return Err(MessageError::InvalidSparkplugTopic),
    };
    let kind = match &verb[1..] {
        b"BIRTH" => MessageKind::Birth,
        b"DEATH" => MessageKind::Death,
        b"DATA" => MessageKind::Data,
        b"CMD" => MessageKind::Cmd,
        _ => return Err(MessageError::InvalidSparkplugTopic),
    };
    Ok((device_level, kind))
}

fn parse(topic: &[u8], payload: &[u8]) -> Result<Event, MessageError> {
    let mut iter = topic.split(|c| *c == b'/');

    let namespace = iter.next().ok_or(MessageError::InvalidSparkplugTopic)?;

    // The reserved state topic sits outside the versioned namespace:
    // STATE/<primary host id>, payload the ONLINE/OFFLINE literal.
    if namespace == STATE.as_bytes() {
        let host_id = match iter.next() {
            Some(part) if !part.is_empty() => String::from_utf8(part.to_vec())?,
            _ => return Err(MessageError::InvalidSparkplugTopic),
        };
        if iter.next().is_some() {
            return Err(MessageError::InvalidSparkplugTopic);
        }
        let payload = StatePayload::try_from(payload)?;
        return Ok(Event::State { host_id, payload });
    }

    if namespace != SPBV10.as_bytes() {
        return Err(MessageError::InvalidSparkplugTopic);
    }

    let group_id = match iter.next() {
        Some(part) => String::from_utf8(part.to_vec())?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let (device_level, kind) = match iter.next() {
        Some(part) => parse_message_kind(part)?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let node_id = match iter.next() {
        Some(part) => String::from_utf8(part.to_vec())?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let message = Message {
        payload: decode_payload(payload)?,
        kind,
    };

    let event = if device_level {
        let device_id = match iter.next() {
            Some(part) => String::from_utf8(part.to_vec())?,
            None => return Err(MessageError::InvalidSparkplugTopic),
        };
        if iter.next().is_some() {
            return Err(MessageError::InvalidSparkplugTopic);
        }
        Event::Device(DeviceMessage {
            group_id,
            node_id,
            device_id,
            message,
        })
    } else {
        if iter.next().is_some() {
            return Err(MessageError::InvalidSparkplugTopic);
        }
        Event::Node(NodeMessage {
            group_id,
            node_id,
            message,
        })
    };
    Ok(event)
}

/// Turn a raw MQTT publish into an [Event].
///
/// Failures become [Event::InvalidPublish] carrying the untouched topic and
/// body, so transports can hand every publish through without branching.
pub fn topic_and_payload_to_event(topic: Vec<u8>, payload: Vec<u8>) -> Event {
    match parse(&topic, &payload) {
        Ok(event) => event,
        Err(reason) => Event::InvalidPublish {
            reason,
            topic,
            payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparkbus_types::compress::{compress_payload, Algorithm};
    use sparkbus_types::payload::{metric, DataType, Metric};
    use sparkbus_types::MetricValue;

    fn data_payload() -> Payload {
        let mut m = Metric::new();
        m.set_name("a".to_string())
            .set_datatype(DataType::UInt64)
            .set_value(MetricValue::from(12345u64).into());
        Payload {
            timestamp: Some(10),
            metrics: vec![m],
            seq: Some(3),
            uuid: None,
            body: None,
        }
    }

    #[test]
    fn parses_node_topics() {
        let payload = data_payload();
        let event = topic_and_payload_to_event(
            b"spBv1.0/G/NDATA/N".to_vec(),
            payload.encode_to_vec(),
        );
        match event {
            Event::Node(message) => {
                assert_eq!(message.group_id, "G");
                assert_eq!(message.node_id, "N");
                assert_eq!(message.message.kind, MessageKind::Data);
                assert_eq!(message.message.payload, payload);
            }
            other => panic!("expected node event, got {other:?}"),
        }
    }

    #[test]
    fn parses_device_topics() {
        let event = topic_and_payload_to_event(
            b"spBv1.0/G/DBIRTH/N/D".to_vec(),
            data_payload().encode_to_vec(),
        );
        match event {
            Event::Device(message) => {
                assert_eq!(message.device_id, "D");
                assert_eq!(message.message.kind, MessageKind::Birth);
            }
            other => panic!("expected device event, got {other:?}"),
        }
    }

    #[test]
    fn parses_state_topics() {
        let event = topic_and_payload_to_event(b"STATE/scada1".to_vec(), b"ONLINE".to_vec());
        assert_eq!(
            event,
            Event::State {
                host_id: "scada1".to_string(),
                payload: StatePayload::Online
            }
        );

        let event = topic_and_payload_to_event(b"STATE/scada1".to_vec(), b"offline".to_vec());
        assert!(matches!(
            event,
            Event::InvalidPublish {
                reason: MessageError::InvalidStatePayload,
                ..
            }
        ));
    }

    #[test]
    fn rejects_excess_topic_segments() {
        let bytes = data_payload().encode_to_vec();
        let event = topic_and_payload_to_event(b"spBv1.0/G/NDATA/N/extra".to_vec(), bytes.clone());
        assert!(matches!(event, Event::InvalidPublish { .. }));
        let event = topic_and_payload_to_event(b"spBv1.0/G/DDATA/N/D/extra".to_vec(), bytes);
        assert!(matches!(event, Event::InvalidPublish { .. }));
    }

    #[test]
    fn decompresses_enveloped_payloads() {
        let inner = data_payload();
        let envelope = compress_payload(&inner, Algorithm::Gzip).unwrap();
        let event = topic_and_payload_to_event(
            b"spBv1.0/G/NBIRTH/N".to_vec(),
            envelope.encode_to_vec(),
        );
        match event {
            Event::Node(message) => assert_eq!(message.message.payload, inner),
            other => panic!("expected node event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_envelope_algorithm_surfaces_raw_publish() {
        let mut envelope = compress_payload(&data_payload(), Algorithm::Gzip).unwrap();
        envelope.metrics[0].set_value(metric::Value::StringValue("LZ4".to_string()));
        let event = topic_and_payload_to_event(
            b"spBv1.0/G/NBIRTH/N".to_vec(),
            envelope.encode_to_vec(),
        );
        assert!(matches!(
            event,
            Event::InvalidPublish {
                reason: MessageError::Decompression(_),
                ..
            }
        ));
    }
}
