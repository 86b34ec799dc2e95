//! Inbound event classification for the broker event loop.
//!
//! Turns raw rumqttc events into typed `InboundEvent` variants so the
//! supervisor can react without inspecting MQTT packets.

use rumqttc::{ConnectReturnCode, Event, Packet, Publish};
use tokio::sync::mpsc;

/// Capacity of the inbound topic and payload buffers, in bytes.
pub const INBOUND_BUFFER_SIZE: usize = 128;

pub type InboundTopic = heapless::String<INBOUND_BUFFER_SIZE>;
pub type InboundPayload = heapless::Vec<u8, INBOUND_BUFFER_SIZE>;

/// Sending half of the event path from a session to the supervisor.
pub type EventSink = mpsc::Sender<SessionEvent>;

/// An event reported by the broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// About to open the transport.
    BeforeConnect,
    /// CONNACK accepted.
    Connected,
    /// Broker closed the session.
    Disconnected,
    Subscribed,
    Unsubscribed,
    /// PUBACK for an earlier QoS 1 publish.
    Published,
    /// Cloud-to-device message, truncated to the inbound buffers.
    DataReceived {
        topic: InboundTopic,
        payload: InboundPayload,
        truncated: bool,
    },
    /// Transport or protocol failure.
    Error(String),
    /// Packet kind with no dedicated handling.
    Unknown(String),
}

impl InboundEvent {
    /// Acknowledgements that only feed counters and logs. Session state never
    /// depends on them, so they may be dropped when the supervisor falls behind.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Published | Self::Subscribed | Self::Unsubscribed)
    }
}

/// An event tagged with the session generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: InboundEvent,
}

impl SessionEvent {
    pub fn new(generation: u64, event: InboundEvent) -> Self {
        Self { generation, event }
    }
}

/// Classify a rumqttc event.
///
/// Returns `None` for keep-alive traffic and our own outgoing packets.
pub fn classify(event: &Event) -> Option<InboundEvent> {
    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(_) => return None,
    };

    let classified = match packet {
        Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => InboundEvent::Connected,
        Packet::ConnAck(ack) => InboundEvent::Error(format!("connection refused: {:?}", ack.code)),
        Packet::SubAck(_) => InboundEvent::Subscribed,
        Packet::UnsubAck(_) => InboundEvent::Unsubscribed,
        Packet::PubAck(_) => InboundEvent::Published,
        Packet::Publish(publish) => data_received(publish),
        Packet::Disconnect => InboundEvent::Disconnected,
        Packet::PingResp => return None,
        other => InboundEvent::Unknown(packet_kind(other)),
    };
    Some(classified)
}

/// Copy a publish into bounded buffers, truncating at a character boundary.
pub fn data_received(publish: &Publish) -> InboundEvent {
    let mut topic = InboundTopic::new();
    let mut truncated = false;
    for ch in publish.topic.chars() {
        if topic.push(ch).is_err() {
            truncated = true;
            break;
        }
    }

    let mut payload = InboundPayload::new();
    for byte in publish.payload.iter() {
        if payload.push(*byte).is_err() {
            truncated = true;
            break;
        }
    }

    InboundEvent::DataReceived {
        topic,
        payload,
        truncated,
    }
}

fn packet_kind(packet: &Packet) -> String {
    let debug = format!("{packet:?}");
    debug
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Outgoing, PubAck, QoS, SubAck, SubscribeReasonCode};

    fn make_publish(topic: &str, payload: &[u8]) -> Publish {
        let mut publish = Publish::new(topic, QoS::AtLeastOnce, payload);
        publish.pkid = 1;
        publish
    }

    #[test]
    fn classify_connack() {
        let ok = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(classify(&ok), Some(InboundEvent::Connected));

        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(classify(&refused), Some(InboundEvent::Error(ref e)) if e.contains("NotAuthorized")));
    }

    #[test]
    fn classify_acks() {
        let suback = Event::Incoming(Packet::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        )));
        assert_eq!(classify(&suback), Some(InboundEvent::Subscribed));

        let puback = Event::Incoming(Packet::PubAck(PubAck::new(7)));
        assert_eq!(classify(&puback), Some(InboundEvent::Published));
    }

    #[test]
    fn only_acks_are_informational() {
        assert!(InboundEvent::Published.is_informational());
        assert!(InboundEvent::Subscribed.is_informational());
        assert!(InboundEvent::Unsubscribed.is_informational());
        assert!(!InboundEvent::Connected.is_informational());
        assert!(!InboundEvent::Disconnected.is_informational());
        assert!(!InboundEvent::Error("reset".into()).is_informational());
    }

    #[test]
    fn classify_disconnect() {
        let event = Event::Incoming(Packet::Disconnect);
        assert_eq!(classify(&event), Some(InboundEvent::Disconnected));
    }

    #[test]
    fn keepalive_and_outgoing_are_silent() {
        assert_eq!(classify(&Event::Incoming(Packet::PingResp)), None);
        assert_eq!(classify(&Event::Outgoing(Outgoing::PingReq)), None);
        assert_eq!(classify(&Event::Outgoing(Outgoing::Publish(3))), None);
    }

    #[test]
    fn unexpected_packet_is_unknown() {
        let event = Event::Incoming(Packet::PingReq);
        assert_eq!(
            classify(&event),
            Some(InboundEvent::Unknown("PingReq".into()))
        );
    }

    #[test]
    fn data_received_copies_small_messages() {
        let publish = make_publish("devices/d1/messages/devicebound/", b"hello");
        let event = data_received(&publish);
        match event {
            InboundEvent::DataReceived {
                topic,
                payload,
                truncated,
            } => {
                assert_eq!(topic.as_str(), "devices/d1/messages/devicebound/");
                assert_eq!(payload.as_slice(), b"hello");
                assert!(!truncated);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn data_received_truncates_oversized_messages() {
        let long_topic = format!("devices/d1/messages/devicebound/{}", "é".repeat(100));
        let big_payload = vec![0x5A; 1000];
        let publish = make_publish(&long_topic, &big_payload);
        match data_received(&publish) {
            InboundEvent::DataReceived {
                topic,
                payload,
                truncated,
            } => {
                assert!(truncated);
                assert!(topic.len() <= INBOUND_BUFFER_SIZE);
                assert!(long_topic.starts_with(topic.as_str()));
                assert_eq!(payload.len(), INBOUND_BUFFER_SIZE);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
