//! MQTT v3.1.1 packet definitions

use std::sync::Arc;

use bytes::Bytes;

use super::{ConnAckCode, QoS, SubAckCode};

/// A decoded MQTT packet, as handed to the adapter by the transport
/// collaborator (§6 "Transport (inbound)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> super::PacketType {
        use super::PacketType::*;
        match self {
            Packet::Connect(_) => Connect,
            Packet::ConnAck(_) => ConnAck,
            Packet::Publish(_) => Publish,
            Packet::PubAck(_) => PubAck,
            Packet::PubRec(_) => PubRec,
            Packet::PubRel(_) => PubRel,
            Packet::PubComp(_) => PubComp,
            Packet::Subscribe(_) => Subscribe,
            Packet::SubAck(_) => SubAck,
            Packet::Unsubscribe(_) => Unsubscribe,
            Packet::UnsubAck(_) => UnsubAck,
            Packet::PingReq => PingReq,
            Packet::PingResp => PingResp,
            Packet::Disconnect => Disconnect,
        }
    }
}

/// CONNECT packet (client -> server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<Will>,
}

/// Will message captured at CONNECT (spec §3 "Will Packet").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNACK packet (server -> client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnAckCode,
}

/// PUBLISH packet (bidirectional).
///
/// `topic` is `Arc<str>` so that outbound fan-out (if the adapter is ever
/// reused by a caller routing to several connections) and will-message
/// reuse can clone it cheaply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: Arc<str>,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// PUBACK packet (bidirectional, QoS 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

/// PUBREC packet (bidirectional, QoS 2 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRec {
    pub packet_id: u16,
}

/// PUBREL packet (bidirectional, QoS 2 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRel {
    pub packet_id: u16,
}

/// PUBCOMP packet (bidirectional, QoS 2 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubComp {
    pub packet_id: u16,
}

/// A single filter + requested QoS within a SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub filter: String,
    pub qos: QoS,
}

/// SUBSCRIBE packet (client -> server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

/// SUBACK packet (server -> client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub codes: Vec<SubAckCode>,
}

/// UNSUBSCRIBE packet (client -> server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// UNSUBACK packet (server -> client). v3.1.1 carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
}
