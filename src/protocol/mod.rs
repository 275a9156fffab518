//! MQTT v3.1.1 protocol data model
//!
//! Only the types the connection state machine needs to build and dispatch
//! on are defined here. Turning bytes on the wire into [`Packet`] values (and
//! back) is the transport collaborator's job (see [`crate::transport`]) —
//! this crate's non-goal list excludes the codec.

mod codes;
mod packet;

pub use codes::{ConnAckCode, SubAckCode};
pub use packet::*;

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// The lower of two QoS levels — used for granted-QoS and effective-QoS
    /// negotiation (spec P8: `min(requested, serverMax)` /
    /// `min(message.qos, matchedSub.qos, serverMax)`).
    pub fn min(self, other: Self) -> Self {
        if (self as u8) < (other as u8) {
            self
        } else {
            other
        }
    }
}

/// MQTT control packet type, used by the classifier to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}
