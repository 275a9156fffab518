//! MQTT v3.1.1 CONNACK / SUBACK return codes

use std::fmt;

/// CONNACK return code (MQTT v3.1.1 §3.2.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnAckCode {
    #[default]
    Accepted = 0x00,
    RefusedUnacceptableProtocolVersion = 0x01,
    RefusedIdentifierRejected = 0x02,
    RefusedServerUnavailable = 0x03,
    RefusedBadUsernameOrPassword = 0x04,
    RefusedNotAuthorized = 0x05,
}

impl fmt::Display for ConnAckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::RefusedUnacceptableProtocolVersion => "unacceptable protocol version",
            Self::RefusedIdentifierRejected => "identifier rejected",
            Self::RefusedServerUnavailable => "server unavailable",
            Self::RefusedBadUsernameOrPassword => "bad username or password",
            Self::RefusedNotAuthorized => "not authorized",
        };
        write!(f, "{s}")
    }
}

/// SUBACK return code (MQTT v3.1.1 §3.9.3). A rejected filter gets `Failure`
/// without aborting the rest of the batch (spec §4.3 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubAckCode {
    GrantedQoS0 = 0x00,
    GrantedQoS1 = 0x01,
    GrantedQoS2 = 0x02,
    Failure = 0x80,
}

impl SubAckCode {
    /// The SUBACK code for a successfully granted QoS.
    pub fn granted(qos: super::QoS) -> Self {
        match qos {
            super::QoS::AtMostOnce => Self::GrantedQoS0,
            super::QoS::AtLeastOnce => Self::GrantedQoS1,
            super::QoS::ExactlyOnce => Self::GrantedQoS2,
        }
    }
}
