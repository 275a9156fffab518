//! Error taxonomy for the connection adapter
//!
//! Every failure path funnels through [`AdapterError`] and a `scope` string
//! (see [`crate::connection::shutdown`]) before the connection is torn down.
//! There is no server-originated error packet in MQTT v3.1.1: the client
//! either sees a CONNACK refusal code or the channel simply closes.

use std::fmt;

/// Errors raised while running the per-connection state machine.
#[derive(Debug)]
pub enum AdapterError {
    /// A non-CONNECT packet arrived before CONNECT was processed.
    ConnectExpected,
    /// A second CONNECT arrived on an already-connecting/connected session.
    DuplicateConnectReceived,
    /// The authentication collaborator rejected the identity.
    AuthenticationFailed,
    /// CONNECT carried an empty client id with `cleanSession=false`, which
    /// v3.1.1 forbids (there would be no session for the server to resume).
    ClientIdentifierRejected,
    /// No CONNECT arrived within `connect_arrival_timeout`.
    ConnectionTimedOut,
    /// No activity within the derived keep-alive window.
    KeepAliveTimedOut,
    /// A packet type the classifier does not know how to dispatch.
    UnknownPacketType,
    /// The bridge could not resolve a sending client for an inbound topic.
    UnresolvedSendingClient,
    /// A client attempted an inbound QoS 2 PUBLISH (not supported upstream).
    ExactlyOnceQosNotSupported,
    /// An outbound message carried a QoS level the adapter cannot negotiate.
    QosLevelNotSupported,
    /// An ack arrived out of order while `abort_on_out_of_order_puback` is set.
    OutOfOrderAck,
    /// The transport reported an I/O failure.
    Transport(std::io::Error),
    /// A collaborator (store, bridge, auth provider) reported failure.
    Collaborator(String),
    /// The connection is already shutting down; further work is rejected.
    Closed,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectExpected => write!(f, "expected CONNECT, got another packet type"),
            Self::DuplicateConnectReceived => write!(f, "duplicate CONNECT received"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::ClientIdentifierRejected => write!(f, "empty client id requires cleanSession=true"),
            Self::ConnectionTimedOut => write!(f, "no CONNECT within the arrival timeout"),
            Self::KeepAliveTimedOut => write!(f, "keep-alive timeout exceeded"),
            Self::UnknownPacketType => write!(f, "unknown or unsupported packet type"),
            Self::UnresolvedSendingClient => write!(f, "could not resolve sending client for topic"),
            Self::ExactlyOnceQosNotSupported => write!(f, "inbound QoS 2 is not supported"),
            Self::QosLevelNotSupported => write!(f, "unsupported QoS level"),
            Self::OutOfOrderAck => write!(f, "acknowledgment received out of order"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Collaborator(msg) => write!(f, "collaborator error: {msg}"),
            Self::Closed => write!(f, "connection is closed"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Transport(e)
    }
}

/// A `ShutdownOnError`-tagged failure: the original error plus the operation
/// scope it occurred in, kept together for forensic logging.
#[derive(Debug)]
pub struct ScopedError {
    pub scope: &'static str,
    pub source: AdapterError,
}

impl fmt::Display for ScopedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope, self.source)
    }
}

impl std::error::Error for ScopedError {}
