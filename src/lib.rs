//! A per-connection MQTT v3.1.1 server-side protocol adapter
//!
//! One [`connection::Connection`] mediates between a single MQTT client and
//! an upstream messaging bridge (e.g. an IoT hub): CONNECT authentication,
//! persisted-session subscription management, bi-directional PUBLISH across
//! all three Quality-of-Service levels, retransmission on reconnect,
//! flow control, keep-alive enforcement, and orderly shutdown with
//! last-will delivery. The wire codec, transport framing, and upstream
//! bridge implementation are all collaborators this crate is given, not
//! things it owns (see [`transport`] and [`bridge`]).

pub mod auth;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod qos2;
pub mod session;
pub mod topic;
pub mod transport;

pub use auth::{AuthProvider, Identity, StaticAuthProvider};
pub use bridge::{FeedbackChannel, MessagingBridge, SendingClient, UpstreamMessage};
pub use config::AdapterConfig;
pub use connection::Connection;
pub use error::AdapterError;
pub use metrics::Metrics;
pub use protocol::{Packet, QoS};
pub use qos2::Qos2Store;
pub use session::{Session, SessionStore};
pub use transport::Transport;
