//! The upstream messaging bridge collaborators (spec §6)
//!
//! This is the adapter's only connection to whatever system actually carries
//! messages (an IoT hub, a queue, another broker's backend) — the adapter
//! itself never opens a socket to it. `MessagingBridge::bind_messaging_channel`
//! is what starts upstream delivery flowing into `Connection::handle_upstream`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AdapterError;
use crate::protocol::QoS;

/// A message delivered by the upstream bridge, paired with the feedback
/// channel used to acknowledge it.
#[derive(Clone)]
pub struct UpstreamMessage {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub sequence_number: u64,
    /// Number of times this sequence number has previously been delivered;
    /// `0` on first delivery. Used to dedup QoS-0 redelivery (spec §4.5).
    pub delivery_count: u32,
    pub created_at: Instant,
    pub feedback: Arc<dyn FeedbackChannel>,
}

impl std::fmt::Debug for UpstreamMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamMessage")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("sequence_number", &self.sequence_number)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// Acknowledgment handle for one upstream message (spec §6, §3 "Feedback
/// channel"). Exactly one of the three methods is called over the message's
/// lifetime (invariant P2).
#[async_trait]
pub trait FeedbackChannel: Send + Sync {
    async fn complete_async(&self) -> Result<(), AdapterError>;
    async fn abandon_async(&self) -> Result<(), AdapterError>;
    async fn reject_async(&self) -> Result<(), AdapterError>;
}

/// A resolved per-topic sending client (spec §6 "Sending client").
#[async_trait]
pub trait SendingClient: Send + Sync {
    /// Build an outbound message envelope for the given topic and payload.
    fn create_message(&self, topic: &str, payload: Bytes) -> OutboundMessage;

    /// Send a previously-created message upstream.
    async fn send_async(&self, message: OutboundMessage) -> Result<(), AdapterError>;

    /// Maximum number of concurrently pending sends this client tolerates;
    /// backs the inbound-publish processor's per-client backpressure.
    fn max_pending_messages(&self) -> usize;
}

/// A message handed to a `SendingClient` for an inbound (device -> upstream)
/// PUBLISH, or for a will publish.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: Arc<str>,
    pub payload: Bytes,
    /// System-set properties, keyed with the adapter's configured
    /// `service_property_prefix` (spec §6). The will path tags
    /// `{prefix}MessageType = Will` here so a downstream consumer can tell a
    /// will publish apart from an ordinary one (spec §4.4 "optionally tag
    /// `MessageType`, used for will").
    pub properties: std::collections::BTreeMap<String, String>,
}

/// The upstream messaging bridge collaborator (spec §6).
#[async_trait]
pub trait MessagingBridge: Send + Sync {
    /// Begin upstream delivery into the adapter. Called once, from CONNECT
    /// processing, after the identity is established and session state is
    /// ready. `handle` is a one-way channel into the connection's event
    /// loop (spec §9 "back-references to collaborators") — the bridge owns
    /// no reference back into the adapter beyond this sender.
    async fn bind_messaging_channel(
        &self,
        identity: &str,
        handle: tokio::sync::mpsc::UnboundedSender<UpstreamMessage>,
    ) -> Result<(), AdapterError>;

    /// Resolve the sending client responsible for a topic name (spec §4.4).
    /// Returns `None` if the topic cannot be routed upstream.
    async fn try_resolve_client(
        &self,
        topic: &str,
    ) -> Result<Option<Arc<dyn SendingClient>>, AdapterError>;

    /// Release upstream resources. `cause` is `None` for a graceful
    /// disconnect and `Some(..)` when shutdown was triggered by an error.
    async fn dispose_async(&self, cause: Option<&AdapterError>);
}

/// In-memory test doubles for the bridge collaborators, exposed
/// unconditionally so integration tests in `tests/` can drive a
/// [`crate::connection::Connection`] without a real upstream dependency.
pub mod test_support {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedSender;

    /// Which terminal action was last taken on a [`RecordingFeedback`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FeedbackOutcome {
        Completed,
        Abandoned,
        Rejected,
    }

    /// A `FeedbackChannel` that records the terminal action taken on it.
    #[derive(Default)]
    pub struct RecordingFeedback {
        outcome: Mutex<Option<FeedbackOutcome>>,
    }

    impl RecordingFeedback {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn outcome(&self) -> Option<FeedbackOutcome> {
            *self.outcome.lock().unwrap()
        }
    }

    #[async_trait]
    impl FeedbackChannel for RecordingFeedback {
        async fn complete_async(&self) -> Result<(), AdapterError> {
            *self.outcome.lock().unwrap() = Some(FeedbackOutcome::Completed);
            Ok(())
        }
        async fn abandon_async(&self) -> Result<(), AdapterError> {
            *self.outcome.lock().unwrap() = Some(FeedbackOutcome::Abandoned);
            Ok(())
        }
        async fn reject_async(&self) -> Result<(), AdapterError> {
            *self.outcome.lock().unwrap() = Some(FeedbackOutcome::Rejected);
            Ok(())
        }
    }

    /// A `SendingClient` that records every message handed to it instead of
    /// forwarding it anywhere.
    pub struct RecordingSendingClient {
        sent: Mutex<Vec<OutboundMessage>>,
        max_pending_messages: usize,
    }

    impl RecordingSendingClient {
        pub fn new(max_pending_messages: usize) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                max_pending_messages,
            })
        }

        pub fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SendingClient for RecordingSendingClient {
        fn create_message(&self, topic: &str, payload: Bytes) -> OutboundMessage {
            OutboundMessage {
                topic: Arc::from(topic),
                payload,
                properties: std::collections::BTreeMap::new(),
            }
        }

        async fn send_async(&self, message: OutboundMessage) -> Result<(), AdapterError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn max_pending_messages(&self) -> usize {
            self.max_pending_messages
        }
    }

    /// A `MessagingBridge` double that hands back a single fixed
    /// `SendingClient` for every topic and captures the `bind_messaging_channel`
    /// handle so a test can push `UpstreamMessage`s directly into a running
    /// connection.
    pub struct FakeBridge {
        client: Arc<dyn SendingClient>,
        handle: Mutex<Option<UnboundedSender<UpstreamMessage>>>,
        disposed_with_cause: Mutex<Option<bool>>,
    }

    impl FakeBridge {
        pub fn new(client: Arc<dyn SendingClient>) -> Arc<Self> {
            Arc::new(Self {
                client,
                handle: Mutex::new(None),
                disposed_with_cause: Mutex::new(None),
            })
        }

        /// Push an upstream message into the bound connection. Panics if
        /// `bind_messaging_channel` has not yet been called (i.e. CONNECT
        /// has not completed).
        pub fn push(&self, message: UpstreamMessage) {
            self.handle
                .lock()
                .unwrap()
                .as_ref()
                .expect("bind_messaging_channel not yet called")
                .send(message)
                .expect("connection's event loop has shut down");
        }

        pub fn was_disposed(&self) -> Option<bool> {
            *self.disposed_with_cause.lock().unwrap()
        }
    }

    #[async_trait]
    impl MessagingBridge for FakeBridge {
        async fn bind_messaging_channel(
            &self,
            _identity: &str,
            handle: UnboundedSender<UpstreamMessage>,
        ) -> Result<(), AdapterError> {
            *self.handle.lock().unwrap() = Some(handle);
            Ok(())
        }

        async fn try_resolve_client(&self, _topic: &str) -> Result<Option<Arc<dyn SendingClient>>, AdapterError> {
            Ok(Some(self.client.clone()))
        }

        async fn dispose_async(&self, cause: Option<&AdapterError>) {
            *self.disposed_with_cause.lock().unwrap() = Some(cause.is_some());
        }
    }
}
