//! The transport collaborator (spec §6)
//!
//! The adapter never owns a socket or a codec: it drives reads explicitly
//! via [`Transport::read`] when flow control permits, and writes encoded
//! packets back out via [`Transport::write_async`] / [`Transport::flush`].
//! Wire framing, TLS termination, and WebSocket upgrade all live on the
//! embedder's side of this trait.

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::protocol::Packet;

/// One connection's packet stream, read and write sides.
///
/// `read` is only ever called when the connection's flow-control state
/// permits (spec §4.9) — the adapter, not the transport, owns the decision
/// of when to ask for the next packet.
#[async_trait]
pub trait Transport: Send {
    /// Read and decode the next packet. Returns `Ok(None)` on a clean
    /// end-of-stream.
    async fn read(&mut self) -> Result<Option<Packet>, AdapterError>;

    /// Encode and buffer a packet for writing. Does not imply a flush.
    async fn write_async(&mut self, packet: &Packet) -> Result<(), AdapterError>;

    /// Flush previously buffered writes.
    async fn flush(&mut self) -> Result<(), AdapterError>;
}

/// In-memory test doubles for [`Transport`]. Exposed unconditionally (not
/// gated behind `#[cfg(test)]`) so integration tests in `tests/` can drive a
/// [`crate::connection::Connection`] without a real socket.
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory `Transport` double: reads drain a preloaded queue,
    /// writes accumulate into a log for assertions.
    pub struct FakeTransport {
        pub inbound: VecDeque<Packet>,
        pub outbound: Vec<Packet>,
        pub flushes: usize,
    }

    impl FakeTransport {
        pub fn new(inbound: Vec<Packet>) -> Self {
            FakeTransport {
                inbound: inbound.into(),
                outbound: Vec::new(),
                flushes: 0,
            }
        }

        pub fn push_inbound(&mut self, packet: Packet) {
            self.inbound.push_back(packet);
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn read(&mut self) -> Result<Option<Packet>, AdapterError> {
            Ok(self.inbound.pop_front())
        }

        async fn write_async(&mut self, packet: &Packet) -> Result<(), AdapterError> {
            self.outbound.push(packet.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), AdapterError> {
            self.flushes += 1;
            Ok(())
        }
    }

    /// An event fed into a [`ChannelTransport`]'s read side.
    pub enum TransportEvent {
        Packet(Packet),
        Err(AdapterError),
        Eof,
    }

    /// A `Transport` double backed by channels rather than a preloaded queue,
    /// for tests that drive a live [`crate::connection::Connection::run`]
    /// from a spawned task and need to push packets (and inject transport
    /// errors or EOF) while it is running.
    pub struct ChannelTransport {
        inbound: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
        outbound: tokio::sync::mpsc::UnboundedSender<Packet>,
    }

    impl ChannelTransport {
        /// Returns the transport plus the sender tests push inbound events
        /// through and the receiver tests drain outbound packets from.
        pub fn new() -> (
            Self,
            tokio::sync::mpsc::UnboundedSender<TransportEvent>,
            tokio::sync::mpsc::UnboundedReceiver<Packet>,
        ) {
            let (in_tx, in_rx) = tokio::sync::mpsc::unbounded_channel();
            let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
            (
                ChannelTransport {
                    inbound: in_rx,
                    outbound: out_tx,
                },
                in_tx,
                out_rx,
            )
        }
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn read(&mut self) -> Result<Option<Packet>, AdapterError> {
            match self.inbound.recv().await {
                Some(TransportEvent::Packet(packet)) => Ok(Some(packet)),
                Some(TransportEvent::Err(e)) => Err(e),
                Some(TransportEvent::Eof) | None => Ok(None),
            }
        }

        async fn write_async(&mut self, packet: &Packet) -> Result<(), AdapterError> {
            let _ = self.outbound.send(packet.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn fake_transport_drains_in_order() {
            let mut transport = FakeTransport::new(vec![Packet::PingReq, Packet::PingResp]);
            assert_eq!(transport.read().await.unwrap(), Some(Packet::PingReq));
            assert_eq!(transport.read().await.unwrap(), Some(Packet::PingResp));
            assert_eq!(transport.read().await.unwrap(), None);
        }

        #[tokio::test]
        async fn fake_transport_records_writes() {
            let mut transport = FakeTransport::new(vec![]);
            transport.write_async(&Packet::PingResp).await.unwrap();
            transport.flush().await.unwrap();
            assert_eq!(transport.outbound.len(), 1);
            assert_eq!(transport.flushes, 1);
        }

        #[tokio::test]
        async fn channel_transport_round_trips_events() {
            let (mut transport, in_tx, mut out_rx) = ChannelTransport::new();
            in_tx.send(TransportEvent::Packet(Packet::PingReq)).unwrap();
            assert_eq!(transport.read().await.unwrap(), Some(Packet::PingReq));

            transport.write_async(&Packet::PingResp).await.unwrap();
            assert_eq!(out_rx.recv().await, Some(Packet::PingResp));

            in_tx.send(TransportEvent::Eof).unwrap();
            assert_eq!(transport.read().await.unwrap(), None);
        }
    }
}
