//! QoS-2 delivery state and the `Qos2Store` collaborator (spec §3, §6)
//!
//! Outbound QoS-2 delivery is two-phase: a pending record lives in the
//! PUBLISH/PUBREC processor until PUBREC arrives, at which point it is
//! replaced by a persisted record here and the processor moves on to
//! PUBREL/PUBCOMP. Keeping this state keyed by `(identity, packet_id)` is
//! what makes reconnect-resume (spec example 4) work: on reconnect the
//! record tells the adapter to skip straight to re-sending PUBREL.

use async_trait::async_trait;

/// Which half of the QoS-2 handshake a packet id is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2Phase {
    /// PUBREC has not yet arrived for this packet id.
    AwaitingPubRec,
    /// PUBREC arrived, PUBREL has been sent, waiting for PUBCOMP.
    AwaitingPubComp,
}

/// A persisted QoS-2 delivery-state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qos2State {
    pub sequence_number: u64,
    pub packet_id: u16,
    pub phase: Qos2Phase,
}

impl Qos2State {
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

/// The QoS-2 delivery-state store collaborator (spec §6).
#[async_trait]
pub trait Qos2Store: Send + Sync {
    async fn get(
        &self,
        identity: &str,
        packet_id: u16,
    ) -> Result<Option<Qos2State>, crate::error::AdapterError>;

    async fn set(
        &self,
        identity: &str,
        packet_id: u16,
        state: Qos2State,
    ) -> Result<(), crate::error::AdapterError>;

    async fn delete(&self, identity: &str, packet_id: u16) -> Result<(), crate::error::AdapterError>;

    fn create(&self, sequence_number: u64, packet_id: u16) -> Qos2State {
        Qos2State {
            sequence_number,
            packet_id,
            phase: Qos2Phase::AwaitingPubRec,
        }
    }
}

/// An in-memory `Qos2Store` for tests and the standalone demo, backed by a
/// sharded concurrent map since this collaborator is shared across every
/// connection's task (spec §5 "shared resources").
#[derive(Default)]
pub struct InMemoryQos2Store {
    records: dashmap::DashMap<(String, u16), Qos2State>,
}

impl InMemoryQos2Store {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Qos2Store for InMemoryQos2Store {
    async fn get(
        &self,
        identity: &str,
        packet_id: u16,
    ) -> Result<Option<Qos2State>, crate::error::AdapterError> {
        Ok(self.records.get(&(identity.to_string(), packet_id)).map(|r| *r))
    }

    async fn set(
        &self,
        identity: &str,
        packet_id: u16,
        state: Qos2State,
    ) -> Result<(), crate::error::AdapterError> {
        self.records.insert((identity.to_string(), packet_id), state);
        Ok(())
    }

    async fn delete(&self, identity: &str, packet_id: u16) -> Result<(), crate::error::AdapterError> {
        self.records.remove(&(identity.to_string(), packet_id));
        Ok(())
    }
}
