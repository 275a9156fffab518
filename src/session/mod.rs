//! Session state and the `SessionStore` collaborator (spec §3, §6)
//!
//! Session state is owned by the caller of this crate, not by the adapter —
//! the adapter only ever holds a `state.copy()` while mutating and hands the
//! result back through [`SessionStore::set`]. That keeps the single
//! in-flight-mutation invariant (guarded by `ChangingSubscriptions`) cheap to
//! enforce without the adapter needing its own locking.

use std::time::Instant;

use async_trait::async_trait;

use crate::protocol::QoS;

/// A subscription within a session's ordered subscription list.
///
/// `created_at` backs the time-gating invariant (spec P7): a subscription
/// only matches messages created strictly after it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSubscription {
    pub filter: String,
    pub qos: QoS,
    pub created_at: Instant,
}

/// Per-identity session state.
///
/// `payload` is opaque to the adapter: the collaborator may stash whatever it
/// needs (e.g. a resume token) there, and the adapter round-trips it
/// unexamined through `copy`/`set`.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub transient: bool,
    pub subscriptions: Vec<SessionSubscription>,
    pub payload: Vec<u8>,
}

impl Session {
    pub fn new(identity: impl Into<String>, transient: bool) -> Self {
        Session {
            identity: identity.into(),
            transient,
            subscriptions: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// An independent editable copy, per spec §6 `state.copy()`.
    pub fn copy(&self) -> Self {
        self.clone()
    }
}

/// The session-state store collaborator (spec §6).
///
/// Implementations are responsible for durability of non-transient sessions;
/// the adapter never persists state itself, it only calls `set` after a
/// subscription-change batch completes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<Session>, crate::error::AdapterError>;

    async fn set(&self, state: &Session) -> Result<(), crate::error::AdapterError>;

    async fn delete(&self, identity: &str) -> Result<(), crate::error::AdapterError>;

    async fn create(&self, identity: &str, transient: bool) -> Result<Session, crate::error::AdapterError> {
        Ok(Session::new(identity, transient))
    }
}

/// An in-memory `SessionStore` for tests and the standalone demo, backed by
/// a sharded concurrent map since this collaborator is shared across every
/// connection's task (spec §5 "shared resources"). Transient sessions are
/// never written to the backing map, matching the "discarded when
/// cleanSession is set" lifecycle rule.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: dashmap::DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, identity: &str) -> Result<Option<Session>, crate::error::AdapterError> {
        Ok(self.sessions.get(identity).map(|s| s.clone()))
    }

    async fn set(&self, state: &Session) -> Result<(), crate::error::AdapterError> {
        if !state.transient {
            self.sessions.insert(state.identity.clone(), state.clone());
        }
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), crate::error::AdapterError> {
        self.sessions.remove(identity);
        Ok(())
    }

    async fn create(&self, identity: &str, transient: bool) -> Result<Session, crate::error::AdapterError> {
        Ok(Session::new(identity, transient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transient_sessions_are_not_persisted() {
        let store = InMemorySessionStore::new();
        let session = Session::new("device-1", true);
        store.set(&session).await.unwrap();
        assert!(store.get("device-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn durable_sessions_round_trip() {
        let store = InMemorySessionStore::new();
        let mut session = Session::new("device-1", false);
        session.subscriptions.push(SessionSubscription {
            filter: "a/b".into(),
            qos: QoS::AtLeastOnce,
            created_at: Instant::now(),
        });
        store.set(&session).await.unwrap();
        let loaded = store.get("device-1").await.unwrap().unwrap();
        assert_eq!(loaded.subscriptions.len(), 1);
    }

    #[test]
    fn copy_is_independent() {
        let mut session = Session::new("device-1", false);
        let mut copy = session.copy();
        copy.subscriptions.push(SessionSubscription {
            filter: "x".into(),
            qos: QoS::AtMostOnce,
            created_at: Instant::now(),
        });
        assert_eq!(session.subscriptions.len(), 0);
        assert_eq!(copy.subscriptions.len(), 1);
        session.transient = true;
        assert!(!copy.transient);
    }
}
