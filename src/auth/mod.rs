//! The authentication collaborator (spec §6)
//!
//! CONNECT processing calls `authenticate` once, before any session state is
//! touched; an unauthenticated identity sends `RefusedNotAuthorized` and the
//! connection shuts down without ever creating session state for it.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;

/// The outcome of authenticating a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub is_authenticated: bool,
}

impl Identity {
    pub fn authenticated(id: impl Into<String>) -> Self {
        Identity {
            id: id.into(),
            is_authenticated: true,
        }
    }

    pub fn rejected(id: impl Into<String>) -> Self {
        Identity {
            id: id.into(),
            is_authenticated: false,
        }
    }
}

/// Authenticates a CONNECT's credentials against an external identity
/// source. Implementations are free to ignore `username`/`password`
/// entirely (e.g. a TLS client-cert based deployment keyed only on
/// `client_id`).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
        remote_address: SocketAddr,
    ) -> Identity;
}

/// A static username/password table, plaintext like the teacher's original
/// credential store. Suitable for tests and the standalone demo; a
/// production deployment should authenticate against the identity registry
/// the messaging bridge's upstream belongs to.
pub struct StaticAuthProvider {
    users: HashMap<String, String>,
    allow_anonymous: bool,
}

impl StaticAuthProvider {
    pub fn new(users: HashMap<String, String>, allow_anonymous: bool) -> Self {
        StaticAuthProvider {
            users,
            allow_anonymous,
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
        _remote_address: SocketAddr,
    ) -> Identity {
        let Some(username) = username else {
            return if self.allow_anonymous {
                Identity::authenticated(client_id)
            } else {
                Identity::rejected(client_id)
            };
        };

        let Some(expected) = self.users.get(username) else {
            return Identity::rejected(client_id);
        };

        let matches = password
            .and_then(|p| std::str::from_utf8(p).ok())
            .map(|p| p == expected)
            .unwrap_or(false);

        if matches {
            Identity::authenticated(client_id)
        } else {
            Identity::rejected(client_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SocketAddr {
        "127.0.0.1:1883".parse().unwrap()
    }

    #[tokio::test]
    async fn accepts_correct_credentials() {
        let mut users = HashMap::new();
        users.insert("device-1".to_string(), "secret".to_string());
        let provider = StaticAuthProvider::new(users, false);

        let identity = provider
            .authenticate("device-1", Some("device-1"), Some(b"secret"), remote())
            .await;
        assert!(identity.is_authenticated);
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let mut users = HashMap::new();
        users.insert("device-1".to_string(), "secret".to_string());
        let provider = StaticAuthProvider::new(users, false);

        let identity = provider
            .authenticate("device-1", Some("device-1"), Some(b"wrong"), remote())
            .await;
        assert!(!identity.is_authenticated);
    }

    #[tokio::test]
    async fn anonymous_policy_gates_missing_username() {
        let provider = StaticAuthProvider::new(HashMap::new(), true);
        let identity = provider.authenticate("device-1", None, None, remote()).await;
        assert!(identity.is_authenticated);

        let provider = StaticAuthProvider::new(HashMap::new(), false);
        let identity = provider.authenticate("device-1", None, None, remote()).await;
        assert!(!identity.is_authenticated);
    }
}
