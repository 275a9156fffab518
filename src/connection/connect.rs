//! CONNECT processing (spec §4.2)

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use super::{Connection, Event, Phase};
use crate::error::AdapterError;
use crate::protocol::{Connect, ConnAck, ConnAckCode, Packet};
use crate::transport::Transport;

impl<T: Transport + 'static> Connection<T> {
    pub(super) async fn handle_connect(&mut self, connect: Connect) -> Result<(), AdapterError> {
        if self.phase != Phase::WaitingForConnect {
            return Err(AdapterError::DuplicateConnectReceived);
        }
        self.phase = Phase::ProcessingConnect;

        match self.process_connect(connect).await {
            // The `Accepted` CONNACK is already on the wire at this point;
            // any failure draining pipelined packets must go straight to
            // shutdown rather than bubble back up here, or it would trigger
            // the fallback CONNACK below on top of the one already sent.
            Ok(()) => {
                self.drain_connect_pending_queue().await;
                Ok(())
            }
            // `ClientIdentifierRejected` and `AuthenticationFailed` already
            // wrote their specific CONNACK refusal code before returning;
            // every other failure (a collaborator error, typically) gets
            // this generic fallback so the client still sees a CONNACK
            // instead of the channel just closing.
            Err(e @ (AdapterError::ClientIdentifierRejected | AdapterError::AuthenticationFailed)) => Err(e),
            Err(e) => {
                let _ = self
                    .transport
                    .write_async(&Packet::ConnAck(ConnAck {
                        session_present: false,
                        code: ConnAckCode::RefusedServerUnavailable,
                    }))
                    .await;
                let _ = self.transport.flush().await;
                Err(e)
            }
        }
    }

    /// Dispatch packets the client pipelined right after CONNECT, before the
    /// CONNACK went out. A failure here funnels straight to shutdown instead
    /// of propagating back through `handle_connect`, which would otherwise
    /// write a second, contradictory CONNACK on top of the `Accepted` one
    /// already sent.
    async fn drain_connect_pending_queue(&mut self) {
        let pending: Vec<_> = self.connect_pending_queue.drain(..).collect();
        for packet in pending {
            if let Err(e) = self.dispatch(packet).await {
                self.shutdown_on_error("connect.pending_queue", e).await;
                return;
            }
        }
    }

    async fn process_connect(&mut self, connect: Connect) -> Result<(), AdapterError> {
        if connect.client_id.is_empty() && !connect.clean_session {
            self.transport
                .write_async(&Packet::ConnAck(ConnAck {
                    session_present: false,
                    code: ConnAckCode::RefusedIdentifierRejected,
                }))
                .await?;
            self.transport.flush().await?;
            return Err(AdapterError::ClientIdentifierRejected);
        }

        let identity = self
            .auth
            .authenticate(
                &connect.client_id,
                connect.username.as_deref(),
                connect.password.as_deref(),
                self.remote_address,
            )
            .await;

        if !identity.is_authenticated {
            self.transport
                .write_async(&Packet::ConnAck(ConnAck {
                    session_present: false,
                    code: ConnAckCode::RefusedNotAuthorized,
                }))
                .await?;
            self.transport.flush().await?;
            return Err(AdapterError::AuthenticationFailed);
        }

        self.bridge
            .bind_messaging_channel(&identity.id, self.spawn_upstream_forwarder())
            .await
            .map_err(|e| AdapterError::Collaborator(e.to_string()))?;

        let (session, session_present) = if connect.clean_session {
            self.session_store.delete(&identity.id).await?;
            (
                self.session_store.create(&identity.id, true).await?,
                false,
            )
        } else {
            match self.session_store.get(&identity.id).await? {
                Some(existing) => (existing, true),
                None => (self.session_store.create(&identity.id, false).await?, false),
            }
        };

        let keep_alive_timeout = derive_keep_alive(connect.keep_alive, self.config.max_keep_alive_timeout);

        self.identity = Some(identity.id.clone());
        self.session = Some(session);
        self.will = connect.will;
        self.keep_alive_timeout = keep_alive_timeout;

        self.transport
            .write_async(&Packet::ConnAck(ConnAck {
                session_present,
                code: ConnAckCode::Accepted,
            }))
            .await?;
        self.transport.flush().await?;

        self.phase = Phase::Connected;
        self.last_client_activity = std::time::Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.connection_opened();
        }
        info!(identity = %identity.id, session_present, "connection established");

        Ok(())
    }

    /// Build the forwarding channel the bridge posts upstream messages
    /// through, wiring them back onto this connection's own event channel
    /// (spec §9 "back-references to collaborators").
    fn spawn_upstream_forwarder(&self) -> mpsc::UnboundedSender<crate::bridge::UpstreamMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if events_tx.send(Event::Upstream(message)).is_err() {
                    break;
                }
            }
        });
        tx
    }
}

/// `1.5 × client-requested`, capped by the configured maximum; a zero
/// client value falls back to the maximum (spec §4.2). `None` means no
/// keep-alive enforcement at all.
fn derive_keep_alive(requested: u16, max: Option<Duration>) -> Option<Duration> {
    if requested == 0 {
        return max;
    }
    let derived = Duration::from_millis(requested as u64 * 1500);
    match max {
        Some(max) if derived > max => Some(max),
        _ => Some(derived),
    }
}
