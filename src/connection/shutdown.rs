//! Error Funnel and Shutdown (spec §4.10)
//!
//! The transport has no explicit `close()` in this adapter's external
//! interface (spec §6 lists only `read`/`write_async`/`flush`) — closing it
//! is simply letting `Connection` (and the transport it owns) drop once
//! [`Connection::run`] returns.

use tracing::warn;

use super::{Connection, Phase};
use crate::error::{AdapterError, ScopedError};
use crate::metrics::Metrics;
use crate::protocol::Will;
use crate::transport::Transport;

impl<T: Transport + 'static> Connection<T> {
    pub(super) async fn shutdown_on_error(&mut self, scope: &'static str, error: AdapterError) {
        let scoped = ScopedError { scope, source: error };
        warn!(error = %scoped, "connection shutting down");
        self.shutdown(Some(scoped.source)).await;
    }

    /// An upstream receive-side failure: abort the outbound processors
    /// immediately (their feedback channels are `Abandon`ed so the bridge
    /// redelivers) before funneling to the ordinary shutdown path.
    pub(super) async fn shutdown_on_receive_error(&mut self, scope: &'static str, error: AdapterError) {
        self.publish_puback.abort().await;
        self.publish_pubrec.abort().await;
        self.pubrel_pubcomp.abort().await;
        self.shutdown_on_error(scope, error).await;
    }

    pub(super) async fn shutdown(&mut self, cause: Option<AdapterError>) {
        if self.flags.closed {
            return;
        }
        self.flags.closed = true;
        self.connect_pending_queue.clear();

        let will = if cause.is_some() && self.phase == Phase::Connected {
            self.will.take()
        } else {
            None
        };

        self.publish_puback.abort().await;
        self.publish_pubrec.abort().await;
        self.pubrel_pubcomp.abort().await;

        if let Some(will) = will {
            if let Err(e) = self.publish_will(will).await {
                warn!(error = %e, "failed to publish will message during shutdown");
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.connection_closed();
        }

        self.bridge.dispose_async(cause.as_ref()).await;
    }

    async fn publish_will(&mut self, will: Will) -> Result<(), AdapterError> {
        let client = self
            .bridge
            .try_resolve_client(&will.topic)
            .await?
            .ok_or(AdapterError::UnresolvedSendingClient)?;
        let mut message = client.create_message(&will.topic, will.payload);
        message
            .properties
            .insert(format!("{}MessageType", self.config.service_property_prefix), "Will".to_string());
        client
            .send_async(message)
            .await
            .map_err(|e| AdapterError::Collaborator(e.to_string()))
    }
}
