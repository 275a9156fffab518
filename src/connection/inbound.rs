//! Inbound PUBLISH Processor (spec §4.4): one FIFO async processor per
//! resolved upstream sending client. Running the send on a spawned task
//! (rather than inline on the connection's executor) keeps a slow upstream
//! send for one client's topic from blocking reads for every other client
//! sharing this connection; completions are folded back in through
//! [`super::Event::InboundPublishAcked`] so the executor stays single-threaded
//! from the session-state point of view.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::bridge::SendingClient;
use crate::error::AdapterError;
use crate::metrics::Metrics;
use crate::protocol::{Packet, PubAck, Publish, QoS};
use crate::transport::Transport;

use super::{Connection, Event};

struct QueuedPublish {
    packet_id: Option<u16>,
    qos: QoS,
    topic: Arc<str>,
    payload: Bytes,
}

/// Result of one dequeued send, folded back onto the connection's event
/// channel once the spawned worker's `send_async` call resolves.
pub(crate) struct PublishOutcome {
    client_key: usize,
    packet_id: Option<u16>,
    qos: QoS,
    result: Result<(), AdapterError>,
}

pub(crate) struct InboundPublishProcessor {
    client: Arc<dyn SendingClient>,
    tx: mpsc::UnboundedSender<QueuedPublish>,
    backlog: Arc<AtomicUsize>,
}

impl InboundPublishProcessor {
    fn spawn(client_key: usize, client: Arc<dyn SendingClient>, events_tx: mpsc::UnboundedSender<Event>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedPublish>();
        let backlog = Arc::new(AtomicUsize::new(0));
        let worker_client = client.clone();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let outbound = worker_client.create_message(&item.topic, item.payload);
                let result = match worker_client.send_async(outbound).await {
                    Ok(()) => match item.qos {
                        QoS::ExactlyOnce => Err(AdapterError::ExactlyOnceQosNotSupported),
                        QoS::AtMostOnce | QoS::AtLeastOnce => Ok(()),
                    },
                    Err(e) => Err(e),
                };
                let outcome = PublishOutcome {
                    client_key,
                    packet_id: item.packet_id,
                    qos: item.qos,
                    result,
                };
                if events_tx.send(Event::InboundPublishAcked(outcome)).is_err() {
                    break;
                }
            }
        });

        InboundPublishProcessor { client, tx, backlog }
    }

    fn submit(&self, item: QueuedPublish) {
        self.backlog.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(item);
    }

    fn mark_one_complete(&self) {
        self.backlog.fetch_sub(1, Ordering::SeqCst);
    }

    pub(super) fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    pub(super) fn max_pending_messages(&self) -> usize {
        self.client.max_pending_messages()
    }
}

impl<T: Transport + 'static> Connection<T> {
    pub(super) async fn handle_inbound_publish(&mut self, publish: Publish) -> Result<(), AdapterError> {
        let client = self
            .bridge
            .try_resolve_client(&publish.topic)
            .await?
            .ok_or(AdapterError::UnresolvedSendingClient)?;

        let key = Arc::as_ptr(&client) as *const () as usize;
        let events_tx = self.events_tx.clone();
        self.inbound_processors
            .entry(key)
            .or_insert_with(|| InboundPublishProcessor::spawn(key, client, events_tx));

        self.inbound_processors.get(&key).expect("just inserted").submit(QueuedPublish {
            packet_id: publish.packet_id,
            qos: publish.qos,
            topic: publish.topic,
            payload: publish.payload,
        });
        Ok(())
    }

    pub(super) async fn complete_inbound_publish(&mut self, outcome: PublishOutcome) -> Result<(), AdapterError> {
        if let Some(processor) = self.inbound_processors.get(&outcome.client_key) {
            processor.mark_one_complete();
        }

        outcome.result?;

        if outcome.qos == QoS::AtLeastOnce {
            let packet_id = outcome.packet_id.expect("QoS 1 PUBLISH always carries a packet id");
            self.transport.write_async(&Packet::PubAck(PubAck { packet_id })).await?;
            self.transport.flush().await?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.publish_inbound(outcome.qos);
        }
        Ok(())
    }
}
