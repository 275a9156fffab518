//! Subscription Change Queue (spec §4.3)

use std::time::Instant;

use tracing::debug;

use super::Connection;
use crate::error::AdapterError;
use crate::protocol::{Packet, SubAck, SubAckCode, Unsubscribe, UnsubAck};
use crate::session::SessionSubscription;
use crate::topic::validate_topic_filter;
use crate::transport::Transport;

impl<T: Transport + 'static> Connection<T> {
    pub(super) async fn handle_subscription_change(&mut self, packet: Packet) -> Result<(), AdapterError> {
        self.subscription_change_queue.push_back(packet);
        if self.flags.changing_subscriptions {
            return Ok(());
        }
        self.flags.changing_subscriptions = true;

        loop {
            let batch: Vec<_> = self.subscription_change_queue.drain(..).collect();
            if batch.is_empty() {
                break;
            }
            self.drain_subscription_batch(batch).await?;
        }

        self.flags.changing_subscriptions = false;
        Ok(())
    }

    async fn drain_subscription_batch(&mut self, batch: Vec<Packet>) -> Result<(), AdapterError> {
        let mut working = self
            .session
            .as_ref()
            .expect("subscription change requires an established session")
            .copy();

        let mut acks = Vec::with_capacity(batch.len());
        for packet in batch {
            match packet {
                Packet::Subscribe(subscribe) => {
                    let mut codes = Vec::with_capacity(subscribe.filters.len());
                    for filter in &subscribe.filters {
                        if validate_topic_filter(&filter.filter).is_err() {
                            codes.push(SubAckCode::Failure);
                            continue;
                        }
                        let granted = filter.qos.min(self.server_max_qos);
                        working.subscriptions.retain(|s| s.filter != filter.filter);
                        working.subscriptions.push(SessionSubscription {
                            filter: filter.filter.clone(),
                            qos: granted,
                            created_at: Instant::now(),
                        });
                        codes.push(SubAckCode::granted(granted));
                        if let Some(metrics) = &self.metrics {
                            metrics.subscription_applied();
                        }
                    }
                    acks.push(Packet::SubAck(SubAck {
                        packet_id: subscribe.packet_id,
                        codes,
                    }));
                }
                Packet::Unsubscribe(Unsubscribe { packet_id, filters }) => {
                    for filter in &filters {
                        working.subscriptions.retain(|s| &s.filter != filter);
                        if let Some(metrics) = &self.metrics {
                            metrics.subscription_removed();
                        }
                    }
                    acks.push(Packet::UnsubAck(UnsubAck { packet_id }));
                }
                _ => unreachable!("only SUBSCRIBE/UNSUBSCRIBE are queued here"),
            }
        }

        if !working.transient {
            self.session_store.set(&working).await?;
        }
        self.session = Some(working);

        for ack in &acks {
            self.transport.write_async(ack).await?;
        }
        self.transport.flush().await?;

        debug!("subscription capabilities changed; upstream filtering may refresh");
        Ok(())
    }
}
