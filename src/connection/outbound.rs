//! Outbound Request/Ack Processors: PUBLISH→PUBACK, PUBLISH→PUBREC,
//! PUBREL→PUBCOMP, and the upstream `Handle` entry point (spec §4.5, §4.6)

use std::time::Instant;

use crate::bridge::UpstreamMessage;
use crate::error::AdapterError;
use crate::metrics::Metrics;
use crate::protocol::{Packet, PubAck, PubComp, PubRec, PubRel, Publish, QoS};
use crate::qos2::{Qos2Phase, Qos2State};
use crate::topic;
use crate::transport::Transport;

use super::ack_processor::{AckProcessor, PendingAckRecord, PostResult, ProcessorKind};
use super::{Connection, Tick};

/// Derive a packet id for an outbound QoS-2 message deterministically from
/// its upstream sequence number, so a redelivered message after reconnect
/// resolves to the same packet id the original delivery used (spec example
/// 4, "QoS 2 reconnect resume").
fn derive_qos2_packet_id(sequence_number: u64) -> u16 {
    ((sequence_number % 65535) as u16).wrapping_add(1)
}

impl<T: Transport + 'static> Connection<T> {
    /// `Handle(messageWithFeedback)` (spec §4.5).
    pub(super) async fn handle_upstream_message(&mut self, message: UpstreamMessage) -> Result<(), AdapterError> {
        if self.flags.closed {
            return Ok(());
        }

        if let Some(()) = self.try_retransmit_path(&message).await? {
            return Ok(());
        }

        let identity = self.identity.clone().expect("upstream message implies Connected");
        let server_max = self.server_max_qos;

        let matched_qos = {
            let session = self.session.as_ref().expect("upstream message implies Connected");
            topic::best_match(session.subscriptions.iter(), &message.topic, message.created_at, server_max)
        };

        let Some(matched_qos) = matched_qos else {
            message
                .feedback
                .reject_async()
                .await
                .map_err(|e| AdapterError::Collaborator(e.to_string()))?;
            return Ok(());
        };

        let effective_qos = message.qos.min(matched_qos).min(server_max);

        match effective_qos {
            QoS::AtMostOnce => {
                if message.delivery_count == 0 {
                    let packet = Packet::Publish(Publish {
                        dup: false,
                        qos: QoS::AtMostOnce,
                        retain: false,
                        topic: message.topic.clone(),
                        packet_id: None,
                        payload: message.payload.clone(),
                    });
                    self.transport.write_async(&packet).await?;
                    self.transport.flush().await?;
                }
                message
                    .feedback
                    .complete_async()
                    .await
                    .map_err(|e| AdapterError::Collaborator(e.to_string()))?;
                if let Some(metrics) = &self.metrics {
                    metrics.publish_outbound(QoS::AtMostOnce);
                }
                Ok(())
            }
            QoS::AtLeastOnce => {
                let packet_id = self.allocate_packet_id();
                self.send_and_track(
                    ProcessorKind::PublishPubAck,
                    packet_id,
                    &message,
                    QoS::AtLeastOnce,
                )
                .await
            }
            QoS::ExactlyOnce => {
                let packet_id = derive_qos2_packet_id(message.sequence_number);
                self.handle_outbound_qos2(identity, packet_id, message).await
            }
        }
    }

    async fn send_and_track(
        &mut self,
        kind: ProcessorKind,
        packet_id: u16,
        message: &UpstreamMessage,
        qos: QoS,
    ) -> Result<(), AdapterError> {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos,
            retain: false,
            topic: message.topic.clone(),
            packet_id: Some(packet_id),
            payload: message.payload.clone(),
        });
        self.transport.write_async(&packet).await?;
        self.transport.flush().await?;

        let record = PendingAckRecord {
            sequence_number: message.sequence_number,
            packet_id,
            qos,
            start: Instant::now(),
            feedback: message.feedback.clone(),
            topic: message.topic.clone(),
            payload: message.payload.clone(),
        };
        let processor = self.processor_mut(kind);
        processor.enqueue(record)?;
        self.arm_ack_timeout(kind);
        Ok(())
    }

    async fn handle_outbound_qos2(
        &mut self,
        identity: String,
        packet_id: u16,
        message: UpstreamMessage,
    ) -> Result<(), AdapterError> {
        match self.qos2_store.get(&identity, packet_id).await? {
            Some(existing) if existing.sequence_number == message.sequence_number => {
                self.send_pubrel(packet_id, message).await
            }
            Some(_stale) => {
                self.qos2_store.delete(&identity, packet_id).await?;
                self.send_and_track(ProcessorKind::PublishPubRec, packet_id, &message, QoS::ExactlyOnce)
                    .await
            }
            None => {
                self.send_and_track(ProcessorKind::PublishPubRec, packet_id, &message, QoS::ExactlyOnce)
                    .await
            }
        }
    }

    async fn send_pubrel(&mut self, packet_id: u16, message: UpstreamMessage) -> Result<(), AdapterError> {
        self.transport
            .write_async(&Packet::PubRel(PubRel { packet_id }))
            .await?;
        self.transport.flush().await?;

        let record = PendingAckRecord {
            sequence_number: message.sequence_number,
            packet_id,
            qos: QoS::ExactlyOnce,
            start: Instant::now(),
            feedback: message.feedback,
            topic: message.topic,
            payload: message.payload,
        };
        self.pubrel_pubcomp.enqueue(record)?;
        self.arm_ack_timeout(ProcessorKind::PubRelPubComp);
        Ok(())
    }

    /// Retransmission path (spec §4.5), checked before the normal path.
    async fn try_retransmit_path(&mut self, message: &UpstreamMessage) -> Result<Option<()>, AdapterError> {
        let puback_match = self.publish_puback.is_retransmitting()
            && self.publish_puback.head_sequence_number() == Some(message.sequence_number);
        let pubrec_match = self.publish_pubrec.is_retransmitting()
            && self.publish_pubrec.head_sequence_number() == Some(message.sequence_number);

        if !puback_match && !pubrec_match {
            return Ok(None);
        }

        let (processor, qos) = if puback_match {
            (&mut self.publish_puback, QoS::AtLeastOnce)
        } else {
            (&mut self.publish_pubrec, QoS::ExactlyOnce)
        };
        processor.replace_head_message(message.topic.clone(), message.payload.clone(), message.feedback.clone());
        let packet_id = processor.head().expect("just matched on head").packet_id;

        let packet = Packet::Publish(Publish {
            dup: true,
            qos,
            retain: false,
            topic: message.topic.clone(),
            packet_id: Some(packet_id),
            payload: message.payload.clone(),
        });
        self.transport.write_async(&packet).await?;
        self.transport.flush().await?;
        Ok(Some(()))
    }

    pub(super) async fn handle_puback(&mut self, ack: PubAck) -> Result<(), AdapterError> {
        match self.publish_puback.post(ack.packet_id)? {
            PostResult::Matched(record) => {
                record
                    .feedback
                    .complete_async()
                    .await
                    .map_err(|e| AdapterError::Collaborator(e.to_string()))?;
            }
            PostResult::MatchedAfterSkip(record, skipped) => {
                for skipped_record in skipped {
                    let _ = skipped_record.feedback.abandon_async().await;
                }
                record
                    .feedback
                    .complete_async()
                    .await
                    .map_err(|e| AdapterError::Collaborator(e.to_string()))?;
            }
            PostResult::NoMatch => {}
        }
        Ok(())
    }

    pub(super) async fn handle_pubrec(&mut self, rec: PubRec) -> Result<(), AdapterError> {
        let identity = self.identity.clone().expect("PUBREC implies Connected");
        match self.publish_pubrec.post(rec.packet_id)? {
            PostResult::Matched(record) | PostResult::MatchedAfterSkip(record, _) => {
                self.qos2_store
                    .set(
                        &identity,
                        record.packet_id,
                        Qos2State {
                            sequence_number: record.sequence_number,
                            packet_id: record.packet_id,
                            phase: Qos2Phase::AwaitingPubComp,
                        },
                    )
                    .await?;
                self.transport
                    .write_async(&Packet::PubRel(PubRel { packet_id: record.packet_id }))
                    .await?;
                self.transport.flush().await?;
                self.pubrel_pubcomp.enqueue(PendingAckRecord {
                    sequence_number: record.sequence_number,
                    packet_id: record.packet_id,
                    qos: QoS::ExactlyOnce,
                    start: Instant::now(),
                    feedback: record.feedback,
                    topic: record.topic,
                    payload: record.payload,
                })?;
                self.arm_ack_timeout(ProcessorKind::PubRelPubComp);
            }
            PostResult::NoMatch => {}
        }
        Ok(())
    }

    /// A client-originated PUBREL is never expected in this protocol
    /// flow (inbound QoS 2 is rejected before the client could ever send
    /// one), so receiving it is treated as an unknown packet.
    pub(super) async fn handle_pubrel(&mut self, _rel: PubRel) -> Result<(), AdapterError> {
        Err(AdapterError::UnknownPacketType)
    }

    pub(super) async fn handle_pubcomp(&mut self, comp: PubComp) -> Result<(), AdapterError> {
        let identity = self.identity.clone().expect("PUBCOMP implies Connected");
        match self.pubrel_pubcomp.post(comp.packet_id)? {
            PostResult::Matched(record) | PostResult::MatchedAfterSkip(record, _) => {
                record
                    .feedback
                    .complete_async()
                    .await
                    .map_err(|e| AdapterError::Collaborator(e.to_string()))?;
                self.qos2_store.delete(&identity, record.packet_id).await?;
            }
            PostResult::NoMatch => {}
        }
        Ok(())
    }

    pub(super) async fn retransmit_head(&mut self, kind: ProcessorKind) -> Result<(), AdapterError> {
        let processor = self.processor_mut(kind);
        let Some(head) = processor.mark_timed_out() else {
            return Ok(());
        };
        let packet = match kind {
            ProcessorKind::PublishPubAck | ProcessorKind::PublishPubRec => Packet::Publish(Publish {
                dup: true,
                qos: head.qos,
                retain: false,
                topic: head.topic.clone(),
                packet_id: Some(head.packet_id),
                payload: head.payload.clone(),
            }),
            ProcessorKind::PubRelPubComp => Packet::PubRel(PubRel { packet_id: head.packet_id }),
        };
        self.transport.write_async(&packet).await?;
        self.transport.flush().await?;
        if let Some(metrics) = &self.metrics {
            match kind {
                ProcessorKind::PublishPubAck => metrics.qos1_retransmit(),
                ProcessorKind::PublishPubRec | ProcessorKind::PubRelPubComp => metrics.qos2_retransmit(),
            }
        }
        self.arm_ack_timeout(kind);
        Ok(())
    }

    fn processor_mut(&mut self, kind: ProcessorKind) -> &mut AckProcessor {
        match kind {
            ProcessorKind::PublishPubAck => &mut self.publish_puback,
            ProcessorKind::PublishPubRec => &mut self.publish_pubrec,
            ProcessorKind::PubRelPubComp => &mut self.pubrel_pubcomp,
        }
    }

    pub(super) fn processor_ref(&self, kind: ProcessorKind) -> &AckProcessor {
        match kind {
            ProcessorKind::PublishPubAck => &self.publish_puback,
            ProcessorKind::PublishPubRec => &self.publish_pubrec,
            ProcessorKind::PubRelPubComp => &self.pubrel_pubcomp,
        }
    }

    /// Arm a timer tied to the processor's current generation (spec §4.6),
    /// so a match or abort before it fires leaves it a no-op instead of
    /// retransmitting whatever unrelated record is then at the head.
    fn arm_ack_timeout(&self, kind: ProcessorKind) {
        if !self.config.device_receive_ack_can_timeout {
            return;
        }
        let timeout = self.config.device_receive_ack_timeout;
        let generation = self.processor_ref(kind).generation();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events_tx.send(super::Event::Tick(Tick::AckTimeout(kind, generation)));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_derivation_is_stable_across_calls() {
        assert_eq!(derive_qos2_packet_id(42), derive_qos2_packet_id(42));
        assert_ne!(derive_qos2_packet_id(42), derive_qos2_packet_id(43));
    }
}
