//! Request/Ack Processor (spec §4.6)
//!
//! One instance each governs PUBLISH→PUBACK, PUBLISH→PUBREC, and
//! PUBREL→PUBCOMP. The processor itself does no I/O — the caller writes the
//! packet and then calls [`AckProcessor::enqueue`], keeping the borrow on
//! the transport short-lived. What the processor owns is strictly the
//! bookkeeping spec §4.6 describes: the in-order pending-ack queue,
//! retransmission state, and the quiescing `Complete()` contract.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::bridge::FeedbackChannel;
use crate::error::AdapterError;
use crate::protocol::QoS;

/// A pending-ack record (spec §3).
pub struct PendingAckRecord {
    pub sequence_number: u64,
    pub packet_id: u16,
    pub qos: QoS,
    pub start: Instant,
    pub feedback: Arc<dyn FeedbackChannel>,
    pub topic: Arc<str>,
    pub payload: Bytes,
}

/// Outcome of posting an ack against the processor.
pub enum PostResult {
    /// The head record matched; here it is, ready for the caller's
    /// completion action.
    Matched(PendingAckRecord),
    /// The ack matched a record further back in the queue; the skipped
    /// records were dropped and their feedback channels `Abandon`ed
    /// (spec §9 open question, resolved as skip-and-abandon).
    MatchedAfterSkip(PendingAckRecord, Vec<PendingAckRecord>),
    /// No record in the queue matched this packet id.
    NoMatch,
}

/// One of the three instances named in spec §4.6, used for logging and the
/// shutdown report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    PublishPubAck,
    PublishPubRec,
    PubRelPubComp,
}

pub struct AckProcessor {
    pub kind: ProcessorKind,
    queue: VecDeque<PendingAckRecord>,
    abort_on_out_of_order: bool,
    retransmitting: bool,
    completing: bool,
    /// Bumped every time the head record changes identity (a new record
    /// becomes head, the head is matched and popped, or the queue is
    /// aborted). A timer armed for one generation is a no-op if it fires
    /// after the generation has moved on — the record it was guarding
    /// already got an ack or was dropped.
    generation: u64,
}

impl AckProcessor {
    pub fn new(kind: ProcessorKind, abort_on_out_of_order: bool) -> Self {
        AckProcessor {
            kind,
            queue: VecDeque::new(),
            abort_on_out_of_order,
            retransmitting: false,
            completing: false,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// `SendRequestAsync` bookkeeping half: enqueue a record after the
    /// caller has written its packet. Fails if the processor is quiescing.
    pub fn enqueue(&mut self, record: PendingAckRecord) -> Result<(), AdapterError> {
        if self.completing {
            return Err(AdapterError::Closed);
        }
        let was_empty = self.queue.is_empty();
        self.queue.push_back(record);
        if was_empty {
            self.bump_generation();
        }
        Ok(())
    }

    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    pub fn head(&self) -> Option<&PendingAckRecord> {
        self.queue.front()
    }

    pub fn is_retransmitting(&self) -> bool {
        self.retransmitting
    }

    /// `Post(ack)`: match the acked packet id against the queue.
    pub fn post(&mut self, packet_id: u16) -> Result<PostResult, AdapterError> {
        match self.queue.front() {
            Some(head) if head.packet_id == packet_id => {
                self.retransmitting = false;
                let matched = self.queue.pop_front().unwrap();
                self.bump_generation();
                Ok(PostResult::Matched(matched))
            }
            Some(_) => {
                if self.abort_on_out_of_order {
                    return Err(AdapterError::OutOfOrderAck);
                }
                let position = self.queue.iter().position(|r| r.packet_id == packet_id);
                match position {
                    Some(idx) => {
                        let skipped: Vec<_> = self.queue.drain(0..idx).collect();
                        self.retransmitting = false;
                        let matched = self.queue.pop_front().unwrap();
                        self.bump_generation();
                        Ok(PostResult::MatchedAfterSkip(matched, skipped))
                    }
                    None => Ok(PostResult::NoMatch),
                }
            }
            None => Ok(PostResult::NoMatch),
        }
    }

    /// Ack timeout fired: the head record needs a `RetransmitAsync`.
    pub fn mark_timed_out(&mut self) -> Option<&PendingAckRecord> {
        self.retransmitting = true;
        self.queue.front()
    }

    /// The head record's sequence number, used by the retransmission-path
    /// check in §4.5 to recognize a redelivered upstream message.
    pub fn head_sequence_number(&self) -> Option<u64> {
        self.queue.front().map(|r| r.sequence_number)
    }

    /// "Reset the pending record's message reference" (spec §4.5
    /// retransmission path): the head record survives reconnect, but its
    /// feedback handle and payload came from a new upstream delivery.
    pub fn replace_head_message(&mut self, topic: Arc<str>, payload: Bytes, feedback: Arc<dyn FeedbackChannel>) {
        if let Some(head) = self.queue.front_mut() {
            head.topic = topic;
            head.payload = payload;
            head.feedback = feedback;
        }
    }

    /// `Abort()`: fail every outstanding record, `Abandon`ing its feedback
    /// channel so the upstream bridge redelivers.
    pub async fn abort(&mut self) {
        self.completing = true;
        for record in self.queue.drain(..) {
            let _ = record.feedback.abandon_async().await;
        }
        self.retransmitting = false;
        self.bump_generation();
    }

    /// `Complete()`: stop accepting new sends. Returns `true` once the
    /// queue has fully drained.
    pub fn complete(&mut self) -> bool {
        self.completing = true;
        self.queue.is_empty()
    }
}
