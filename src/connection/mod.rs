//! The per-connection state machine (spec §2, §4, §5)
//!
//! One [`Connection`] owns one MQTT client's full lifecycle on a single
//! cooperative task: every handler entry point — packet arrival, upstream
//! message arrival, scheduled tick, transport error — is drained off one
//! `mpsc` event channel and handled to completion before the next is
//! taken, so no lock is needed around session state, queues, or processors
//! (spec §5 "scheduling model"). Asynchronous work (store I/O, upstream
//! sends, transport writes) is simply `await`ed inline; because only one
//! event is ever in flight, that `await` cannot race another event's
//! mutation of the same state.

pub mod ack_processor;
mod connect;
mod flow_control;
mod inbound;
mod outbound;
mod shutdown;
mod subscribe;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use crate::bridge::{MessagingBridge, SendingClient, UpstreamMessage};
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::metrics::Metrics;
use crate::protocol::{Packet, QoS, Will};
use crate::qos2::Qos2Store;
use crate::session::{Session, SessionStore};
use crate::transport::Transport;

use ack_processor::{AckProcessor, ProcessorKind};
use inbound::InboundPublishProcessor;

/// Mutually exclusive lifecycle phases (spec §4.2, §9 "state-flag bit set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    WaitingForConnect,
    ProcessingConnect,
    Connected,
}

/// Orthogonal modifiers layered on top of `Phase`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Flags {
    pub changing_subscriptions: bool,
    pub read_throttled: bool,
    pub closed: bool,
}

/// Events the executor drains off the single per-connection channel
/// (spec §9 design note).
pub(crate) enum Event {
    Inbound(Packet),
    Upstream(UpstreamMessage),
    InboundPublishAcked(inbound::PublishOutcome),
    Tick(Tick),
    TransportError(AdapterError),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Tick {
    ConnectArrival,
    KeepAlive,
    /// The `u64` is the processor's generation at arm time (spec §4.6
    /// "cancel its timer"); a mismatch at fire time means the guarded
    /// record already got an ack or was dropped, so the timer is a no-op.
    AckTimeout(ProcessorKind, u64),
}

/// The per-connection state machine.
pub struct Connection<T: Transport> {
    transport: T,
    remote_address: SocketAddr,

    auth: Arc<dyn AuthProvider>,
    bridge: Arc<dyn MessagingBridge>,
    session_store: Arc<dyn SessionStore>,
    qos2_store: Arc<dyn Qos2Store>,
    metrics: Option<Arc<dyn Metrics>>,
    config: AdapterConfig,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,

    pub(crate) phase: Phase,
    pub(crate) flags: Flags,
    identity: Option<String>,
    session: Option<Session>,
    will: Option<Will>,
    last_client_activity: Instant,
    keep_alive_timeout: Option<Duration>,

    connect_pending_queue: VecDeque<Packet>,
    subscription_change_queue: VecDeque<Packet>,

    publish_puback: AckProcessor,
    publish_pubrec: AckProcessor,
    pubrel_pubcomp: AckProcessor,

    inbound_processors: HashMap<usize, InboundPublishProcessor>,

    next_packet_id: u16,
    server_max_qos: QoS,
}

impl<T: Transport + 'static> Connection<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: T,
        remote_address: SocketAddr,
        auth: Arc<dyn AuthProvider>,
        bridge: Arc<dyn MessagingBridge>,
        session_store: Arc<dyn SessionStore>,
        qos2_store: Arc<dyn Qos2Store>,
        metrics: Option<Arc<dyn Metrics>>,
        config: AdapterConfig,
        server_max_qos: QoS,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let abort_on_out_of_order = config.abort_on_out_of_order_puback;
        Connection {
            transport,
            remote_address,
            auth,
            bridge,
            session_store,
            qos2_store,
            metrics,
            config,
            events_tx,
            events_rx,
            phase: Phase::WaitingForConnect,
            flags: Flags::default(),
            identity: None,
            session: None,
            will: None,
            last_client_activity: Instant::now(),
            keep_alive_timeout: None,
            connect_pending_queue: VecDeque::new(),
            subscription_change_queue: VecDeque::new(),
            publish_puback: AckProcessor::new(ProcessorKind::PublishPubAck, abort_on_out_of_order),
            publish_pubrec: AckProcessor::new(ProcessorKind::PublishPubRec, abort_on_out_of_order),
            pubrel_pubcomp: AckProcessor::new(ProcessorKind::PubRelPubComp, abort_on_out_of_order),
            inbound_processors: HashMap::new(),
            next_packet_id: 1,
            server_max_qos,
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        id
    }

    fn outbound_backlog(&self) -> usize {
        self.publish_puback.backlog() + self.publish_pubrec.backlog() + self.pubrel_pubcomp.backlog()
    }

    fn read_permitted(&self) -> bool {
        flow_control::read_permitted(
            self.outbound_backlog(),
            self.config.max_pending_inbound_acknowledgements,
            self.inbound_processors.values().map(|p| (p.backlog(), p.max_pending_messages())),
        )
    }

    /// Drive the connection to completion: run until the transport closes,
    /// the keep-alive/connect timer fires, or an unrecoverable error is
    /// funneled to shutdown.
    pub async fn run(&mut self) {
        if let Some(timeout) = self.config.connect_arrival_timeout {
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Event::Tick(Tick::ConnectArrival));
            });
        }

        loop {
            if self.flags.closed {
                return;
            }

            self.flags.read_throttled = !self.read_permitted();

            tokio::select! {
                biased;

                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch_event(event).await,
                        None => return,
                    }
                }

                read_result = self.transport.read(), if !self.flags.read_throttled && !self.flags.closed => {
                    match read_result {
                        Ok(Some(packet)) => self.classify_and_dispatch(packet).await,
                        Ok(None) => {
                            debug!("transport reached end of stream");
                            self.shutdown(None).await;
                        }
                        Err(e) => {
                            self.shutdown_on_error("transport.read", e).await;
                        }
                    }
                }

                _ = self.keep_alive_sleep() => {
                    self.on_keep_alive_tick().await;
                }
            }
        }
    }

    async fn keep_alive_sleep(&self) {
        match self.keep_alive_timeout {
            Some(timeout) if self.phase == Phase::Connected => {
                let elapsed = self.last_client_activity.elapsed();
                let remaining = timeout.saturating_sub(elapsed);
                tokio::time::sleep(remaining).await;
            }
            _ => std::future::pending::<()>().await,
        }
    }

    async fn on_keep_alive_tick(&mut self) {
        let elapsed = self.last_client_activity.elapsed();
        match self.keep_alive_timeout {
            Some(timeout) if elapsed > timeout => {
                self.shutdown_on_error("keep_alive", AdapterError::KeepAliveTimedOut).await;
            }
            _ => {}
        }
    }

    async fn dispatch_event(&mut self, event: Event) {
        match event {
            Event::Inbound(packet) => self.classify_and_dispatch(packet).await,
            Event::Upstream(message) => {
                if let Err(e) = self.handle_upstream_message(message).await {
                    self.shutdown_on_receive_error("bridge.upstream", e).await;
                }
            }
            Event::InboundPublishAcked(outcome) => {
                if let Err(e) = self.complete_inbound_publish(outcome).await {
                    self.shutdown_on_error("inbound_publish.complete", e).await;
                }
            }
            Event::Tick(Tick::ConnectArrival) => {
                if self.phase == Phase::WaitingForConnect {
                    self.shutdown_on_error("connect.arrival_timeout", AdapterError::ConnectionTimedOut)
                        .await;
                }
            }
            Event::Tick(Tick::KeepAlive) => self.on_keep_alive_tick().await,
            Event::Tick(Tick::AckTimeout(kind, generation)) => self.on_ack_timeout(kind, generation).await,
            Event::TransportError(e) => self.shutdown_on_error("transport", e).await,
            Event::Shutdown => self.shutdown(None).await,
        }
    }

    /// Packet Classifier / Dispatch (spec §4.1).
    async fn classify_and_dispatch(&mut self, packet: Packet) {
        self.last_client_activity = Instant::now();

        match (self.phase, &packet) {
            (Phase::Connected, _) | (_, Packet::Connect(_)) => {}
            (Phase::ProcessingConnect, _) => {
                self.connect_pending_queue.push_back(packet);
                return;
            }
            (Phase::WaitingForConnect, _) => {
                self.shutdown_on_error("classifier", AdapterError::ConnectExpected).await;
                return;
            }
        }

        if let Err(e) = self.dispatch(packet).await {
            self.shutdown_on_error("dispatch", e).await;
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<(), AdapterError> {
        match packet {
            Packet::Connect(connect) => self.handle_connect(*connect).await,
            Packet::Publish(publish) => self.handle_inbound_publish(publish).await,
            Packet::PubAck(ack) => self.handle_puback(ack).await,
            Packet::PubRec(rec) => self.handle_pubrec(rec).await,
            Packet::PubRel(rel) => self.handle_pubrel(rel).await,
            Packet::PubComp(comp) => self.handle_pubcomp(comp).await,
            Packet::Subscribe(_) | Packet::Unsubscribe(_) => self.handle_subscription_change(packet).await,
            Packet::PingReq => {
                self.transport.write_async(&Packet::PingResp).await?;
                self.transport.flush().await
            }
            Packet::Disconnect => {
                self.shutdown(None).await;
                Ok(())
            }
            Packet::ConnAck(_) | Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => {
                warn!("unexpected server-originated packet type from client");
                Ok(())
            }
        }
    }

    async fn on_ack_timeout(&mut self, kind: ProcessorKind, generation: u64) {
        if self.flags.closed {
            return;
        }
        if self.processor_ref(kind).generation() != generation {
            return;
        }
        let result = self.retransmit_head(kind).await;
        if let Err(e) = result {
            self.shutdown_on_error("ack_timeout", e).await;
        }
    }
}

impl<T: Transport + 'static> Connection<T> {
    /// A handle upstream collaborators can use to post events back onto
    /// this connection's executor, per spec §9's back-reference design note.
    pub(crate) fn event_handle(&self) -> mpsc::UnboundedSender<Event> {
        self.events_tx.clone()
    }
}
