//! # Session Lifecycle
//!
//! One task owns the session: its state, the active stream, outstanding
//! requests, reconnect bookkeeping and stats. Callers talk to it through a
//! cloneable [`SessionHandle`] and observe it through [`SessionEvent`]s.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──open──▶ HandshakePending ──confirmed──▶ Ready
//!       ▲                       │                      │                         │
//!       │                  open failed        rejected / timed out         connection lost
//!       │                       ▼                      ▼                         │
//!       │                     Error ◀──────────────────┘                         │
//!       └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in the task awaits the network or the media transport. Socket
//! opens and media calls run elsewhere and report back over an internal
//! channel, so inbound frames keep flowing while an offer is generated.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sutantra_common::models::{StreamDescriptor, StreamQuality};
use sutantra_common::protocol::{
    ClientMessage, CreateStreamPayload, JoinStreamPayload, NodeMessage, Signal, SignalKind,
    StreamRefPayload, StreamResponsePayload,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::error::{RequestKind, Result, SessionError};
use crate::handshake::{Handshake, HandshakeOutcome};
use crate::media::{self, MediaCommand, MediaTransport};
use crate::pending::{PendingRequest, PendingRequests, Reply};
use crate::router::{self, Inbound};
use crate::session::{ActiveStream, Direction, Session, SessionSnapshot, SessionState};
use crate::stats::{StatsAggregator, StatsSummary, TransportSample};
use crate::supervisor::{RetryDecision, Supervisor};
use crate::transport::{self, CloseReason, Connection, TransportEvent};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Everything a caller can observe without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    HandshakeCompleted(Session),
    ActiveStreamChanged(Option<ActiveStream>),
    StreamListUpdated(Vec<StreamDescriptor>),
    StatsUpdated(StatsSummary),
    /// An `error` message from the node.
    RemoteError(String),
    /// A frame that could not be decoded. The connection stays up.
    ProtocolError(String),
    Reconnecting { attempt: u32 },
    GaveUp,
}

enum Command {
    Connect(oneshot::Sender<Result<Session>>),
    Disconnect(oneshot::Sender<()>),
    CreateStream {
        payload: CreateStreamPayload,
        reply: oneshot::Sender<Result<String>>,
    },
    StopStream(oneshot::Sender<Result<()>>),
    JoinStream {
        stream_id: String,
        reply: oneshot::Sender<Result<String>>,
    },
    LeaveStream(oneshot::Sender<Result<()>>),
    RequestStreamList(oneshot::Sender<Result<Vec<StreamDescriptor>>>),
    Relay {
        kind: SignalKind,
        payload: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Results of work the session task handed off.
enum Internal {
    Opened {
        cycle: u64,
        result: Result<Connection>,
    },
    OfferReady {
        token: u64,
        result: anyhow::Result<Value>,
    },
    RemoteOfferHandled {
        stream_id: String,
        result: anyhow::Result<Option<Value>>,
    },
    Sampled(Option<TransportSample>),
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cloneable handle to a running session. The session task stops when the
/// last handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Start a session task on the current Tokio runtime. Nothing connects
    /// until [`SessionHandle::connect`] is called.
    pub fn spawn(config: SessionConfig, media: Arc<dyn MediaTransport>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (actor, internal_rx) = SessionActor::new(config, media::spawn_worker(media), events.clone());
        tokio::spawn(actor.run(cmd_rx, internal_rx));
        Self {
            commands: cmd_tx,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Open the transport and perform the handshake. Resolves once the
    /// session is `Ready`, or with the first failure of this attempt.
    pub async fn connect(&self) -> Result<Session> {
        self.call(Command::Connect).await?
    }

    /// Close the session and stop reconnecting. Idempotent.
    pub async fn disconnect(&self) {
        let _ = self.call(Command::Disconnect).await;
    }

    /// Publish a new stream. Resolves with the node-assigned stream id.
    pub async fn create_stream(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        quality: StreamQuality,
    ) -> Result<String> {
        let payload = CreateStreamPayload {
            title: title.into(),
            description: description.into(),
            quality,
        };
        self.call(|reply| Command::CreateStream { payload, reply })
            .await?
    }

    pub async fn stop_stream(&self) -> Result<()> {
        self.call(Command::StopStream).await?
    }

    /// Watch an existing stream. The media transport supplies the offer.
    pub async fn join_stream(&self, stream_id: impl Into<String>) -> Result<String> {
        let stream_id = stream_id.into();
        self.call(|reply| Command::JoinStream { stream_id, reply })
            .await?
    }

    pub async fn leave_stream(&self) -> Result<()> {
        self.call(Command::LeaveStream).await?
    }

    pub async fn request_stream_list(&self) -> Result<Vec<StreamDescriptor>> {
        self.call(Command::RequestStreamList).await?
    }

    pub async fn relay_ice_candidate(&self, candidate: Value) -> Result<()> {
        self.relay(SignalKind::IceCandidate, candidate).await
    }

    pub async fn relay_offer(&self, offer: Value) -> Result<()> {
        self.relay(SignalKind::Offer, offer).await
    }

    pub async fn relay_answer(&self, answer: Value) -> Result<()> {
        self.relay(SignalKind::Answer, answer).await
    }

    async fn relay(&self, kind: SignalKind, payload: Value) -> Result<()> {
        self.call(|reply| Command::Relay {
            kind,
            payload,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.call(Command::Snapshot).await
    }
}

// ── Session task ────────────────────────────────────────────────────

struct SessionActor {
    config: SessionConfig,
    session: Session,
    /// Id from the last confirmed handshake, offered again on reconnect.
    previous_session_id: Option<String>,
    active: Option<ActiveStream>,
    streams: Vec<StreamDescriptor>,
    pending: PendingRequests,
    handshake: Option<Handshake>,
    supervisor: Supervisor,
    stats: StatsAggregator,
    conn: Option<Connection>,
    /// Bumped per connect cycle; opens from older cycles are discarded.
    cycle: u64,
    opening: bool,
    connect_waiters: Vec<oneshot::Sender<Result<Session>>>,
    /// Bumped per join; offers from older joins are discarded.
    join_token: u64,
    sampling: bool,
    media: mpsc::UnboundedSender<MediaCommand>,
    internal: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<SessionEvent>,
}

async fn next_event(conn: &mut Option<Connection>) -> TransportEvent {
    match conn {
        Some(conn) => conn
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(CloseReason::Remote)),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn ticker(period: Duration, missed: MissedTickBehavior) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(missed);
    interval
}

impl SessionActor {
    fn new(
        config: SessionConfig,
        media: mpsc::UnboundedSender<MediaCommand>,
        events: broadcast::Sender<SessionEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let actor = Self {
            session: Session::new(config.role),
            previous_session_id: None,
            active: None,
            streams: Vec::new(),
            pending: PendingRequests::default(),
            handshake: None,
            supervisor: Supervisor::new(&config.reconnect),
            stats: StatsAggregator::new(config.stats_smoothing),
            conn: None,
            cycle: 0,
            opening: false,
            connect_waiters: Vec::new(),
            join_token: 0,
            sampling: false,
            media,
            internal,
            events,
            config,
        };
        (actor, internal_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut liveness = ticker(self.config.liveness_interval, MissedTickBehavior::Delay);
        let mut sampler = ticker(self.config.stats_interval, MissedTickBehavior::Skip);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(msg) = internal.recv() => self.handle_internal(msg),
                event = next_event(&mut self.conn) => self.handle_transport(event),
                _ = sleep_until(deadline) => self.on_deadline(Instant::now()),
                _ = liveness.tick() => self.on_liveness(),
                _ = sampler.tick() => self.on_sample_tick(),
            }
        }

        self.shutdown();
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending.next_deadline(),
            self.handshake.as_ref().and_then(Handshake::deadline),
            self.supervisor.next_attempt(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state == state {
            return;
        }
        tracing::debug!(from = ?self.session.state, to = ?state, "session state");
        self.session.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        let msg_type = message.msg_type();
        let text = message.to_json()?;
        let Some(conn) = &self.conn else {
            return Err(SessionError::Transport("not connected".into()));
        };
        if !conn.send(text) {
            return Err(SessionError::Transport("connection not open".into()));
        }
        tracing::debug!(msg_type, "frame sent");
        Ok(())
    }

    fn forward<T: Send + 'static>(
        &self,
        rx: oneshot::Receiver<T>,
        wrap: impl FnOnce(T) -> Internal + Send + 'static,
    ) {
        let internal = self.internal.clone();
        tokio::spawn(async move {
            if let Ok(value) = rx.await {
                let _ = internal.send(wrap(value));
            }
        });
    }

    fn track(&mut self, request: PendingRequest) {
        if let Err(request) = self.pending.try_insert(request) {
            let kind = request.kind;
            request.reply.fail(SessionError::RequestAlreadyPending(kind));
        }
    }

    fn fail_pending(&mut self, kind: RequestKind, err: SessionError) {
        if let Some(request) = self.pending.take(kind) {
            tracing::warn!(kind = %kind, error = %err, "request failed");
            request.reply.fail(err);
        }
    }

    fn activate(&mut self, stream_id: String, direction: Direction) {
        self.stats.reset();
        let stream = ActiveStream::new(stream_id, direction);
        tracing::info!(
            stream_id = %stream.stream_id,
            direction = direction.as_str(),
            "stream active"
        );
        self.active = Some(stream.clone());
        self.emit(SessionEvent::ActiveStreamChanged(Some(stream)));
    }

    fn clear_active_stream(&mut self) {
        if let Some(stream) = self.active.take() {
            tracing::info!(stream_id = %stream.stream_id, "stream ended");
            let _ = self.media.send(MediaCommand::Close);
            self.stats.reset();
            self.sampling = false;
            self.emit(SessionEvent::ActiveStreamChanged(None));
        }
    }

    fn is_publishing(&self) -> bool {
        matches!(&self.active, Some(s) if s.direction == Direction::Publishing)
    }

    // ── Connect cycle ───────────────────────────────────────────────

    fn start_cycle(&mut self) {
        self.cycle += 1;
        self.opening = true;
        self.set_state(SessionState::Connecting);

        let url = self.config.node_url.clone();
        let cycle = self.cycle;
        let timeout = self.config.connect_timeout;
        let internal = self.internal.clone();
        tracing::info!(url = %url, cycle, "connecting to node");
        tokio::spawn(async move {
            let result = transport::open(&url, cycle, timeout).await;
            let _ = internal.send(Internal::Opened { cycle, result });
        });
    }

    fn on_opened(&mut self, cycle: u64, result: Result<Connection>) {
        if cycle != self.cycle || !self.opening {
            // Superseded by a disconnect or a newer cycle.
            if let Ok(conn) = result {
                conn.close();
            }
            return;
        }
        self.opening = false;

        match result {
            Ok(conn) => {
                let mut handshake = Handshake::new(self.config.role, self.config.handshake_timeout);
                let request = handshake.make_request(self.previous_session_id.clone(), Instant::now());
                self.conn = Some(conn);
                self.handshake = Some(handshake);
                self.set_state(SessionState::HandshakePending);
                if let Err(e) = self.send(request) {
                    self.connect_failed(e);
                }
            }
            Err(e) => self.connect_failed(e),
        }
    }

    fn on_handshake_confirmed(&mut self, outcome: HandshakeOutcome) {
        self.session.session_id = outcome.session_id.clone();
        self.session.role = outcome.role;
        self.session.node = Some(outcome.node);
        self.previous_session_id = Some(outcome.session_id);
        self.supervisor.on_connected();
        self.set_state(SessionState::Ready);

        tracing::info!(
            session_id = %self.session.session_id,
            role = %self.session.role,
            "session ready"
        );
        self.emit(SessionEvent::HandshakeCompleted(self.session.clone()));
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(self.session.clone()));
        }
    }

    /// A connect cycle failed before reaching `Ready`.
    fn connect_failed(&mut self, err: SessionError) {
        tracing::warn!(url = %self.config.node_url, error = %err, "connect failed");
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        self.handshake = None;
        self.opening = false;
        self.set_state(SessionState::Error);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }

        let now = Instant::now();
        match self.supervisor.on_attempt_failed(now) {
            RetryDecision::Retry { at, attempt } => {
                tracing::info!(
                    attempt,
                    retry_in_ms = at.saturating_duration_since(now).as_millis() as u64,
                    "reconnect scheduled"
                );
                self.emit(SessionEvent::Reconnecting { attempt });
            }
            RetryDecision::GiveUp => {
                tracing::error!(url = %self.config.node_url, "giving up on reconnecting");
                self.emit(SessionEvent::GaveUp);
            }
            RetryDecision::Stop => {}
        }
    }

    fn on_connection_lost(&mut self, reason: CloseReason) {
        let detail = match reason {
            CloseReason::Remote => "closed by node".to_string(),
            CloseReason::Local => "closed locally".to_string(),
            CloseReason::Error(e) => e,
        };
        tracing::warn!(
            session_id = %self.session.session_id,
            reason = %detail,
            "connection lost"
        );

        self.clear_active_stream();
        self.pending
            .fail_all(SessionError::Transport(format!("connection lost: {detail}")));

        if self.session.state == SessionState::Ready {
            self.set_state(SessionState::Disconnected);
            if self.supervisor.on_unexpected_close(Instant::now()).is_some() {
                self.emit(SessionEvent::Reconnecting { attempt: 1 });
            }
        } else {
            self.connect_failed(SessionError::Transport(format!("connection lost: {detail}")));
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::CreateStream { payload, reply } => self.create_stream(payload, reply),
            Command::StopStream(reply) => self.stop_stream(reply),
            Command::JoinStream { stream_id, reply } => self.join_stream(stream_id, reply),
            Command::LeaveStream(reply) => {
                let _ = reply.send(self.leave_stream());
            }
            Command::RequestStreamList(reply) => self.request_stream_list(reply),
            Command::Relay {
                kind,
                payload,
                reply,
            } => {
                let _ = reply.send(self.relay(kind, payload));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Opened { cycle, result } => self.on_opened(cycle, result),
            Internal::OfferReady { token, result } => self.on_offer_ready(token, result),
            Internal::RemoteOfferHandled { stream_id, result } => {
                self.on_remote_offer_handled(stream_id, result)
            }
            Internal::Sampled(sample) => self.on_sampled(sample),
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Closed(reason) => {
                self.conn = None;
                self.on_connection_lost(reason);
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match router::decode(text) {
            Ok(Inbound::Routed { route, message }) => {
                tracing::trace!(route = ?route, "routing message");
                self.dispatch(message);
            }
            Ok(Inbound::Unknown(msg_type)) => {
                tracing::debug!(msg_type = %msg_type, "ignoring unknown message type");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                self.emit(SessionEvent::ProtocolError(e.to_string()));
            }
        }
    }

    fn dispatch(&mut self, message: NodeMessage) {
        match message {
            NodeMessage::HandshakeResponse(resp) => {
                let Some(handshake) = self.handshake.as_mut() else {
                    tracing::warn!("handshake response outside a connect cycle, ignored");
                    return;
                };
                match handshake.handle_response(&resp) {
                    Ok(outcome) => {
                        self.handshake = None;
                        self.on_handshake_confirmed(outcome);
                    }
                    Err(SessionError::Protocol(e)) => {
                        tracing::warn!(error = %e, "unexpected handshake response");
                    }
                    Err(e) => self.connect_failed(e),
                }
            }
            NodeMessage::CreateStreamResponse(resp) => self.on_create_response(resp),
            NodeMessage::StopStreamResponse(resp) => self.on_stop_response(resp),
            NodeMessage::JoinStreamResponse(resp) => self.on_join_response(resp),
            NodeMessage::StreamList(list) => self.on_stream_list(list.streams),
            NodeMessage::Signal(signal) => self.on_remote_signal(signal),
            NodeMessage::StreamStats(stats) => {
                self.stats.apply_remote(&stats.stats);
                self.emit(SessionEvent::StatsUpdated(self.stats.summary().clone()));
            }
            NodeMessage::Error(err) => {
                tracing::warn!(message = %err.message, "node reported an error");
                self.emit(SessionEvent::RemoteError(err.message));
            }
            NodeMessage::Pong(pong) => {
                tracing::trace!(timestamp = ?pong.timestamp, "pong");
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn connect(&mut self, reply: oneshot::Sender<Result<Session>>) {
        match self.session.state {
            SessionState::Ready => {
                let _ = reply.send(Ok(self.session.clone()));
            }
            SessionState::Connecting | SessionState::HandshakePending => {
                self.connect_waiters.push(reply);
            }
            SessionState::Disconnected | SessionState::Error => {
                self.supervisor.arm();
                self.connect_waiters.push(reply);
                self.start_cycle();
            }
        }
    }

    fn disconnect(&mut self) {
        self.supervisor.stop();
        self.cycle += 1;
        self.opening = false;
        self.handshake = None;
        if let Some(conn) = self.conn.take() {
            tracing::info!(session_id = %self.session.session_id, "disconnecting");
            conn.close();
        }

        self.clear_active_stream();
        self.pending
            .fail_all(SessionError::Transport("disconnected".into()));
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Transport("disconnected".into())));
        }

        self.session.session_id.clear();
        self.session.node = None;
        self.session.role = self.config.role;
        self.previous_session_id = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Create and join share one ActiveStream slot, so either one in flight
    /// blocks both.
    fn check_can_start(&self) -> Result<()> {
        if !self.session.is_ready() {
            return Err(SessionError::SessionNotReady);
        }
        if self.active.is_some() {
            return Err(SessionError::StreamAlreadyActive);
        }
        for kind in [RequestKind::CreateStream, RequestKind::JoinStream] {
            if self.pending.contains(kind) {
                return Err(SessionError::RequestAlreadyPending(kind));
            }
        }
        Ok(())
    }

    fn create_stream(&mut self, payload: CreateStreamPayload, reply: oneshot::Sender<Result<String>>) {
        if let Err(e) = self.check_can_start() {
            let _ = reply.send(Err(e));
            return;
        }
        tracing::info!(title = %payload.title, "creating stream");
        if let Err(e) = self.send(ClientMessage::CreateStream(payload)) {
            let _ = reply.send(Err(e));
            return;
        }
        self.track(PendingRequest::new(
            Reply::CreateStream(reply),
            None,
            Instant::now(),
            self.config.request_timeout,
        ));
    }

    fn stop_stream(&mut self, reply: oneshot::Sender<Result<()>>) {
        let stream_id = match &self.active {
            None => {
                tracing::warn!("stopStream with no active stream, ignored");
                let _ = reply.send(Ok(()));
                return;
            }
            Some(s) if s.direction != Direction::Publishing => {
                let _ = reply.send(Err(SessionError::WrongDirection("publishing")));
                return;
            }
            Some(s) => s.stream_id.clone(),
        };
        if self.pending.contains(RequestKind::StopStream) {
            let _ = reply.send(Err(SessionError::RequestAlreadyPending(RequestKind::StopStream)));
            return;
        }
        let message = ClientMessage::StopStream(StreamRefPayload {
            stream_id: stream_id.clone(),
        });
        if let Err(e) = self.send(message) {
            let _ = reply.send(Err(e));
            return;
        }
        self.track(PendingRequest::new(
            Reply::StopStream(reply),
            Some(stream_id),
            Instant::now(),
            self.config.request_timeout,
        ));
    }

    fn join_stream(&mut self, stream_id: String, reply: oneshot::Sender<Result<String>>) {
        if let Err(e) = self.check_can_start() {
            let _ = reply.send(Err(e));
            return;
        }
        tracing::info!(stream_id = %stream_id, "joining stream");

        // Reserve the slot now; the deadline also covers offer generation.
        self.join_token += 1;
        let token = self.join_token;
        self.track(PendingRequest::new(
            Reply::JoinStream(reply),
            Some(stream_id),
            Instant::now(),
            self.config.request_timeout,
        ));

        let (tx, rx) = oneshot::channel();
        if self.media.send(MediaCommand::CreateOffer(tx)).is_err() {
            self.fail_pending(
                RequestKind::JoinStream,
                SessionError::Media("media worker stopped".into()),
            );
            return;
        }
        self.forward(rx, move |result| Internal::OfferReady { token, result });
    }

    fn leave_stream(&mut self) -> Result<()> {
        let stream_id = match &self.active {
            None => {
                tracing::warn!("leaveStream with no active stream, ignored");
                return Ok(());
            }
            Some(s) if s.direction != Direction::Subscribing => {
                return Err(SessionError::WrongDirection("subscribing"));
            }
            Some(s) => s.stream_id.clone(),
        };
        // Best effort: the local side is torn down regardless.
        if let Err(e) = self.send(ClientMessage::LeaveStream(StreamRefPayload { stream_id })) {
            tracing::warn!(error = %e, "leave notice not delivered");
        }
        self.clear_active_stream();
        Ok(())
    }

    fn request_stream_list(&mut self, reply: oneshot::Sender<Result<Vec<StreamDescriptor>>>) {
        if !self.session.is_ready() {
            let _ = reply.send(Err(SessionError::SessionNotReady));
            return;
        }
        if self.pending.contains(RequestKind::StreamListQuery) {
            let _ = reply.send(Err(SessionError::RequestAlreadyPending(
                RequestKind::StreamListQuery,
            )));
            return;
        }
        if let Err(e) = self.send(ClientMessage::RequestStreamList) {
            let _ = reply.send(Err(e));
            return;
        }
        self.track(PendingRequest::new(
            Reply::StreamList(reply),
            None,
            Instant::now(),
            self.config.request_timeout,
        ));
    }

    fn relay(&mut self, kind: SignalKind, payload: Value) -> Result<()> {
        if !self.session.is_ready() {
            return Err(SessionError::SessionNotReady);
        }
        let Some(active) = &self.active else {
            return Err(SessionError::NoActiveStream);
        };
        self.send(ClientMessage::Signal(Signal {
            kind,
            stream_id: Some(active.stream_id.clone()),
            payload,
        }))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            active_stream: self.active.clone(),
            streams: self.streams.clone(),
            stats: self.stats.summary().clone(),
            supervisor: self.supervisor.state(),
            pending: self.pending.kinds(),
        }
    }

    // ── Node messages ───────────────────────────────────────────────

    fn on_create_response(&mut self, resp: StreamResponsePayload) {
        let Some(request) = self.pending.take(RequestKind::CreateStream) else {
            tracing::warn!(stream_id = ?resp.stream_id, "createStreamResponse with nothing pending, dropped");
            return;
        };
        let Reply::CreateStream(reply) = request.reply else {
            return;
        };

        let outcome = if !resp.success {
            Err(SessionError::RemoteRejected(resp.rejection()))
        } else {
            match resp.stream_id {
                Some(id) if !id.is_empty() => {
                    self.activate(id.clone(), Direction::Publishing);
                    Ok(id)
                }
                _ => Err(SessionError::Protocol(
                    "createStreamResponse without stream_id".into(),
                )),
            }
        };
        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "createStream failed");
        }
        let _ = reply.send(outcome);
    }

    fn on_stop_response(&mut self, resp: StreamResponsePayload) {
        if let Some(request) = self.pending.take(RequestKind::StopStream) {
            let Reply::StopStream(reply) = request.reply else {
                return;
            };
            if resp.success {
                if self.is_publishing() {
                    self.clear_active_stream();
                }
                let _ = reply.send(Ok(()));
            } else {
                let err = SessionError::RemoteRejected(resp.rejection());
                tracing::warn!(error = %err, "stopStream failed");
                let _ = reply.send(Err(err));
            }
            return;
        }

        // Unsolicited: the node ended our stream.
        let ended = resp.success
            && match (&self.active, &resp.stream_id) {
                (Some(active), Some(id)) => {
                    active.direction == Direction::Publishing && active.stream_id == *id
                }
                (Some(active), None) => active.direction == Direction::Publishing,
                (None, _) => false,
            };
        if ended {
            tracing::info!("stream stopped by node");
            self.clear_active_stream();
        } else {
            tracing::warn!(stream_id = ?resp.stream_id, "stopStreamResponse with nothing pending, dropped");
        }
    }

    fn on_join_response(&mut self, resp: StreamResponsePayload) {
        let Some(request) = self.pending.take(RequestKind::JoinStream) else {
            tracing::warn!(stream_id = ?resp.stream_id, "joinStreamResponse with nothing pending, dropped");
            return;
        };
        let Reply::JoinStream(reply) = request.reply else {
            return;
        };

        if !resp.success {
            let err = SessionError::RemoteRejected(resp.rejection());
            tracing::warn!(error = %err, "joinStream failed");
            let _ = self.media.send(MediaCommand::Close);
            let _ = reply.send(Err(err));
            return;
        }
        let Some(stream_id) = resp.stream_id.or(request.target) else {
            let _ = reply.send(Err(SessionError::Protocol(
                "joinStreamResponse without stream_id".into(),
            )));
            return;
        };

        self.activate(stream_id.clone(), Direction::Subscribing);
        if let Some(answer) = resp.answer {
            let _ = self.media.send(MediaCommand::RemoteAnswer(answer));
        }
        let _ = reply.send(Ok(stream_id));
    }

    fn on_stream_list(&mut self, streams: Vec<StreamDescriptor>) {
        tracing::debug!(count = streams.len(), "stream list updated");
        self.streams = streams;
        self.emit(SessionEvent::StreamListUpdated(self.streams.clone()));
        if let Some(request) = self.pending.take(RequestKind::StreamListQuery) {
            if let Reply::StreamList(reply) = request.reply {
                let _ = reply.send(Ok(self.streams.clone()));
            }
        }
    }

    fn on_remote_signal(&mut self, signal: Signal) {
        let Some(active) = &self.active else {
            tracing::warn!(kind = signal.kind.wire_type(), "signaling with no active stream, dropped");
            return;
        };
        if let Some(id) = &signal.stream_id {
            if *id != active.stream_id {
                tracing::warn!(
                    kind = signal.kind.wire_type(),
                    stream_id = %id,
                    active = %active.stream_id,
                    "signaling for another stream, dropped"
                );
                return;
            }
        }

        match signal.kind {
            SignalKind::Offer => {
                let stream_id = active.stream_id.clone();
                let (tx, rx) = oneshot::channel();
                let _ = self.media.send(MediaCommand::RemoteOffer {
                    offer: signal.payload,
                    reply: tx,
                });
                self.forward(rx, move |result| Internal::RemoteOfferHandled { stream_id, result });
            }
            SignalKind::Answer => {
                let _ = self.media.send(MediaCommand::RemoteAnswer(signal.payload));
            }
            SignalKind::IceCandidate => {
                let _ = self.media.send(MediaCommand::RemoteIce(signal.payload));
            }
        }
    }

    // ── Internal results ────────────────────────────────────────────

    fn on_offer_ready(&mut self, token: u64, result: anyhow::Result<Value>) {
        let target = self
            .pending
            .get(RequestKind::JoinStream)
            .filter(|_| token == self.join_token && self.session.is_ready())
            .and_then(|p| p.target.clone());
        let Some(stream_id) = target else {
            tracing::debug!("offer for an abandoned join, dropped");
            return;
        };

        match result {
            Ok(offer) => {
                let message = ClientMessage::JoinStream(JoinStreamPayload { stream_id, offer });
                if let Err(e) = self.send(message) {
                    self.fail_pending(RequestKind::JoinStream, e);
                }
            }
            Err(e) => {
                let _ = self.media.send(MediaCommand::Close);
                self.fail_pending(RequestKind::JoinStream, SessionError::Media(e.to_string()));
            }
        }
    }

    fn on_remote_offer_handled(&mut self, stream_id: String, result: anyhow::Result<Option<Value>>) {
        match result {
            Ok(Some(answer)) => {
                if !matches!(&self.active, Some(s) if s.stream_id == stream_id) {
                    tracing::debug!(stream_id = %stream_id, "answer for an ended stream, dropped");
                    return;
                }
                let message = ClientMessage::Signal(Signal {
                    kind: SignalKind::Answer,
                    stream_id: Some(stream_id),
                    payload: answer,
                });
                if let Err(e) = self.send(message) {
                    tracing::warn!(error = %e, "answer not delivered");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "media rejected remote offer"),
        }
    }

    fn on_sampled(&mut self, sample: Option<TransportSample>) {
        self.sampling = false;
        let Some(sample) = sample else {
            return;
        };
        if self.is_publishing() {
            self.stats.record_sample(sample);
            self.emit(SessionEvent::StatsUpdated(self.stats.summary().clone()));
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    fn on_deadline(&mut self, now: Instant) {
        let expired = self.pending.expire(now);
        if expired.contains(&RequestKind::JoinStream) && self.active.is_none() {
            let _ = self.media.send(MediaCommand::Close);
        }

        if let Some(err) = self.handshake.as_mut().and_then(|h| h.check_timeout(now)) {
            self.connect_failed(err);
        }

        if let Some(attempt) = self.supervisor.take_due(now) {
            if self.conn.is_none() && !self.opening {
                tracing::info!(attempt, "reconnecting");
                self.start_cycle();
            }
        }
    }

    fn on_liveness(&mut self) {
        if self.session.state != SessionState::Ready {
            return;
        }
        if !self.conn.as_ref().is_some_and(Connection::is_open) {
            tracing::warn!(session_id = %self.session.session_id, "transport found closed");
            self.conn = None;
            self.on_connection_lost(CloseReason::Error("liveness check failed".into()));
            return;
        }
        if self.config.keepalive {
            if let Err(e) = self.send(ClientMessage::Ping) {
                tracing::warn!(error = %e, "keep-alive not sent");
            }
        }
    }

    fn on_sample_tick(&mut self) {
        if self.sampling || !self.is_publishing() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.media.send(MediaCommand::Sample(tx)).is_ok() {
            self.sampling = true;
            self.forward(rx, Internal::Sampled);
        }
    }

    fn shutdown(&mut self) {
        tracing::debug!("all session handles dropped, stopping");
        self.supervisor.stop();
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        self.clear_active_stream();
        self.pending.fail_all(SessionError::Closed);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Closed));
        }
    }
}
