//! The connection actor: exclusive owner of the one transport handle.
//!
//! All writes, the outbound queue, the correlator map, and the heartbeat
//! timer live inside a single task whose `select!` loop is the session's
//! event loop. The public handle talks to it over a command channel, so one
//! frame is written at a time and state needs no locking.

use std::future;

use futures_util::{SinkExt, StreamExt};
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use super::correlator::{Correlator, ReplySender};
use super::dispatcher::{Dispatcher, SessionCallbacks};
use super::heartbeat::Heartbeat;
use super::queue::OutboundQueue;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{Envelope, MessageBody};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the single transport owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Point-in-time snapshot of the session's connection bookkeeping.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_connected_at: Option<OffsetDateTime>,
}

pub(crate) enum Command {
    Connect {
        session_id: String,
        callbacks: SessionCallbacks,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        body: MessageBody,
        correlate: Option<ReplySender>,
        reply: oneshot::Sender<Result<Uuid, SessionError>>,
    },
    AbortRequest {
        id: Uuid,
    },
    UpdateCallbacks {
        callbacks: SessionCallbacks,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

enum Internal {
    Opened {
        token: u64,
        result: Result<Box<WsStream>, SessionError>,
    },
    ReconnectDue {
        token: u64,
    },
}

pub(crate) struct Connection {
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state: ConnectionState,
    session_id: Option<String>,
    socket: Option<WsStream>,
    queue: OutboundQueue,
    correlator: Correlator,
    dispatcher: Dispatcher,
    heartbeat: Heartbeat,
    reconnect_attempts: u32,
    unanswered_pings: u32,
    last_connected_at: Option<OffsetDateTime>,
    connect_waiter: Option<oneshot::Sender<Result<(), SessionError>>>,
    open_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    // Bumped whenever in-flight opens or timers become stale; their
    // completions carry the token they were started under.
    epoch: u64,
}

impl Connection {
    pub(crate) fn spawn(config: SessionConfig) -> mpsc::UnboundedSender<Command> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let connection = Connection {
            heartbeat: Heartbeat::new(config.heartbeat_interval),
            queue: OutboundQueue::new(config.max_queued),
            config,
            commands: command_rx,
            internal_tx,
            internal_rx,
            state: ConnectionState::Disconnected,
            session_id: None,
            socket: None,
            correlator: Correlator::new(),
            dispatcher: Dispatcher::default(),
            reconnect_attempts: 0,
            unanswered_pings: 0,
            last_connected_at: None,
            connect_waiter: None,
            open_task: None,
            reconnect_timer: None,
            epoch: 0,
        };
        tokio::spawn(connection.run());
        command_tx
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                maybe_command = self.commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone; close out and stop.
                    None => break,
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event).await,
                frame = next_frame(&mut self.socket) => self.handle_frame(frame).await,
                _ = self.heartbeat.tick() => self.send_heartbeat().await,
            }
        }
        self.shut_down().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                session_id,
                callbacks,
                reply,
            } => self.handle_connect(session_id, callbacks, reply).await,
            Command::Disconnect { reply } => {
                self.shut_down().await;
                let _ = reply.send(());
            }
            Command::Send {
                body,
                correlate,
                reply,
            } => self.handle_send(body, correlate, reply).await,
            Command::AbortRequest { id } => {
                if self.correlator.abort(id) {
                    tracing::debug!(target = "session", request = %id, "request timed out");
                }
            }
            Command::UpdateCallbacks { callbacks, reply } => {
                self.dispatcher.replace(callbacks);
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    state: self.state,
                    reconnect_attempts: self.reconnect_attempts,
                    last_connected_at: self.last_connected_at,
                });
            }
        }
    }

    async fn handle_connect(
        &mut self,
        session_id: String,
        callbacks: SessionCallbacks,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        match self.state {
            ConnectionState::Connected if self.session_id.as_deref() == Some(&session_id) => {
                self.dispatcher.replace(callbacks);
                let _ = reply.send(Ok(()));
                return;
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Err(SessionError::AlreadyConnecting));
                return;
            }
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                let same_session = self.session_id.as_deref() == Some(session_id.as_str());
                // A session never holds two transports: whatever is live or
                // being retried is closed before the new open starts.
                self.epoch += 1;
                self.abort_tasks();
                self.heartbeat.stop();
                if let Some(mut socket) = self.socket.take() {
                    let _ = socket.close(None).await;
                }
                if !same_session {
                    // Switching identity abandons the old session's traffic.
                    self.correlator.sweep();
                    self.queue.clear();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }

        self.dispatcher.replace(callbacks);
        self.session_id = Some(session_id);
        self.reconnect_attempts = 0;
        self.connect_waiter = Some(reply);
        self.start_open();
    }

    async fn handle_send(
        &mut self,
        body: MessageBody,
        correlate: Option<ReplySender>,
        reply: oneshot::Sender<Result<Uuid, SessionError>>,
    ) {
        let envelope = Envelope::new(self.session_id.clone().unwrap_or_default(), body);
        let id = envelope.id;
        if let Some(sender) = correlate {
            // Registered before transmission so a fast reply cannot race
            // the map.
            self.correlator
                .register(id, envelope.body.message_type(), sender);
        }

        if self.state == ConnectionState::Connected {
            match self.write(envelope.clone()).await {
                Ok(()) => {
                    let _ = reply.send(Ok(id));
                }
                Err(err) => {
                    // The frame never left; keep it for replay after the
                    // reconnect so it is transmitted exactly once.
                    self.queue.push_front(envelope);
                    let _ = reply.send(Ok(id));
                    self.socket_lost(err).await;
                }
            }
        } else {
            match self.queue.push(envelope) {
                Ok(()) => {
                    let _ = reply.send(Ok(id));
                }
                Err(err) => {
                    self.correlator.abort(id);
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    fn start_open(&mut self) {
        let session_id = match self.session_id.clone() {
            Some(id) => id,
            None => return,
        };
        let url = match self.config.endpoint(&session_id) {
            Ok(url) => url,
            Err(err) => {
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.fail(err);
                return;
            }
        };
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(target = "session", url = %url, "opening transport");

        let token = self.epoch;
        let deadline = self.config.connect_timeout;
        let events = self.internal_tx.clone();
        self.open_task = Some(tokio::spawn(async move {
            let result = match timeout(deadline, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => Ok(Box::new(stream)),
                Ok(Err(err)) => Err(SessionError::Transport(err.to_string())),
                Err(_) => Err(SessionError::ConnectionTimeout),
            };
            let _ = events.send(Internal::Opened { token, result });
        }));
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened { token, result } => {
                if token != self.epoch {
                    // A disconnect or session switch happened while this
                    // open was in flight.
                    if let Ok(mut stream) = result {
                        tokio::spawn(async move {
                            let _ = stream.close(None).await;
                        });
                    }
                    return;
                }
                self.open_task = None;
                match result {
                    Ok(stream) => self.enter_connected(*stream).await,
                    Err(err) => self.open_failed(err).await,
                }
            }
            Internal::ReconnectDue { token } => {
                if token != self.epoch {
                    return;
                }
                self.reconnect_timer = None;
                self.start_open();
            }
        }
    }

    async fn enter_connected(&mut self, stream: WsStream) {
        self.socket = Some(stream);
        self.reconnect_attempts = 0;
        self.unanswered_pings = 0;
        self.last_connected_at = Some(OffsetDateTime::now_utc());
        self.heartbeat.start();
        self.set_state(ConnectionState::Connected);
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Ok(()));
        }
        tracing::info!(
            target = "session",
            session = self.session_id.as_deref().unwrap_or(""),
            "connected"
        );
        self.drain_queue().await;
    }

    async fn open_failed(&mut self, err: SessionError) {
        if let Some(waiter) = self.connect_waiter.take() {
            // Caller-initiated connect: the outcome belongs to the caller,
            // there is no automatic retry from here.
            let _ = waiter.send(Err(err.clone()));
            self.fail(err);
            return;
        }
        self.schedule_reconnect(err);
    }

    async fn drain_queue(&mut self) {
        if self.queue.len() > 0 {
            tracing::debug!(
                target = "session",
                count = self.queue.len(),
                "flushing outbound queue"
            );
        }
        while let Some(envelope) = self.queue.pop() {
            if let Err(err) = self.write(envelope.clone()).await {
                self.queue.push_front(envelope);
                self.socket_lost(err).await;
                return;
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        if self.unanswered_pings > 0 {
            tracing::debug!(
                target = "session",
                outstanding = self.unanswered_pings,
                "previous liveness ping unanswered"
            );
        }
        self.unanswered_pings += 1;
        let envelope = Envelope::new(
            self.session_id.clone().unwrap_or_default(),
            MessageBody::Ping,
        );
        if let Err(err) = self.write(envelope).await {
            self.socket_lost(err).await;
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_inbound(&text).await,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => self.handle_inbound(&text).await,
                Err(_) => {
                    tracing::warn!(target = "session", "discarding non-utf8 binary frame");
                }
            },
            Some(Ok(Message::Close(_))) => {
                tracing::debug!(target = "session", "peer closed the transport");
                self.socket_lost(SessionError::ConnectionClosed).await;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                match &err {
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                        tracing::debug!(target = "session", "transport closed: {err}");
                    }
                    _ => {
                        tracing::warn!(target = "session", "transport error: {err}");
                    }
                }
                self.socket_lost(SessionError::Transport(err.to_string()))
                    .await;
            }
            None => {
                self.socket_lost(SessionError::ConnectionClosed).await;
            }
        }
    }

    async fn handle_inbound(&mut self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(target = "session", "unparseable frame: {err}");
                return;
            }
        };
        tracing::trace!(
            target = "session",
            message_type = envelope.body.message_type(),
            id = %envelope.id,
            "inbound"
        );

        // Peer keepalives are answered transparently, never surfaced.
        if matches!(envelope.body, MessageBody::Keepalive) {
            let reply = Envelope::reply_to(&envelope, MessageBody::KeepaliveReply);
            if let Err(err) = self.write(reply).await {
                self.socket_lost(err).await;
            }
            return;
        }

        // Keepalive replies acknowledge liveness pings. A correlated one
        // settles a caller's `ping()`; either way the envelope itself stays
        // invisible to application callbacks.
        if matches!(envelope.body, MessageBody::KeepaliveReply) {
            self.unanswered_pings = 0;
            if let Some(request_id) = envelope.request_id {
                if !self
                    .correlator
                    .settle(request_id, Ok(MessageBody::KeepaliveReply))
                {
                    tracing::trace!(target = "session", "unsolicited keepalive reply");
                }
            }
            return;
        }

        if let Some(request_id) = envelope.request_id {
            if envelope.body.is_terminal_reply() {
                let result = match envelope.body.as_error() {
                    Some(info) => Err(SessionError::Server {
                        message: info.message.clone(),
                        code: info.code.clone(),
                    }),
                    None => Ok(envelope.body.clone()),
                };
                if self.correlator.settle(request_id, result) {
                    self.dispatcher.observe(&envelope);
                } else {
                    tracing::debug!(
                        target = "session",
                        request = %request_id,
                        "dropping orphaned reply"
                    );
                }
                return;
            }
        }

        self.dispatcher.dispatch(&envelope);
    }

    async fn socket_lost(&mut self, cause: SessionError) {
        if self.socket.is_none() && self.state != ConnectionState::Connected {
            return;
        }
        self.socket = None;
        self.heartbeat.stop();
        self.schedule_reconnect(cause);
    }

    fn schedule_reconnect(&mut self, cause: SessionError) {
        self.dispatcher.connection_error(cause);
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            self.fail(SessionError::ReconnectExhausted);
            return;
        }
        let delay = self.config.reconnect_delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        self.set_state(ConnectionState::Reconnecting);
        tracing::info!(
            target = "session",
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let token = self.epoch;
        let events = self.internal_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(Internal::ReconnectDue { token });
        }));
    }

    /// Hard failure: no further automatic retries, all outstanding work is
    /// settled. Only a fresh `connect()` leaves this state.
    fn fail(&mut self, error: SessionError) {
        self.epoch += 1;
        self.abort_tasks();
        self.heartbeat.stop();
        self.socket = None;
        self.correlator.sweep();
        self.queue.clear();
        self.set_state(ConnectionState::Failed);
        self.dispatcher.connection_error(error);
    }

    /// Explicit disconnect: timers cancelled, queue cleared, every pending
    /// request rejected, transport closed with a normal-closure signal.
    async fn shut_down(&mut self) {
        self.epoch += 1;
        self.abort_tasks();
        self.heartbeat.stop();
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Err(SessionError::ConnectionClosed));
        }
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
        self.correlator.sweep();
        self.queue.clear();
        self.session_id = None;
        self.reconnect_attempts = 0;
        self.unanswered_pings = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            target = "session",
            from = ?self.state,
            to = ?next,
            "state transition"
        );
        self.state = next;
        self.dispatcher
            .connection_changed(next == ConnectionState::Connected);
    }

    /// The single write point. Every frame leaving the session passes
    /// through here, stamped with the live session id.
    async fn write(&mut self, mut envelope: Envelope) -> Result<(), SessionError> {
        if let Some(session_id) = &self.session_id {
            envelope.session_id = session_id.clone();
        }
        let socket = self
            .socket
            .as_mut()
            .ok_or(SessionError::ConnectionClosed)?;
        let text = serde_json::to_string(&envelope)
            .map_err(|err| SessionError::Protocol(err.to_string()))?;
        socket
            .send(Message::Text(text))
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}
