//! The session object: one logical identity, one transport, and the typed
//! send operations the application calls.
//!
//! A [`SlideSession`] is constructed explicitly by the application's
//! composition root and handed to whoever needs it; cloning the handle
//! shares the same underlying connection actor, and only an explicit
//! [`disconnect`](SlideSession::disconnect) tears the transport down.

mod connection;
mod correlator;
mod dispatcher;
mod heartbeat;
mod queue;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout};
use uuid::Uuid;

pub use connection::{ConnectionState, SessionStatus};
pub use dispatcher::SessionCallbacks;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{
    FileUpload, MessageBody, ProcessingReport, SlideGenerationRequest, UploadReceipt,
};
use connection::{Command, Connection};

/// Handle to one reliable session with the slide processing backend.
#[derive(Clone)]
pub struct SlideSession {
    commands: mpsc::UnboundedSender<Command>,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl SlideSession {
    /// Create the session in the `Disconnected` state. Must be called from
    /// within a tokio runtime; the connection actor is spawned here.
    pub fn new(config: SessionConfig) -> Self {
        let request_timeout = config.request_timeout;
        let upload_timeout = config.upload_timeout;
        let commands = Connection::spawn(config);
        Self {
            commands,
            request_timeout,
            upload_timeout,
        }
    }

    /// Open the transport for `session_id` and install the subscriber set.
    ///
    /// Resolves once the connection is established; rejects with
    /// `ConnectionTimeout`/`Transport` if the open fails, and with
    /// `AlreadyConnecting` if another connect is in flight. Connecting again
    /// with the same session id while connected is an idempotent success.
    pub async fn connect(
        &self,
        session_id: impl Into<String>,
        callbacks: SessionCallbacks,
    ) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                session_id: session_id.into(),
                callbacks,
                reply: reply_tx,
            })
            .map_err(|_| SessionError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| SessionError::ConnectionClosed)?
    }

    /// Close the transport with a normal-closure signal, reject every
    /// pending request with `ConnectionClosed`, and clear the queue.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Replace the subscriber set installed at connect time.
    pub async fn update_callbacks(&self, callbacks: SessionCallbacks) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::UpdateCallbacks {
                callbacks,
                reply: reply_tx,
            })
            .map_err(|_| SessionError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| SessionError::ConnectionClosed)
    }

    pub async fn status(&self) -> SessionStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Status { reply: reply_tx })
            .is_err()
        {
            return SessionStatus {
                state: ConnectionState::Disconnected,
                reconnect_attempts: 0,
                last_connected_at: None,
            };
        }
        reply_rx.await.unwrap_or(SessionStatus {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_connected_at: None,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.status().await.state
    }

    // --- typed send operations ------------------------------------------

    /// Upload a document for parsing. Resolves with the backend's receipt.
    pub async fn upload_file(
        &self,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<UploadReceipt, SessionError> {
        let body = MessageBody::UploadFile(FileUpload {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size: content.len() as u64,
            content,
        });
        match self.request(body, self.upload_timeout).await? {
            MessageBody::UploadSuccess(receipt) => Ok(receipt),
            other => Err(unexpected_reply("upload_file", &other)),
        }
    }

    /// Submit the free-text deck description. Fire-and-forget: resolves
    /// once the message is handed to the transport or queued.
    pub async fn submit_description(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(MessageBody::SubmitDescription { text: text.into() })
            .await
            .map(|_| ())
    }

    /// Select a theme and optional palette. Fire-and-forget.
    pub async fn select_theme(
        &self,
        theme: impl Into<String>,
        palette: Option<String>,
    ) -> Result<(), SessionError> {
        self.send(MessageBody::SelectTheme {
            theme: theme.into(),
            palette,
        })
        .await
        .map(|_| ())
    }

    /// Ask the backend to plan the deck's content. Resolves with the plan
    /// document, which this layer does not interpret.
    pub async fn request_content_plan(
        &self,
        description: impl Into<String>,
        slide_count: Option<u32>,
    ) -> Result<Value, SessionError> {
        let body = MessageBody::RequestContentPlan {
            description: description.into(),
            slide_count,
        };
        match self.request(body, self.request_timeout).await? {
            MessageBody::ContentPlanResponse { plan } => Ok(plan),
            other => Err(unexpected_reply("request_content_plan", &other)),
        }
    }

    /// Ask the backend to research a topic.
    pub async fn request_research(
        &self,
        topic: impl Into<String>,
    ) -> Result<ProcessingReport, SessionError> {
        let body = MessageBody::RequestResearch {
            topic: topic.into(),
        };
        match self.request(body, self.request_timeout).await? {
            MessageBody::ProcessingStatus(report) => Ok(report),
            other => Err(unexpected_reply("request_research", &other)),
        }
    }

    /// Request slide generation with the full builder context. Resolves
    /// with the finished deck; interim started/status traffic arrives
    /// through the event callbacks instead.
    pub async fn request_slide_generation(
        &self,
        request: SlideGenerationRequest,
    ) -> Result<Value, SessionError> {
        let body = MessageBody::RequestSlideGeneration(request);
        match self.request(body, self.request_timeout).await? {
            MessageBody::SlideGenerationComplete { slides } => Ok(slides),
            other => Err(unexpected_reply("request_slide_generation", &other)),
        }
    }

    /// Request a generic processing operation with an option bag.
    pub async fn request_processing(
        &self,
        operation: impl Into<String>,
        options: Value,
    ) -> Result<ProcessingReport, SessionError> {
        let body = MessageBody::RequestProcessing {
            operation: operation.into(),
            options,
        };
        match self.request(body, self.request_timeout).await? {
            MessageBody::ProcessingStatus(report) => Ok(report),
            other => Err(unexpected_reply("request_processing", &other)),
        }
    }

    /// Correlated liveness ping; resolves with the round-trip time.
    pub async fn ping(&self) -> Result<Duration, SessionError> {
        let started = Instant::now();
        match self.request(MessageBody::Ping, self.request_timeout).await? {
            MessageBody::KeepaliveReply => Ok(started.elapsed()),
            other => Err(unexpected_reply("ping", &other)),
        }
    }

    // --- reliability primitives -----------------------------------------

    /// Correlated send: registers the message id with the correlator and
    /// awaits the terminal reply under an independent timeout. On timeout
    /// the entry is removed, and any later reply for this id is orphaned.
    async fn request(
        &self,
        body: MessageBody,
        deadline: Duration,
    ) -> Result<MessageBody, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.dispatch_send(body, Some(reply_tx)).await?;
        match timeout(deadline, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Err(_) => {
                let _ = self.commands.send(Command::AbortRequest { id });
                Err(SessionError::RequestTimeout)
            }
        }
    }

    /// Fire-and-forget send: resolves with the message id once the frame is
    /// transmitted or queued.
    async fn send(&self, body: MessageBody) -> Result<Uuid, SessionError> {
        self.dispatch_send(body, None).await
    }

    async fn dispatch_send(
        &self,
        body: MessageBody,
        correlate: Option<correlator::ReplySender>,
    ) -> Result<Uuid, SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                body,
                correlate,
                reply: ack_tx,
            })
            .map_err(|_| SessionError::ConnectionClosed)?;
        ack_rx.await.map_err(|_| SessionError::ConnectionClosed)?
    }
}

fn unexpected_reply(operation: &str, reply: &MessageBody) -> SessionError {
    SessionError::Protocol(format!(
        "unexpected reply to {operation}: {}",
        reply.message_type()
    ))
}
