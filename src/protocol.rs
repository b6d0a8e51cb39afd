//! Wire-level message envelope and the closed type vocabulary spoken with
//! the slide processing backend.
//!
//! Every frame in either direction is one JSON [`Envelope`]. The `type` and
//! `data` fields form a tagged union decoded once at this boundary; payloads
//! this layer only ferries (content plans, finished decks) stay opaque
//! [`serde_json::Value`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// The unit of communication in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl Envelope {
    pub fn new(session_id: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            body,
            timestamp: OffsetDateTime::now_utc(),
            session_id: session_id.into(),
            request_id: None,
        }
    }

    /// Build a reply correlated to `request`.
    pub fn reply_to(request: &Envelope, body: MessageBody) -> Self {
        let mut envelope = Envelope::new(request.session_id.clone(), body);
        envelope.request_id = Some(request.id);
        envelope
    }
}

/// File metadata plus content, carried by `upload_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Acknowledgement payload of `upload_success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// A previously uploaded document referenced in a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: String,
    pub filename: String,
}

/// Full context sent with `request_slide_generation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlideGenerationRequest {
    pub description: String,
    pub theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub slide_count: u32,
}

/// Terminal outcome payload of `processing_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Interim progress payload for status/progress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub stage: String,
    pub percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error payload carried by error-tagged message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The closed message vocabulary.
///
/// `type` selects the variant, `data` carries its payload. Types the peer
/// invents later deserialize as [`MessageBody::Unknown`] instead of failing
/// the whole frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageBody {
    // client -> server
    UploadFile(FileUpload),
    SubmitDescription {
        text: String,
    },
    SelectTheme {
        theme: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        palette: Option<String>,
    },
    RequestContentPlan {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slide_count: Option<u32>,
    },
    RequestResearch {
        topic: String,
    },
    RequestSlideGeneration(SlideGenerationRequest),
    RequestProcessing {
        operation: String,
        #[serde(default)]
        options: Value,
    },
    Ping,

    // server -> client
    UploadSuccess(UploadReceipt),
    UploadError(ErrorInfo),
    ProcessingStatus(ProcessingReport),
    ProcessingProgress(ProgressReport),
    SlideGenerationStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        estimated_seconds: Option<u32>,
    },
    SlideGenerationStatus(ProgressReport),
    SlideGenerationComplete {
        slides: Value,
    },
    SlideGenerationError(ErrorInfo),
    ContentPlanResponse {
        plan: Value,
    },
    Error(ErrorInfo),
    Keepalive,
    KeepaliveReply,
    ConnectionEstablished,

    #[serde(other)]
    Unknown,
}

/// Dispatch key for unsolicited server events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProcessingStatus,
    ProcessingProgress,
    SlideGenerationStarted,
    SlideGenerationStatus,
    SlideGenerationComplete,
    SlideGenerationError,
    ContentPlanResponse,
    Error,
    ConnectionEstablished,
}

impl MessageBody {
    /// Wire tag of this message, for logging and routing.
    pub fn message_type(&self) -> &'static str {
        match self {
            MessageBody::UploadFile(_) => "upload_file",
            MessageBody::SubmitDescription { .. } => "submit_description",
            MessageBody::SelectTheme { .. } => "select_theme",
            MessageBody::RequestContentPlan { .. } => "request_content_plan",
            MessageBody::RequestResearch { .. } => "request_research",
            MessageBody::RequestSlideGeneration(_) => "request_slide_generation",
            MessageBody::RequestProcessing { .. } => "request_processing",
            MessageBody::Ping => "ping",
            MessageBody::UploadSuccess(_) => "upload_success",
            MessageBody::UploadError(_) => "upload_error",
            MessageBody::ProcessingStatus(_) => "processing_status",
            MessageBody::ProcessingProgress(_) => "processing_progress",
            MessageBody::SlideGenerationStarted { .. } => "slide_generation_started",
            MessageBody::SlideGenerationStatus(_) => "slide_generation_status",
            MessageBody::SlideGenerationComplete { .. } => "slide_generation_complete",
            MessageBody::SlideGenerationError(_) => "slide_generation_error",
            MessageBody::ContentPlanResponse { .. } => "content_plan_response",
            MessageBody::Error(_) => "error",
            MessageBody::Keepalive => "keepalive",
            MessageBody::KeepaliveReply => "keepalive_reply",
            MessageBody::ConnectionEstablished => "connection_established",
            MessageBody::Unknown => "unknown",
        }
    }

    /// Whether this type settles a pending request when it arrives with a
    /// matching `request_id`. Interim traffic (started/status/progress) is
    /// event-dispatched even when correlated, so it cannot resolve a future
    /// early.
    pub fn is_terminal_reply(&self) -> bool {
        matches!(
            self,
            MessageBody::UploadSuccess(_)
                | MessageBody::UploadError(_)
                | MessageBody::ProcessingStatus(_)
                | MessageBody::SlideGenerationComplete { .. }
                | MessageBody::SlideGenerationError(_)
                | MessageBody::ContentPlanResponse { .. }
                | MessageBody::Error(_)
                | MessageBody::KeepaliveReply
        )
    }

    /// Error payload, for error-tagged types.
    pub fn as_error(&self) -> Option<&ErrorInfo> {
        match self {
            MessageBody::UploadError(info)
            | MessageBody::SlideGenerationError(info)
            | MessageBody::Error(info) => Some(info),
            _ => None,
        }
    }

    /// Dispatch key, for message types that surface as application events.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            MessageBody::ProcessingStatus(_) => Some(EventKind::ProcessingStatus),
            MessageBody::ProcessingProgress(_) => Some(EventKind::ProcessingProgress),
            MessageBody::SlideGenerationStarted { .. } => Some(EventKind::SlideGenerationStarted),
            MessageBody::SlideGenerationStatus(_) => Some(EventKind::SlideGenerationStatus),
            MessageBody::SlideGenerationComplete { .. } => Some(EventKind::SlideGenerationComplete),
            MessageBody::SlideGenerationError(_) => Some(EventKind::SlideGenerationError),
            MessageBody::ContentPlanResponse { .. } => Some(EventKind::ContentPlanResponse),
            MessageBody::Error(_) => Some(EventKind::Error),
            MessageBody::ConnectionEstablished => Some(EventKind::ConnectionEstablished),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
