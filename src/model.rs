//! Core data model.
//!
//! A work item is one generative-media request waiting for, or holding, a
//! slot in the dispatcher. Its payload is a typed [`WorkRequest`]; the
//! dispatcher routes on the kind and never looks inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier.
    pub id: WorkId,

    /// Submitting principal. Opaque to the dispatcher.
    pub owner_id: String,

    /// Which lane the item is routed into.
    pub kind: WorkKind,

    /// Typed parameters for the handler.
    pub request: WorkRequest,

    pub submitted_at: DateTime<Utc>,

    /// Current lifecycle state.
    pub state: State,

    /// Present once the item reaches a terminal state.
    pub outcome: Option<Outcome>,

    /// 1-based position within its lane. 0 once dequeued.
    pub queue_position: usize,
}

impl WorkItem {
    pub fn new(owner_id: impl Into<String>, request: WorkRequest) -> Self {
        Self {
            id: WorkId::new(),
            owner_id: owner_id.into(),
            kind: request.kind(),
            request,
            submitted_at: Utc::now(),
            state: State::Queued,
            outcome: None,
            queue_position: 0,
        }
    }

    /// Move to `to`, rejecting anything but a forward transition.
    pub fn transition(&mut self, to: State) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Point-in-time view for status queries.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            position: (self.state == State::Queued).then_some(self.queue_position),
            outcome: self.outcome.clone(),
        }
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Work class. Synthesis is the high-priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Synthesis,
    Completion,
}

impl WorkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkKind::Synthesis => "synthesis",
            WorkKind::Completion => "completion",
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkKind {
    type Err = Error;

    /// Accepts the collaborator-facing aliases (`voice`, `tts`, `chat`) too.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synthesis" | "voice" | "tts" => Ok(WorkKind::Synthesis),
            "completion" | "chat" => Ok(WorkKind::Completion),
            other => Err(Error::InvalidRequest(format!("unknown work kind: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting in a lane.
    Queued,
    /// Admitted, handler running.
    Processing,
    /// Handler returned a result. Terminal.
    Complete,
    /// Handler failed or was missing. Terminal.
    Error,
}

impl State {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Queued, Error) // no handler for the kind
                | (Processing, Complete)
                | (Processing, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Complete | State::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Queued => "queued",
            State::Processing => "processing",
            State::Complete => "complete",
            State::Error => "error",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Typed payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WorkRequest {
    Synthesis(SynthesisRequest),
    Completion(CompletionRequest),
}

impl WorkRequest {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkRequest::Synthesis(_) => WorkKind::Synthesis,
            WorkRequest::Completion(_) => WorkKind::Completion,
        }
    }

    /// Parse and validate an untyped payload for `kind`.
    pub fn from_json(kind: WorkKind, payload: serde_json::Value) -> Result<Self> {
        let request = match kind {
            WorkKind::Synthesis => WorkRequest::Synthesis(
                serde_json::from_value(payload)
                    .map_err(|e| Error::InvalidRequest(format!("synthesis payload: {e}")))?,
            ),
            WorkKind::Completion => WorkRequest::Completion(
                serde_json::from_value(payload)
                    .map_err(|e| Error::InvalidRequest(format!("completion payload: {e}")))?,
            ),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WorkRequest::Synthesis(req) => {
                if req.text.trim().is_empty() {
                    return Err(Error::InvalidRequest("text is required".to_string()));
                }
                if req.voice_id.is_empty() {
                    return Err(Error::InvalidRequest("voice_id is required".to_string()));
                }
            }
            WorkRequest::Completion(req) => {
                if req.messages.is_empty() {
                    return Err(Error::InvalidRequest(
                        "messages must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Text-to-speech through a cached voice model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    /// Voice cache key.
    #[serde(alias = "rvc_model")]
    pub voice_id: String,
    /// Base TTS voice to swap in on the model before synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_rate: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rvc_pitch: Option<i32>,
}

impl SynthesisRequest {
    pub fn new(voice_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            edge_voice: None,
            tts_rate: None,
            rvc_pitch: None,
        }
    }

    pub fn edge_voice(mut self, voice: impl Into<String>) -> Self {
        self.edge_voice = Some(voice.into());
        self
    }

    pub fn tts_rate(mut self, rate: i32) -> Self {
        self.tts_rate = Some(rate);
        self
    }

    pub fn rvc_pitch(mut self, pitch: i32) -> Self {
        self.rvc_pitch = Some(pitch);
        self
    }
}

/// Chat completion. Everything besides `messages` is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of work execution, stored with the work item on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// Handler result. Opaque to the dispatcher.
    pub data: Option<serde_json::Value>,
    /// Error message if failed.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn success(data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// What a status query sees. Positions are advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: State,
    /// Lane position, only while queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl StatusSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.error.as_deref())
    }
}
