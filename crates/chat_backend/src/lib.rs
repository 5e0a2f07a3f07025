//! Model seam consumed by the conversation loop.
//!
//! A backend answers one turn at a time, either by streaming (with the deltas
//! already rebuilt into a single message) or by a blocking request. Transport,
//! retry, and wire-format details stay behind the trait.

use std::fmt;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};

use chat_api::ChatApiError;
use serde_json::Value;

pub use chat_api::{Completion, FunctionCall, Message, Role, ToolCall, Usage};

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a cancellation flag in the not-cancelled state.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Input for one model turn: the transcript so far plus tool schemas.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [Value],
}

impl<'a> TurnRequest<'a> {
    pub fn new(messages: &'a [Message], tools: &'a [Value]) -> Self {
        Self { messages, tools }
    }
}

/// Failure class of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    Network,
    Protocol,
    Http,
    Cancelled,
    Other,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Http => "http",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// Error surfaced by a backend after its own retries are spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
    status: Option<u16>,
}

impl BackendError {
    #[must_use]
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(BackendErrorKind::Cancelled, "cancelled")
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == BackendErrorKind::Cancelled
    }

    /// A failed stream may be retried once through the blocking path unless
    /// the run was cancelled.
    pub fn allows_fallback(&self) -> bool {
        !self.is_cancelled()
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} error (HTTP {status}): {}", self.kind.as_str(), self.message),
            None => write!(f, "{} error: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<ChatApiError> for BackendError {
    fn from(error: ChatApiError) -> Self {
        let kind = match error.kind() {
            chat_api::ErrorKind::Network => BackendErrorKind::Network,
            chat_api::ErrorKind::Protocol => BackendErrorKind::Protocol,
            chat_api::ErrorKind::Http => BackendErrorKind::Http,
            chat_api::ErrorKind::Cancelled => BackendErrorKind::Cancelled,
            chat_api::ErrorKind::Other => BackendErrorKind::Other,
        };
        let status = error.status().map(|status| status.as_u16());
        let backend = Self::new(kind, error.to_string());
        match status {
            Some(status) => backend.with_status(status),
            None => backend,
        }
    }
}

/// Immutable metadata describing a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    pub backend_id: String,
    pub model_id: String,
}

/// Synchronous chat-completion backend.
///
/// Calls block the current thread until the turn completes, fails, or `cancel`
/// is raised. Implementations must be shareable across worker threads.
pub trait ChatBackend: Send + Sync {
    fn profile(&self) -> BackendProfile;

    /// Streamed turn, rebuilt into one complete message.
    fn stream_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError>;

    /// Single blocking request for the turn.
    fn blocking_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError>;
}
