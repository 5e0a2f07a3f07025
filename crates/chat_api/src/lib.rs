//! Transport-only client primitives for OpenAI-compatible chat-completion endpoints.
//!
//! This crate owns request building, SSE framing, UTF-8-safe chunk reassembly,
//! retry classification, and reconstruction of streamed deltas into a complete
//! assistant message. It contains no conversation orchestration and no tool
//! execution.
//!
//! Streamed attempts are all-or-nothing from the caller's point of view: deltas
//! from an attempt that fails mid-stream are discarded before the retry policy
//! starts the next attempt, so a successful [`ChatApiClient::stream`] call never
//! carries duplicated fragments.

pub mod client;
pub mod config;
pub mod delta;
pub mod error;
pub mod headers;
pub mod message;
pub mod payload;
pub mod reconstruct;
pub mod retry;
pub mod sse;
pub mod url;
pub mod utf8;

pub use client::{CancellationSignal, ChatApiClient, StreamResult};
pub use config::ChatApiConfig;
pub use delta::{StreamDelta, ToolCallFragment};
pub use error::{ChatApiError, ErrorKind};
pub use message::{Completion, FunctionCall, Message, Role, ToolCall, Usage};
pub use payload::ChatRequest;
pub use reconstruct::{reconstruct_from_stream, StreamAccumulator};
pub use retry::RetryPolicy;
pub use sse::{SseEvent, SseStreamParser};
pub use url::normalize_chat_url;
pub use utf8::Utf8Reassembler;
