//! Deterministic scripted implementation of the `ChatBackend` contract.
//!
//! Turns are queued per mode (stream or blocking) and consumed in order. The
//! backend records every request it receives so tests can assert on the exact
//! transcript the loop sent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chat_backend::{
    is_cancelled, BackendError, BackendErrorKind, BackendProfile, CancelSignal, ChatBackend,
    Completion, Message, ToolCall, TurnRequest,
};

/// Stable backend identifier used for explicit selection.
pub const MOCK_BACKEND_ID: &str = "mock";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Reply(Completion),
    Fail(BackendError),
}

impl ScriptedTurn {
    /// Plain assistant text with no tool calls.
    #[must_use]
    pub fn text(content: &str) -> Self {
        Self::Reply(completion(Message::assistant(content)))
    }

    /// Assistant turn requesting a single tool call.
    #[must_use]
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::tool_calls(vec![ToolCall::function(id, name, arguments)])
    }

    #[must_use]
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Reply(completion(Message::assistant("").with_tool_calls(calls)))
    }

    #[must_use]
    pub fn fail(kind: BackendErrorKind, message: &str) -> Self {
        Self::Fail(BackendError::new(kind, message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Stream,
    Blocking,
}

/// Snapshot of one request the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub mode: TurnMode,
    pub messages: Vec<Message>,
    pub tool_count: usize,
}

#[derive(Debug, Default)]
struct Script {
    stream: VecDeque<ScriptedTurn>,
    blocking: VecDeque<ScriptedTurn>,
    repeat_stream: Option<ScriptedTurn>,
    requests: Vec<RecordedRequest>,
}

/// Scripted backend used by conversation tests and offline dry runs.
#[derive(Debug)]
pub struct ScriptedBackend {
    model_id: String,
    script: Mutex<Script>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_id: "mock-model".to_string(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Backend whose stream path answers with `turn` forever once its queue
    /// is empty.
    #[must_use]
    pub fn repeating(turn: ScriptedTurn) -> Self {
        let backend = Self::new();
        lock_unpoisoned(&backend.script).repeat_stream = Some(turn);
        backend
    }

    #[must_use]
    pub fn with_model(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }

    #[must_use]
    pub fn with_stream_turns(self, turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        lock_unpoisoned(&self.script).stream.extend(turns);
        self
    }

    #[must_use]
    pub fn with_blocking_turns(self, turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        lock_unpoisoned(&self.script).blocking.extend(turns);
        self
    }

    pub fn push_stream(&self, turn: ScriptedTurn) {
        lock_unpoisoned(&self.script).stream.push_back(turn);
    }

    pub fn push_blocking(&self, turn: ScriptedTurn) {
        lock_unpoisoned(&self.script).blocking.push_back(turn);
    }

    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.script).requests.len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock_unpoisoned(&self.script).requests.clone()
    }

    fn answer(
        &self,
        mode: TurnMode,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError> {
        if is_cancelled(cancel) {
            return Err(BackendError::cancelled());
        }

        let mut script = lock_unpoisoned(&self.script);
        script.requests.push(RecordedRequest {
            mode,
            messages: request.messages.to_vec(),
            tool_count: request.tools.len(),
        });

        let next = match mode {
            TurnMode::Stream => script
                .stream
                .pop_front()
                .or_else(|| script.repeat_stream.clone()),
            TurnMode::Blocking => script.blocking.pop_front(),
        };

        match next {
            Some(ScriptedTurn::Reply(completion)) => Ok(completion),
            Some(ScriptedTurn::Fail(error)) => Err(error),
            None => Err(BackendError::new(
                BackendErrorKind::Other,
                format!("scripted backend has no {mode:?} turn left"),
            )),
        }
    }
}

impl ChatBackend for ScriptedBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: MOCK_BACKEND_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn stream_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError> {
        self.answer(TurnMode::Stream, request, cancel)
    }

    fn blocking_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError> {
        self.answer(TurnMode::Blocking, request, cancel)
    }
}

fn completion(message: Message) -> Completion {
    let finish_reason = if message.has_tool_calls() {
        "tool_calls"
    } else {
        "stop"
    };
    Completion {
        id: "mock-completion".to_string(),
        model: "mock-model".to_string(),
        message,
        finish_reason: Some(finish_reason.to_string()),
        usage: None,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
