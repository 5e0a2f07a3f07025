use chat_backend::{
    cancel_signal, is_cancelled, BackendError, CancelSignal, ChatBackend, Completion, Message,
    Role, TurnRequest,
};
use serde_json::Value;
use tool_sandbox::{ArtifactRegistry, ToolSandbox};
use tracing::{debug, error, info, warn};

use crate::metrics::RunMetrics;
use crate::outcome::{LoopOutcome, RunReport, CANCELLED_CAUSE};
use crate::transcript::Transcript;

pub const DEFAULT_MAX_ROUNDS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_rounds: u32,
    /// Ask for streamed turns; otherwise every turn is a blocking request.
    pub use_stream: bool,
    /// Retry a failed streamed turn once through the blocking path.
    pub stream_fallback: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            use_stream: true,
            stream_fallback: true,
        }
    }
}

impl LoopConfig {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_stream(mut self, use_stream: bool) -> Self {
        self.use_stream = use_stream;
        self
    }

    pub fn with_stream_fallback(mut self, stream_fallback: bool) -> Self {
        self.stream_fallback = stream_fallback;
        self
    }
}

/// Removes registered artifacts when the run ends, however it ends.
struct ArtifactCleanup(ArtifactRegistry);

impl Drop for ArtifactCleanup {
    fn drop(&mut self) {
        let removed = self.0.cleanup();
        if removed > 0 {
            debug!(removed, "cleaned up run artifacts");
        }
    }
}

/// Alternates model turns and tool dispatch until the model stops calling
/// tools, the round limit is hit, or a model call fails.
///
/// Only the first tool call of a turn is executed; the assistant message is
/// trimmed to that call before it enters the transcript so every call in the
/// history has exactly one answer.
pub struct ConversationLoop<'a> {
    backend: &'a dyn ChatBackend,
    sandbox: &'a ToolSandbox,
    tools: Vec<Value>,
    config: LoopConfig,
    cancel: CancelSignal,
}

impl<'a> ConversationLoop<'a> {
    pub fn new(backend: &'a dyn ChatBackend, sandbox: &'a ToolSandbox) -> Self {
        Self {
            backend,
            sandbox,
            tools: tool_sandbox::all_schemas(),
            config: LoopConfig::default(),
            cancel: cancel_signal(),
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default tool schemas sent with every request.
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    pub fn run(&self, seed: Vec<Message>) -> RunReport {
        let _cleanup = ArtifactCleanup(self.sandbox.artifacts().clone());
        let profile = self.backend.profile();
        let mut transcript = Transcript::new(seed);
        let mut metrics = RunMetrics::default();

        let outcome = self.drive(&mut transcript, &mut metrics);
        match &outcome {
            LoopOutcome::Error { round, cause } => {
                error!(backend = %profile.backend_id, model = %profile.model_id, round, %cause, "conversation failed");
            }
            other => {
                info!(
                    backend = %profile.backend_id,
                    model = %profile.model_id,
                    outcome = other.label(),
                    rounds = metrics.total_rounds,
                    tool_calls = metrics.tool_calls,
                    "conversation finished"
                );
            }
        }

        RunReport {
            outcome,
            transcript,
            metrics,
        }
    }

    fn drive(&self, transcript: &mut Transcript, metrics: &mut RunMetrics) -> LoopOutcome {
        for round in 1..=self.config.max_rounds {
            if is_cancelled(&self.cancel) {
                return cancelled(round);
            }
            metrics.record_round();
            debug!(round, messages = transcript.len(), "awaiting model");

            let completion = match self.request_turn(transcript) {
                Ok(completion) => completion,
                Err(error) if error.is_cancelled() => return cancelled(round),
                Err(error) => {
                    return LoopOutcome::Error {
                        round,
                        cause: error.to_string(),
                    };
                }
            };

            let mut message = completion.message;
            message.role = Role::Assistant;
            metrics.record_assistant(&message);

            if message.tool_calls.len() > 1 {
                debug!(
                    round,
                    ignored = message.tool_calls.len() - 1,
                    "dispatching only the first tool call"
                );
                message.tool_calls.truncate(1);
            }
            let Some(call) = message.tool_calls.first().cloned() else {
                transcript.push(message);
                return LoopOutcome::Completed;
            };
            transcript.push(message);

            let result = self
                .sandbox
                .dispatch(&call.id, &call.function.name, &call.function.arguments);
            metrics.record_tool(&call.function.name);
            debug!(
                round,
                tool = %call.function.name,
                is_error = result.is_error(),
                exit_code = ?result.exit_code,
                "tool call finished"
            );
            transcript.push(Message::tool(call.id, result.to_message_content()));
        }

        LoopOutcome::RoundLimitExceeded {
            rounds: self.config.max_rounds,
        }
    }

    fn request_turn(&self, transcript: &Transcript) -> Result<Completion, BackendError> {
        let request = TurnRequest::new(transcript.messages(), &self.tools);
        if !self.config.use_stream {
            return self.backend.blocking_completion(&request, &self.cancel);
        }

        match self.backend.stream_completion(&request, &self.cancel) {
            Ok(completion) => Ok(completion),
            Err(error) if self.config.stream_fallback && error.allows_fallback() => {
                warn!(%error, "streamed turn failed; retrying as a blocking request");
                self.backend.blocking_completion(&request, &self.cancel)
            }
            Err(error) => Err(error),
        }
    }
}

fn cancelled(round: u32) -> LoopOutcome {
    LoopOutcome::Error {
        round,
        cause: CANCELLED_CAUSE.to_string(),
    }
}
