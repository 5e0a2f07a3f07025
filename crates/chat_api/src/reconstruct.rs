use std::collections::BTreeMap;

use crate::delta::StreamDelta;
use crate::error::ChatApiError;
use crate::message::{Completion, Message, Role, ToolCall, Usage};

const UNKNOWN: &str = "unknown";

/// Folds stream deltas into one assistant message.
///
/// Content fragments concatenate in arrival order. Tool-call fragments merge
/// into the slot named by their `index` (slots come out in index order, gaps
/// collapsed); names and arguments concatenate, a
/// later non-empty id replaces an earlier one. Arguments are never parsed here.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    content: String,
    tool_calls: BTreeMap<usize, ToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    deltas: usize,
}

impl StreamAccumulator {
    pub fn push(&mut self, delta: &StreamDelta) {
        self.deltas += 1;

        if self.id.is_none() {
            self.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if self.model.is_none() {
            self.model = delta.model.clone().filter(|model| !model.is_empty());
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }

        for fragment in &delta.tool_calls {
            let slot = self
                .tool_calls
                .entry(fragment.index)
                .or_insert_with(|| ToolCall::function("", "", ""));
            if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                slot.id = id.to_string();
            }
            if let Some(name) = &fragment.name {
                slot.function.name.push_str(name);
            }
            if let Some(arguments) = &fragment.arguments {
                slot.function.arguments.push_str(arguments);
            }
        }

        if delta.finish_reason.is_some() {
            self.finish_reason = delta.finish_reason.clone();
        }
        if delta.usage.is_some() {
            self.usage = delta.usage;
        }
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Produce the completed turn; a stream that yielded no deltas is an error.
    pub fn finish(self) -> Result<Completion, ChatApiError> {
        if self.deltas == 0 {
            return Err(ChatApiError::EmptyStream);
        }

        let tool_calls = self
            .tool_calls
            .into_values()
            .filter(|call| !call.function.name.is_empty() || !call.function.arguments.is_empty())
            .collect();

        Ok(Completion {
            id: self.id.unwrap_or_else(|| UNKNOWN.to_string()),
            model: self.model.unwrap_or_else(|| UNKNOWN.to_string()),
            message: Message::new(Role::Assistant, self.content).with_tool_calls(tool_calls),
            finish_reason: self.finish_reason,
            usage: self.usage,
        })
    }
}

/// Rebuild a complete assistant turn from a finished delta sequence.
pub fn reconstruct_from_stream(deltas: &[StreamDelta]) -> Result<Completion, ChatApiError> {
    let mut accumulator = StreamAccumulator::default();
    for delta in deltas {
        accumulator.push(delta);
    }
    accumulator.finish()
}
