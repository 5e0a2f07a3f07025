use std::collections::BTreeMap;

use chat_backend::Message;
use serde::{Deserialize, Serialize};

/// Counters handed to validators and run records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_rounds: u32,
    pub tool_calls: u32,
    pub tool_types: BTreeMap<String, u32>,
    pub unique_tools: usize,
    /// Characters of assistant text across all rounds.
    pub output_chars: usize,
    /// Tool names in dispatch order.
    pub tools_used: Vec<String>,
}

impl RunMetrics {
    pub(crate) fn record_round(&mut self) {
        self.total_rounds += 1;
    }

    pub(crate) fn record_assistant(&mut self, message: &Message) {
        self.output_chars += message.content.chars().count();
    }

    pub(crate) fn record_tool(&mut self, name: &str) {
        self.tool_calls += 1;
        *self.tool_types.entry(name.to_string()).or_default() += 1;
        self.unique_tools = self.tool_types.len();
        self.tools_used.push(name.to_string());
    }
}
