use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// Request body for the chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl ChatRequest {
    /// `tool_choice` is `"auto"` exactly when tools are offered.
    pub fn new(
        model: impl Into<String>,
        messages: &[Message],
        tools: &[Value],
        temperature: f32,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            messages: messages.to_vec(),
            temperature,
            stream,
            tools: tools.to_vec(),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
        }
    }
}
