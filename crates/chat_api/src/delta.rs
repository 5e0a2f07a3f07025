use serde::{Deserialize, Deserializer};

use crate::message::{Role, Usage};

/// One decoded streaming unit: partial content, indexed tool-call fragments, and
/// an optional finish reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub id: Option<String>,
    pub model: Option<String>,
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Positional fragment of a tool call; `index` selects the accumulator slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl StreamDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    /// Decode one SSE `data:` payload. Only the first choice is considered.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        let chunk: WireChunk = serde_json::from_str(payload)?;
        let choice = chunk.choices.into_iter().next().unwrap_or_default();

        Ok(Self {
            id: chunk.id,
            model: chunk.model,
            role: choice.delta.role,
            content: choice.delta.content,
            tool_calls: choice
                .delta
                .tool_calls
                .into_iter()
                .map(|fragment| {
                    let function = fragment.function.unwrap_or_default();
                    ToolCallFragment {
                        index: fragment.index,
                        id: fragment.id,
                        name: function.name,
                        arguments: function.arguments,
                    }
                })
                .collect(),
            finish_reason: choice.finish_reason,
            usage: chunk.usage,
        })
    }
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<WireToolCallFragment>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionFragment>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
