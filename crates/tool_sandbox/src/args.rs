//! Typed tool arguments decoded from the model's JSON argument strings.
//!
//! Models frequently send booleans and integers as strings (`"true"`, `"2"`),
//! so those fields accept either form.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteCommandArgs {
    pub command: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub requires_approval: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadFileArgs {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WriteToFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplaceInFileArgs {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListFilesArgs {
    pub path: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub recursive: bool,
    #[serde(default, deserialize_with = "lenient_page")]
    pub block: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchFilesArgs {
    pub path: String,
    pub regex: String,
    #[serde(default)]
    pub file_pattern: Option<String>,
}

/// Decode `arguments` into `T`; an empty string is treated as `{}`.
pub(crate) fn decode<T: for<'de> Deserialize<'de>>(arguments: &str) -> Result<T, String> {
    let source = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(source).map_err(|error| format!("Invalid tool arguments: {error}"))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(value) => value,
        Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Number(number) => number.as_i64().is_some_and(|value| value != 0),
        _ => false,
    })
}

fn lenient_page<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}
