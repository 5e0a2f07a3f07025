use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chat_backend::Message;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to read tasks file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tasks file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tasks file {0} lists no tasks")]
    Empty(PathBuf),
    #[error("task #{index} has an empty '{field}'")]
    EmptyField { index: usize, field: &'static str },
    #[error("task id '{0}' appears more than once")]
    DuplicateId(String),
}

/// One coding task: where it runs and how the conversation starts.
///
/// Prompts, tool schemas, and ground truth are opaque here; they are passed to
/// the model and the validator unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub id: String,
    pub sandbox_root: PathBuf,
    pub system_prompt: String,
    pub prompt: String,
    /// Extra user/assistant turns placed after the prompt.
    #[serde(default)]
    pub priming: Vec<Message>,
    /// Tool schemas to offer; the built-in six when absent.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    /// Sandbox-relative paths removed when the run ends.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub use_venv: bool,
    #[serde(default)]
    pub ground_truth: Option<Value>,
}

impl TaskSpec {
    pub fn seed_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.priming.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.push(Message::user(&self.prompt));
        messages.extend(self.priming.iter().cloned());
        messages
    }
}

/// Load a JSON array of tasks. Relative sandbox roots are resolved against the
/// directory holding the file.
pub fn load_tasks(path: &Path) -> Result<Vec<TaskSpec>, TaskError> {
    let text = fs::read_to_string(path).map_err(|source| TaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tasks: Vec<TaskSpec> =
        serde_json::from_str(&text).map_err(|source| TaskError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if tasks.is_empty() {
        return Err(TaskError::Empty(path.to_path_buf()));
    }

    let base = path.parent().unwrap_or(Path::new(""));
    let mut seen = HashSet::new();
    for (index, task) in tasks.iter_mut().enumerate() {
        if task.id.trim().is_empty() {
            return Err(TaskError::EmptyField { index, field: "id" });
        }
        if task.prompt.trim().is_empty() {
            return Err(TaskError::EmptyField {
                index,
                field: "prompt",
            });
        }
        if !seen.insert(task.id.clone()) {
            return Err(TaskError::DuplicateId(task.id.clone()));
        }
        if task.sandbox_root.is_relative() {
            task.sandbox_root = base.join(&task.sandbox_root);
        }
    }

    Ok(tasks)
}
