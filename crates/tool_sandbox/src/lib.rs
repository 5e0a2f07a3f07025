//! Sandboxed execution of model tool calls.
//!
//! Every file path is confined to one root by [`PathGuard`]; commands run
//! through [`ShellRunner`] with that root as working directory. Failures come
//! back as [`ToolResult`] error envelopes rather than Rust errors so the
//! conversation can continue.

mod args;
mod artifacts;
mod kind;
mod path_guard;
mod sandbox;
mod shell;

use std::sync::{atomic::AtomicBool, Arc};

pub use artifacts::ArtifactRegistry;
pub use kind::{all_schemas, ToolKind};
pub use path_guard::{PathGuard, PathGuardError};
pub use sandbox::{
    paginate, PageWindow, ToolOutcome, ToolResult, ToolSandbox, LIST_PAGE_SIZE,
    MAX_SEARCH_RESULTS, TOOL_ERROR_PREFIX,
};
pub use shell::{
    CommandOutput, ShellError, ShellRunner, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES,
};

/// Shared cancellation flag observed while waiting on child processes.
pub type CancelSignal = Arc<AtomicBool>;
