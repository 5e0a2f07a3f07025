use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chat_backend::{cancel_signal, CancelSignal, ChatBackend};
use conversation::{
    ConversationLoop, LoopConfig, LoopOutcome, RunMetrics, RunReport, Transcript,
};
use tool_sandbox::{ToolSandbox, DEFAULT_COMMAND_TIMEOUT};
use tracing::{error, info};

use crate::task::TaskSpec;

/// Scores a finished run. Real scoring lives outside this crate.
pub trait Validator: Send + Sync {
    /// `report` carries the final transcript and metrics.
    fn validate(&self, task: &TaskSpec, report: &RunReport) -> bool;
}

/// Passes a run only when the model stopped calling tools on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionValidator;

impl Validator for CompletionValidator {
    fn validate(&self, _task: &TaskSpec, report: &RunReport) -> bool {
        report.outcome.is_completed()
    }
}

/// Result of running one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRun {
    pub task_id: String,
    pub report: RunReport,
    pub passed: bool,
}

/// Runs tasks against one backend with shared loop settings.
pub struct Harness {
    backend: Arc<dyn ChatBackend>,
    validator: Arc<dyn Validator>,
    loop_config: LoopConfig,
    command_timeout: Duration,
    venv_dir: Option<PathBuf>,
    cancel: CancelSignal,
}

impl Harness {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            validator: Arc::new(CompletionValidator),
            loop_config: LoopConfig::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            venv_dir: None,
            cancel: cancel_signal(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_loop_config(mut self, loop_config: LoopConfig) -> Self {
        self.loop_config = loop_config;
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Virtual environment used by tasks that set `use_venv`.
    pub fn with_venv_dir(mut self, venv_dir: Option<PathBuf>) -> Self {
        self.venv_dir = venv_dir;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model_id(&self) -> String {
        self.backend.profile().model_id
    }

    /// Run one task to completion. Setup failures and panics become an
    /// `Error` outcome at round 0.
    pub fn run_task(&self, task: &TaskSpec) -> TaskRun {
        let report = match catch_unwind(AssertUnwindSafe(|| self.run_conversation(task))) {
            Ok(Ok(report)) => report,
            Ok(Err(cause)) => setup_failure(task, cause),
            Err(_) => setup_failure(task, "run panicked".to_string()),
        };
        let passed = self.validator.validate(task, &report);
        info!(
            task = %task.id,
            outcome = report.outcome.label(),
            passed,
            rounds = report.metrics.total_rounds,
            "task finished"
        );

        TaskRun {
            task_id: task.id.clone(),
            report,
            passed,
        }
    }

    fn run_conversation(&self, task: &TaskSpec) -> Result<RunReport, String> {
        let mut sandbox = ToolSandbox::new(&task.sandbox_root)
            .map_err(|error| error.to_string())?
            .with_command_timeout(self.command_timeout)
            .with_cancel_signal(Arc::clone(&self.cancel));
        if task.use_venv {
            let venv = self
                .venv_dir
                .clone()
                .ok_or_else(|| "task requests a virtual environment but none is configured".to_string())?;
            sandbox = sandbox.with_venv(absolute_venv_dir(venv)?);
        }
        for artifact in &task.artifacts {
            if let Err(error) = sandbox.register_artifact(artifact) {
                // Anything registered so far is still cleaned up here.
                sandbox.artifacts().cleanup();
                return Err(error.to_string());
            }
        }

        let mut conversation = ConversationLoop::new(self.backend.as_ref(), &sandbox)
            .with_config(self.loop_config)
            .with_cancel_signal(Arc::clone(&self.cancel));
        if let Some(tools) = &task.tools {
            conversation = conversation.with_tools(tools.clone());
        }
        Ok(conversation.run(task.seed_messages()))
    }
}

/// Relative venv paths resolve against the harness's working directory, not
/// the sandbox root commands run in.
fn absolute_venv_dir(venv: PathBuf) -> Result<PathBuf, String> {
    if venv.is_absolute() {
        return Ok(venv);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&venv))
        .map_err(|error| format!("failed to resolve venv path {}: {error}", venv.display()))
}

fn setup_failure(task: &TaskSpec, cause: String) -> RunReport {
    error!(task = %task.id, %cause, "task could not run");
    RunReport {
        outcome: LoopOutcome::Error { round: 0, cause },
        transcript: Transcript::new(task.seed_messages()),
        metrics: RunMetrics::default(),
    }
}
