use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::CancelSignal;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long pipes may stay open after the command itself has ended.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);
const PIPE_READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("command could not be tokenized (unbalanced quotes?): {0}")]
    Tokenize(String),
    #[error("failed to launch '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("failed waiting for command: {0}")]
    Wait(io::Error),
    #[error("failed to create virtual environment at {path}: {message}")]
    VenvCreate { path: PathBuf, message: String },
    #[error("virtual environment at {0} has no bin or Scripts directory")]
    VenvMissingBin(PathBuf),
    #[error("failed to build PATH: {0}")]
    InvalidPath(String),
}

/// Result of one finished (or killed) command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, capped at the runner's byte limit.
    pub output: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

/// Runs tokenized commands inside a working directory without a shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    cwd: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
    venv_python: String,
}

impl ShellRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            venv_python: "python3".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Interpreter used to create missing virtual environments.
    pub fn with_venv_python(mut self, python: impl Into<String>) -> Self {
        self.venv_python = python.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` and wait for it, killing the child on timeout or when
    /// `cancel` is raised.
    ///
    /// The command text is split with POSIX shell quoting rules and executed
    /// directly; pipes, redirects, and globbing are not interpreted.
    pub fn run(
        &self,
        command: &str,
        venv: Option<&Path>,
        cancel: Option<&CancelSignal>,
    ) -> Result<CommandOutput, ShellError> {
        let argv = shlex::split(command).ok_or_else(|| ShellError::Tokenize(command.to_string()))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ShellError::EmptyCommand);
        };

        let mut builder = Command::new(program);
        builder
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut builder);

        if let Some(venv) = venv {
            let bin_dir = self.ensure_venv(venv)?;
            builder
                .env("PATH", prepend_to_path(&bin_dir)?)
                .env("VIRTUAL_ENV", venv);
        }

        debug!(%program, args = args.len(), cwd = %self.cwd.display(), "spawning command");
        let mut child = builder.spawn().map_err(|source| ShellError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = spawn_pipe_reader(child.stdout.take());
        let stderr = spawn_pipe_reader(child.stderr.take());
        let waited = self.wait(&mut child, cancel);
        // Background jobs the command left behind would keep the pipes open.
        kill_process_group(&child);

        let drain_deadline = Instant::now() + PIPE_DRAIN_GRACE;
        let stdout = drain_pipe(stdout, drain_deadline);
        let stderr = drain_pipe(stderr, drain_deadline);
        let (status, timed_out, cancelled) = waited?;

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&String::from_utf8_lossy(&stderr));
        }

        Ok(CommandOutput {
            exit_code: status.and_then(|status| status.code()),
            output: truncate_to_byte_limit(output, self.max_output_bytes),
            timed_out,
            cancelled,
        })
    }

    fn wait(
        &self,
        child: &mut Child,
        cancel: Option<&CancelSignal>,
    ) -> Result<(Option<ExitStatus>, bool, bool), ShellError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if cancel.is_some_and(|token| token.load(Ordering::Acquire)) {
                warn!("killing command after cancellation");
                kill_and_reap(child);
                return Ok((None, false, true));
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(timeout_sec = self.timeout.as_secs(), "killing command after timeout");
                kill_and_reap(child);
                return Ok((None, true, false));
            }

            let slice = WAIT_POLL_INTERVAL.min(deadline - now);
            match child.wait_timeout(slice) {
                Ok(Some(status)) => return Ok((Some(status), false, false)),
                Ok(None) => {}
                Err(error) => {
                    kill_and_reap(child);
                    return Err(ShellError::Wait(error));
                }
            }
        }
    }

    /// Create the virtual environment if absent and return its executable dir.
    pub fn ensure_venv(&self, venv: &Path) -> Result<PathBuf, ShellError> {
        if !venv.exists() {
            info!(path = %venv.display(), python = %self.venv_python, "creating virtual environment");
            let output = Command::new(&self.venv_python)
                .arg("-m")
                .arg("venv")
                .arg(venv)
                .stdin(Stdio::null())
                .output()
                .map_err(|error| ShellError::VenvCreate {
                    path: venv.to_path_buf(),
                    message: error.to_string(),
                })?;
            if !output.status.success() {
                return Err(ShellError::VenvCreate {
                    path: venv.to_path_buf(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }

        ["bin", "Scripts"]
            .iter()
            .map(|name| venv.join(name))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| ShellError::VenvMissingBin(venv.to_path_buf()))
    }
}

fn prepend_to_path(dir: &Path) -> Result<OsString, ShellError> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).map_err(|error| ShellError::InvalidPath(error.to_string()))
}

#[cfg(unix)]
fn isolate_process_group(builder: &mut Command) {
    use std::os::unix::process::CommandExt;
    builder.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_builder: &mut Command) {}

/// Signal every process in the child's group, the child included.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: `killpg` only sends a signal; the group was created for this child
    // by `isolate_process_group`. A group with no members left yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn kill_and_reap(child: &mut Child) {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_pipe_reader(pipe: Option<impl Read + Send + 'static>) -> Option<Receiver<Vec<u8>>> {
    let mut pipe = pipe?;
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; PIPE_READ_CHUNK];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    if sender.send(chunk[..read].to_vec()).is_err() {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
    Some(receiver)
}

/// Collect a reader's output until the pipe closes or `deadline` passes.
fn drain_pipe(receiver: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    let mut bytes = Vec::new();
    let Some(receiver) = receiver else {
        return bytes;
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after the command ended; dropping the rest");
                break;
            }
        }
    }
    bytes
}

pub(crate) fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}
