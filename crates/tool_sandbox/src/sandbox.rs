use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::args::{
    decode, ExecuteCommandArgs, ListFilesArgs, ReadFileArgs, ReplaceInFileArgs, SearchFilesArgs,
    WriteToFileArgs,
};
use crate::artifacts::ArtifactRegistry;
use crate::kind::ToolKind;
use crate::path_guard::{PathGuard, PathGuardError};
use crate::shell::ShellRunner;
use crate::CancelSignal;

pub const LIST_PAGE_SIZE: usize = 100;
pub const MAX_SEARCH_RESULTS: usize = 300;
const SEARCH_CONTEXT_LINES: usize = 2;
pub const TOOL_ERROR_PREFIX: &str = "Tool execution failed: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Error(String),
}

/// Envelope for one executed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub exit_code: Option<i32>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// Text for the tool-role message answering this call.
    pub fn to_message_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(text) => text.clone(),
            ToolOutcome::Error(text) => format!("{TOOL_ERROR_PREFIX}{text}"),
        }
    }
}

struct Handled {
    outcome: ToolOutcome,
    exit_code: Option<i32>,
}

impl Handled {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            outcome: ToolOutcome::Success(text.into()),
            exit_code: None,
        }
    }

    fn fail(text: impl Into<String>) -> Self {
        Self {
            outcome: ToolOutcome::Error(text.into()),
            exit_code: None,
        }
    }

    fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}

type Handler = fn(&ToolSandbox, &str) -> Handled;

const HANDLERS: [(ToolKind, Handler); 6] = [
    (ToolKind::ExecuteCommand, ToolSandbox::execute_command),
    (ToolKind::ReadFile, ToolSandbox::read_file),
    (ToolKind::WriteToFile, ToolSandbox::write_to_file),
    (ToolKind::ReplaceInFile, ToolSandbox::replace_in_file),
    (ToolKind::ListFiles, ToolSandbox::list_files),
    (ToolKind::SearchFiles, ToolSandbox::search_files),
];

/// Executes model tool calls against one sandbox root.
#[derive(Debug, Clone)]
pub struct ToolSandbox {
    guard: PathGuard,
    shell: ShellRunner,
    venv: Option<PathBuf>,
    artifacts: ArtifactRegistry,
    cancel: Option<CancelSignal>,
}

impl ToolSandbox {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathGuardError> {
        let guard = PathGuard::new(root)?;
        let shell = ShellRunner::new(guard.root());
        Ok(Self {
            guard,
            shell,
            venv: None,
            artifacts: ArtifactRegistry::new(),
            cancel: None,
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.shell = self.shell.with_timeout(timeout);
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.shell = self.shell.with_max_output_bytes(max_output_bytes);
        self
    }

    /// Run every command inside this virtual environment, creating it on
    /// first use.
    pub fn with_venv(mut self, venv: impl Into<PathBuf>) -> Self {
        self.venv = Some(venv.into());
        self
    }

    pub fn with_venv_python(mut self, python: impl Into<String>) -> Self {
        self.shell = self.shell.with_venv_python(python);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    /// Register a path inside the sandbox for removal when the run ends.
    pub fn register_artifact(&self, path: &str) -> Result<PathBuf, PathGuardError> {
        let resolved = self.guard.resolve(path)?;
        self.artifacts.register(resolved.clone());
        Ok(resolved)
    }

    pub fn artifacts(&self) -> &ArtifactRegistry {
        &self.artifacts
    }

    /// Execute one tool call. Every failure, including unknown tool names
    /// and malformed arguments, comes back as an error envelope.
    pub fn dispatch(&self, id: &str, name: &str, arguments: &str) -> ToolResult {
        let handled = match ToolKind::from_name(name) {
            Some(kind) => {
                debug!(tool = name, call_id = id, "dispatching tool call");
                let handler = HANDLERS
                    .iter()
                    .find(|(candidate, _)| *candidate == kind)
                    .map(|(_, handler)| *handler);
                match handler {
                    Some(handler) => handler(self, arguments),
                    None => Handled::fail(format!("No handler registered for tool: {name}")),
                }
            }
            None => Handled::fail(format!("Unknown tool: {name}")),
        };

        if let ToolOutcome::Error(message) = &handled.outcome {
            warn!(tool = name, call_id = id, error = %first_line(message), "tool call failed");
        }

        ToolResult {
            id: id.to_string(),
            tool_name: name.to_string(),
            outcome: handled.outcome,
            exit_code: handled.exit_code,
        }
    }

    fn execute_command(&self, arguments: &str) -> Handled {
        let args: ExecuteCommandArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        if args.requires_approval {
            info!(command = %args.command, "auto-approving command");
        }

        let output = match self
            .shell
            .run(&args.command, self.venv.as_deref(), self.cancel.as_ref())
        {
            Ok(output) => output,
            Err(error) => return Handled::fail(error.to_string()),
        };

        if output.success() {
            let text = if output.output.is_empty() {
                "Command completed with no output.".to_string()
            } else {
                output.output
            };
            return Handled::ok(text).with_exit_code(output.exit_code);
        }

        let headline = if output.timed_out {
            format!("Command timed out after {}s", self.shell.timeout().as_secs())
        } else if output.cancelled {
            "Command cancelled".to_string()
        } else {
            match output.exit_code {
                Some(code) => format!("Command exited with code {code}"),
                None => "Command terminated by signal".to_string(),
            }
        };
        let text = if output.output.is_empty() {
            headline
        } else {
            format!("{headline}\n{}", output.output)
        };
        Handled::fail(text).with_exit_code(output.exit_code)
    }

    fn read_file(&self, arguments: &str) -> Handled {
        let args: ReadFileArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };
        if !resolved.is_file() {
            return Handled::fail(format!("File not found: {}", args.path));
        }

        match fs::read(&resolved) {
            Ok(bytes) => Handled::ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(error) => Handled::fail(format!("Failed to read file {}: {error}", args.path)),
        }
    }

    fn write_to_file(&self, arguments: &str) -> Handled {
        let args: WriteToFileArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };
        if resolved.is_dir() {
            return Handled::fail(format!("Path is a directory: {}", args.path));
        }

        if let Some(parent) = resolved.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return Handled::fail(format!(
                    "Failed to create parent directories for {}: {error}",
                    args.path
                ));
            }
        }
        // Parents may now exist as symlinks; check containment again.
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };

        let content = strip_cdata(&args.content);
        match fs::write(&resolved, content) {
            Ok(()) => Handled::ok(format!(
                "Successfully wrote {} bytes to {}",
                content.len(),
                self.guard.relative(&resolved)
            )),
            Err(error) => Handled::fail(format!("Failed to write file {}: {error}", args.path)),
        }
    }

    fn replace_in_file(&self, arguments: &str) -> Handled {
        let args: ReplaceInFileArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };
        if !resolved.is_file() {
            return Handled::fail(format!("File not found: {}", args.path));
        }

        match search_replace::apply_diff_to_file(&resolved, &args.diff) {
            Ok(summary) => Handled::ok(format!(
                "Applied {} block(s) to {}",
                summary.blocks_applied,
                self.guard.relative(&summary.path)
            )),
            Err(error) => Handled::fail(error.to_string()),
        }
    }

    fn list_files(&self, arguments: &str) -> Handled {
        let args: ListFilesArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };
        if !resolved.is_dir() {
            return Handled::fail(format!("Directory not found: {}", args.path));
        }

        let max_depth = if args.recursive { usize::MAX } else { 1 };
        let mut entries: Vec<String> = WalkDir::new(&resolved)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
            .map(|entry| {
                let mut display = self.guard.relative(entry.path());
                if entry.file_type().is_dir() {
                    display.push('/');
                }
                display
            })
            .collect();
        entries.sort();

        let window = paginate(entries.len(), args.block.unwrap_or(1));
        let mut text = format!(
            "Page {} of {} ({} entries)",
            window.page,
            window.total_pages,
            entries.len()
        );
        for entry in &entries[window.start..window.end] {
            text.push('\n');
            text.push_str(entry);
        }
        Handled::ok(text)
    }

    fn search_files(&self, arguments: &str) -> Handled {
        let args: SearchFilesArgs = match decode(arguments) {
            Ok(args) => args,
            Err(error) => return Handled::fail(error),
        };
        let regex = match Regex::new(&args.regex) {
            Ok(regex) => regex,
            Err(error) => return Handled::fail(format!("Invalid regex '{}': {error}", args.regex)),
        };
        let filter = match args.file_pattern.as_deref().map(build_file_filter).transpose() {
            Ok(filter) => filter,
            Err(error) => return Handled::fail(error),
        };
        let resolved = match self.guard.resolve(&args.path) {
            Ok(path) => path,
            Err(error) => return Handled::fail(error.to_string()),
        };
        if !resolved.exists() {
            return Handled::fail(format!("Path not found: {}", args.path));
        }

        let mut sections = Vec::new();
        let mut matches = 0usize;
        let walker = WalkDir::new(&resolved)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        'files: for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = self.guard.relative(entry.path());
            if filter.as_ref().is_some_and(|filter| !filter.is_match(&relative)) {
                continue;
            }
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = content.lines().collect();

            for (index, line) in lines.iter().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches == MAX_SEARCH_RESULTS {
                    sections.push(format!(
                        "[results truncated at {MAX_SEARCH_RESULTS} matches]"
                    ));
                    break 'files;
                }
                matches += 1;
                sections.push(format_match(&relative, &lines, index));
            }
        }

        if matches == 0 {
            return Handled::ok("No matches found.");
        }
        Handled::ok(format!("Found {matches} match(es).\n\n{}", sections.join("\n")))
    }
}

/// One page of a listing. `page` is 1-based and always within
/// `1..=total_pages`; `start..end` indexes the entries on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
}

pub fn paginate(entries: usize, requested: i64) -> PageWindow {
    let total_pages = entries.div_ceil(LIST_PAGE_SIZE).max(1);
    let page = usize::try_from(requested.max(1))
        .unwrap_or(usize::MAX)
        .min(total_pages);
    let start = (page - 1) * LIST_PAGE_SIZE;
    let end = (start + LIST_PAGE_SIZE).min(entries);
    PageWindow {
        page,
        total_pages,
        start: start.min(end),
        end,
    }
}

fn cdata_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?s)^\s*<!\[CDATA\[(.*)\]\]>\s*$").expect("cdata regex must compile")
    })
}

pub(crate) fn strip_cdata(content: &str) -> &str {
    cdata_regex()
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map_or(content, |inner| inner.as_str())
}

fn build_file_filter(pattern: &str) -> Result<GlobSet, String> {
    let mut builder = GlobSetBuilder::new();
    for candidate in [pattern.to_string(), format!("**/{pattern}")] {
        let glob = Glob::new(&candidate)
            .map_err(|error| format!("Invalid file pattern '{pattern}': {error}"))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|error| format!("Invalid file pattern '{pattern}': {error}"))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

fn format_match(relative: &str, lines: &[&str], index: usize) -> String {
    let first = index.saturating_sub(SEARCH_CONTEXT_LINES);
    let last = (index + SEARCH_CONTEXT_LINES).min(lines.len().saturating_sub(1));
    let mut section = format!("{relative}:{}\n", index + 1);
    for (offset, line) in lines[first..=last].iter().enumerate() {
        let number = first + offset + 1;
        let marker = if number == index + 1 { '>' } else { ' ' };
        section.push_str(&format!("{marker}{number:>5}: {line}\n"));
    }
    section
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{format_match, paginate, strip_cdata, PageWindow};

    #[test]
    fn pagination_clamps_to_existing_pages() {
        assert_eq!(
            paginate(250, 0),
            PageWindow {
                page: 1,
                total_pages: 3,
                start: 0,
                end: 100
            }
        );
        assert_eq!(paginate(250, 3).end - paginate(250, 3).start, 50);
        assert_eq!(paginate(250, 99).page, 3);
        assert_eq!(paginate(250, -4).page, 1);
    }

    #[test]
    fn empty_listing_has_one_empty_page() {
        assert_eq!(
            paginate(0, 5),
            PageWindow {
                page: 1,
                total_pages: 1,
                start: 0,
                end: 0
            }
        );
    }

    #[test]
    fn exact_multiple_does_not_add_a_page() {
        assert_eq!(paginate(200, 9).total_pages, 2);
        assert_eq!(paginate(201, 9).total_pages, 3);
    }

    #[test]
    fn cdata_wrapper_is_removed() {
        assert_eq!(strip_cdata("<![CDATA[a\n]]>b]]>"), "a\n]]>b");
        assert_eq!(strip_cdata("plain <![CDATA[x]]>"), "plain <![CDATA[x]]>");
    }

    #[test]
    fn match_context_is_clipped_at_file_edges() {
        let lines = ["one", "two", "three"];
        assert_eq!(
            format_match("a.txt", &lines, 0),
            "a.txt:1\n>    1: one\n     2: two\n     3: three\n"
        );
    }
}
