use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;
use tool_sandbox::{ToolOutcome, ToolResult, ToolSandbox, TOOL_ERROR_PREFIX};

fn new_sandbox(root: &Path) -> ToolSandbox {
    ToolSandbox::new(root).expect("sandbox root should be valid")
}

fn call(sandbox: &ToolSandbox, name: &str, arguments: serde_json::Value) -> ToolResult {
    sandbox.dispatch("call-1", name, &arguments.to_string())
}

fn success_text(result: &ToolResult) -> &str {
    match &result.outcome {
        ToolOutcome::Success(text) => text,
        ToolOutcome::Error(error) => panic!("expected success, got error: {error}"),
    }
}

fn error_text(result: &ToolResult) -> &str {
    match &result.outcome {
        ToolOutcome::Error(error) => error,
        ToolOutcome::Success(text) => panic!("expected error, got success: {text}"),
    }
}

#[test]
fn write_read_and_replace_round_through_the_sandbox() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let written = call(
        &sandbox,
        "write_to_file",
        json!({"path": "src/app.py", "content": "def main():\n    return 1\n"}),
    );
    assert_eq!(
        success_text(&written),
        "Successfully wrote 25 bytes to src/app.py"
    );

    let replaced = call(
        &sandbox,
        "replace_in_file",
        json!({
            "path": "src/app.py",
            "diff": "<<<<<<< SEARCH\n    return 1\n=======\n    return 2\n>>>>>>> REPLACE"
        }),
    );
    assert_eq!(success_text(&replaced), "Applied 1 block(s) to src/app.py");

    let read = call(&sandbox, "read_file", json!({"path": "src/app.py"}));
    assert_eq!(success_text(&read), "def main():\n    return 2\n");
    assert_eq!(read.id, "call-1");
    assert_eq!(read.tool_name, "read_file");
}

#[test]
fn cdata_wrapper_is_stripped_before_writing() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let written = call(
        &sandbox,
        "write_to_file",
        json!({"path": "a.txt", "content": "<![CDATA[x < y && y > z]]>"}),
    );
    assert!(!written.is_error());
    assert_eq!(
        fs::read_to_string(workspace.path().join("a.txt")).expect("read"),
        "x < y && y > z"
    );
}

#[test]
fn missing_file_is_reported_as_error_envelope() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let result = call(&sandbox, "read_file", json!({"path": "nope/missing.py"}));

    assert_eq!(error_text(&result), "File not found: nope/missing.py");
    assert_eq!(
        result.to_message_content(),
        format!("{TOOL_ERROR_PREFIX}File not found: nope/missing.py")
    );
}

#[test]
fn invalid_bytes_are_replaced_when_reading() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("bin.dat"), b"ok\xff").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let result = call(&sandbox, "read_file", json!({"path": "bin.dat"}));
    assert_eq!(success_text(&result), "ok\u{fffd}");
}

#[test]
fn escaping_paths_are_rejected_for_every_file_tool() {
    let workspace = tempdir().expect("temp workspace");
    let inner = workspace.path().join("inner");
    fs::create_dir_all(&inner).expect("inner");
    fs::write(workspace.path().join("secret.txt"), "secret").expect("secret");
    let sandbox = new_sandbox(&inner);

    let attempts = [
        ("read_file", json!({"path": "../secret.txt"})),
        ("read_file", json!({"path": workspace.path().join("secret.txt")})),
        ("write_to_file", json!({"path": "a/../../escape.txt", "content": "x"})),
        (
            "replace_in_file",
            json!({"path": "../secret.txt", "diff": "<<<<<<< SEARCH\ns\n=======\nS\n>>>>>>> REPLACE"}),
        ),
        ("list_files", json!({"path": ".."})),
        ("search_files", json!({"path": "../", "regex": "secret"})),
    ];

    for (tool, arguments) in attempts {
        let result = call(&sandbox, tool, arguments);
        assert!(
            error_text(&result).starts_with("path escapes sandbox root"),
            "{tool}: {:?}",
            result.outcome
        );
    }
    assert!(!workspace.path().join("escape.txt").exists());
    assert_eq!(
        fs::read_to_string(workspace.path().join("secret.txt")).expect("secret"),
        "secret"
    );
}

#[cfg(unix)]
#[test]
fn symlink_out_of_the_root_is_rejected() {
    let outside = tempdir().expect("outside");
    fs::write(outside.path().join("data.txt"), "outside").expect("seed");
    let workspace = tempdir().expect("temp workspace");
    std::os::unix::fs::symlink(outside.path(), workspace.path().join("link")).expect("symlink");
    let sandbox = new_sandbox(workspace.path());

    let result = call(&sandbox, "read_file", json!({"path": "link/data.txt"}));
    assert!(error_text(&result).starts_with("path escapes sandbox root"));
}

#[test]
fn unknown_tool_and_bad_arguments_do_not_panic() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let unknown = sandbox.dispatch("c", "format_disk", "{}");
    assert_eq!(error_text(&unknown), "Unknown tool: format_disk");

    let malformed = sandbox.dispatch("c", "read_file", "{not json");
    assert!(error_text(&malformed).starts_with("Invalid tool arguments:"));
}

#[test]
fn replace_in_file_names_the_missing_block() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("main.py"), "print('hi')\n").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let result = call(
        &sandbox,
        "replace_in_file",
        json!({
            "path": "main.py",
            "diff": "<<<<<<< SEARCH\nprint('bye')\n=======\nprint('ciao')\n>>>>>>> REPLACE"
        }),
    );

    let error = error_text(&result);
    assert!(error.contains("block 1"), "{error}");
    assert!(error.contains("print('bye')"), "{error}");
    assert_eq!(
        fs::read_to_string(workspace.path().join("main.py")).expect("read"),
        "print('hi')\n"
    );
}

#[test]
fn list_files_pages_sorted_entries() {
    let workspace = tempdir().expect("temp workspace");
    for index in 0..150 {
        fs::write(workspace.path().join(format!("f{index:03}.txt")), "").expect("seed");
    }
    fs::create_dir_all(workspace.path().join("sub/deeper")).expect("dirs");
    fs::write(workspace.path().join("sub/deeper/x.txt"), "").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let first = call(&sandbox, "list_files", json!({"path": "."}));
    let first_lines: Vec<&str> = success_text(&first).lines().collect();
    assert_eq!(first_lines[0], "Page 1 of 2 (151 entries)");
    assert_eq!(first_lines[1], "f000.txt");
    assert_eq!(first_lines.len(), 101);

    let clamped = call(&sandbox, "list_files", json!({"path": ".", "block": 7}));
    let clamped_lines: Vec<&str> = success_text(&clamped).lines().collect();
    assert_eq!(clamped_lines[0], "Page 2 of 2 (151 entries)");
    assert_eq!(clamped_lines.last(), Some(&"sub/"));

    let recursive = call(
        &sandbox,
        "list_files",
        json!({"path": "sub", "recursive": true}),
    );
    assert_eq!(
        success_text(&recursive),
        "Page 1 of 1 (2 entries)\nsub/deeper/\nsub/deeper/x.txt"
    );
}

#[test]
fn list_files_requires_a_directory() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let result = call(&sandbox, "list_files", json!({"path": "absent"}));
    assert_eq!(error_text(&result), "Directory not found: absent");
}

#[test]
fn search_files_reports_context_and_respects_glob() {
    let workspace = tempdir().expect("temp workspace");
    fs::create_dir_all(workspace.path().join("pkg")).expect("dirs");
    fs::write(
        workspace.path().join("pkg/mod.py"),
        "import os\n\ndef target():\n    pass\n\nx = 1\n",
    )
    .expect("seed");
    fs::write(workspace.path().join("notes.md"), "def target in docs\n").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let result = call(
        &sandbox,
        "search_files",
        json!({"path": ".", "regex": r"def \w+\(", "file_pattern": "*.py"}),
    );

    assert_eq!(
        success_text(&result),
        "Found 1 match(es).\n\npkg/mod.py:3\n     1: import os\n     2: \n>    3: def target():\n     4:     pass\n     5: \n"
    );
}

#[test]
fn search_files_reports_invalid_regex_and_empty_results() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "alpha\n").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let invalid = call(&sandbox, "search_files", json!({"path": ".", "regex": "("}));
    assert!(error_text(&invalid).starts_with("Invalid regex '('"));

    let empty = call(&sandbox, "search_files", json!({"path": ".", "regex": "omega"}));
    assert_eq!(success_text(&empty), "No matches found.");
}

#[cfg(unix)]
#[test]
fn execute_command_runs_in_the_root_and_reports_exit_codes() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("marker.txt"), "").expect("seed");
    let sandbox = new_sandbox(workspace.path());

    let listed = call(
        &sandbox,
        "execute_command",
        json!({"command": "ls", "requires_approval": "true"}),
    );
    assert_eq!(listed.exit_code, Some(0));
    assert!(success_text(&listed).contains("marker.txt"));

    let failed = call(
        &sandbox,
        "execute_command",
        json!({"command": "ls does-not-exist"}),
    );
    assert!(failed.exit_code.is_some_and(|code| code != 0));
    assert!(error_text(&failed).starts_with("Command exited with code"));
}

#[cfg(unix)]
#[test]
fn execute_command_does_not_interpret_shell_metacharacters() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let result = call(
        &sandbox,
        "execute_command",
        json!({"command": "echo 'a b' ; touch pwned"}),
    );
    assert_eq!(success_text(&result), "a b ; touch pwned\n");
    assert!(!workspace.path().join("pwned").exists());
}

#[cfg(unix)]
#[test]
fn execute_command_times_out_and_kills_the_child() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path()).with_command_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let result = call(&sandbox, "execute_command", json!({"command": "sleep 5"}));

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.exit_code, None);
    assert!(error_text(&result).starts_with("Command timed out"));
}

#[cfg(unix)]
#[test]
fn cancellation_kills_a_running_command() {
    let workspace = tempdir().expect("temp workspace");
    let cancel = Arc::new(AtomicBool::new(false));
    let sandbox = new_sandbox(workspace.path()).with_cancel_signal(cancel.clone());

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.store(true, Ordering::Release);
    });
    let started = Instant::now();
    let result = call(&sandbox, "execute_command", json!({"command": "sleep 5"}));
    trigger.join().expect("trigger thread");

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(error_text(&result), "Command cancelled");
}

#[cfg(unix)]
#[test]
fn command_output_is_capped() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("big.txt"), "x".repeat(5_000)).expect("seed");
    let sandbox = new_sandbox(workspace.path()).with_max_output_bytes(100);

    let result = call(&sandbox, "execute_command", json!({"command": "cat big.txt"}));
    let text = success_text(&result);
    assert!(text.ends_with("\n[truncated]"));
    assert_eq!(text.len(), 100 + "\n[truncated]".len());
}

#[cfg(unix)]
#[test]
fn timeout_kills_grandchildren_holding_the_output_pipe() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path()).with_command_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let result = call(
        &sandbox,
        "execute_command",
        json!({"command": "sh -c \"sleep 6; echo done\""}),
    );

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(error_text(&result).starts_with("Command timed out"));
    assert!(!error_text(&result).contains("done"));
}

#[cfg(unix)]
#[test]
fn background_jobs_do_not_hold_the_dispatch_open() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let started = Instant::now();
    let result = call(
        &sandbox,
        "execute_command",
        json!({"command": "sh -c \"sleep 8 & echo started\""}),
    );

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(success_text(&result), "started\n");
}

#[cfg(unix)]
#[test]
fn configured_venv_is_on_path_and_exported() {
    use std::os::unix::fs::PermissionsExt;

    let workspace = tempdir().expect("temp workspace");
    let tools = tempdir().expect("venv parent");
    let venv = tools.path().join("venv");
    let bin = venv.join("bin");
    fs::create_dir_all(&bin).expect("bin dir");
    let script = bin.join("venv-hello");
    fs::write(&script, "#!/bin/sh\necho hello from venv\n").expect("script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

    let sandbox = new_sandbox(workspace.path())
        .with_venv(&venv)
        .with_venv_python("false");

    let exported = call(&sandbox, "execute_command", json!({"command": "printenv VIRTUAL_ENV"}));
    assert_eq!(success_text(&exported), format!("{}\n", venv.display()));

    let resolved = call(&sandbox, "execute_command", json!({"command": "venv-hello"}));
    assert_eq!(success_text(&resolved), "hello from venv\n");
}

#[cfg(unix)]
#[test]
fn missing_venv_is_created_with_the_configured_interpreter() {
    let workspace = tempdir().expect("temp workspace");
    let tools = tempdir().expect("venv parent");
    let sandbox = new_sandbox(workspace.path())
        .with_venv(tools.path().join("absent"))
        .with_venv_python("false");

    let result = call(&sandbox, "execute_command", json!({"command": "true"}));
    assert!(error_text(&result).starts_with("failed to create virtual environment"));
    assert!(!tools.path().join("absent").exists());
}

#[test]
fn unbalanced_quotes_are_a_tool_error() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let result = call(&sandbox, "execute_command", json!({"command": "echo 'open"}));
    assert!(error_text(&result).starts_with("command could not be tokenized"));
}

#[test]
fn registered_artifacts_are_confined_and_cleaned() {
    let workspace = tempdir().expect("temp workspace");
    let sandbox = new_sandbox(workspace.path());

    let artifact = sandbox.register_artifact("out/report.json").expect("register");
    fs::create_dir_all(artifact.parent().expect("parent")).expect("dirs");
    fs::write(&artifact, "{}").expect("artifact");
    assert!(sandbox.register_artifact("../elsewhere").is_err());

    assert_eq!(sandbox.artifacts().cleanup(), 1);
    assert!(!artifact.exists());
}
