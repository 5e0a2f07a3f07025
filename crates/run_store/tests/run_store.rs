use std::fs;
use std::io::Write;

use chat_backend::Message;
use conversation::{LoopOutcome, RunMetrics, RunReport, Transcript};
use run_store::{RunRecord, RunStore, RunStoreError, RUNS_FILE_NAME};

fn report(outcome: LoopOutcome) -> RunReport {
    RunReport {
        outcome,
        transcript: Transcript::new(vec![Message::system("s"), Message::assistant("done")]),
        metrics: RunMetrics {
            total_rounds: 2,
            ..RunMetrics::default()
        },
    }
}

#[test]
fn appended_records_load_back_in_order() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut store = RunStore::in_dir(&dir.path().join("out")).expect("store should open");
    assert_eq!(store.path(), dir.path().join("out").join(RUNS_FILE_NAME));

    let passed = RunRecord::from_report("task-a", "gpt-x", &report(LoopOutcome::Completed), true)
        .expect("record");
    let failed = RunRecord::from_report(
        "task-b",
        "gpt-x",
        &report(LoopOutcome::Error {
            round: 2,
            cause: "network error: reset".to_string(),
        }),
        false,
    )
    .expect("record");
    store.append(&passed).expect("append");
    store.append(&failed).expect("append");

    let loaded = RunStore::load(store.path()).expect("load");
    assert_eq!(loaded, vec![passed, failed.clone()]);
    assert_eq!(failed.outcome, "error");
    assert_eq!(failed.failed_round, Some(2));
    assert_eq!(failed.error_cause.as_deref(), Some("network error: reset"));
    assert_ne!(loaded[0].run_id, loaded[1].run_id);
}

#[test]
fn reopening_appends_instead_of_truncating() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("runs.jsonl");
    let record = |task: &str| {
        RunRecord::from_report(task, "m", &report(LoopOutcome::Completed), true).expect("record")
    };

    RunStore::open(&path).expect("open").append(&record("one")).expect("append");
    RunStore::open(&path).expect("reopen").append(&record("two")).expect("append");

    let tasks: Vec<String> = RunStore::load(&path)
        .expect("load")
        .into_iter()
        .map(|record| record.task_id)
        .collect();
    assert_eq!(tasks, vec!["one", "two"]);
}

#[test]
fn malformed_line_is_reported_with_its_number() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("runs.jsonl");
    let good = RunRecord::from_report("t", "m", &report(LoopOutcome::Completed), true)
        .expect("record");
    let mut file = fs::File::create(&path).expect("file");
    writeln!(file, "{}", serde_json::to_string(&good).expect("json")).expect("write");
    writeln!(file).expect("write");
    writeln!(file, "{{\"type\":\"run\"").expect("write");

    let error = RunStore::load(&path).expect_err("line 3 is truncated");
    assert!(
        matches!(error, RunStoreError::JsonLineParse { line: 3, .. }),
        "{error}"
    );
}

fn load_error(dir: &std::path::Path, name: &str, record: &RunRecord) -> RunStoreError {
    let path = dir.join(name);
    RunStore::open(&path).expect("open").append(record).expect("append");
    RunStore::load(&path).expect_err("invalid record")
}

#[test]
fn invalid_fields_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let base = RunRecord::from_report("t", "m", &report(LoopOutcome::Completed), true)
        .expect("record");

    let version = load_error(
        dir.path(),
        "version.jsonl",
        &RunRecord {
            version: 2,
            ..base.clone()
        },
    );
    assert!(
        matches!(version, RunStoreError::UnsupportedVersion { found: 2, line: 1, .. }),
        "{version}"
    );

    let run_id = load_error(
        dir.path(),
        "run_id.jsonl",
        &RunRecord {
            run_id: "not-a-uuid".to_string(),
            ..base.clone()
        },
    );
    assert!(matches!(run_id, RunStoreError::InvalidRunId { .. }), "{run_id}");

    let timestamp = load_error(
        dir.path(),
        "timestamp.jsonl",
        &RunRecord {
            created_at: "yesterday".to_string(),
            ..base
        },
    );
    assert!(
        matches!(timestamp, RunStoreError::InvalidTimestamp { .. }),
        "{timestamp}"
    );
}

#[test]
fn duplicate_run_ids_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("runs.jsonl");
    let record = RunRecord::from_report("t", "m", &report(LoopOutcome::Completed), true)
        .expect("record");
    let mut store = RunStore::open(&path).expect("open");
    store.append(&record).expect("append");
    store.append(&record).expect("append");

    let error = RunStore::load(&path).expect_err("duplicate");
    assert!(matches!(error, RunStoreError::DuplicateRunId { line: 2, .. }), "{error}");
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("runs.jsonl");
    let record = RunRecord::from_report("t", "m", &report(LoopOutcome::Completed), true)
        .expect("record");
    let mut value = serde_json::to_value(&record).expect("value");
    value["extra"] = serde_json::json!(1);
    fs::write(&path, format!("{value}\n")).expect("write");

    let error = RunStore::load(&path).expect_err("unknown field");
    assert!(matches!(error, RunStoreError::JsonLineParse { line: 1, .. }), "{error}");
}
