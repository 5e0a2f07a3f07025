use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agent_bench::{load_tasks, logging, run_all_recorded, BenchConfig, Harness, WorkerPool};
use anyhow::{bail, Context, Result};
use chat_backend_http::HttpBackend;
use run_store::RunStore;

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("agent_bench: {error:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every task passed.
fn run() -> Result<bool> {
    let mut args = std::env::args_os().skip(1);
    let Some(tasks_path) = args.next().map(PathBuf::from) else {
        bail!("usage: agent_bench <tasks.json>");
    };
    if args.next().is_some() {
        bail!("usage: agent_bench <tasks.json>");
    }

    let config = BenchConfig::from_env().context("failed to load configuration")?;
    let tasks = load_tasks(&tasks_path).context("failed to load tasks")?;
    let backend = HttpBackend::new(config.backend_config())
        .context("failed to configure the model backend")?;

    let harness = Harness::new(Arc::new(backend))
        .with_loop_config(config.loop_config())
        .with_command_timeout(config.command_timeout())
        .with_venv_dir(config.paths.venv_dir.clone());
    let pool = WorkerPool::new(config.tasks.workers);
    let mut store = RunStore::in_dir(&config.paths.output_dir)
        .context("failed to open the run record file")?;

    let runs = run_all_recorded(&harness, &pool, &tasks, &mut store);

    let passed = runs.iter().filter(|run| run.passed).count();
    for run in &runs {
        println!(
            "{:<6} {} ({}, {} rounds, {} tool calls)",
            if run.passed { "PASS" } else { "FAIL" },
            run.task_id,
            run.report.outcome.label(),
            run.report.metrics.total_rounds,
            run.report.metrics.tool_calls
        );
    }
    println!(
        "{passed}/{} tasks passed; records in {}",
        runs.len(),
        store.path().display()
    );

    Ok(passed == runs.len())
}
