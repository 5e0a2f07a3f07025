//! Task harness: configuration, task loading, and pooled conversation runs.

pub mod config;
pub mod harness;
pub mod logging;
pub mod pool;
pub mod task;

pub use config::{BenchConfig, ConfigError};
pub use harness::{CompletionValidator, Harness, TaskRun, Validator};
pub use pool::{SandboxLocks, WorkerPool};
pub use task::{load_tasks, TaskError, TaskSpec};

use run_store::{RunRecord, RunStore};
use tracing::error;

/// Run every task on `pool`, serializing tasks that share a sandbox root.
pub fn run_all(harness: &Harness, pool: &WorkerPool, tasks: &[TaskSpec]) -> Vec<TaskRun> {
    pool.run(
        tasks,
        |task| task.sandbox_root.clone(),
        |task| harness.run_task(task),
    )
}

/// Like [`run_all`], appending one record per finished run to `store`.
///
/// Record failures are logged; the runs are still returned.
pub fn run_all_recorded(
    harness: &Harness,
    pool: &WorkerPool,
    tasks: &[TaskSpec],
    store: &mut RunStore,
) -> Vec<TaskRun> {
    let model = harness.model_id();
    let runs = run_all(harness, pool, tasks);

    for run in &runs {
        let appended = RunRecord::from_report(&run.task_id, &model, &run.report, run.passed)
            .and_then(|record| store.append(&record));
        if let Err(err) = appended {
            error!(task = %run.task_id, error = %err, "failed to record run");
        }
    }
    runs
}
