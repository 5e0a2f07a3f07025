use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, warn};

/// One mutex per physical sandbox directory.
///
/// Tasks that share a fixture directory would otherwise overwrite each
/// other's files.
#[derive(Debug, Default)]
pub struct SandboxLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `root`; paths that canonicalize to the same directory share it.
    pub fn lock_for(&self, root: &Path) -> Arc<Mutex<()>> {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut locks = lock_unpoisoned(&self.locks);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Fixed-size pool of OS threads draining a shared queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` on every item and return the results in item order.
    ///
    /// Items whose `sandbox_of` resolves to the same directory never run at
    /// the same time.
    pub fn run<T, R, K, F>(&self, items: &[T], sandbox_of: K, job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        K: Fn(&T) -> PathBuf + Sync,
        F: Fn(&T) -> R + Sync,
    {
        let locks = SandboxLocks::new();
        let next = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel::<(usize, R)>();
        let thread_count = self.workers.min(items.len());

        let work = |sender: mpsc::Sender<(usize, R)>| loop {
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(item) = items.get(index) else {
                break;
            };
            let lock = locks.lock_for(&sandbox_of(item));
            let _guard = lock_unpoisoned(&lock);
            debug!(index, "worker picked up task");
            if sender.send((index, job(item))).is_err() {
                break;
            }
        };

        thread::scope(|scope| {
            let mut spawned = 0;
            for worker in 0..thread_count {
                let sender = sender.clone();
                let work = &work;
                let result = thread::Builder::new()
                    .name(format!("agent-bench-worker-{worker}"))
                    .spawn_scoped(scope, move || work(sender));
                match result {
                    Ok(_) => spawned += 1,
                    Err(error) => warn!(worker, %error, "failed to spawn worker thread"),
                }
            }
            if spawned == 0 {
                work(sender.clone());
            }
            drop(sender);
        });

        let mut results: Vec<(usize, R)> = receiver.into_iter().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
