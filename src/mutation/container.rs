//! Execution containers: where mutation test units run.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::result::{DetectionStatus, MutationResult};
use super::testing::TestRunner;
use super::unit::{MutationTestUnit, panic_message};
use crate::bytecode::ClassPath;

/// Stop condition polled before each unit is dispatched.
pub type StopFlag<'a> = &'a (dyn Fn() -> bool + Sync);

/// Runs units and hands each result to `sink` on the calling thread.
pub trait Container {
    /// Run `units`. Units not started when `stop` turns true are never reported.
    fn execute(
        &self,
        units: Vec<MutationTestUnit>,
        base: &ClassPath,
        runner: &Arc<dyn TestRunner>,
        stop: StopFlag<'_>,
        sink: &mut dyn FnMut(MutationResult),
    );
}

/// Run one unit, turning a panic into `RUN_ERROR`.
fn run_guarded(unit: &MutationTestUnit, base: &ClassPath, runner: &Arc<dyn TestRunner>) -> MutationResult {
    debug!(mutant = %unit.id, tests = unit.tests.len(), "running mutant");
    match catch_unwind(AssertUnwindSafe(|| unit.execute(base, runner))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(mutant = %unit.id, %message, "mutant job panicked");
            MutationResult {
                id: unit.id.clone(),
                status: DetectionStatus::RunError,
                tests_run: 0,
                killing_test: None,
                elapsed_ms: 0,
                detail: Some(message),
            }
        }
    }
}

/// Runs units one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Container for Sequential {
    fn execute(
        &self,
        units: Vec<MutationTestUnit>,
        base: &ClassPath,
        runner: &Arc<dyn TestRunner>,
        stop: StopFlag<'_>,
        sink: &mut dyn FnMut(MutationResult),
    ) {
        for unit in &units {
            if stop() {
                break;
            }
            sink(run_guarded(unit, base, runner));
        }
    }
}

/// Bounded pool of worker threads pulling units from a shared queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    /// Pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    /// Worker count.
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Container for WorkerPool {
    fn execute(
        &self,
        units: Vec<MutationTestUnit>,
        base: &ClassPath,
        runner: &Arc<dyn TestRunner>,
        stop: StopFlag<'_>,
        sink: &mut dyn FnMut(MutationResult),
    ) {
        let queue = Mutex::new(VecDeque::from(units));
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            let mut spawned = 0;
            for worker in 0..self.threads {
                let tx = tx.clone();
                let queue = &queue;
                let result = thread::Builder::new()
                    .name(format!("bytemut-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        loop {
                            if stop() {
                                break;
                            }
                            let Some(unit) = queue.lock().pop_front() else {
                                break;
                            };
                            if tx.send(run_guarded(&unit, base, runner)).is_err() {
                                break;
                            }
                        }
                    });
                match result {
                    Ok(_) => spawned += 1,
                    Err(err) => warn!(worker, error = %err, "failed to spawn worker"),
                }
            }
            drop(tx);

            if spawned == 0 {
                let remaining: Vec<MutationTestUnit> = queue.lock().drain(..).collect();
                Sequential.execute(remaining, base, runner, stop, sink);
                return;
            }
            for result in rx {
                sink(result);
            }
        });
    }
}
