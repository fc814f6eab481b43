//! One isolated execution job per mutation point.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::config::TimeoutPolicy;
use super::context::MutationIdentifier;
use super::engine::MutationEngine;
use super::listener::CheckTestHasFailedListener;
use super::result::{DetectionStatus, MutationResult};
use super::testing::{TestCase, TestListener, TestRunner, TestState, notify};
use crate::bytecode::{CancelToken, ClassPath, CodeGroup, EXEC_STACK_SIZE};

enum ExecEvent {
    Started(usize),
    Finished(usize, TestState),
}

/// Everything needed to build, load and test one mutant.
#[derive(Clone)]
pub struct MutationTestUnit {
    /// Point activated by this job.
    pub id: MutationIdentifier,
    /// Unmutated group.
    pub group: Arc<CodeGroup>,
    /// Operator set used to rebuild the mutant.
    pub engine: Arc<dyn MutationEngine>,
    /// Tests covering the group, in coverage order.
    pub tests: Arc<Vec<TestCase>>,
    /// Summed baseline time of `tests`.
    pub baseline: Duration,
    /// Budget policy.
    pub timeout: TimeoutPolicy,
}

impl std::fmt::Debug for MutationTestUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationTestUnit")
            .field("id", &self.id)
            .field("tests", &self.tests.len())
            .field("baseline", &self.baseline)
            .finish()
    }
}

impl MutationTestUnit {
    /// Human-readable description.
    pub fn description(&self) -> String {
        self.id.to_string()
    }

    /// Time allowed for the scoped tests.
    pub fn budget(&self) -> Duration {
        self.timeout.budget(self.baseline)
    }

    /// Build the mutant, load it into a private copy of `base` and run the scoped tests,
    /// stopping at the first failure.
    pub fn execute(&self, base: &ClassPath, runner: &Arc<dyn TestRunner>) -> MutationResult {
        let started = Instant::now();
        let mutant = self.engine.get_mutation(&self.group, self.id.index);

        let artifact = match mutant.artifact() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(mutant = %self.id, error = %err, "mutant could not be encoded");
                return self.result(DetectionStatus::RunError, None, started, Some(err.to_string()));
            }
        };
        let classpath = match base.with_artifact(&artifact) {
            Ok(classpath) => classpath,
            Err(err) => {
                warn!(mutant = %self.id, error = %err, "non-viable mutant");
                return self.result(DetectionStatus::NonViable, None, started, Some(err.to_string()));
            }
        };

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let tests = Arc::clone(&self.tests);
        let thread_runner = Arc::clone(runner);
        let thread_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("bytemut-exec-{}", self.id.index))
            .stack_size(EXEC_STACK_SIZE)
            .spawn(move || {
                for (index, test) in tests.iter().enumerate() {
                    if thread_cancel.is_cancelled() {
                        return;
                    }
                    if test.ignored {
                        if tx.send(ExecEvent::Finished(index, TestState::Skipped)).is_err() {
                            return;
                        }
                        continue;
                    }
                    if tx.send(ExecEvent::Started(index)).is_err() {
                        return;
                    }
                    let outcome = thread_runner.run_test(test, &classpath, &thread_cancel);
                    let failed = outcome.state.is_failure();
                    if tx.send(ExecEvent::Finished(index, outcome.state)).is_err() || failed {
                        return;
                    }
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                return self.result(DetectionStatus::RunError, None, started, Some(err.to_string()));
            }
        };

        let budget = self.budget();
        let deadline = Instant::now().checked_add(budget);
        let mut listener = CheckTestHasFailedListener::default();
        loop {
            let remaining =
                deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
            match rx.recv_timeout(remaining) {
                Ok(ExecEvent::Started(index)) => listener.on_test_start(&self.tests[index]),
                Ok(ExecEvent::Finished(index, state)) => {
                    notify(&mut listener, &self.tests[index], &state);
                }
                Err(RecvTimeoutError::Timeout) => {
                    cancel.cancel();
                    debug!(mutant = %self.id, budget_ms = budget.as_millis() as u64, "timed out");
                    return self.result(DetectionStatus::TimedOut, Some(&listener), started, None);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Err(panic) = handle.join() {
            let message = panic_message(panic.as_ref());
            warn!(mutant = %self.id, %message, "test execution panicked");
            return self.result(DetectionStatus::RunError, Some(&listener), started, Some(message));
        }

        let detail = listener.message().map(str::to_string);
        self.result(listener.status(), Some(&listener), started, detail)
    }

    fn result(
        &self,
        status: DetectionStatus,
        listener: Option<&CheckTestHasFailedListener>,
        started: Instant,
        detail: Option<String>,
    ) -> MutationResult {
        MutationResult {
            id: self.id.clone(),
            status,
            tests_run: listener.map_or(0, CheckTestHasFailedListener::tests_started),
            killing_test: listener.and_then(|l| l.killing_test().map(str::to_string)),
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::bytecode::{CodeUnit, Insn, Method, Program, Value};
    use crate::mutation::config::TimeoutStrategy;
    use crate::mutation::engine::BytecodeEngine;
    use crate::mutation::testing::{InterpreterTestRunner, TestOutcome};

    fn program() -> Program {
        Program::new(vec![CodeUnit::new(
            "Answer",
            vec![Method::new("get", 0, vec![Insn::int(42), Insn::Return])],
        )])
    }

    fn unit(tests: Vec<TestCase>, constant_ms: u64) -> MutationTestUnit {
        let group = program().group("Answer").expect("group exists");
        let engine: Arc<dyn MutationEngine> =
            Arc::new(BytecodeEngine::from_ids(&["RETURN_VALS"]).expect("ids are registered"));
        let id = engine.find_mutations(&group).remove(0);
        MutationTestUnit {
            id,
            group: Arc::new(group),
            engine,
            tests: Arc::new(tests),
            baseline: Duration::ZERO,
            timeout: TimeoutPolicy {
                factor: 1.0,
                constant_ms,
                strategy: TimeoutStrategy::Max,
            },
        }
    }

    fn base() -> ClassPath {
        ClassPath::load_program(&program()).expect("program should load")
    }

    #[test]
    fn failing_test_kills_and_stops_execution() {
        let tests = vec![
            TestCase::equals("pinned", "Answer", "get", vec![], Value::Int(42)),
            TestCase::equals("never-run", "Answer", "get", vec![], Value::Int(42)),
        ];
        let runner: Arc<dyn TestRunner> = Arc::new(InterpreterTestRunner);
        let result = unit(tests, 5_000).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::Killed);
        assert_eq!(result.killing_test.as_deref(), Some("pinned"));
        assert_eq!(result.tests_run, 1);
        assert_eq!(result.detail.as_deref(), Some("expected 42, got 0"));
    }

    #[test]
    fn no_tests_survives_with_zero_run() {
        let runner: Arc<dyn TestRunner> = Arc::new(InterpreterTestRunner);
        let result = unit(Vec::new(), 5_000).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::Survived);
        assert_eq!(result.tests_run, 0);
    }

    #[test]
    fn skipped_tests_are_not_counted_as_run() {
        let tests = vec![
            TestCase::equals("ignored", "Answer", "get", vec![], Value::Int(0)).ignore(),
            TestCase::equals("pinned", "Answer", "get", vec![], Value::Int(42)),
        ];
        let runner: Arc<dyn TestRunner> = Arc::new(InterpreterTestRunner);
        let result = unit(tests, 5_000).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::Killed);
        assert_eq!(result.killing_test.as_deref(), Some("pinned"));
        assert_eq!(result.tests_run, 1);
    }

    #[test]
    fn only_skipped_tests_survive_with_zero_run() {
        let tests = vec![TestCase::equals("ignored", "Answer", "get", vec![], Value::Int(42)).ignore()];
        let runner: Arc<dyn TestRunner> = Arc::new(InterpreterTestRunner);
        let result = unit(tests, 5_000).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::Survived);
        assert_eq!(result.tests_run, 0);
    }

    struct Hanging;

    impl TestRunner for Hanging {
        fn run_test(&self, _test: &TestCase, _cp: &ClassPath, cancel: &CancelToken) -> TestOutcome {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            TestOutcome {
                state: TestState::Errored("cancelled".to_string()),
                touched: BTreeSet::new(),
                elapsed: Duration::ZERO,
            }
        }
    }

    #[test]
    fn hanging_tests_time_out_within_budget() {
        let tests = vec![TestCase::equals("hang", "Answer", "get", vec![], Value::Int(42))];
        let runner: Arc<dyn TestRunner> = Arc::new(Hanging);
        let started = Instant::now();
        let result = unit(tests, 50).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::TimedOut);
        assert_eq!(result.tests_run, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct Exploding;

    impl TestRunner for Exploding {
        fn run_test(&self, _test: &TestCase, _cp: &ClassPath, _cancel: &CancelToken) -> TestOutcome {
            panic!("runner exploded");
        }
    }

    #[test]
    fn runner_panics_become_run_errors() {
        let tests = vec![TestCase::equals("boom", "Answer", "get", vec![], Value::Int(42))];
        let runner: Arc<dyn TestRunner> = Arc::new(Exploding);
        let result = unit(tests, 5_000).execute(&base(), &runner);
        assert_eq!(result.status, DetectionStatus::RunError);
        assert_eq!(result.detail.as_deref(), Some("runner exploded"));
    }
}
