//! Coverage-scoped test mapping.
//!
//! The unmutated suite runs once. Each test's touched units are folded into a map from
//! group to the tests covering it, in the order the tests were first observed.
//!
//! Every baseline test runs on its own thread with a time limit. A test that exceeds the
//! limit is cancelled and counted as a baseline failure.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::TimeoutPolicy;
use super::testing::{TestCase, TestOutcome, TestRunner, TestState};
use super::unit::panic_message;
use crate::bytecode::{CancelToken, ClassPath, CodeGroup, EXEC_STACK_SIZE, group_of};

/// Coverage collection failures. Fatal: no mutant is generated after one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverageError {
    /// Tests failed or errored against the unmutated program.
    #[error("tests did not pass without mutation: {}", .failing.join(", "))]
    BaselineFailed {
        /// Names of the failing tests, in run order.
        failing: Vec<String>,
    },
}

/// Group to covering tests, plus baseline timings. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct CoverageDatabase {
    tests: Vec<TestCase>,
    elapsed: Vec<Duration>,
    by_group: BTreeMap<String, Vec<usize>>,
}

impl CoverageDatabase {
    /// Run `tests` against `classpath` and record what each one touches, limiting each test
    /// to the default policy's constant.
    pub fn build(
        classpath: &ClassPath,
        tests: &[TestCase],
        runner: &dyn TestRunner,
    ) -> Result<Self, CoverageError> {
        Self::build_within(classpath, tests, runner, TimeoutPolicy::default().baseline_limit())
    }

    /// Run `tests` against `classpath` and record what each one touches. A test running
    /// longer than `limit` is cancelled and fails the baseline.
    pub fn build_within(
        classpath: &ClassPath,
        tests: &[TestCase],
        runner: &dyn TestRunner,
        limit: Duration,
    ) -> Result<Self, CoverageError> {
        let mut failing = Vec::new();
        let mut elapsed = Vec::with_capacity(tests.len());
        let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (index, test) in tests.iter().enumerate() {
            let outcome = match run_bounded(test, classpath, runner, limit) {
                Ok(outcome) => outcome,
                Err(message) => {
                    warn!(test = %test.name, %message, "baseline test did not finish");
                    elapsed.push(limit);
                    failing.push(test.name.clone());
                    continue;
                }
            };
            elapsed.push(outcome.elapsed);
            match &outcome.state {
                TestState::Passed => {}
                TestState::Skipped => {
                    debug!(test = %test.name, "skipped during coverage");
                    continue;
                }
                TestState::Failed(message) | TestState::Errored(message) => {
                    debug!(test = %test.name, %message, "baseline failure");
                    failing.push(test.name.clone());
                    continue;
                }
            }
            for unit in &outcome.touched {
                let covering = by_group.entry(group_of(unit).to_string()).or_default();
                if !covering.contains(&index) {
                    covering.push(index);
                }
            }
        }

        if !failing.is_empty() {
            return Err(CoverageError::BaselineFailed { failing });
        }

        info!(
            tests = tests.len(),
            groups = by_group.len(),
            "coverage collected"
        );
        Ok(Self {
            tests: tests.to_vec(),
            elapsed,
            by_group,
        })
    }

    /// Tests covering `group`, first-observed first.
    pub fn tests_for(&self, group: &str) -> Vec<TestCase> {
        self.by_group
            .get(group)
            .map(|indices| indices.iter().map(|&i| self.tests[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Summed baseline time of the tests covering `group`.
    pub fn baseline_for(&self, group: &str) -> Duration {
        self.by_group
            .get(group)
            .map(|indices| indices.iter().map(|&i| self.elapsed[i]).sum())
            .unwrap_or_default()
    }

    /// True if at least one test covers `group`.
    pub fn is_covered(&self, group: &str) -> bool {
        self.by_group.contains_key(group)
    }

    /// Names of `groups` no test covers.
    pub fn uncovered<'a>(&self, groups: &'a [CodeGroup]) -> Vec<&'a str> {
        groups
            .iter()
            .map(|g| g.name.as_str())
            .filter(|name| !self.is_covered(name))
            .collect()
    }
}

/// Run one test on a fresh thread, cancelling it after `limit`.
fn run_bounded(
    test: &TestCase,
    classpath: &ClassPath,
    runner: &dyn TestRunner,
    limit: Duration,
) -> Result<TestOutcome, String> {
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("bytemut-coverage".to_string())
            .stack_size(EXEC_STACK_SIZE)
            .spawn_scoped(scope, move || {
                let _ = tx.send(runner.run_test(test, classpath, &thread_cancel));
            })
            .map_err(|err| err.to_string())?;

        let received = rx.recv_timeout(limit);
        if received.is_err() {
            cancel.cancel();
        }
        let joined = handle.join();
        match (received, joined) {
            (Ok(outcome), _) => Ok(outcome),
            (Err(_), Err(panic)) => Err(panic_message(panic.as_ref())),
            (Err(RecvTimeoutError::Timeout), Ok(())) => {
                Err(format!("timed out after {} ms", limit.as_millis()))
            }
            (Err(RecvTimeoutError::Disconnected), Ok(())) => {
                Err("runner returned no outcome".to_string())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Instant;

    use super::*;
    use crate::bytecode::{CodeUnit, Insn, Method, Program, Value};
    use crate::mutation::testing::InterpreterTestRunner;

    fn program() -> Program {
        Program::new(vec![
            CodeUnit::new(
                "Outer",
                vec![Method::new("get", 0, vec![Insn::call("Outer$Inner", "get", 0), Insn::Return])],
            ),
            CodeUnit::new("Outer$Inner", vec![Method::new("get", 0, vec![Insn::int(7), Insn::Return])]),
            CodeUnit::new("Lonely", vec![Method::new("get", 0, vec![Insn::int(1), Insn::Return])]),
        ])
    }

    #[test]
    fn maps_groups_to_first_observed_tests() {
        let cp = ClassPath::load_program(&program()).expect("program should load");
        let tests = vec![
            TestCase::equals("inner", "Outer$Inner", "get", vec![], Value::Int(7)),
            TestCase::equals("outer", "Outer", "get", vec![], Value::Int(7)),
            TestCase::equals("skipped", "Lonely", "get", vec![], Value::Int(1)).ignore(),
        ];
        let db = CoverageDatabase::build(&cp, &tests, &InterpreterTestRunner).expect("baseline passes");

        let names: Vec<String> = db.tests_for("Outer").into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["inner", "outer"]);
        assert!(db.tests_for("Lonely").is_empty());
        assert_eq!(db.uncovered(&program().groups()), vec!["Lonely"]);
    }

    #[test]
    fn failing_baseline_lists_every_failing_test() {
        let cp = ClassPath::load_program(&program()).expect("program should load");
        let tests = vec![
            TestCase::equals("wrong", "Lonely", "get", vec![], Value::Int(2)),
            TestCase::equals("fine", "Lonely", "get", vec![], Value::Int(1)),
            TestCase::equals("missing", "Gone", "get", vec![], Value::Int(1)),
        ];
        let err = CoverageDatabase::build(&cp, &tests, &InterpreterTestRunner).expect_err("baseline fails");
        assert_eq!(
            err,
            CoverageError::BaselineFailed {
                failing: vec!["wrong".to_string(), "missing".to_string()]
            }
        );
    }

    /// Passes every test except `hang`, which only returns once cancelled.
    struct HangsOnOne;

    impl TestRunner for HangsOnOne {
        fn run_test(&self, test: &TestCase, classpath: &ClassPath, cancel: &CancelToken) -> TestOutcome {
            if test.name != "hang" {
                return InterpreterTestRunner.run_test(test, classpath, cancel);
            }
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
    fn hanging_baseline_test_fails_within_limit() {
        let cp = ClassPath::load_program(&program()).expect("program should load");
        let tests = vec![
            TestCase::equals("fine", "Lonely", "get", vec![], Value::Int(1)),
            TestCase::equals("hang", "Lonely", "get", vec![], Value::Int(1)),
        ];
        let started = Instant::now();
        let err = CoverageDatabase::build_within(&cp, &tests, &HangsOnOne, Duration::from_millis(50))
            .expect_err("hanging test fails the baseline");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            err,
            CoverageError::BaselineFailed {
                failing: vec!["hang".to_string()]
            }
        );
    }

    #[test]
    fn deep_recursion_in_baseline_reports_overflow_instead_of_aborting() {
        let program = Program::new(vec![CodeUnit::new(
            "Deep",
            vec![Method::new("down", 0, vec![Insn::call("Deep", "down", 0), Insn::Return])],
        )]);
        let cp = ClassPath::load_program(&program).expect("program should load");
        let tests = vec![TestCase::equals("deep", "Deep", "down", vec![], Value::Int(0))];
        let err = CoverageDatabase::build(&cp, &tests, &InterpreterTestRunner)
            .expect_err("call depth is exceeded");
        assert_eq!(
            err,
            CoverageError::BaselineFailed {
                failing: vec!["deep".to_string()]
            }
        );
    }
}
