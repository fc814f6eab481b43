//! Test cases, the test runner seam and test lifecycle listeners.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::bytecode::{CancelToken, ClassPath, ExecError, Interpreter, Value};

/// What a test expects from its call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// The call returns this value.
    Equals(Value),
    /// The call faults.
    Raises,
}

/// One test: call `unit::method(args)` and check the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique test name.
    pub name: String,
    /// Unit to call into.
    pub unit: String,
    /// Method to call.
    pub method: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Expected result.
    pub expect: Expectation,
    /// Skipped tests are reported but never run.
    #[serde(default)]
    pub ignored: bool,
}

impl TestCase {
    /// Test expecting `unit::method(args) == expected`.
    pub fn equals(
        name: impl Into<String>,
        unit: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        expected: Value,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            method: method.into(),
            args,
            expect: Expectation::Equals(expected),
            ignored: false,
        }
    }

    /// Mark the test as skipped.
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// Read a JSON array of test cases.
pub fn load_tests(path: &Path) -> Result<Vec<TestCase>, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(std::io::Error::from)
}

/// Terminal state of one test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestState {
    /// Expectation met.
    Passed,
    /// Expectation not met.
    Failed(String),
    /// Unexpected fault.
    Errored(String),
    /// Not run.
    Skipped,
}

impl TestState {
    /// True for failures and errors.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Errored(_))
    }
}

/// Outcome of one test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Terminal state.
    pub state: TestState,
    /// Code units entered while running.
    pub touched: BTreeSet<String>,
    /// Wall-clock time.
    pub elapsed: Duration,
}

/// Receives test lifecycle notifications.
pub trait TestListener {
    /// A test is about to run.
    fn on_test_start(&mut self, test: &TestCase);
    /// The test passed.
    fn on_test_success(&mut self, test: &TestCase);
    /// The test's expectation was not met.
    fn on_test_failure(&mut self, test: &TestCase, message: &str);
    /// The test faulted unexpectedly.
    fn on_test_error(&mut self, test: &TestCase, message: &str);
    /// The test was skipped.
    fn on_test_skipped(&mut self, test: &TestCase);
}

/// Forward a terminal state to the matching listener callback.
pub fn notify(listener: &mut dyn TestListener, test: &TestCase, state: &TestState) {
    match state {
        TestState::Passed => listener.on_test_success(test),
        TestState::Failed(message) => listener.on_test_failure(test, message),
        TestState::Errored(message) => listener.on_test_error(test, message),
        TestState::Skipped => listener.on_test_skipped(test),
    }
}

/// Executes single tests against a class path.
pub trait TestRunner: Send + Sync {
    /// Run `test`. Implementations must return promptly once `cancel` trips.
    fn run_test(&self, test: &TestCase, classpath: &ClassPath, cancel: &CancelToken) -> TestOutcome;
}

/// Runs tests on the bytecode interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterTestRunner;

impl TestRunner for InterpreterTestRunner {
    fn run_test(&self, test: &TestCase, classpath: &ClassPath, cancel: &CancelToken) -> TestOutcome {
        if test.ignored {
            return TestOutcome {
                state: TestState::Skipped,
                touched: BTreeSet::new(),
                elapsed: Duration::ZERO,
            };
        }

        let started = Instant::now();
        let mut interp = Interpreter::new(classpath, cancel);
        let result = interp.call(&test.unit, &test.method, test.args.clone());
        let state = match (result, &test.expect) {
            (Ok(actual), Expectation::Equals(expected)) if actual == *expected => TestState::Passed,
            (Ok(actual), Expectation::Equals(expected)) => {
                TestState::Failed(format!("expected {expected}, got {actual}"))
            }
            (Ok(actual), Expectation::Raises) => {
                TestState::Failed(format!("expected a fault, got {actual}"))
            }
            (Err(ExecError::Cancelled), _) => TestState::Errored(ExecError::Cancelled.to_string()),
            (Err(_), Expectation::Raises) => TestState::Passed,
            (Err(err), Expectation::Equals(_)) => TestState::Errored(err.to_string()),
        };

        TestOutcome {
            state,
            touched: interp.into_touched(),
            elapsed: started.elapsed(),
        }
    }
}
