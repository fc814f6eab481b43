//! Test listener deciding whether a mutant was detected.

use super::result::DetectionStatus;
use super::testing::{TestCase, TestListener};

/// Records the first failing or erroring test and how many tests started.
///
/// Failures and errors both count as detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckTestHasFailedListener {
    tests_started: usize,
    killing_test: Option<String>,
    message: Option<String>,
}

impl CheckTestHasFailedListener {
    /// Number of tests started.
    pub fn tests_started(&self) -> usize {
        self.tests_started
    }

    /// First failing or erroring test.
    pub fn killing_test(&self) -> Option<&str> {
        self.killing_test.as_deref()
    }

    /// Message of the first failure.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// `KILLED` after any failure, `SURVIVED` otherwise. Zero tests run is `SURVIVED`.
    pub fn status(&self) -> DetectionStatus {
        if self.killing_test.is_some() {
            DetectionStatus::Killed
        } else {
            DetectionStatus::Survived
        }
    }

    fn record(&mut self, test: &TestCase, message: &str) {
        if self.killing_test.is_none() {
            self.killing_test = Some(test.name.clone());
            self.message = Some(message.to_string());
        }
    }
}

impl TestListener for CheckTestHasFailedListener {
    fn on_test_start(&mut self, _test: &TestCase) {
        self.tests_started += 1;
    }

    fn on_test_success(&mut self, _test: &TestCase) {}

    fn on_test_failure(&mut self, test: &TestCase, message: &str) {
        self.record(test, message);
    }

    fn on_test_error(&mut self, test: &TestCase, message: &str) {
        self.record(test, message);
    }

    fn on_test_skipped(&mut self, _test: &TestCase) {}
}
