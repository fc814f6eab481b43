//! Per-mutant results and the report consumer seam.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::MutationIdentifier;
use super::report::RunSummary;
use super::state::MutationStateError;

/// Final classification of one mutant. Assigned once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionStatus {
    /// At least one scoped test failed or errored.
    Killed,
    /// Every scoped test passed.
    Survived,
    /// The scoped tests exceeded their time budget.
    TimedOut,
    /// The mutant could not be loaded.
    NonViable,
    /// Infrastructure failure while running the mutant.
    RunError,
    /// No test covers the mutated group.
    NoCoverage,
}

impl DetectionStatus {
    /// Every status, in report order.
    pub const ALL: [DetectionStatus; 6] = [
        Self::Killed,
        Self::Survived,
        Self::TimedOut,
        Self::NonViable,
        Self::RunError,
        Self::NoCoverage,
    ];

    /// Stable upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Killed => "KILLED",
            Self::Survived => "SURVIVED",
            Self::TimedOut => "TIMED_OUT",
            Self::NonViable => "NON_VIABLE",
            Self::RunError => "RUN_ERROR",
            Self::NoCoverage => "NO_COVERAGE",
        }
    }

    /// True if the suite noticed the mutant.
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Killed | Self::TimedOut)
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Mutation point.
    pub id: MutationIdentifier,
    /// Classification.
    pub status: DetectionStatus,
    /// Number of tests started.
    pub tests_run: usize,
    /// First failing or erroring test.
    #[serde(default)]
    pub killing_test: Option<String>,
    /// Wall-clock time spent on the mutant.
    pub elapsed_ms: u64,
    /// Failure message, load error or panic text.
    #[serde(default)]
    pub detail: Option<String>,
}

impl MutationResult {
    /// Result for a mutant that was never run because nothing covers it.
    pub fn no_coverage(id: MutationIdentifier) -> Self {
        Self {
            id,
            status: DetectionStatus::NoCoverage,
            tests_run: 0,
            killing_test: None,
            elapsed_ms: 0,
            detail: None,
        }
    }
}

/// Receives run progress. Every callback may fail; a failure stops further dispatch.
pub trait ResultListener {
    /// A run started.
    fn on_run_start(&mut self, run_id: &str, groups: usize) -> Result<(), MutationStateError>;

    /// Every point that will be reported for this run.
    fn on_discovered(&mut self, _ids: &[MutationIdentifier]) -> Result<(), MutationStateError> {
        Ok(())
    }

    /// `group` has no covering test.
    fn on_coverage_gap(&mut self, group: &str) -> Result<(), MutationStateError>;

    /// One mutant finished. Results arrive in completion order.
    fn on_mutant(&mut self, result: &MutationResult) -> Result<(), MutationStateError>;

    /// The run ended.
    fn on_run_end(
        &mut self,
        summary: &RunSummary,
        interrupted: bool,
    ) -> Result<(), MutationStateError>;
}

/// Listener that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl ResultListener for NullListener {
    fn on_run_start(&mut self, _run_id: &str, _groups: usize) -> Result<(), MutationStateError> {
        Ok(())
    }

    fn on_coverage_gap(&mut self, _group: &str) -> Result<(), MutationStateError> {
        Ok(())
    }

    fn on_mutant(&mut self, _result: &MutationResult) -> Result<(), MutationStateError> {
        Ok(())
    }

    fn on_run_end(
        &mut self,
        _summary: &RunSummary,
        _interrupted: bool,
    ) -> Result<(), MutationStateError> {
        Ok(())
    }
}
