//! Mutation analysis: operators, mutant building, scoped execution and classification.

pub mod config;
pub mod container;
pub mod context;
pub mod coverage;
pub mod engine;
pub mod events;
pub mod listener;
pub mod operators;
/// Human-readable and machine-friendly report generation.
pub mod report;
pub mod result;
pub mod runner;
pub mod state;
pub mod testing;
pub mod unit;

pub use config::{MutationConfig, TimeoutPolicy, TimeoutStrategy};
pub use container::{Container, Sequential, WorkerPool};
pub use context::{MutationContext, MutationIdentifier};
pub use coverage::{CoverageDatabase, CoverageError};
pub use engine::{BytecodeEngine, Mutant, MutationEngine};
pub use events::{MutationEvent, RunConfigSnapshot};
pub use listener::CheckTestHasFailedListener;
pub use operators::{CatalogError, MutationOperator, catalog, catalog_ids};
pub use report::{ReportFormat, RunSummary, render_report, render_snapshot};
pub use result::{DetectionStatus, MutationResult, NullListener, ResultListener};
pub use runner::{Analysis, MutationRunError, RunReport, generate_run_id};
pub use state::{EventLogListener, MutationStateError, RunSnapshot, replay_events};
pub use testing::{
    Expectation, InterpreterTestRunner, TestCase, TestListener, TestRunner, TestState, load_tests,
};
pub use unit::MutationTestUnit;
