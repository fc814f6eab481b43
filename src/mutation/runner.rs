//! Mutation run orchestration: coverage, job building, execution and aggregation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::MutationConfig;
use super::container::{Container, Sequential, WorkerPool};
use super::coverage::{CoverageDatabase, CoverageError};
use super::engine::{BytecodeEngine, MutationEngine};
use super::events::now_timestamp_ms;
use super::operators::CatalogError;
use super::report::RunSummary;
use super::result::{MutationResult, ResultListener};
use super::state::MutationStateError;
use super::testing::{InterpreterTestRunner, TestCase, TestRunner};
use super::unit::MutationTestUnit;
use crate::bytecode::{CancelToken, ClassPath, LoadError, Program};

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Run orchestration errors. Each one aborts the run before or between mutants.
#[derive(Debug, Error)]
pub enum MutationRunError {
    /// Operator configuration error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// The unmutated program failed to load.
    #[error("program error: {0}")]
    Load(#[from] LoadError),
    /// The unmutated suite did not pass.
    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),
    /// A result listener failed.
    #[error("state error: {0}")]
    State(#[from] MutationStateError),
}

/// Result of a finished (or interrupted) run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Run id.
    pub run_id: String,
    /// Results in group and index order.
    pub results: Vec<MutationResult>,
    /// Groups without a covering test.
    pub coverage_gaps: Vec<String>,
    /// Aggregated counts.
    pub summary: RunSummary,
    /// True if the run stopped before every mutant ran.
    pub interrupted: bool,
}

/// Run id of the form `run-<unix ms>-<pid>-<sequence>`.
pub fn generate_run_id() -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!("run-{}-{}-{}", now_timestamp_ms(), std::process::id(), seq)
}

/// A configured mutation analysis.
#[derive(Clone)]
pub struct Analysis {
    config: MutationConfig,
    engine: Option<Arc<dyn MutationEngine>>,
    runner: Arc<dyn TestRunner>,
    interrupt: CancelToken,
}

impl Analysis {
    /// Analysis using the configured operators and the interpreter test runner.
    pub fn new(config: MutationConfig) -> Self {
        Self {
            config,
            engine: None,
            runner: Arc::new(InterpreterTestRunner),
            interrupt: CancelToken::new(),
        }
    }

    /// Use `engine` instead of one built from the configured operator ids.
    pub fn with_engine(mut self, engine: Arc<dyn MutationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use `runner` to execute tests.
    pub fn with_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Stop dispatching mutants once `interrupt` trips.
    pub fn with_interrupt(mut self, interrupt: CancelToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    fn engine(&self) -> Result<Arc<dyn MutationEngine>, CatalogError> {
        match &self.engine {
            Some(engine) => Ok(Arc::clone(engine)),
            None => Ok(Arc::new(BytecodeEngine::from_ids(&self.config.operators)?)),
        }
    }

    /// Mutate every selected group of `program` and classify each mutant against `tests`.
    pub fn run(
        &self,
        program: &Program,
        tests: &[TestCase],
        listener: &mut dyn ResultListener,
    ) -> Result<RunReport, MutationRunError> {
        let engine = self.engine()?;
        let base = ClassPath::load_program(program)?;
        let coverage = CoverageDatabase::build_within(
            &base,
            tests,
            self.runner.as_ref(),
            self.config.timeout.baseline_limit(),
        )?;

        let groups: Vec<_> = program
            .groups()
            .into_iter()
            .filter(|g| {
                self.config
                    .filter
                    .as_deref()
                    .is_none_or(|filter| g.name.contains(filter))
            })
            .collect();

        let run_id = generate_run_id();
        info!(run_id = %run_id, groups = groups.len(), operators = ?engine.operator_ids(), "mutation run started");
        listener.on_run_start(&run_id, groups.len())?;

        let mut results = Vec::new();
        let mut coverage_gaps = Vec::new();
        let mut units = Vec::new();
        let mut discovered = Vec::new();

        for group in groups {
            let points = engine.find_mutations(&group);
            if !coverage.is_covered(&group.name) {
                info!(group = %group.name, mutants = points.len(), "group has no covering test");
                listener.on_coverage_gap(&group.name)?;
                coverage_gaps.push(group.name.clone());
                results.extend(points.iter().cloned().map(MutationResult::no_coverage));
                discovered.extend(points);
                continue;
            }

            let tests = Arc::new(coverage.tests_for(&group.name));
            let baseline = coverage.baseline_for(&group.name);
            let group = Arc::new(group);
            debug!(group = %group.name, mutants = points.len(), tests = tests.len(), "built jobs");
            for id in &points {
                units.push(MutationTestUnit {
                    id: id.clone(),
                    group: Arc::clone(&group),
                    engine: Arc::clone(&engine),
                    tests: Arc::clone(&tests),
                    baseline,
                    timeout: self.config.timeout,
                });
            }
            discovered.extend(points);
        }

        listener.on_discovered(&discovered)?;
        for result in &results {
            listener.on_mutant(result)?;
        }

        let total = units.len();
        let listener_failed = AtomicBool::new(false);
        let stop = || self.interrupt.is_cancelled() || listener_failed.load(Ordering::SeqCst);
        let mut listener_error = None;
        let mut completed = 0usize;
        let container: Box<dyn Container> = if self.config.threads > 1 {
            Box::new(WorkerPool::new(self.config.threads))
        } else {
            Box::new(Sequential)
        };
        container.execute(units, &base, &self.runner, &stop, &mut |result: MutationResult| {
            completed += 1;
            debug!(mutant = %result.id, status = %result.status, "{completed}/{total}");
            if listener_error.is_none() {
                if let Err(err) = listener.on_mutant(&result) {
                    listener_failed.store(true, Ordering::SeqCst);
                    listener_error = Some(err);
                }
            }
            results.push(result);
        });
        if let Some(err) = listener_error {
            return Err(err.into());
        }

        let interrupted = completed < total;
        if interrupted {
            warn!(completed, total, "run interrupted");
        }
        results.sort_by(|a, b| (&a.id.group, a.id.index).cmp(&(&b.id.group, b.id.index)));
        let summary = RunSummary::from_results(&results, &coverage_gaps);
        listener.on_run_end(&summary, interrupted)?;
        info!(
            run_id = %run_id,
            killed = summary.counts.killed,
            survived = summary.counts.survived,
            score = summary.mutation_score,
            "mutation run finished"
        );

        Ok(RunReport {
            run_id,
            results,
            coverage_gaps,
            summary,
            interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;
    use crate::bytecode::{ArithOp, CodeGroup, CodeUnit, Insn, Method, Value};
    use crate::mutation::context::MutationIdentifier;
    use crate::mutation::engine::Mutant;
    use crate::mutation::result::{DetectionStatus, NullListener};
    use crate::mutation::state::{EventLogListener, events_path, replay_events};

    fn program() -> Program {
        Program::new(vec![
            CodeUnit::new(
                "Calc",
                vec![Method::new(
                    "add",
                    2,
                    vec![Insn::Load(0), Insn::Load(1), Insn::Arith(ArithOp::Add), Insn::Return],
                )],
            ),
            CodeUnit::new(
                "Orphan",
                vec![Method::new("neg", 1, vec![Insn::Load(0), Insn::Neg, Insn::Return])],
            ),
        ])
    }

    fn tests() -> Vec<TestCase> {
        vec![TestCase::equals(
            "adds",
            "Calc",
            "add",
            vec![Value::Int(2), Value::Int(3)],
            Value::Int(5),
        )]
    }

    #[test]
    fn uncovered_groups_report_no_coverage() {
        let config = MutationConfig::default().with_operators(["MATH", "INVERT_NEGS"]);
        let report = Analysis::new(config)
            .run(&program(), &tests(), &mut NullListener)
            .expect("run should succeed");

        assert_eq!(report.coverage_gaps, vec!["Orphan".to_string()]);
        let statuses: Vec<(&str, DetectionStatus)> = report
            .results
            .iter()
            .map(|r| (r.id.group.as_str(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("Calc", DetectionStatus::Killed),
                ("Orphan", DetectionStatus::NoCoverage),
            ]
        );
        assert_eq!(report.summary.mutation_score, 100.0);
        assert!(!report.interrupted);
    }

    #[test]
    fn unknown_operator_is_fatal() {
        let config = MutationConfig::default().with_operators(["MATH", "BOGUS"]);
        let err = Analysis::new(config)
            .run(&program(), &tests(), &mut NullListener)
            .expect_err("unknown operator should fail");
        assert!(matches!(err, MutationRunError::Catalog(CatalogError::UnknownOperator(_))));
    }

    struct CountingEngine {
        inner: BytecodeEngine,
        built: Mutex<usize>,
    }

    impl MutationEngine for CountingEngine {
        fn operator_ids(&self) -> Vec<&'static str> {
            self.inner.operator_ids()
        }

        fn find_mutations(&self, group: &CodeGroup) -> Vec<MutationIdentifier> {
            self.inner.find_mutations(group)
        }

        fn get_mutation(&self, group: &CodeGroup, index: usize) -> Mutant {
            *self.built.lock() += 1;
            self.inner.get_mutation(group, index)
        }
    }

    #[test]
    fn failing_baseline_builds_no_mutant() {
        let engine = Arc::new(CountingEngine {
            inner: BytecodeEngine::default(),
            built: Mutex::new(0),
        });
        let mut broken = tests();
        broken[0].expect = crate::mutation::testing::Expectation::Equals(Value::Int(6));

        let err = Analysis::new(MutationConfig::default())
            .with_engine(engine.clone())
            .run(&program(), &broken, &mut NullListener)
            .expect_err("baseline should fail");
        assert!(matches!(err, MutationRunError::Coverage(_)));
        assert_eq!(*engine.built.lock(), 0);
    }

    #[test]
    fn tripped_interrupt_reports_nothing_but_gaps() {
        let interrupt = CancelToken::new();
        interrupt.cancel();
        let report = Analysis::new(MutationConfig::default())
            .with_interrupt(interrupt)
            .run(&program(), &tests(), &mut NullListener)
            .expect("run should succeed");
        assert!(report.interrupted);
        assert!(report
            .results
            .iter()
            .all(|r| r.status == DetectionStatus::NoCoverage));
    }

    #[test]
    fn event_log_matches_report() {
        let tmp = tempdir().expect("tempdir should be created");
        let mut listener = EventLogListener::new(tmp.path());
        let report = Analysis::new(MutationConfig::default().with_threads(2))
            .run(&program(), &tests(), &mut listener)
            .expect("run should succeed");

        let run_dir = listener.run_dir().expect("run dir should exist");
        let snapshot = replay_events(&events_path(&run_dir)).expect("replay should work");
        assert_eq!(snapshot.run_id, report.run_id);
        assert!(snapshot.completed);
        assert!(snapshot.pending_mutants().is_empty());
        assert_eq!(snapshot.results(), report.results);
        assert_eq!(RunSummary::from_snapshot(&snapshot), report.summary);
    }
}
