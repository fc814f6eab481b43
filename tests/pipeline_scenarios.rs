use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemut::bytecode::{ArithOp, CmpOp, CodeGroup, CodeUnit, Insn, Method, Program, Value};
use bytemut::mutation::{
    Analysis, BytecodeEngine, DetectionStatus, Mutant, MutationConfig, MutationEngine,
    MutationIdentifier, MutationRunError, NullListener, TestCase, TimeoutPolicy, TimeoutStrategy,
};

fn calc() -> CodeUnit {
    CodeUnit::new(
        "Calc",
        vec![Method::new(
            "add",
            2,
            vec![Insn::Load(0), Insn::Load(1), Insn::Arith(ArithOp::Add), Insn::Return],
        )],
    )
}

fn spin() -> CodeUnit {
    // spin(x) returns x for x >= 0 and loops forever otherwise.
    CodeUnit::new(
        "Spin",
        vec![Method::new(
            "spin",
            1,
            vec![
                Insn::Load(0),
                Insn::int(0),
                Insn::Compare(CmpOp::Lt),
                Insn::JumpIf(0),
                Insn::Load(0),
                Insn::Return,
                Insn::Label(0),
                Insn::Jump(0),
            ],
        )],
    )
}

fn add_test() -> TestCase {
    TestCase::equals("adds", "Calc", "add", vec![Value::Int(2), Value::Int(3)], Value::Int(5))
}

fn short_timeout() -> TimeoutPolicy {
    TimeoutPolicy {
        factor: 1.0,
        constant_ms: 200,
        strategy: TimeoutStrategy::Max,
    }
}

struct CountingEngine {
    inner: BytecodeEngine,
    built: AtomicUsize,
}

impl MutationEngine for CountingEngine {
    fn operator_ids(&self) -> Vec<&'static str> {
        self.inner.operator_ids()
    }

    fn find_mutations(&self, group: &CodeGroup) -> Vec<MutationIdentifier> {
        self.inner.find_mutations(group)
    }

    fn get_mutation(&self, group: &CodeGroup, index: usize) -> Mutant {
        self.built.fetch_add(1, Ordering::SeqCst);
        self.inner.get_mutation(group, index)
    }
}

/// Breaks the first mutant of every group so it cannot be verified.
struct BrokenFirstEngine(BytecodeEngine);

impl MutationEngine for BrokenFirstEngine {
    fn operator_ids(&self) -> Vec<&'static str> {
        self.0.operator_ids()
    }

    fn find_mutations(&self, group: &CodeGroup) -> Vec<MutationIdentifier> {
        self.0.find_mutations(group)
    }

    fn get_mutation(&self, group: &CodeGroup, index: usize) -> Mutant {
        let mut mutant = self.0.get_mutation(group, index);
        if index == 0 {
            mutant.group.units[0].methods[0].body = vec![Insn::Pop, Insn::Return];
        }
        mutant
    }
}

#[test]
fn failing_baseline_aborts_before_any_mutant() {
    let engine = Arc::new(CountingEngine {
        inner: BytecodeEngine::default(),
        built: AtomicUsize::new(0),
    });
    let wrong = TestCase::equals("wrong", "Calc", "add", vec![Value::Int(2), Value::Int(2)], Value::Int(5));

    let err = Analysis::new(MutationConfig::default())
        .with_engine(engine.clone())
        .run(&Program::new(vec![calc()]), &[add_test(), wrong], &mut NullListener)
        .expect_err("baseline should fail");

    match err {
        MutationRunError::Coverage(inner) => assert!(inner.to_string().contains("wrong")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.built.load(Ordering::SeqCst), 0);
}

#[test]
fn non_viable_mutant_does_not_affect_its_neighbours() {
    let program = Program::new(vec![CodeUnit::new(
        "Calc",
        vec![Method::new(
            "f",
            2,
            vec![
                Insn::Load(0),
                Insn::Load(1),
                Insn::Arith(ArithOp::Add),
                Insn::Load(1),
                Insn::Arith(ArithOp::Mul),
                Insn::Return,
            ],
        )],
    )]);
    let tests = vec![TestCase::equals(
        "f",
        "Calc",
        "f",
        vec![Value::Int(1), Value::Int(2)],
        Value::Int(6),
    )];
    let engine = Arc::new(BrokenFirstEngine(
        BytecodeEngine::from_ids(&["MATH"]).expect("ids are registered"),
    ));

    let report = Analysis::new(MutationConfig::default())
        .with_engine(engine)
        .run(&program, &tests, &mut NullListener)
        .expect("run should succeed");

    let statuses: Vec<DetectionStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![DetectionStatus::NonViable, DetectionStatus::Killed]);
    assert!(report.results[0].detail.is_some());
    assert_eq!(report.summary.mutation_score, 100.0);
}

#[test]
fn runaway_recursion_kills_the_mutant_and_spares_its_neighbours() {
    // down(n) = if n <= 0 { 0 } else { down(n - 1) }
    let down = CodeUnit::new(
        "Down",
        vec![Method::new(
            "down",
            1,
            vec![
                Insn::Load(0),
                Insn::int(0),
                Insn::Compare(CmpOp::Le),
                Insn::JumpUnless(0),
                Insn::int(0),
                Insn::Return,
                Insn::Label(0),
                Insn::Load(0),
                Insn::int(1),
                Insn::Arith(ArithOp::Sub),
                Insn::call("Down", "down", 1),
                Insn::Return,
            ],
        )],
    );
    let program = Program::new(vec![calc(), down]);
    let tests = vec![
        add_test(),
        TestCase::equals("below zero", "Down", "down", vec![Value::Int(-1)], Value::Int(0)),
    ];
    let config = MutationConfig::default()
        .with_operators(["MATH", "NEGATE_CONDITIONALS"])
        .with_threads(2);

    let report = Analysis::new(config)
        .run(&program, &tests, &mut NullListener)
        .expect("run should succeed");

    assert!(!report.interrupted);
    let down: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.id.group == "Down" && r.id.operator == "NEGATE_CONDITIONALS")
        .collect();
    assert!(!down.is_empty());
    for result in &down {
        assert_eq!(result.status, DetectionStatus::Killed, "{result:?}");
        assert!(
            result.detail.as_deref().is_some_and(|d| d.contains("call depth exceeded")),
            "{result:?}"
        );
    }
    let calc = report.results.iter().find(|r| r.id.group == "Calc").expect("calc mutant");
    assert_eq!(calc.status, DetectionStatus::Killed);
}

#[test]
fn hung_mutants_time_out_and_the_worker_keeps_going() {
    let program = Program::new(vec![calc(), spin()]);
    let tests = vec![
        add_test(),
        TestCase::equals("spins", "Spin", "spin", vec![Value::Int(5)], Value::Int(5)),
    ];
    let config = MutationConfig::default()
        .with_operators(["MATH", "NEGATE_CONDITIONALS"])
        .with_threads(1)
        .with_timeout(short_timeout());

    let report = Analysis::new(config)
        .run(&program, &tests, &mut NullListener)
        .expect("run should succeed");

    let statuses: Vec<(&str, usize, DetectionStatus)> = report
        .results
        .iter()
        .map(|r| (r.id.group.as_str(), r.id.index, r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("Calc", 0, DetectionStatus::Killed),
            ("Spin", 0, DetectionStatus::TimedOut),
            ("Spin", 1, DetectionStatus::TimedOut),
        ]
    );
    for result in report.results.iter().filter(|r| r.status == DetectionStatus::TimedOut) {
        assert!(result.elapsed_ms >= 200, "{result:?}");
        assert!(result.elapsed_ms < 5_000, "{result:?}");
    }
    assert_eq!(report.summary.counts.timed_out, 2);
    assert!(!report.summary.has_survivors());
}

#[test]
fn worker_pool_matches_sequential_results() {
    let program = Program::new(vec![calc(), spin()]);
    let tests = vec![
        add_test(),
        TestCase::equals("spins", "Spin", "spin", vec![Value::Int(5)], Value::Int(5)),
    ];
    let run = |threads: usize| {
        let config = MutationConfig::default()
            .with_threads(threads)
            .with_timeout(short_timeout());
        Analysis::new(config)
            .run(&program, &tests, &mut NullListener)
            .expect("run should succeed")
    };

    let sequential = run(1);
    let pooled = run(4);
    assert!(!sequential.results.is_empty());
    let strip = |report: &bytemut::mutation::RunReport| {
        report
            .results
            .iter()
            .map(|r| (r.id.clone(), r.status, r.tests_run))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&sequential), strip(&pooled));
    assert_eq!(sequential.summary.counts, pooled.summary.counts);
}

#[test]
fn uncovered_group_is_reported_without_running_mutants() {
    let program = Program::new(vec![calc(), spin()]);
    let engine = Arc::new(CountingEngine {
        inner: BytecodeEngine::default(),
        built: AtomicUsize::new(0),
    });

    let report = Analysis::new(MutationConfig::default())
        .with_engine(engine.clone())
        .run(&program, &[add_test()], &mut NullListener)
        .expect("run should succeed");

    assert_eq!(report.coverage_gaps, vec!["Spin".to_string()]);
    let spin_results: Vec<DetectionStatus> = report
        .results
        .iter()
        .filter(|r| r.id.group == "Spin")
        .map(|r| r.status)
        .collect();
    assert!(!spin_results.is_empty());
    assert!(spin_results.iter().all(|s| *s == DetectionStatus::NoCoverage));

    let calc_mutants = report.results.iter().filter(|r| r.id.group == "Calc").count();
    assert_eq!(engine.built.load(Ordering::SeqCst), calc_mutants);
}

#[test]
fn filter_limits_mutated_groups() {
    let program = Program::new(vec![calc(), spin()]);
    let tests = vec![
        add_test(),
        TestCase::equals("spins", "Spin", "spin", vec![Value::Int(5)], Value::Int(5)),
    ];
    let config = MutationConfig::default()
        .with_filter("Calc")
        .with_timeout(short_timeout());
    let report = Analysis::new(config)
        .run(&program, &tests, &mut NullListener)
        .expect("run should succeed");
    assert!(report.results.iter().all(|r| r.id.group == "Calc"));
    assert!(!report.results.is_empty());
}
