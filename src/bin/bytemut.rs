use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use bytemut::bytecode::{CancelToken, Program};
use bytemut::mutation::state::events_path;
use bytemut::mutation::{
    Analysis, EventLogListener, MutationConfig, NullListener, RunConfigSnapshot, ReportFormat,
    ResultListener, TimeoutPolicy, TimeoutStrategy, catalog, load_tests, render_report,
    render_snapshot, replay_events,
};

#[derive(Debug, Parser)]
#[command(name = "bytemut")]
#[command(about = "Mutation testing for bytecode programs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mutate a program and classify every mutant against its tests.
    Run {
        /// Program JSON file.
        program: PathBuf,
        /// Test suite JSON file.
        #[arg(long)]
        tests: PathBuf,
        /// Configuration JSON file; flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Multiplier applied to the baseline test time.
        #[arg(long)]
        timeout_factor: Option<f64>,
        /// Constant timeout component in milliseconds.
        #[arg(long)]
        timeout_const: Option<u64>,
        /// Combine factor and constant as a sum instead of a max.
        #[arg(long)]
        timeout_sum: bool,
        /// Comma-separated operator ids.
        #[arg(long, value_delimiter = ',')]
        operators: Option<Vec<String>>,
        /// Only mutate groups whose name contains this substring.
        #[arg(long)]
        filter: Option<String>,
        /// Output format.
        #[arg(long, value_enum, default_value = "md")]
        format: OutputFormat,
        /// Directory receiving one event log per run.
        #[arg(long)]
        run_root: Option<PathBuf>,
    },
    /// List the operator catalog.
    Operators,
    /// Render the report of a recorded run.
    Report {
        /// Run directory holding `events.jsonl`.
        run_dir: PathBuf,
        /// Output format.
        #[arg(long, value_enum, default_value = "md")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Markdown
    Md,
    /// JSON
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Md => ReportFormat::Markdown,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

fn install_signal_handler_once(token: &CancelToken) -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    let token = token.clone();
    let result = INIT.get_or_init(move || {
        ctrlc::set_handler(move || token.cancel()).map_err(|e| e.to_string())
    });
    match result {
        Ok(()) => Ok(()),
        Err(msg) => Err(anyhow::anyhow!("failed to install signal handler: {msg}")),
    }
}

fn read_program(path: &Path) -> Result<Program> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read program {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid program {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn make_config(
    config: Option<PathBuf>,
    threads: Option<usize>,
    timeout_factor: Option<f64>,
    timeout_const: Option<u64>,
    timeout_sum: bool,
    operators: Option<Vec<String>>,
    filter: Option<String>,
    run_root: Option<PathBuf>,
) -> Result<MutationConfig> {
    let mut cfg = match config {
        Some(path) => MutationConfig::load(&path)?,
        None => MutationConfig::default(),
    };
    if let Some(threads) = threads {
        cfg = cfg.with_threads(threads);
    }
    let mut timeout: TimeoutPolicy = cfg.timeout;
    if let Some(factor) = timeout_factor {
        timeout.factor = factor;
    }
    if let Some(constant_ms) = timeout_const {
        timeout.constant_ms = constant_ms;
    }
    if timeout_sum {
        timeout.strategy = TimeoutStrategy::PercentAndConstant;
    }
    cfg = cfg.with_timeout(timeout);
    if let Some(operators) = operators {
        cfg = cfg.with_operators(operators);
    }
    if let Some(filter) = filter {
        cfg = cfg.with_filter(filter);
    }
    if let Some(run_root) = run_root {
        cfg = cfg.with_run_root(run_root);
    }
    Ok(cfg)
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Run {
            program,
            tests,
            config,
            threads,
            timeout_factor,
            timeout_const,
            timeout_sum,
            operators,
            filter,
            format,
            run_root,
        } => {
            let config = make_config(
                config,
                threads,
                timeout_factor,
                timeout_const,
                timeout_sum,
                operators,
                filter,
                run_root,
            )?;
            let program = read_program(&program)?;
            let tests = load_tests(&tests)
                .with_context(|| format!("failed to read tests {}", tests.display()))?;

            let interrupt = CancelToken::new();
            install_signal_handler_once(&interrupt)?;
            let analysis = Analysis::new(config.clone()).with_interrupt(interrupt);

            let mut event_log = config
                .run_root
                .as_ref()
                .map(|root| EventLogListener::new(root).with_config(RunConfigSnapshot::from(&config)));
            let mut null = NullListener;
            let listener: &mut dyn ResultListener = match event_log.as_mut() {
                Some(log) => log,
                None => &mut null,
            };
            let report = analysis.run(&program, &tests, listener)?;
            if let Some(run_dir) = event_log.as_ref().and_then(EventLogListener::run_dir) {
                eprintln!("run dir: {}", run_dir.display());
            }
            println!(
                "{}",
                render_report(
                    &report.run_id,
                    &report.summary,
                    &report.results,
                    report.interrupted,
                    format.into(),
                )?
            );
            Ok(if report.summary.has_survivors() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Operators => {
            for op in catalog() {
                println!("{}\t{}", op.id(), op.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Report { run_dir, format } => {
            let snapshot = replay_events(&events_path(&run_dir))
                .with_context(|| format!("failed to replay {}", run_dir.display()))?;
            println!("{}", render_snapshot(&snapshot, format.into())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
