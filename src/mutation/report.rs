use std::collections::BTreeMap;

use serde::Serialize;

use super::result::{DetectionStatus, MutationResult};
use super::state::RunSnapshot;

/// Supported output formats for run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Markdown summary.
    Markdown,
    /// JSON summary with all mutants inline.
    Json,
}

/// Per-status counts for a set of mutants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// All mutants.
    pub total: usize,
    /// `KILLED`
    pub killed: usize,
    /// `SURVIVED`
    pub survived: usize,
    /// `TIMED_OUT`
    pub timed_out: usize,
    /// `NON_VIABLE`
    pub non_viable: usize,
    /// `RUN_ERROR`
    pub run_error: usize,
    /// `NO_COVERAGE`
    pub no_coverage: usize,
}

impl StatusCounts {
    fn add(&mut self, status: DetectionStatus) {
        self.total += 1;
        match status {
            DetectionStatus::Killed => self.killed += 1,
            DetectionStatus::Survived => self.survived += 1,
            DetectionStatus::TimedOut => self.timed_out += 1,
            DetectionStatus::NonViable => self.non_viable += 1,
            DetectionStatus::RunError => self.run_error += 1,
            DetectionStatus::NoCoverage => self.no_coverage += 1,
        }
    }

    /// Count for one status.
    pub fn get(&self, status: DetectionStatus) -> usize {
        match status {
            DetectionStatus::Killed => self.killed,
            DetectionStatus::Survived => self.survived,
            DetectionStatus::TimedOut => self.timed_out,
            DetectionStatus::NonViable => self.non_viable,
            DetectionStatus::RunError => self.run_error,
            DetectionStatus::NoCoverage => self.no_coverage,
        }
    }

    /// `killed / (killed + survived + timed_out)` as a percentage, `100` when nothing counts.
    pub fn score(&self) -> f64 {
        let denominator = self.killed + self.survived + self.timed_out;
        if denominator == 0 {
            100.0
        } else {
            (self.killed as f64) * 100.0 / (denominator as f64)
        }
    }
}

/// Counts and score for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    /// Per-status counts.
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Mutation score, percentage.
    pub mutation_score: f64,
}

/// Package key of units without a dotted prefix.
pub const DEFAULT_PACKAGE: &str = "(default)";

/// Package of a unit name: everything before the last `.`.
pub fn package_of(unit: &str) -> &str {
    match unit.rfind('.') {
        Some(dot) if dot > 0 => &unit[..dot],
        _ => DEFAULT_PACKAGE,
    }
}

fn summarize(counts: BTreeMap<String, StatusCounts>) -> BTreeMap<String, GroupSummary> {
    counts
        .into_iter()
        .map(|(name, counts)| {
            (
                name,
                GroupSummary {
                    counts,
                    mutation_score: counts.score(),
                },
            )
        })
        .collect()
}

/// Aggregated run counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Per-status counts over every group.
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Mutation score, percentage.
    pub mutation_score: f64,
    /// Per-group breakdown.
    pub groups: BTreeMap<String, GroupSummary>,
    /// Per-package rollup, keyed by [`package_of`] the mutated unit.
    pub packages: BTreeMap<String, GroupSummary>,
    /// Groups without a covering test.
    pub coverage_gaps: Vec<String>,
}

impl RunSummary {
    /// Aggregate `results`.
    pub fn from_results(results: &[MutationResult], coverage_gaps: &[String]) -> Self {
        let mut counts = StatusCounts::default();
        let mut by_group: BTreeMap<String, StatusCounts> = BTreeMap::new();
        let mut by_package: BTreeMap<String, StatusCounts> = BTreeMap::new();
        for result in results {
            counts.add(result.status);
            by_group
                .entry(result.id.group.clone())
                .or_default()
                .add(result.status);
            by_package
                .entry(package_of(&result.id.unit).to_string())
                .or_default()
                .add(result.status);
        }
        Self {
            counts,
            mutation_score: counts.score(),
            groups: summarize(by_group),
            packages: summarize(by_package),
            coverage_gaps: coverage_gaps.to_vec(),
        }
    }

    /// Build summary from a replayed snapshot.
    pub fn from_snapshot(snapshot: &RunSnapshot) -> Self {
        Self::from_results(&snapshot.results(), &snapshot.coverage_gaps)
    }

    /// True if any mutant survived.
    pub fn has_survivors(&self) -> bool {
        self.counts.survived > 0
    }
}

/// Render a report for `results` in the requested format.
pub fn render_report(
    run_id: &str,
    summary: &RunSummary,
    results: &[MutationResult],
    interrupted: bool,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "run_id": run_id,
            "interrupted": interrupted,
            "summary": summary,
            "mutants": results,
        })),
        ReportFormat::Markdown => Ok(render_markdown(run_id, summary, results, interrupted)),
    }
}

/// Render a replayed run.
pub fn render_snapshot(snapshot: &RunSnapshot, format: ReportFormat) -> Result<String, serde_json::Error> {
    let summary = RunSummary::from_snapshot(snapshot);
    render_report(
        &snapshot.run_id,
        &summary,
        &snapshot.results(),
        snapshot.interrupted,
        format,
    )
}

fn render_markdown(
    run_id: &str,
    summary: &RunSummary,
    results: &[MutationResult],
    interrupted: bool,
) -> String {
    let mut out = format!("# Mutation Run {run_id}\n\n");
    if interrupted {
        out.push_str("- interrupted: true\n\n");
    }

    out.push_str("## Summary\n\n| metric | count |\n|---|---:|\n");
    out.push_str(&format!("| total | {} |\n", summary.counts.total));
    for status in DetectionStatus::ALL {
        out.push_str(&format!(
            "| {} | {} |\n",
            status.as_str().to_ascii_lowercase(),
            summary.counts.get(status)
        ));
    }
    out.push_str(&format!(
        "| mutation score | {:.2}% |\n",
        summary.mutation_score
    ));

    if !summary.groups.is_empty() {
        out.push_str("\n## Groups\n\n| group | killed | survived | timed out | score |\n|---|---:|---:|---:|---:|\n");
        for (group, g) in &summary.groups {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {:.2}% |\n",
                group, g.counts.killed, g.counts.survived, g.counts.timed_out, g.mutation_score
            ));
        }
    }

    if !summary.packages.is_empty() {
        out.push_str("\n## Packages\n\n| package | mutants | killed | survived | timed out | score |\n|---|---:|---:|---:|---:|---:|\n");
        for (package, p) in &summary.packages {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {:.2}% |\n",
                package, p.counts.total, p.counts.killed, p.counts.survived, p.counts.timed_out, p.mutation_score
            ));
        }
    }

    if !summary.coverage_gaps.is_empty() {
        out.push_str("\n## Groups without a test\n\n");
        for group in &summary.coverage_gaps {
            out.push_str(&format!("- {group}\n"));
        }
    }

    let survivors: Vec<&MutationResult> = results
        .iter()
        .filter(|r| r.status == DetectionStatus::Survived)
        .collect();
    if !survivors.is_empty() {
        out.push_str("\n## Survivors\n\n");
        for r in survivors {
            out.push_str(&format!(
                "- `{}` #{} {}::{} [{}] {} ({} tests)\n",
                r.id.group, r.id.index, r.id.unit, r.id.method, r.id.operator, r.id.description, r.tests_run
            ));
        }
    }

    out
}
