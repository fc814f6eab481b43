//! Mutation run configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::operators;

/// How the per-mutant time budget is derived from the baseline test time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    /// `max(constant, factor * baseline)`
    Max,
    /// `factor * baseline + constant`
    PercentAndConstant,
}

/// Time budget for executing the tests scoped to one mutant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Multiplier applied to the baseline time.
    pub factor: f64,
    /// Constant floor or addend, in milliseconds.
    pub constant_ms: u64,
    /// Combination rule.
    pub strategy: TimeoutStrategy,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            factor: 1.25,
            constant_ms: 4000,
            strategy: TimeoutStrategy::Max,
        }
    }
}

impl TimeoutPolicy {
    /// Budget for tests whose unmutated run took `baseline`.
    pub fn budget(&self, baseline: Duration) -> Duration {
        let scaled = Duration::try_from_secs_f64(baseline.as_secs_f64() * self.factor.max(0.0))
            .unwrap_or(Duration::MAX);
        let constant = Duration::from_millis(self.constant_ms);
        match self.strategy {
            TimeoutStrategy::Max => scaled.max(constant),
            TimeoutStrategy::PercentAndConstant => scaled.saturating_add(constant),
        }
    }

    /// Limit for a single test of the unmutated suite, which has no baseline yet.
    pub fn baseline_limit(&self) -> Duration {
        self.budget(Duration::ZERO)
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a mutation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MutationConfig {
    /// Operator ids, applied in this order.
    pub operators: Vec<String>,
    /// Worker threads. `1` runs mutants sequentially.
    pub threads: usize,
    /// Per-mutant time budget.
    pub timeout: TimeoutPolicy,
    /// Optional substring filter on group names.
    pub filter: Option<String>,
    /// Root directory for persisted run logs. `None` disables the event log.
    pub run_root: Option<PathBuf>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            operators: operators::catalog_ids()
                .into_iter()
                .map(str::to_string)
                .collect(),
            threads: 1,
            timeout: TimeoutPolicy::default(),
            filter: None,
            run_root: None,
        }
    }
}

impl MutationConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Set the operator list.
    pub fn with_operators<I, S>(mut self, operators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operators = operators.into_iter().map(Into::into).collect();
        self
    }

    /// Set the worker count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the timeout policy.
    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the group filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set run-log root.
    pub fn with_run_root(mut self, run_root: impl Into<PathBuf>) -> Self {
        self.run_root = Some(run_root.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_and_builder_overrides_work() {
        let default = MutationConfig::default();
        assert_eq!(default.threads, 1);
        assert_eq!(default.operators.first().map(String::as_str), Some("MATH"));
        assert!(default.run_root.is_none());

        let cfg = MutationConfig::default()
            .with_operators(["SET_ORDERING"])
            .with_threads(0)
            .with_filter("Lists")
            .with_run_root("/tmp/runs-a");

        assert_eq!(cfg.operators, vec!["SET_ORDERING".to_string()]);
        assert_eq!(cfg.threads, 1);
        assert_eq!(cfg.filter.as_deref(), Some("Lists"));
        assert_eq!(cfg.run_root, Some(PathBuf::from("/tmp/runs-a")));
    }

    #[test]
    fn timeout_budget_strategies() {
        let max = TimeoutPolicy {
            factor: 2.0,
            constant_ms: 100,
            strategy: TimeoutStrategy::Max,
        };
        assert_eq!(max.budget(Duration::from_millis(10)), Duration::from_millis(100));
        assert_eq!(max.budget(Duration::from_millis(80)), Duration::from_millis(160));

        let additive = TimeoutPolicy {
            strategy: TimeoutStrategy::PercentAndConstant,
            ..max
        };
        assert_eq!(additive.budget(Duration::from_millis(10)), Duration::from_millis(120));
        assert_eq!(max.baseline_limit(), Duration::from_millis(100));
        assert_eq!(additive.baseline_limit(), Duration::from_millis(100));
    }

    #[test]
    fn load_fills_missing_fields() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("bytemut.json");
        std::fs::write(&path, r#"{"threads": 4, "timeout": {"factor": 3.0, "constant_ms": 50, "strategy": "percent_and_constant"}}"#)
            .expect("config should write");

        let cfg = MutationConfig::load(&path).expect("config should load");
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.timeout.strategy, TimeoutStrategy::PercentAndConstant);
        assert_eq!(cfg.operators, MutationConfig::default().operators);

        std::fs::write(&path, "{threads").expect("config should write");
        assert!(matches!(MutationConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
