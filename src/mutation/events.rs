//! Event model for append-only mutation run logs.

use serde::{Deserialize, Serialize};

use super::config::{MutationConfig, TimeoutPolicy};
use super::context::MutationIdentifier;
use super::result::MutationResult;

/// Configuration recorded at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    /// Operator ids in application order.
    pub operators: Vec<String>,
    /// Worker count.
    pub threads: usize,
    /// Budget policy.
    pub timeout: TimeoutPolicy,
    /// Group filter.
    #[serde(default)]
    pub filter: Option<String>,
}

impl From<&MutationConfig> for RunConfigSnapshot {
    fn from(config: &MutationConfig) -> Self {
        Self {
            operators: config.operators.clone(),
            threads: config.threads,
            timeout: config.timeout,
            filter: config.filter.clone(),
        }
    }
}

/// Log event emitted during a mutation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MutationEvent {
    /// New run created.
    RunStarted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Number of groups selected for mutation.
        groups: usize,
        /// Effective configuration.
        #[serde(default)]
        config: Option<RunConfigSnapshot>,
    },
    /// A group has no covering test.
    CoverageGap {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Group name.
        group: String,
    },
    /// Mutation point known for this run.
    MutantDiscovered {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Discovered point.
        mutant: MutationIdentifier,
    },
    /// Mutant classified.
    MutantFinished {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Outcome.
        result: MutationResult,
    },
    /// Run interrupted before every mutant ran.
    RunInterrupted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Free-form reason.
        reason: String,
    },
    /// Run completed terminally.
    RunCompleted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
    },
}

/// Current unix timestamp in milliseconds.
pub fn now_timestamp_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0));
    (duration.as_secs() as i64)
        .saturating_mul(1000)
        .saturating_add(duration.subsec_millis() as i64)
}
