//! Event log persistence and run-state projection.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::context::MutationIdentifier;
use super::events::{MutationEvent, RunConfigSnapshot, now_timestamp_ms};
use super::report::RunSummary;
use super::result::{DetectionStatus, MutationResult, ResultListener};

/// Status derived from the event stream for each mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Discovered, no result yet.
    Pending,
    /// Terminal.
    Finished(DetectionStatus),
}

impl MutationStatus {
    /// True if status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Per-mutant state in a replay snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantState {
    /// Mutation point.
    pub id: MutationIdentifier,
    /// Derived status.
    pub status: MutationStatus,
    /// Recorded result, once finished.
    pub result: Option<MutationResult>,
}

/// Materialized run state derived from `events.jsonl`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    /// Run id.
    pub run_id: String,
    /// Configuration recorded at start.
    pub config: Option<RunConfigSnapshot>,
    /// Mutants by group and index.
    pub mutants: BTreeMap<(String, usize), MutantState>,
    /// Groups without a covering test.
    pub coverage_gaps: Vec<String>,
    /// Number of malformed event lines ignored.
    pub malformed_lines: usize,
    /// Whether any interruption event has occurred.
    pub interrupted: bool,
    /// Whether a completion event has occurred.
    pub completed: bool,
}

impl RunSnapshot {
    /// Mutants without a recorded result.
    pub fn pending_mutants(&self) -> Vec<MutationIdentifier> {
        self.mutants
            .values()
            .filter(|m| !m.status.is_terminal())
            .map(|m| m.id.clone())
            .collect()
    }

    /// Recorded results in group and index order.
    pub fn results(&self) -> Vec<MutationResult> {
        self.mutants
            .values()
            .filter_map(|m| m.result.clone())
            .collect()
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum MutationStateError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Event could not be encoded.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Replay event log from `events.jsonl` into a snapshot.
pub fn replay_events(events_path: &Path) -> Result<RunSnapshot, MutationStateError> {
    let file = std::fs::File::open(events_path)?;
    let reader = BufReader::new(file);

    let mut snapshot = RunSnapshot {
        run_id: String::new(),
        config: None,
        mutants: BTreeMap::new(),
        coverage_gaps: Vec::new(),
        malformed_lines: 0,
        interrupted: false,
        completed: false,
    };

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<MutationEvent>(&line) {
            Ok(event) => event,
            Err(_) => {
                snapshot.malformed_lines += 1;
                continue;
            }
        };

        match event {
            MutationEvent::RunStarted { run_id, config, .. } => {
                if snapshot.run_id.is_empty() {
                    snapshot.run_id = run_id;
                }
                snapshot.config = config;
            }
            MutationEvent::CoverageGap { group, .. } => {
                if !snapshot.coverage_gaps.contains(&group) {
                    snapshot.coverage_gaps.push(group);
                }
            }
            MutationEvent::MutantDiscovered { mutant, .. } => {
                snapshot
                    .mutants
                    .entry((mutant.group.clone(), mutant.index))
                    .or_insert(MutantState {
                        id: mutant,
                        status: MutationStatus::Pending,
                        result: None,
                    });
            }
            MutationEvent::MutantFinished { result, .. } => {
                let key = (result.id.group.clone(), result.id.index);
                let state = snapshot.mutants.entry(key).or_insert_with(|| MutantState {
                    id: result.id.clone(),
                    status: MutationStatus::Pending,
                    result: None,
                });
                state.status = MutationStatus::Finished(result.status);
                state.result = Some(result);
            }
            MutationEvent::RunInterrupted { .. } => {
                snapshot.interrupted = true;
            }
            MutationEvent::RunCompleted { .. } => {
                snapshot.completed = true;
            }
        }
    }

    Ok(snapshot)
}

/// Append one event as JSONL line.
pub fn append_event(events_path: &Path, event: &MutationEvent) -> Result<(), MutationStateError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(events_path)?;
    let json = serde_json::to_string(event)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// Path of the event log inside a run directory.
pub fn events_path(run_dir: &Path) -> PathBuf {
    run_dir.join("events.jsonl")
}

/// Result listener persisting every callback to `<run_root>/<run_id>/events.jsonl`.
#[derive(Debug)]
pub struct EventLogListener {
    run_root: PathBuf,
    config: Option<RunConfigSnapshot>,
    run_id: String,
    events: Option<PathBuf>,
}

impl EventLogListener {
    /// Listener creating its run directory under `run_root` when the run starts.
    pub fn new(run_root: impl Into<PathBuf>) -> Self {
        Self {
            run_root: run_root.into(),
            config: None,
            run_id: String::new(),
            events: None,
        }
    }

    /// Record `config` in the start event.
    pub fn with_config(mut self, config: RunConfigSnapshot) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory of the current run, once started.
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.events
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    fn append(&self, event: MutationEvent) -> Result<(), MutationStateError> {
        match &self.events {
            Some(path) => append_event(path, &event),
            None => Ok(()),
        }
    }
}

impl ResultListener for EventLogListener {
    fn on_run_start(&mut self, run_id: &str, groups: usize) -> Result<(), MutationStateError> {
        let run_dir = self.run_root.join(run_id);
        std::fs::create_dir_all(&run_dir)?;
        self.run_id = run_id.to_string();
        self.events = Some(events_path(&run_dir));
        self.append(MutationEvent::RunStarted {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            groups,
            config: self.config.clone(),
        })
    }

    fn on_discovered(&mut self, ids: &[MutationIdentifier]) -> Result<(), MutationStateError> {
        for id in ids {
            self.append(MutationEvent::MutantDiscovered {
                run_id: self.run_id.clone(),
                timestamp_ms: now_timestamp_ms(),
                mutant: id.clone(),
            })?;
        }
        Ok(())
    }

    fn on_coverage_gap(&mut self, group: &str) -> Result<(), MutationStateError> {
        self.append(MutationEvent::CoverageGap {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            group: group.to_string(),
        })
    }

    fn on_mutant(&mut self, result: &MutationResult) -> Result<(), MutationStateError> {
        self.append(MutationEvent::MutantFinished {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            result: result.clone(),
        })
    }

    fn on_run_end(
        &mut self,
        _summary: &RunSummary,
        interrupted: bool,
    ) -> Result<(), MutationStateError> {
        let event = if interrupted {
            MutationEvent::RunInterrupted {
                run_id: self.run_id.clone(),
                timestamp_ms: now_timestamp_ms(),
                reason: "received interrupt signal".to_string(),
            }
        } else {
            MutationEvent::RunCompleted {
                run_id: self.run_id.clone(),
                timestamp_ms: now_timestamp_ms(),
            }
        };
        self.append(event)
    }
}
