// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable backfill progress record.
//!
//! A small JSON document rewritten atomically after every cycle. A missing
//! file means a fresh start; a file that fails to parse is reported rather
//! than silently replaced, since that would lose the lifetime counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::StateError;
use crate::fs_utils::write_atomic;
use crate::services::backfill::{BackfillMode, CycleSummary};

/// Run counters and cursor hints surviving process restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillState {
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub runs_this_session: u64,
    pub mode: Option<BackfillMode>,

    // Lifetime counters
    pub activities_processed: u64,
    pub segments_processed: u64,
    pub efforts_written: u64,

    // Cursor hints; the incomplete flags are the source of truth.
    pub last_activity_id: Option<u64>,
    pub last_segment_id: Option<u64>,

    pub last_summary: Option<CycleSummary>,
}

impl BackfillState {
    /// Start a new process session.
    pub fn begin_session(&mut self) {
        self.runs_this_session = 0;
    }

    /// Fold a finished (or interrupted) cycle into the counters.
    pub fn record_cycle(&mut self, summary: &CycleSummary, mode: BackfillMode, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.total_runs += 1;
        self.runs_this_session += 1;
        self.mode = Some(mode);

        self.activities_processed += summary.efforts.completed();
        self.segments_processed += summary.details.completed();
        self.efforts_written += summary.efforts.efforts_written;

        if let Some(id) = summary.efforts.last_id {
            self.last_activity_id = Some(id);
        }
        if let Some(id) = summary.details.last_id {
            self.last_segment_id = Some(id);
        }
        self.last_summary = Some(summary.clone());
    }
}

/// The on-disk location of a [`BackfillState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the state; a missing file yields zero-valued defaults.
    pub fn load(&self) -> Result<BackfillState, StateError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file, starting fresh");
                return Ok(BackfillState::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Atomically replace the state file.
    pub fn save(&self, state: &BackfillState) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        write_atomic(&self.path, &bytes).map_err(|source| self.io_error(source))?;
        tracing::debug!(path = %self.path.display(), total_runs = state.total_runs, "Saved backfill state");
        Ok(())
    }

    /// Explicit operator reset back to defaults.
    pub fn reset(&self) -> Result<BackfillState, StateError> {
        let state = BackfillState::default();
        self.save(&state)?;
        tracing::info!(path = %self.path.display(), "Backfill state reset");
        Ok(state)
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backfill::PhaseSummary;
    use chrono::TimeZone;

    fn summary() -> CycleSummary {
        CycleSummary {
            efforts: PhaseSummary {
                eligible: 3,
                attempted: 3,
                succeeded: 2,
                failed: 1,
                unavailable: 0,
                efforts_written: 7,
                last_id: Some(42),
            },
            details: PhaseSummary {
                eligible: 1,
                attempted: 1,
                succeeded: 0,
                failed: 0,
                unavailable: 1,
                efforts_written: 0,
                last_id: Some(900),
            },
            cancelled: false,
        }
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert_eq!(file.load().unwrap(), BackfillState::default());
    }

    #[test]
    fn test_record_cycle_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap();

        let mut state = BackfillState::default();
        state.record_cycle(&summary(), BackfillMode::Both, now);
        file.save(&state).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.total_runs, 1);
        assert_eq!(loaded.runs_this_session, 1);
        assert_eq!(loaded.activities_processed, 2);
        assert_eq!(loaded.segments_processed, 1);
        assert_eq!(loaded.efforts_written, 7);
        assert_eq!(loaded.last_activity_id, Some(42));
        assert_eq!(loaded.last_segment_id, Some(900));
        assert_eq!(loaded.last_run_at, Some(now));
    }

    #[test]
    fn test_older_state_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"last_run_at": "2024-05-01T07:30:00Z", "total_runs": 12, "mode": "efforts"}"#,
        )
        .unwrap();

        let state = StateFile::new(&path).load().unwrap();
        assert_eq!(state.total_runs, 12);
        assert_eq!(state.mode, Some(BackfillMode::Efforts));
        assert_eq!(state.efforts_written, 0);
        assert!(state.last_summary.is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StateFile::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_begin_session_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let mut state = BackfillState::default();
        state.record_cycle(&summary(), BackfillMode::Efforts, Utc::now());
        state.begin_session();
        assert_eq!(state.runs_this_session, 0);
        assert_eq!(state.total_runs, 1);

        file.save(&state).unwrap();
        assert_eq!(file.reset().unwrap(), BackfillState::default());
        assert_eq!(file.load().unwrap(), BackfillState::default());
    }
}
