//! Backfill progress statistics for operator reports.
//!
//! Store counts are computed on demand from the record store; lifetime
//! counters come from the persisted backfill state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::state::BackfillState;
use crate::time_utils::format_utc_rfc3339;

/// Point-in-time counts from the record store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    // ─── Effort Phase ────────────────────────────────────────────
    /// Total activities in the store
    pub total_activities: u64,
    /// Activities with `efforts_processed` set
    pub processed_activities: u64,
    /// Activities still waiting for their effort fetch
    pub activities_remaining: u64,
    /// Total segment effort rows
    pub segment_efforts: u64,

    // ─── Detail Phase ────────────────────────────────────────────
    /// Total segment rows (complete or not)
    pub total_segments: u64,
    /// Segments with `details_complete` set
    pub detailed_segments: u64,
    /// Segments still waiting for their detail fetch
    pub segments_remaining: u64,
}

impl StoreStats {
    /// Percentage of activities whose efforts have been fetched.
    pub fn activity_progress(&self) -> Option<f64> {
        percent(self.processed_activities, self.total_activities)
    }

    /// Percentage of segments whose details have been fetched.
    pub fn segment_progress(&self) -> Option<f64> {
        percent(self.detailed_segments, self.total_segments)
    }

    /// True when neither phase has anything left to do.
    pub fn is_drained(&self) -> bool {
        self.activities_remaining == 0 && self.segments_remaining == 0
    }
}

fn percent(done: u64, total: u64) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some(done as f64 / total as f64 * 100.0)
    }
}

/// Combined state and store statistics, rendered for the `stats` command.
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub state: BackfillState,
    pub store: StoreStats,
}

impl fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_run = self
            .state
            .last_run_at
            .map(format_utc_rfc3339)
            .unwrap_or_else(|| "never".to_string());

        writeln!(f, "===== Backfill Statistics =====")?;
        writeln!(f, "Last run: {}", last_run)?;
        writeln!(f, "Total runs: {}", self.state.total_runs)?;
        if let Some(mode) = self.state.mode {
            writeln!(f, "Last mode: {}", mode)?;
        }
        writeln!(f, "Activities processed: {}", self.state.activities_processed)?;
        writeln!(f, "Segments processed: {}", self.state.segments_processed)?;
        writeln!(f, "Efforts written: {}", self.state.efforts_written)?;
        writeln!(f)?;
        writeln!(f, "===== Database Statistics =====")?;
        writeln!(f, "Total activities: {}", self.store.total_activities)?;
        writeln!(
            f,
            "Processed activities: {} ({} remaining)",
            self.store.processed_activities, self.store.activities_remaining
        )?;
        writeln!(f, "Total segment efforts: {}", self.store.segment_efforts)?;
        writeln!(
            f,
            "Segments with details: {} ({} remaining)",
            self.store.detailed_segments, self.store.segments_remaining
        )?;

        if let Some(progress) = self.store.activity_progress() {
            writeln!(f, "Activity processing: {:.1}% complete", progress)?;
        }
        if let Some(progress) = self.store.segment_progress() {
            writeln!(f, "Segment details: {:.1}% complete", progress)?;
        }
        Ok(())
    }
}
