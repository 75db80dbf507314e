// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Continuous scheduler for backfill cycles.
//!
//! Runs one cycle, then (in continuous mode) sleeps until `interval` after
//! that cycle started. It keeps sleeping and retrying even when nothing is
//! eligible, since an import or activity sync may add work at any time.
//! Fatal cycle errors stop the loop and are returned to the caller.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BackfillError;
use crate::services::backfill::{CycleRunner, CycleSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Exactly one cycle.
    OneTime,
    /// Repeat at a fixed interval until a stop condition.
    Continuous,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub mode: ScheduleMode,
    /// Time between cycle starts.
    pub interval: Duration,
    /// Stop after this many cycles; 0 means no limit.
    pub max_runs: u64,
    /// Stop once a cycle finds nothing eligible in either phase.
    pub exit_when_drained: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::OneTime,
            interval: Duration::from_secs(300),
            max_runs: 0,
            exit_when_drained: false,
        }
    }
}

/// Why the scheduler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    OneTime,
    MaxRuns,
    Drained,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerReport {
    pub cycles: u64,
    pub last_summary: Option<CycleSummary>,
    pub stop_reason: StopReason,
}

pub struct Scheduler {
    config: ScheduleConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Drive `runner` until a stop condition or a fatal error.
    pub async fn run<R: CycleRunner + ?Sized>(
        &self,
        runner: &mut R,
    ) -> Result<SchedulerReport, BackfillError> {
        let mut cycles = 0u64;
        let mut last_summary: Option<CycleSummary> = None;

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let started = Instant::now();
            let summary = runner.run_cycle().await?;
            cycles += 1;

            let no_work = summary.found_no_work();
            let cancelled = summary.cancelled;
            last_summary = Some(summary);

            if cancelled || self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.config.mode == ScheduleMode::OneTime {
                break StopReason::OneTime;
            }
            if self.config.max_runs > 0 && cycles >= self.config.max_runs {
                tracing::info!(cycles, "Reached maximum number of runs");
                break StopReason::MaxRuns;
            }
            if no_work {
                if self.config.exit_when_drained {
                    tracing::info!(cycles, "No eligible records remain, stopping");
                    break StopReason::Drained;
                }
                tracing::info!("No eligible records this cycle");
            }

            let wait = self.config.interval.saturating_sub(started.elapsed());
            tracing::info!(wait_secs = wait.as_secs(), cycles, "Waiting for next cycle");

            tokio::select! {
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }
        };

        tracing::info!(cycles, stop_reason = ?stop_reason, "Scheduler stopped");
        Ok(SchedulerReport {
            cycles,
            last_summary,
            stop_reason,
        })
    }
}
