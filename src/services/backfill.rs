// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Backfill cycle runner.
//!
//! One cycle is a bounded pass over two phases:
//! 1. Efforts: fetch segment efforts for activities not yet processed
//! 2. Details: fetch full detail for segments referenced by stored efforts
//!
//! Every remote call goes through the rate limiter and token manager.
//! Per-record failures are handled by the [`FailurePolicy`] table; only
//! fatal classes stop the cycle. State is saved at the end of every cycle,
//! whether it finished, was cancelled, or failed.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::db::RecordStore;
use crate::error::{ApiError, AuthError, BackfillError, ErrorClass, FailurePolicy};
use crate::services::rate_limiter::RateLimiter;
use crate::services::state::{BackfillState, StateFile};
use crate::services::strava::StravaApi;
use crate::services::tokens::TokenManager;

/// Which phases a cycle runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillMode {
    Efforts,
    Segments,
    #[default]
    Both,
}

impl BackfillMode {
    pub fn includes_efforts(self) -> bool {
        matches!(self, BackfillMode::Efforts | BackfillMode::Both)
    }

    pub fn includes_details(self) -> bool {
        matches!(self, BackfillMode::Segments | BackfillMode::Both)
    }
}

impl fmt::Display for BackfillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackfillMode::Efforts => "efforts",
            BackfillMode::Segments => "segments",
            BackfillMode::Both => "both",
        })
    }
}

impl FromStr for BackfillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "efforts" => Ok(BackfillMode::Efforts),
            "segments" | "details" => Ok(BackfillMode::Segments),
            "both" => Ok(BackfillMode::Both),
            other => Err(format!(
                "invalid mode '{}': expected efforts, segments, or both",
                other
            )),
        }
    }
}

/// The two fetch phases, for logs and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Efforts,
    Details,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Efforts => "efforts",
            Phase::Details => "details",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for one phase of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSummary {
    /// Incomplete records selected for this cycle.
    pub eligible: u64,
    /// Records a remote call was made for.
    pub attempted: u64,
    /// Records written and marked complete.
    pub succeeded: u64,
    /// Records left incomplete for a later cycle, including records skipped
    /// because no valid token could be obtained.
    pub failed: u64,
    /// Records marked complete because they no longer exist remotely.
    pub unavailable: u64,
    /// Segment effort rows written (effort phase only).
    pub efforts_written: u64,
    /// Last record marked complete.
    pub last_id: Option<u64>,
}

impl PhaseSummary {
    /// Records whose completion flag was set this cycle.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.unavailable
    }
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} eligible, {} attempted, {} succeeded, {} failed, {} unavailable",
            self.eligible, self.attempted, self.succeeded, self.failed, self.unavailable
        )
    }
}

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSummary {
    pub efforts: PhaseSummary,
    pub details: PhaseSummary,
    /// Cancellation was honored before the cycle finished.
    pub cancelled: bool,
}

impl CycleSummary {
    /// True when neither phase had anything to do.
    pub fn found_no_work(&self) -> bool {
        self.efforts.eligible == 0 && self.details.eligible == 0
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Efforts phase: {} ({} efforts written)", self.efforts, self.efforts.efforts_written)?;
        write!(f, "Details phase: {}", self.details)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Batch sizes and failure caps.
#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    pub mode: BackfillMode,
    pub activities_batch: usize,
    pub segments_batch: usize,
    /// Consecutive malformed responses in one phase before giving up. The
    /// count carries across cycles and only a completed record resets it.
    pub max_consecutive_malformed: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            mode: BackfillMode::Both,
            activities_batch: 10,
            segments_batch: 20,
            max_consecutive_malformed: 5,
        }
    }
}

/// Anything the scheduler can drive one cycle at a time.
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_cycle(&mut self) -> Result<CycleSummary, BackfillError>;
}

/// Outcome of one gated remote call.
pub(crate) enum CallOutcome<T> {
    Done(T),
    Failed(ApiError),
    /// No valid token; the remote call was never made.
    NotSent(ApiError),
    Cancelled,
}

/// Tracks malformed responses for one phase across cycles.
///
/// A record that always comes back malformed stays at the head of the
/// queue, so the consecutive count must survive the cycle boundary or a
/// batch of one would retry it forever.
struct MalformedTracker {
    phase: Phase,
    cap: u32,
    consecutive: u32,
    batch_total: u64,
}

impl MalformedTracker {
    fn new(phase: Phase, cap: u32) -> Self {
        Self {
            phase,
            cap: cap.max(1),
            consecutive: 0,
            batch_total: 0,
        }
    }

    fn begin_batch(&mut self) {
        self.batch_total = 0;
    }

    fn record(&mut self, err: &ApiError) -> Result<(), BackfillError> {
        self.consecutive += 1;
        self.batch_total += 1;
        if self.consecutive >= self.cap {
            return Err(BackfillError::Integration {
                phase: self.phase.to_string(),
                message: format!("{} consecutive malformed responses, last: {}", self.consecutive, err),
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// A batch where every record came back malformed means the contract changed.
    fn finish(&self, summary: &PhaseSummary) -> Result<(), BackfillError> {
        if summary.attempted >= 2 && self.batch_total == summary.attempted {
            return Err(BackfillError::Integration {
                phase: self.phase.to_string(),
                message: format!(
                    "all {} records in the batch returned malformed responses",
                    summary.attempted
                ),
            });
        }
        Ok(())
    }
}

/// Runs backfill cycles against one account and one record store.
pub struct BackfillRunner {
    pub(crate) api: Arc<dyn StravaApi>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) tokens: TokenManager,
    pub(crate) limiter: RateLimiter,
    state_file: StateFile,
    state: BackfillState,
    config: BackfillConfig,
    effort_malformed: MalformedTracker,
    detail_malformed: MalformedTracker,
    pub(crate) cancel: CancellationToken,
}

impl BackfillRunner {
    /// Create a runner, loading persisted state and starting a new session.
    pub fn new(
        api: Arc<dyn StravaApi>,
        store: Arc<dyn RecordStore>,
        tokens: TokenManager,
        limiter: RateLimiter,
        state_file: StateFile,
        config: BackfillConfig,
    ) -> Result<Self, BackfillError> {
        let mut state = state_file.load()?;
        state.begin_session();

        Ok(Self {
            api,
            store,
            tokens,
            limiter,
            state_file,
            state,
            effort_malformed: MalformedTracker::new(Phase::Efforts, config.max_consecutive_malformed),
            detail_malformed: MalformedTracker::new(Phase::Details, config.max_consecutive_malformed),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token (ctrl-c handler).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &BackfillState {
        &self.state
    }

    /// Run one cycle and persist state, even when the cycle fails.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, BackfillError> {
        let mut summary = CycleSummary::default();
        tracing::info!(
            mode = %self.config.mode,
            run = self.state.total_runs + 1,
            "Starting backfill cycle"
        );

        let outcome = self.run_phases(&mut summary).await;
        summary.cancelled = self.cancel.is_cancelled();

        self.state
            .record_cycle(&summary, self.config.mode, Utc::now());
        let saved = self.state_file.save(&self.state);

        match outcome {
            Ok(()) => {
                saved?;
                tracing::info!(
                    efforts_attempted = summary.efforts.attempted,
                    efforts_succeeded = summary.efforts.succeeded,
                    efforts_failed = summary.efforts.failed,
                    efforts_written = summary.efforts.efforts_written,
                    details_attempted = summary.details.attempted,
                    details_succeeded = summary.details.succeeded,
                    details_failed = summary.details.failed,
                    cancelled = summary.cancelled,
                    "Backfill cycle complete"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(save_err) = saved {
                    tracing::error!(error = %save_err, "Failed to save state after fatal error");
                }
                tracing::error!(error = %e, error_class = %e.class(), "Backfill cycle aborted");
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, summary: &mut CycleSummary) -> Result<(), BackfillError> {
        if self.config.mode.includes_efforts() {
            self.run_effort_phase(&mut summary.efforts).await?;
        }
        if self.cancel.is_cancelled() {
            tracing::info!("Cancellation requested, skipping remaining phases");
            return Ok(());
        }
        if self.config.mode.includes_details() {
            self.run_detail_phase(&mut summary.details).await?;
        }
        Ok(())
    }

    async fn run_effort_phase(&mut self, summary: &mut PhaseSummary) -> Result<(), BackfillError> {
        let activities = self
            .store
            .activities_needing_efforts(self.config.activities_batch)?;
        summary.eligible = activities.len() as u64;
        if activities.is_empty() {
            tracing::info!("No activities need segment efforts");
            return Ok(());
        }
        tracing::info!(count = activities.len(), "Fetching segment efforts");

        self.effort_malformed.begin_batch();
        for activity in activities {
            let activity_id = activity.id;
            let outcome = self
                .call_api(move |api, token| async move {
                    api.segment_efforts(&token, activity_id).await
                })
                .await?;

            match outcome {
                CallOutcome::Cancelled => {
                    tracing::info!(activity_id, "Cancellation requested, stopping effort phase");
                    break;
                }
                CallOutcome::Done(efforts) => {
                    summary.attempted += 1;
                    self.store.write_efforts_and_mark(activity_id, &efforts)?;
                    summary.succeeded += 1;
                    summary.efforts_written += efforts.len() as u64;
                    summary.last_id = Some(activity_id);
                    self.effort_malformed.reset();
                    tracing::debug!(activity_id, efforts = efforts.len(), "Stored segment efforts");
                }
                CallOutcome::Failed(err) => {
                    summary.attempted += 1;
                    apply_policy(self.store.as_ref(), activity_id, err, summary, &mut self.effort_malformed)?;
                }
                CallOutcome::NotSent(err) => {
                    apply_policy(self.store.as_ref(), activity_id, err, summary, &mut self.effort_malformed)?;
                }
            }
        }

        self.effort_malformed.finish(summary)
    }

    async fn run_detail_phase(&mut self, summary: &mut PhaseSummary) -> Result<(), BackfillError> {
        let segments = self
            .store
            .segments_needing_details(self.config.segments_batch)?;
        summary.eligible = segments.len() as u64;
        if segments.is_empty() {
            tracing::info!("No segments need details");
            return Ok(());
        }
        tracing::info!(count = segments.len(), "Fetching segment details");

        self.detail_malformed.begin_batch();
        for segment in segments {
            let segment_id = segment.id;
            let outcome = self
                .call_api(move |api, token| async move { api.segment(&token, segment_id).await })
                .await?;

            match outcome {
                CallOutcome::Cancelled => {
                    tracing::info!(segment_id, "Cancellation requested, stopping detail phase");
                    break;
                }
                CallOutcome::Done(detail) => {
                    summary.attempted += 1;
                    self.store.write_segment_details_and_mark(segment_id, &detail)?;
                    summary.succeeded += 1;
                    summary.last_id = Some(segment_id);
                    self.detail_malformed.reset();
                    tracing::debug!(segment_id, "Stored segment details");
                }
                CallOutcome::Failed(err) => {
                    summary.attempted += 1;
                    apply_policy(self.store.as_ref(), segment_id, err, summary, &mut self.detail_malformed)?;
                }
                CallOutcome::NotSent(err) => {
                    apply_policy(self.store.as_ref(), segment_id, err, summary, &mut self.detail_malformed)?;
                }
            }
        }

        self.detail_malformed.finish(summary)
    }

    /// Gate a remote call behind the rate limiter and token manager.
    ///
    /// Cancellation is honored while waiting for quota. A transient token
    /// refresh failure is reported as a per-record failure; any other token
    /// failure is fatal.
    pub(crate) async fn call_api<T, F, Fut>(&mut self, call: F) -> Result<CallOutcome<T>, BackfillError>
    where
        F: FnOnce(Arc<dyn StravaApi>, String) -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send,
    {
        if self.cancel.is_cancelled() {
            return Ok(CallOutcome::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(CallOutcome::Cancelled),
            _ = self.limiter.acquire() => {}
        }

        let token = match self.tokens.get_valid_token().await {
            Ok(token) => token,
            Err(AuthError::Transient(msg)) => {
                return Ok(CallOutcome::NotSent(ApiError::Transient(msg)));
            }
            Err(e) => return Err(e.into()),
        };

        match call(Arc::clone(&self.api), token).await {
            Ok(value) => Ok(CallOutcome::Done(value)),
            Err(e) => Ok(CallOutcome::Failed(e)),
        }
    }
}

/// Apply the failure policy for a record that failed remotely.
fn apply_policy(
    store: &dyn RecordStore,
    record_id: u64,
    err: ApiError,
    summary: &mut PhaseSummary,
    malformed: &mut MalformedTracker,
) -> Result<(), BackfillError> {
    let phase = malformed.phase;
    let class = err.class();
    match class.policy() {
        FailurePolicy::AbortRun => {
            tracing::error!(
                phase = %phase,
                record_id,
                error_class = %class,
                error = %err,
                "Fatal failure, aborting run"
            );
            Err(BackfillError::ReauthorizationRequired(err.to_string()))
        }
        FailurePolicy::MarkUnavailable => {
            match phase {
                Phase::Efforts => store.write_efforts_and_mark(record_id, &[])?,
                Phase::Details => store.mark_segment_unavailable(record_id)?,
            }
            summary.unavailable += 1;
            summary.last_id = Some(record_id);
            malformed.reset();
            tracing::warn!(
                phase = %phase,
                record_id,
                error_class = %class,
                "Record no longer exists remotely, marked complete"
            );
            Ok(())
        }
        FailurePolicy::SkipRecord => {
            summary.failed += 1;
            tracing::warn!(
                phase = %phase,
                record_id,
                error_class = %class,
                error = %err,
                "Record failed, will retry next cycle"
            );
            if class == ErrorClass::Malformed {
                malformed.record(&err)
            } else {
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CycleRunner for BackfillRunner {
    async fn run_cycle(&mut self) -> Result<CycleSummary, BackfillError> {
        BackfillRunner::run_cycle(self).await
    }
}
