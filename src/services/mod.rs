// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - backfill engine and its collaborators.

pub mod activity;
pub mod backfill;
pub mod rate_limiter;
pub mod scheduler;
pub mod state;
pub mod strava;
pub mod tokens;

pub use activity::SyncSummary;
pub use backfill::{
    BackfillConfig, BackfillMode, BackfillRunner, CycleRunner, CycleSummary, Phase, PhaseSummary,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use scheduler::{ScheduleConfig, ScheduleMode, Scheduler, SchedulerReport, StopReason};
pub use state::{BackfillState, StateFile};
pub use strava::{StravaApi, StravaClient, TokenRefreshResponse};
pub use tokens::{FileTokenStore, TokenManager, TokenProvider, TokenRefresher};
