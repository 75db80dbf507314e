// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity sync service.
//!
//! Handles the workflow that feeds the effort phase:
//! 1. Find the newest stored activity start date
//! 2. Page through the athlete's activities started after it
//! 3. Upsert each summary with `efforts_processed = false`
//!
//! Activities already in the store keep their processed flag.

use crate::error::{ApiError, BackfillError, ErrorClass};
use crate::services::backfill::{BackfillRunner, CallOutcome};
use crate::time_utils::parse_start_timestamp;

/// Strava's default page size for the activity list.
pub const SYNC_PAGE_SIZE: u32 = 30;

/// Result of an activity sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Unix timestamp the listing started after.
    pub after: i64,
    pub pages: u32,
    pub fetched: usize,
    pub inserted: usize,
    pub existing: usize,
    /// Sync stopped early on a transient failure.
    pub interrupted: bool,
    pub cancelled: bool,
}

impl BackfillRunner {
    /// Fetch up to `limit` new activities into the store.
    ///
    /// Every page goes through the rate limiter and token manager. A
    /// transient failure ends the sync early; the next sync resumes from
    /// the newest stored activity.
    pub async fn sync_activities(&mut self, limit: usize) -> Result<SyncSummary, BackfillError> {
        let after = self
            .store
            .newest_activity_start()?
            .as_deref()
            .and_then(parse_start_timestamp)
            .unwrap_or(0);

        let mut summary = SyncSummary {
            after,
            ..Default::default()
        };
        tracing::info!(after, limit, "Syncing activities");

        let mut page = 1u32;
        while summary.fetched < limit {
            let outcome = self
                .call_api(move |api, token| async move {
                    api.list_activities(&token, after, page, SYNC_PAGE_SIZE).await
                })
                .await?;

            let activities = match outcome {
                CallOutcome::Done(activities) => activities,
                CallOutcome::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
                CallOutcome::Failed(err) | CallOutcome::NotSent(err) => {
                    self.handle_sync_failure(page, err)?;
                    summary.interrupted = true;
                    break;
                }
            };

            summary.pages += 1;
            let page_len = activities.len();
            for activity in activities.iter().take(limit - summary.fetched) {
                if self.store.upsert_activity(activity)? {
                    summary.inserted += 1;
                } else {
                    summary.existing += 1;
                }
                summary.fetched += 1;
            }
            tracing::debug!(page, count = page_len, "Synced activity page");

            if page_len < SYNC_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        tracing::info!(
            pages = summary.pages,
            fetched = summary.fetched,
            inserted = summary.inserted,
            existing = summary.existing,
            "Activity sync complete"
        );
        Ok(summary)
    }

    fn handle_sync_failure(&self, page: u32, err: ApiError) -> Result<(), BackfillError> {
        let class = err.class();
        match class {
            ErrorClass::FatalAuth => Err(BackfillError::ReauthorizationRequired(err.to_string())),
            ErrorClass::Malformed => Err(BackfillError::Integration {
                phase: "activity sync".to_string(),
                message: err.to_string(),
            }),
            _ => {
                tracing::warn!(page, error_class = %class, error = %err, "Activity sync interrupted");
                Ok(())
            }
        }
    }
}
