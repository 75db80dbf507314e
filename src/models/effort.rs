// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Segment effort model: one pass over a segment during an activity.

use super::segment::SegmentSummary;
use serde::{Deserialize, Serialize};

/// Link between an activity and a segment with effort metrics.
///
/// Written once during the effort phase and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEffort {
    /// Strava effort ID (primary key)
    pub id: u64,
    /// Owning activity
    pub activity_id: u64,
    /// Segment summary as embedded in the activity response
    pub segment: SegmentSummary,
    pub name: Option<String>,
    /// Elapsed time in seconds
    pub elapsed_time: Option<i64>,
    /// Moving time in seconds
    pub moving_time: Option<i64>,
    /// Effort start (ISO 8601)
    pub start_date: Option<String>,
    pub start_date_local: Option<String>,
    /// Distance in meters
    pub distance: Option<f64>,
    pub average_watts: Option<f64>,
    pub device_watts: bool,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    /// Personal record rank (1-3) if any
    pub pr_rank: Option<i64>,
    /// Leaderboard rank if in the top 10
    pub kom_rank: Option<i64>,
}

impl SegmentEffort {
    pub fn segment_id(&self) -> u64 {
        self.segment.id
    }
}
