// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Segment models.
//!
//! A segment row is created with summary fields the first time an effort
//! references it, and completed later by the detail phase.

use serde::{Deserialize, Serialize};

/// Segment row as seen by the detail phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Strava segment ID (primary key)
    pub id: u64,
    pub name: Option<String>,
    /// Distance in meters
    pub distance: Option<f64>,
    /// True once full detail has been fetched
    pub details_complete: bool,
}

/// Segment fields available from an activity's embedded effort list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub id: u64,
    pub name: Option<String>,
    pub activity_type: Option<String>,
    /// Distance in meters
    pub distance: Option<f64>,
    /// Average grade in percent
    pub average_grade: Option<f64>,
    /// Maximum grade in percent
    pub maximum_grade: Option<f64>,
    pub elevation_high: Option<f64>,
    pub elevation_low: Option<f64>,
    /// (latitude, longitude)
    pub start_latlng: Option<(f64, f64)>,
    pub end_latlng: Option<(f64, f64)>,
    pub climb_category: Option<i64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub private: bool,
}

impl SegmentSummary {
    /// Minimal summary carrying only the ID.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Full segment detail from the segment endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDetail {
    pub summary: SegmentSummary,
    pub total_elevation_gain: Option<f64>,
    pub effort_count: Option<i64>,
    pub athlete_count: Option<i64>,
    pub star_count: Option<i64>,
    pub hazardous: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// Encoded polyline of the segment path
    pub map_polyline: Option<String>,
}

/// Format a coordinate pair for storage, e.g. `[37.38, -122.08]`.
pub fn format_latlng(latlng: Option<(f64, f64)>) -> Option<String> {
    latlng.map(|(lat, lng)| format!("[{}, {}]", lat, lng))
}
