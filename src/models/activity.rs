// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava activity model for storage.

use serde::{Deserialize, Serialize};

/// Stored activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Strava activity ID (primary key)
    pub id: u64,
    /// Activity name/title
    pub name: Option<String>,
    /// Sport type (Ride, Run, Hike, etc.)
    pub sport_type: Option<String>,
    /// Start date/time (ISO 8601)
    pub start_date: Option<String>,
    /// Distance in meters
    pub distance_meters: Option<f64>,
    /// True once a segment effort fetch has completed for this activity,
    /// whether or not any efforts were found.
    pub efforts_processed: bool,
}

impl Activity {
    /// A fresh, unprocessed activity.
    pub fn new(id: u64, start_date: impl Into<String>) -> Self {
        Self {
            id,
            name: None,
            sport_type: None,
            start_date: Some(start_date.into()),
            distance_meters: None,
            efforts_processed: false,
        }
    }
}
