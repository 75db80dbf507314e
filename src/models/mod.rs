// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the record store and the Strava API.

pub mod activity;
pub mod effort;
pub mod segment;
pub mod stats;
pub mod token;

pub use activity::Activity;
pub use effort::SegmentEffort;
pub use segment::{Segment, SegmentDetail, SegmentSummary};
pub use stats::{BackfillReport, StoreStats};
pub use token::Token;
