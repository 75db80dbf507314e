// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Segment-Backfill: incremental Strava segment effort and detail backfill
//!
//! This crate fetches segment efforts for stored activities and full detail
//! for the segments those efforts reference, staying inside Strava's
//! short-window and daily request quotas and resuming across restarts.

pub mod config;
pub mod db;
pub mod error;
pub mod fs_utils;
pub mod models;
pub mod services;
pub mod time_utils;

pub use error::{BackfillError, Result};
