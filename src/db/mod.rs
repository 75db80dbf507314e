//! Record store layer (SQLite).
//!
//! The backfill engine only talks to [`RecordStore`]; [`SqliteStore`] is the
//! durable implementation.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{Activity, Segment, SegmentDetail, SegmentEffort, StoreStats};

/// Durable storage for activities, segments, and segment efforts.
///
/// Both `*_and_mark` writes are all-or-nothing: either every row and the
/// completion flag become visible together, or none of them do.
pub trait RecordStore: Send + Sync {
    /// Activities with `efforts_processed = false`, oldest start date first
    /// (ties and missing dates ordered by ID, missing dates last).
    fn activities_needing_efforts(&self, limit: usize) -> Result<Vec<Activity>, StoreError>;

    /// Segments with `details_complete = false`, ordered by segment ID.
    fn segments_needing_details(&self, limit: usize) -> Result<Vec<Segment>, StoreError>;

    /// Insert efforts (and placeholder segments they reference) and set the
    /// activity's `efforts_processed` flag in one transaction.
    fn write_efforts_and_mark(
        &self,
        activity_id: u64,
        efforts: &[SegmentEffort],
    ) -> Result<(), StoreError>;

    /// Store full segment detail and set `details_complete` in one transaction.
    fn write_segment_details_and_mark(
        &self,
        segment_id: u64,
        detail: &SegmentDetail,
    ) -> Result<(), StoreError>;

    /// Mark a segment complete without detail (it no longer exists remotely).
    fn mark_segment_unavailable(&self, segment_id: u64) -> Result<(), StoreError>;

    /// Insert an activity if unknown. Returns `true` when a row was created;
    /// an existing activity keeps its flag.
    fn upsert_activity(&self, activity: &Activity) -> Result<bool, StoreError>;

    /// Start date of the most recent stored activity.
    fn newest_activity_start(&self) -> Result<Option<String>, StoreError>;

    /// Progress counts for reporting.
    fn stats(&self) -> Result<StoreStats, StoreError>;
}
