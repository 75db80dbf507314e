// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite record store.
//!
//! Provides high-level operations for:
//! - Activities (effort-phase work queue)
//! - Segments (detail-phase work queue)
//! - Segment efforts (activity ↔ segment links)

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{schema, RecordStore};
use crate::error::StoreError;
use crate::models::segment::format_latlng;
use crate::models::{Activity, Segment, SegmentDetail, SegmentEffort, StoreStats};
use crate::time_utils::format_utc_rfc3339;

/// SQLite-backed record store.
///
/// The connection sits behind a mutex so the store can be shared between
/// the backfill runner and reporting code.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!(path = %path.display(), "Opened record store");
        Self::from_connection(conn)
    }

    /// Open a private in-memory store (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Flag an activity as processed without fetching efforts.
    ///
    /// Operator utility for activities known to have no segments. Returns
    /// `false` if the activity is not in the store.
    pub fn mark_activity_processed(&self, activity_id: u64) -> Result<bool, StoreError> {
        let updated = self.conn()?.execute(
            "UPDATE activities SET segment_efforts_processed = 1 WHERE id = ?1",
            params![sql_id(activity_id)],
        )?;
        Ok(updated > 0)
    }

    /// Look up a single activity.
    pub fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, StoreError> {
        let activity = self
            .conn()?
            .query_row(
                "SELECT id, name, type, start_date, distance, segment_efforts_processed
                 FROM activities WHERE id = ?1",
                params![sql_id(activity_id)],
                activity_from_row,
            )
            .optional()?;
        Ok(activity)
    }

    /// Look up a single segment.
    pub fn get_segment(&self, segment_id: u64) -> Result<Option<Segment>, StoreError> {
        let segment = self
            .conn()?
            .query_row(
                "SELECT id, name, distance, details_complete FROM segments WHERE id = ?1",
                params![sql_id(segment_id)],
                segment_from_row,
            )
            .optional()?;
        Ok(segment)
    }

    /// Effort IDs stored for an activity, ascending.
    pub fn effort_ids_for_activity(&self, activity_id: u64) -> Result<Vec<u64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM segment_efforts WHERE activity_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![sql_id(activity_id)], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as u64))
            .collect::<Result<Vec<u64>, _>>()?;
        Ok(ids)
    }
}

/// Strava IDs fit in SQLite's signed 64-bit integers.
fn sql_id(id: u64) -> i64 {
    id as i64
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        sport_type: row.get(2)?,
        start_date: row.get(3)?,
        distance_meters: row.get(4)?,
        efforts_processed: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
    })
}

fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<Segment> {
    Ok(Segment {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        distance: row.get(2)?,
        details_complete: row.get::<_, Option<i64>>(3)?.unwrap_or(0) != 0,
    })
}

impl RecordStore for SqliteStore {
    fn activities_needing_efforts(&self, limit: usize) -> Result<Vec<Activity>, StoreError> {
        let conn = self.conn()?;
        schema::reconcile_imported_efforts(&conn)?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, type, start_date, distance, segment_efforts_processed
             FROM activities
             WHERE COALESCE(segment_efforts_processed, 0) = 0
             ORDER BY start_date IS NULL, start_date ASC, id ASC
             LIMIT ?1",
        )?;
        let activities = stmt
            .query_map(params![limit as i64], activity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(activities)
    }

    fn segments_needing_details(&self, limit: usize) -> Result<Vec<Segment>, StoreError> {
        let conn = self.conn()?;
        schema::reconcile_imported_efforts(&conn)?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, distance, details_complete
             FROM segments
             WHERE COALESCE(details_complete, 0) = 0
             ORDER BY id ASC
             LIMIT ?1",
        )?;
        let segments = stmt
            .query_map(params![limit as i64], segment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    fn write_efforts_and_mark(
        &self,
        activity_id: u64,
        efforts: &[SegmentEffort],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        // Dropping the transaction without commit rolls everything back.
        let tx = conn.transaction()?;
        {
            let mut insert_segment = tx.prepare_cached(
                "INSERT INTO segments (
                    id, name, activity_type, distance, average_grade, maximum_grade,
                    elevation_high, elevation_low, start_latlng, end_latlng,
                    climb_category, city, state, country, private, details_complete
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0)
                 ON CONFLICT (id) DO NOTHING",
            )?;
            let mut insert_effort = tx.prepare_cached(
                "INSERT INTO segment_efforts (
                    id, activity_id, segment_id, name, elapsed_time, moving_time,
                    start_date, start_date_local, distance, average_watts, device_watts,
                    average_heartrate, max_heartrate, pr_rank, kom_rank
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT (id) DO NOTHING",
            )?;

            for effort in efforts {
                let segment = &effort.segment;
                insert_segment.execute(params![
                    sql_id(segment.id),
                    segment.name,
                    segment.activity_type,
                    segment.distance,
                    segment.average_grade,
                    segment.maximum_grade,
                    segment.elevation_high,
                    segment.elevation_low,
                    format_latlng(segment.start_latlng),
                    format_latlng(segment.end_latlng),
                    segment.climb_category,
                    segment.city,
                    segment.state,
                    segment.country,
                    segment.private,
                ])?;
                insert_effort.execute(params![
                    sql_id(effort.id),
                    sql_id(activity_id),
                    sql_id(segment.id),
                    effort.name,
                    effort.elapsed_time,
                    effort.moving_time,
                    effort.start_date,
                    effort.start_date_local,
                    effort.distance,
                    effort.average_watts,
                    effort.device_watts,
                    effort.average_heartrate,
                    effort.max_heartrate,
                    effort.pr_rank,
                    effort.kom_rank,
                ])?;
            }

            let updated = tx.execute(
                "UPDATE activities SET segment_efforts_processed = 1 WHERE id = ?1",
                params![sql_id(activity_id)],
            )?;
            if updated == 0 {
                return Err(StoreError::MissingActivity(activity_id));
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn write_segment_details_and_mark(
        &self,
        segment_id: u64,
        detail: &SegmentDetail,
    ) -> Result<(), StoreError> {
        let fetched_at = format_utc_rfc3339(chrono::Utc::now());
        let summary = &detail.summary;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO segments (
                id, name, activity_type, distance, average_grade, maximum_grade,
                elevation_high, elevation_low, total_elevation_gain, start_latlng, end_latlng,
                climb_category, city, state, country, private, hazardous,
                effort_count, athlete_count, star_count, created_at, updated_at,
                map_polyline, fetched_at, details_complete
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, 1
             )
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                activity_type = excluded.activity_type,
                distance = excluded.distance,
                average_grade = excluded.average_grade,
                maximum_grade = excluded.maximum_grade,
                elevation_high = excluded.elevation_high,
                elevation_low = excluded.elevation_low,
                total_elevation_gain = excluded.total_elevation_gain,
                start_latlng = excluded.start_latlng,
                end_latlng = excluded.end_latlng,
                climb_category = excluded.climb_category,
                city = excluded.city,
                state = excluded.state,
                country = excluded.country,
                private = excluded.private,
                hazardous = excluded.hazardous,
                effort_count = excluded.effort_count,
                athlete_count = excluded.athlete_count,
                star_count = excluded.star_count,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                map_polyline = excluded.map_polyline,
                fetched_at = excluded.fetched_at,
                details_complete = 1",
            params![
                sql_id(segment_id),
                summary.name,
                summary.activity_type,
                summary.distance,
                summary.average_grade,
                summary.maximum_grade,
                summary.elevation_high,
                summary.elevation_low,
                detail.total_elevation_gain,
                format_latlng(summary.start_latlng),
                format_latlng(summary.end_latlng),
                summary.climb_category,
                summary.city,
                summary.state,
                summary.country,
                summary.private,
                detail.hazardous,
                detail.effort_count,
                detail.athlete_count,
                detail.star_count,
                detail.created_at,
                detail.updated_at,
                detail.map_polyline,
                fetched_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn mark_segment_unavailable(&self, segment_id: u64) -> Result<(), StoreError> {
        let fetched_at = format_utc_rfc3339(chrono::Utc::now());
        self.conn()?.execute(
            "UPDATE segments SET details_complete = 1, fetched_at = ?2 WHERE id = ?1",
            params![sql_id(segment_id), fetched_at],
        )?;
        Ok(())
    }

    fn upsert_activity(&self, activity: &Activity) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO activities (id, name, type, start_date, distance, segment_efforts_processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO NOTHING",
            params![
                sql_id(activity.id),
                activity.name,
                activity.sport_type,
                activity.start_date,
                activity.distance_meters,
                activity.efforts_processed,
            ],
        )? > 0;

        if !inserted {
            // Refresh metadata only; the processed flag belongs to the effort phase.
            tx.execute(
                "UPDATE activities SET
                    name = COALESCE(?2, name),
                    type = COALESCE(?3, type),
                    start_date = COALESCE(?4, start_date),
                    distance = COALESCE(?5, distance)
                 WHERE id = ?1",
                params![
                    sql_id(activity.id),
                    activity.name,
                    activity.sport_type,
                    activity.start_date,
                    activity.distance_meters,
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn newest_activity_start(&self) -> Result<Option<String>, StoreError> {
        let newest = self.conn()?.query_row(
            "SELECT MAX(start_date) FROM activities",
            [],
            |row| row.get::<_, Option<String>>(0),
        )?;
        Ok(newest)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        schema::reconcile_imported_efforts(&conn)?;
        let count = |sql: &str| -> Result<u64, StoreError> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };

        let total_activities = count("SELECT COUNT(*) FROM activities")?;
        let processed_activities = count(
            "SELECT COUNT(*) FROM activities WHERE COALESCE(segment_efforts_processed, 0) <> 0",
        )?;
        let segment_efforts = count("SELECT COUNT(*) FROM segment_efforts")?;
        let total_segments = count("SELECT COUNT(*) FROM segments")?;
        let detailed_segments =
            count("SELECT COUNT(*) FROM segments WHERE COALESCE(details_complete, 0) <> 0")?;

        Ok(StoreStats {
            total_activities,
            processed_activities,
            activities_remaining: total_activities - processed_activities,
            segment_efforts,
            total_segments,
            detailed_segments,
            segments_remaining: total_segments - detailed_segments,
        })
    }
}
