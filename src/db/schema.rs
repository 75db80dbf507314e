// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Versioned, idempotent schema setup.
//!
//! Stores written by earlier import tools may already contain the tables
//! with a subset of the columns. Migration never drops anything: it creates
//! missing tables, adds missing columns, and creates indices, then records
//! the version in `PRAGMA user_version` so later opens skip all probing.

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::StoreError;

/// Current schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY,
    name TEXT,
    type TEXT,
    start_date TEXT,
    distance REAL,
    segment_efforts_processed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY,
    name TEXT,
    activity_type TEXT,
    distance REAL,
    average_grade REAL,
    maximum_grade REAL,
    elevation_high REAL,
    elevation_low REAL,
    total_elevation_gain REAL,
    start_latlng TEXT,
    end_latlng TEXT,
    climb_category INTEGER,
    city TEXT,
    state TEXT,
    country TEXT,
    private BOOLEAN,
    hazardous BOOLEAN,
    effort_count INTEGER,
    athlete_count INTEGER,
    star_count INTEGER,
    created_at TEXT,
    updated_at TEXT,
    map_polyline TEXT,
    fetched_at TEXT,
    details_complete INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS segment_efforts (
    id INTEGER PRIMARY KEY,
    activity_id INTEGER NOT NULL,
    segment_id INTEGER NOT NULL,
    name TEXT,
    elapsed_time INTEGER,
    moving_time INTEGER,
    start_date TEXT,
    start_date_local TEXT,
    distance REAL,
    average_watts REAL,
    device_watts BOOLEAN,
    average_heartrate REAL,
    max_heartrate REAL,
    pr_rank INTEGER,
    kom_rank INTEGER,
    FOREIGN KEY (activity_id) REFERENCES activities (id),
    FOREIGN KEY (segment_id) REFERENCES segments (id)
);
";

const CREATE_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_activities_pending
    ON activities (segment_efforts_processed, start_date);
CREATE INDEX IF NOT EXISTS idx_segments_pending
    ON segments (details_complete);
CREATE INDEX IF NOT EXISTS idx_segment_efforts_activity_id
    ON segment_efforts (activity_id);
CREATE INDEX IF NOT EXISTS idx_segment_efforts_segment_id
    ON segment_efforts (segment_id);
";

/// Columns every table must have, as (table, column, declaration).
///
/// Only consulted for tables that predate this schema.
const REQUIRED_COLUMNS: &[(&str, &str, &str)] = &[
    ("activities", "name", "TEXT"),
    ("activities", "type", "TEXT"),
    ("activities", "start_date", "TEXT"),
    ("activities", "distance", "REAL"),
    (
        "activities",
        "segment_efforts_processed",
        "INTEGER NOT NULL DEFAULT 0",
    ),
    ("segments", "name", "TEXT"),
    ("segments", "activity_type", "TEXT"),
    ("segments", "distance", "REAL"),
    ("segments", "average_grade", "REAL"),
    ("segments", "maximum_grade", "REAL"),
    ("segments", "elevation_high", "REAL"),
    ("segments", "elevation_low", "REAL"),
    ("segments", "total_elevation_gain", "REAL"),
    ("segments", "start_latlng", "TEXT"),
    ("segments", "end_latlng", "TEXT"),
    ("segments", "climb_category", "INTEGER"),
    ("segments", "city", "TEXT"),
    ("segments", "state", "TEXT"),
    ("segments", "country", "TEXT"),
    ("segments", "private", "BOOLEAN"),
    ("segments", "hazardous", "BOOLEAN"),
    ("segments", "effort_count", "INTEGER"),
    ("segments", "athlete_count", "INTEGER"),
    ("segments", "star_count", "INTEGER"),
    ("segments", "created_at", "TEXT"),
    ("segments", "updated_at", "TEXT"),
    ("segments", "map_polyline", "TEXT"),
    ("segments", "fetched_at", "TEXT"),
    ("segments", "details_complete", "INTEGER NOT NULL DEFAULT 0"),
    ("segment_efforts", "name", "TEXT"),
    ("segment_efforts", "elapsed_time", "INTEGER"),
    ("segment_efforts", "moving_time", "INTEGER"),
    ("segment_efforts", "start_date", "TEXT"),
    ("segment_efforts", "start_date_local", "TEXT"),
    ("segment_efforts", "distance", "REAL"),
    ("segment_efforts", "average_watts", "REAL"),
    ("segment_efforts", "device_watts", "BOOLEAN"),
    ("segment_efforts", "average_heartrate", "REAL"),
    ("segment_efforts", "max_heartrate", "REAL"),
    ("segment_efforts", "pr_rank", "INTEGER"),
    ("segment_efforts", "kom_rank", "INTEGER"),
];

/// Bring the store up to [`SCHEMA_VERSION`]. Safe to call on every open.
pub fn ensure_schema(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        debug!(version, "Store schema up to date");
        return Ok(());
    }

    info!(from = version, to = SCHEMA_VERSION, "Migrating store schema");

    let tx = conn.transaction()?;
    tx.execute_batch(CREATE_TABLES)?;

    for (table, column, declaration) in REQUIRED_COLUMNS {
        if column_exists(&tx, table, column)? {
            continue;
        }
        tx.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, declaration),
            [],
        )?;
        info!(table, column, "Added missing column");
        backfill_added_column(&tx, table, column)?;
    }

    reconcile_imported_efforts(&tx)?;

    tx.execute_batch(CREATE_INDEXES)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    info!(version = SCHEMA_VERSION, "Store schema migration completed");
    Ok(())
}

/// Catch the work queues up with efforts written by other tools.
///
/// The archive importer inserts efforts directly: their activities count as
/// processed, and any segment they reference without a row gets a pending
/// placeholder so the detail phase finds it. Returns
/// `(activities_marked, placeholders_created)`.
pub fn reconcile_imported_efforts(conn: &Connection) -> Result<(usize, usize), StoreError> {
    let marked = conn.execute(
        "UPDATE activities SET segment_efforts_processed = 1
         WHERE COALESCE(segment_efforts_processed, 0) = 0
           AND EXISTS (SELECT 1 FROM segment_efforts e WHERE e.activity_id = activities.id)",
        [],
    )?;
    let placeholders = conn.execute(
        "INSERT OR IGNORE INTO segments (id, details_complete)
         SELECT DISTINCT e.segment_id, 0 FROM segment_efforts e
         LEFT JOIN segments s ON s.id = e.segment_id
         WHERE e.segment_id IS NOT NULL AND s.id IS NULL",
        [],
    )?;
    if marked > 0 || placeholders > 0 {
        info!(
            activities_marked = marked,
            placeholders,
            "Reconciled externally imported efforts"
        );
    }
    Ok((marked, placeholders))
}

/// Check whether `table` has `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let count: i64 = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2")?
        .query_row([table, column], |row| row.get(0))?;
    Ok(count > 0)
}

/// Derive flag values for rows that existed before the flag column did.
fn backfill_added_column(tx: &Transaction<'_>, table: &str, column: &str) -> Result<(), StoreError> {
    match (table, column) {
        // Older tools judged progress by whether any efforts existed.
        ("activities", "segment_efforts_processed") => {
            tx.execute(
                "UPDATE activities SET segment_efforts_processed = 1
                 WHERE id IN (SELECT DISTINCT activity_id FROM segment_efforts)",
                [],
            )?;
        }
        // Older tools only wrote segment rows from a detail fetch.
        ("segments", "details_complete") => {
            tx.execute("UPDATE segments SET details_complete = 1", [])?;
        }
        _ => {}
    }
    Ok(())
}
