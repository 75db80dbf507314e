// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use segment_backfill::db::{RecordStore, SqliteStore};
use segment_backfill::error::{ApiError, StoreError};
use segment_backfill::models::{Activity, SegmentDetail, SegmentEffort, SegmentSummary, Token};
use segment_backfill::services::{
    BackfillConfig, BackfillRunner, RateLimitConfig, RateLimiter, StateFile, StravaApi,
    TokenManager, TokenProvider, TokenRefreshResponse, TokenRefresher,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A remote call seen by [`MockApi`].
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Efforts(u64),
    Segment(u64),
    ListActivities { after: i64, page: u32, per_page: u32 },
}

/// Scripted in-process Strava API.
///
/// Unscripted effort calls return no efforts; unscripted segment calls
/// return a minimal detail; unscripted activity pages are empty.
#[derive(Default)]
pub struct MockApi {
    efforts: Mutex<HashMap<u64, VecDeque<Result<Vec<SegmentEffort>, ApiError>>>>,
    segments: Mutex<HashMap<u64, VecDeque<Result<SegmentDetail, ApiError>>>>,
    pages: Mutex<VecDeque<Result<Vec<Activity>, ApiError>>>,
    calls: Mutex<Vec<Call>>,
    /// Cancel this token once the given number of calls has been made.
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

#[allow(dead_code)]
impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_efforts(&self, activity_id: u64, result: Result<Vec<SegmentEffort>, ApiError>) {
        self.efforts
            .lock()
            .unwrap()
            .entry(activity_id)
            .or_default()
            .push_back(result);
    }

    pub fn script_segment(&self, segment_id: u64, result: Result<SegmentDetail, ApiError>) {
        self.segments
            .lock()
            .unwrap()
            .entry(segment_id)
            .or_default()
            .push_back(result);
    }

    pub fn script_page(&self, result: Result<Vec<Activity>, ApiError>) {
        self.pages.lock().unwrap().push_back(result);
    }

    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn segment_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Segment(_)))
            .count()
    }

    fn record(&self, call: Call) {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        if let Some((n, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if calls.len() >= *n {
                token.cancel();
            }
        }
    }
}

#[async_trait]
impl StravaApi for MockApi {
    async fn segment_efforts(
        &self,
        _access_token: &str,
        activity_id: u64,
    ) -> Result<Vec<SegmentEffort>, ApiError> {
        self.record(Call::Efforts(activity_id));
        self.efforts
            .lock()
            .unwrap()
            .get_mut(&activity_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn segment(
        &self,
        _access_token: &str,
        segment_id: u64,
    ) -> Result<SegmentDetail, ApiError> {
        self.record(Call::Segment(segment_id));
        self.segments
            .lock()
            .unwrap()
            .get_mut(&segment_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(detail(segment_id)))
    }

    async fn list_activities(
        &self,
        _access_token: &str,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Activity>, ApiError> {
        self.record(Call::ListActivities {
            after,
            page,
            per_page,
        });
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Token provider backed by memory.
#[derive(Default)]
pub struct MemoryTokenProvider {
    pub token: Mutex<Option<Token>>,
    pub persisted: Mutex<Vec<Token>>,
}

#[async_trait]
impl TokenProvider for MemoryTokenProvider {
    async fn initial_token(&self) -> Result<Option<Token>, StoreError> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn persist(&self, token: &Token) -> Result<(), StoreError> {
        self.persisted.lock().unwrap().push(token.clone());
        Ok(())
    }
}

/// Refresher returning a fixed result and counting calls.
pub struct MockRefresher {
    pub calls: AtomicUsize,
    result: Result<TokenRefreshResponse, ApiError>,
}

#[allow(dead_code)]
impl MockRefresher {
    pub fn new(result: Result<TokenRefreshResponse, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenRefreshResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// A temp directory holding a file-backed store and state file.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub api: Arc<MockApi>,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("segments.db")).unwrap());
        Self {
            dir,
            store,
            api: MockApi::new(),
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("segments.db")
    }

    pub fn state_file(&self) -> StateFile {
        StateFile::new(self.dir.path().join("backfill_state.json"))
    }

    pub fn seed_activities(&self, ids: &[u64]) {
        for (i, id) in ids.iter().enumerate() {
            let start = format!("2024-01-{:02}T08:00:00Z", i + 1);
            self.store.upsert_activity(&Activity::new(*id, start)).unwrap();
        }
    }

    /// Runner with a static token and a generous rate limit.
    pub async fn runner(&self, config: BackfillConfig) -> BackfillRunner {
        let provider = Arc::new(MemoryTokenProvider {
            token: Mutex::new(Some(Token::static_access("test-access"))),
            ..Default::default()
        });
        let refresher = MockRefresher::new(Err(ApiError::FatalAuth("unused".to_string())));
        let tokens = TokenManager::load(provider, refresher).await.unwrap();
        self.runner_with(config, tokens, RateLimitConfig::default())
    }

    pub fn runner_with(
        &self,
        config: BackfillConfig,
        tokens: TokenManager,
        limits: RateLimitConfig,
    ) -> BackfillRunner {
        BackfillRunner::new(
            self.api.clone(),
            self.store.clone(),
            tokens,
            RateLimiter::new(limits),
            self.state_file(),
            config,
        )
        .unwrap()
    }
}

#[allow(dead_code)]
pub fn effort(id: u64, activity_id: u64, segment_id: u64) -> SegmentEffort {
    SegmentEffort {
        id,
        activity_id,
        segment: SegmentSummary {
            name: Some(format!("Segment {}", segment_id)),
            distance: Some(1500.0),
            ..SegmentSummary::with_id(segment_id)
        },
        name: Some(format!("Segment {}", segment_id)),
        elapsed_time: Some(420),
        moving_time: Some(415),
        start_date: Some("2024-01-01T08:10:00Z".to_string()),
        start_date_local: Some("2024-01-01T00:10:00Z".to_string()),
        distance: Some(1500.0),
        average_watts: Some(210.0),
        device_watts: true,
        average_heartrate: Some(150.0),
        max_heartrate: Some(172.0),
        pr_rank: None,
        kom_rank: None,
    }
}

pub fn detail(segment_id: u64) -> SegmentDetail {
    SegmentDetail {
        summary: SegmentSummary {
            name: Some(format!("Segment {} (detailed)", segment_id)),
            ..SegmentSummary::with_id(segment_id)
        },
        total_elevation_gain: Some(80.0),
        effort_count: Some(1000),
        athlete_count: Some(300),
        star_count: Some(12),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn efforts_mode(activities_batch: usize) -> BackfillConfig {
    BackfillConfig {
        mode: segment_backfill::services::BackfillMode::Efforts,
        activities_batch,
        ..Default::default()
    }
}
