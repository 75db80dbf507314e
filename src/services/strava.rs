// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for the backfill endpoints.
//!
//! Handles:
//! - Segment efforts for an activity (detailed activity with all efforts)
//! - Segment detail fetching
//! - Athlete activity listing (activity sync)
//! - Token refresh exchange
//!
//! Every failure is mapped onto [`ApiError`] so callers can apply the
//! failure policy without inspecting HTTP details.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ClientCredentials;
use crate::error::ApiError;
use crate::models::{Activity, SegmentDetail, SegmentEffort, SegmentSummary};

const API_BASE_URL: &str = "https://www.strava.com/api/v3";
const TOKEN_URL: &str = "https://www.strava.com/oauth/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote read endpoints used by the backfill engine.
#[async_trait]
pub trait StravaApi: Send + Sync {
    /// List segment efforts recorded during an activity.
    async fn segment_efforts(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<Vec<SegmentEffort>, ApiError>;

    /// Get full detail for a segment.
    async fn segment(&self, access_token: &str, segment_id: u64)
        -> Result<SegmentDetail, ApiError>;

    /// List the athlete's activities that started after `after` (unix seconds).
    async fn list_activities(
        &self,
        access_token: &str,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Activity>, ApiError>;
}

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    credentials: Option<ClientCredentials>,
}

impl StravaClient {
    /// Create a new Strava client. Credentials are only needed for refresh.
    pub fn new(credentials: Option<ClientCredentials>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: API_BASE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            credentials,
        }
    }

    /// Point the client at a different API host (local stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.token_url = token_url.into();
        self
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, ApiError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ApiError::FatalAuth(
                "STRAVA_CLIENT_ID and STRAVA_CLIENT_SECRET are required to refresh tokens"
                    .to_string(),
            )
        })?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| map_transport_error("Token refresh request", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Strava token refresh failed");
            // invalid_grant and bad client credentials both come back as 400/401.
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                return Err(ApiError::FatalAuth(format!("HTTP {}: {}", status, body)));
            }
            return Err(classify_status(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("Failed to parse token response: {}", e)))
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| map_transport_error("Strava request", e))?;

        self.check_response_json(response).await
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!("Strava rate limit hit (429)");
            }
            return Err(classify_status(status, body));
        }

        // Read the body first so decode failures are reported as Malformed
        // rather than as transport errors.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_transport_error("Reading Strava response", e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Malformed(format!("JSON parse error: {}", e)))
    }
}

#[async_trait]
impl StravaApi for StravaClient {
    async fn segment_efforts(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<Vec<SegmentEffort>, ApiError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let activity: StravaDetailedActivity = self
            .get_json(&url, access_token, &[("include_all_efforts", "true".to_string())])
            .await?;
        Ok(activity.into_efforts(activity_id))
    }

    async fn segment(
        &self,
        access_token: &str,
        segment_id: u64,
    ) -> Result<SegmentDetail, ApiError> {
        let url = format!("{}/segments/{}", self.base_url, segment_id);
        let segment: StravaDetailedSegment = self.get_json(&url, access_token, &[]).await?;
        Ok(segment.into())
    }

    async fn list_activities(
        &self,
        access_token: &str,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Activity>, ApiError> {
        let url = format!("{}/athlete/activities", self.base_url);
        let summaries: Vec<StravaActivitySummary> = self
            .get_json(
                &url,
                access_token,
                &[
                    ("after", after.to_string()),
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(summaries.into_iter().map(Activity::from).collect())
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ApiError {
    let detail = format!("HTTP {}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::FatalAuth(detail),
        StatusCode::NOT_FOUND => ApiError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ApiError::Transient(detail)
        }
        s if s.is_server_error() => ApiError::Transient(detail),
        _ => ApiError::Malformed(detail),
    }
}

fn map_transport_error(context: &str, err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Malformed(format!("{} returned an undecodable body: {}", context, err))
    } else {
        ApiError::Transient(format!("{} failed: {}", context, err))
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    /// Strava may rotate the refresh token on every exchange.
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed activity response; only the effort list is used.
#[derive(Debug, Clone, Deserialize)]
struct StravaDetailedActivity {
    #[serde(default)]
    segment_efforts: Option<Vec<StravaSegmentEffort>>,
}

impl StravaDetailedActivity {
    fn into_efforts(self, activity_id: u64) -> Vec<SegmentEffort> {
        self.segment_efforts
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.into_effort(activity_id))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StravaSegmentEffort {
    id: u64,
    name: Option<String>,
    elapsed_time: Option<i64>,
    moving_time: Option<i64>,
    start_date: Option<String>,
    start_date_local: Option<String>,
    distance: Option<f64>,
    average_watts: Option<f64>,
    #[serde(default)]
    device_watts: Option<bool>,
    average_heartrate: Option<f64>,
    max_heartrate: Option<f64>,
    pr_rank: Option<i64>,
    kom_rank: Option<i64>,
    segment: StravaSegmentSummary,
}

impl StravaSegmentEffort {
    /// The requested activity ID is authoritative for the link.
    fn into_effort(self, activity_id: u64) -> SegmentEffort {
        SegmentEffort {
            id: self.id,
            activity_id,
            segment: self.segment.into(),
            name: self.name,
            elapsed_time: self.elapsed_time,
            moving_time: self.moving_time,
            start_date: self.start_date,
            start_date_local: self.start_date_local,
            distance: self.distance,
            average_watts: self.average_watts,
            device_watts: self.device_watts.unwrap_or(false),
            average_heartrate: self.average_heartrate,
            max_heartrate: self.max_heartrate,
            pr_rank: self.pr_rank,
            kom_rank: self.kom_rank,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StravaSegmentSummary {
    id: u64,
    name: Option<String>,
    activity_type: Option<String>,
    distance: Option<f64>,
    average_grade: Option<f64>,
    maximum_grade: Option<f64>,
    elevation_high: Option<f64>,
    elevation_low: Option<f64>,
    #[serde(default)]
    start_latlng: Option<Vec<f64>>,
    #[serde(default)]
    end_latlng: Option<Vec<f64>>,
    climb_category: Option<i64>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    #[serde(default)]
    private: Option<bool>,
}

impl From<StravaSegmentSummary> for SegmentSummary {
    fn from(s: StravaSegmentSummary) -> Self {
        SegmentSummary {
            id: s.id,
            name: s.name,
            activity_type: s.activity_type,
            distance: s.distance,
            average_grade: s.average_grade,
            maximum_grade: s.maximum_grade,
            elevation_high: s.elevation_high,
            elevation_low: s.elevation_low,
            start_latlng: latlng_pair(s.start_latlng),
            end_latlng: latlng_pair(s.end_latlng),
            climb_category: s.climb_category,
            city: s.city,
            state: s.state,
            country: s.country,
            private: s.private.unwrap_or(false),
        }
    }
}

/// Strava sends `[]` when a coordinate is unknown.
fn latlng_pair(values: Option<Vec<f64>>) -> Option<(f64, f64)> {
    match values.as_deref() {
        Some([lat, lng]) => Some((*lat, *lng)),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StravaDetailedSegment {
    #[serde(flatten)]
    summary: StravaSegmentSummary,
    total_elevation_gain: Option<f64>,
    effort_count: Option<i64>,
    athlete_count: Option<i64>,
    star_count: Option<i64>,
    #[serde(default)]
    hazardous: Option<bool>,
    created_at: Option<String>,
    updated_at: Option<String>,
    map: Option<StravaMap>,
}

/// Segment map data with polyline.
#[derive(Debug, Clone, Deserialize)]
struct StravaMap {
    polyline: Option<String>,
}

impl From<StravaDetailedSegment> for SegmentDetail {
    fn from(s: StravaDetailedSegment) -> Self {
        SegmentDetail {
            summary: s.summary.into(),
            total_elevation_gain: s.total_elevation_gain,
            effort_count: s.effort_count,
            athlete_count: s.athlete_count,
            star_count: s.star_count,
            hazardous: s.hazardous.unwrap_or(false),
            created_at: s.created_at,
            updated_at: s.updated_at,
            map_polyline: s.map.and_then(|m| m.polyline),
        }
    }
}

/// Summary activity for list endpoints.
#[derive(Debug, Clone, Deserialize)]
struct StravaActivitySummary {
    id: u64,
    name: Option<String>,
    sport_type: Option<String>,
    start_date: Option<String>,
    distance: Option<f64>,
}

impl From<StravaActivitySummary> for Activity {
    fn from(s: StravaActivitySummary) -> Self {
        Activity {
            id: s.id,
            name: s.name,
            sport_type: s.sport_type,
            start_date: s.start_date,
            distance_meters: s.distance,
            efforts_processed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let cases = [
            (StatusCode::UNAUTHORIZED, "fatal_auth"),
            (StatusCode::FORBIDDEN, "fatal_auth"),
            (StatusCode::NOT_FOUND, "not_found"),
            (StatusCode::TOO_MANY_REQUESTS, "transient"),
            (StatusCode::BAD_GATEWAY, "transient"),
            (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            (StatusCode::UNPROCESSABLE_ENTITY, "malformed"),
        ];
        for (status, expected) in cases {
            let err = classify_status(status, String::new());
            assert_eq!(err.class().as_str(), expected, "status {}", status);
        }
    }

    #[test]
    fn test_parse_activity_efforts() {
        let json = r#"{
            "id": 42,
            "name": "Morning Ride",
            "segment_efforts": [
                {
                    "id": 9001,
                    "name": "Old La Honda",
                    "activity": {"id": 42},
                    "elapsed_time": 1500,
                    "moving_time": 1490,
                    "start_date": "2024-05-01T07:30:00Z",
                    "start_date_local": "2024-05-01T00:30:00Z",
                    "distance": 4820.5,
                    "average_watts": 250.0,
                    "device_watts": true,
                    "average_heartrate": 160.2,
                    "max_heartrate": 181.0,
                    "pr_rank": 2,
                    "kom_rank": null,
                    "achievements": [],
                    "segment": {
                        "id": 8109834,
                        "name": "Old La Honda (Bridge to Mailboxes)",
                        "activity_type": "Ride",
                        "distance": 4820.5,
                        "average_grade": 7.9,
                        "maximum_grade": 13.4,
                        "elevation_high": 487.0,
                        "elevation_low": 103.0,
                        "start_latlng": [37.3908, -122.2494],
                        "end_latlng": [],
                        "climb_category": 3,
                        "city": "Woodside",
                        "state": "CA",
                        "country": "United States",
                        "private": false
                    }
                }
            ]
        }"#;

        let activity: StravaDetailedActivity = serde_json::from_str(json).unwrap();
        let efforts = activity.into_efforts(42);
        assert_eq!(efforts.len(), 1);

        let effort = &efforts[0];
        assert_eq!(effort.id, 9001);
        assert_eq!(effort.activity_id, 42);
        assert_eq!(effort.segment_id(), 8109834);
        assert_eq!(effort.elapsed_time, Some(1500));
        assert_eq!(effort.pr_rank, Some(2));
        assert_eq!(effort.kom_rank, None);
        assert!(effort.device_watts);
        assert_eq!(effort.segment.start_latlng, Some((37.3908, -122.2494)));
        assert_eq!(effort.segment.end_latlng, None);
    }

    #[test]
    fn test_missing_effort_list_is_empty() {
        let activity: StravaDetailedActivity =
            serde_json::from_str(r#"{"id": 7, "name": "Manual entry"}"#).unwrap();
        assert!(activity.into_efforts(7).is_empty());
    }

    #[test]
    fn test_effort_without_segment_is_rejected() {
        let json = r#"{"segment_efforts": [{"id": 1, "name": "orphan"}]}"#;
        assert!(serde_json::from_str::<StravaDetailedActivity>(json).is_err());
    }

    #[test]
    fn test_parse_segment_detail() {
        let json = r#"{
            "id": 229781,
            "name": "Hawk Hill",
            "activity_type": "Ride",
            "distance": 2684.82,
            "average_grade": 5.7,
            "maximum_grade": 14.2,
            "elevation_high": 245.3,
            "elevation_low": 92.4,
            "start_latlng": [37.8331119, -122.4834356],
            "end_latlng": [37.8280722, -122.4981393],
            "climb_category": 1,
            "city": "San Francisco",
            "state": "CA",
            "country": "United States",
            "private": false,
            "hazardous": false,
            "starred": false,
            "created_at": "2009-09-21T20:29:41Z",
            "updated_at": "2018-02-15T09:04:18Z",
            "total_elevation_gain": 155.733,
            "map": {"id": "s229781", "polyline": "}g|eFnpqjVl@En@Md@", "resource_state": 3},
            "effort_count": 309974,
            "athlete_count": 30623,
            "star_count": 2428
        }"#;

        let segment: StravaDetailedSegment = serde_json::from_str(json).unwrap();
        let detail = SegmentDetail::from(segment);
        assert_eq!(detail.summary.id, 229781);
        assert_eq!(detail.summary.name.as_deref(), Some("Hawk Hill"));
        assert_eq!(detail.total_elevation_gain, Some(155.733));
        assert_eq!(detail.effort_count, Some(309974));
        assert_eq!(detail.map_polyline.as_deref(), Some("}g|eFnpqjVl@En@Md@"));
        assert!(!detail.hazardous);
    }

    #[test]
    fn test_parse_activity_summary() {
        let json = r#"[{"id": 5, "name": "Lunch Run", "sport_type": "Run",
                       "start_date": "2024-06-01T12:00:00Z", "distance": 5012.3}]"#;
        let summaries: Vec<StravaActivitySummary> = serde_json::from_str(json).unwrap();
        let activity = Activity::from(summaries[0].clone());
        assert_eq!(activity.id, 5);
        assert_eq!(activity.sport_type.as_deref(), Some("Run"));
        assert!(!activity.efforts_processed);
    }

    #[tokio::test]
    async fn test_refresh_without_credentials_is_fatal() {
        let client = StravaClient::new(None);
        let err = client.refresh_token("refresh").await.unwrap_err();
        assert!(matches!(err, ApiError::FatalAuth(_)));
    }
}
