// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! StravaClient against a local axum stub of the Strava endpoints.
//!
//! Exercises the full reqwest path: status mapping, body decoding, query
//! parameters and the refresh-token form exchange.

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;
use std::collections::HashMap;

use segment_backfill::config::ClientCredentials;
use segment_backfill::error::ApiError;
use segment_backfill::services::{StravaApi, StravaClient};

const ACCESS: &str = "test-access";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", ACCESS))
        .unwrap_or(false)
}

async fn activity(Path(id): Path<u64>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Authorization Error").into_response();
    }
    match id {
        1 => Json(json!({
            "id": 1,
            "segment_efforts": [{
                "id": 9001,
                "name": "Old La Honda",
                "elapsed_time": 1420,
                "moving_time": 1418,
                "start_date": "2024-05-01T15:10:00Z",
                "distance": 4800.0,
                "device_watts": true,
                "segment": {
                    "id": 8109834,
                    "name": "Old La Honda (Bridge to Mailboxes)",
                    "distance": 4800.0,
                    "start_latlng": [37.3906, -122.2457],
                    "end_latlng": []
                }
            }]
        }))
        .into_response(),
        2 => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        3 => Json(json!({ "id": 3 })).into_response(),
        404 => (StatusCode::NOT_FOUND, r#"{"message":"Record Not Found"}"#).into_response(),
        429 => (StatusCode::TOO_MANY_REQUESTS, r#"{"message":"Rate Limit Exceeded"}"#)
            .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn segment(Path(id): Path<u64>) -> Response {
    match id {
        403 => (StatusCode::FORBIDDEN, r#"{"message":"Forbidden"}"#).into_response(),
        _ => Json(json!({
            "id": id,
            "name": "Kings Mountain",
            "distance": 6100.0,
            "total_elevation_gain": 480.0,
            "effort_count": 91234,
            "hazardous": false,
            "map": { "polyline": "abc" }
        }))
        .into_response(),
    }
}

async fn athlete_activities(Query(query): Query<HashMap<String, String>>) -> Response {
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
    let after = query.get("after").cloned().unwrap_or_default();
    if page != 1 {
        return Json(json!([])).into_response();
    }
    Json(json!([
        { "id": 11, "name": format!("after={}", after), "sport_type": "Ride",
          "start_date": "2024-06-01T08:00:00Z", "distance": 42000.0 },
        { "id": 12, "name": "Commute", "sport_type": "EBikeRide",
          "start_date": "2024-06-02T08:00:00Z" }
    ]))
    .into_response()
}

async fn token(Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("grant_type").map(String::as_str) != Some("refresh_token")
        || form.get("client_id").map(String::as_str) != Some("1234")
    {
        return (StatusCode::BAD_REQUEST, "bad form").into_response();
    }
    match form.get("refresh_token").map(String::as_str) {
        Some("good") => Json(json!({
            "token_type": "Bearer",
            "access_token": "new-access",
            "refresh_token": "rotated",
            "expires_at": 1_900_000_000i64
        }))
        .into_response(),
        Some("revoked") => (
            StatusCode::BAD_REQUEST,
            r#"{"message":"Bad Request","errors":[{"field":"refresh_token","code":"invalid"}]}"#,
        )
            .into_response(),
        Some("garbled") => (StatusCode::OK, "not json").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response(),
    }
}

/// Serve the stub on an ephemeral port and return a client pointed at it.
async fn stub_client() -> StravaClient {
    let app = Router::new()
        .route("/api/v3/activities/{id}", get(activity))
        .route("/api/v3/segments/{id}", get(segment))
        .route("/api/v3/athlete/activities", get(athlete_activities))
        .route("/oauth/token", post(token));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StravaClient::new(Some(ClientCredentials {
        client_id: "1234".to_string(),
        client_secret: "secret".to_string(),
    }))
    .with_base_url(
        format!("http://{}/api/v3", addr),
        format!("http://{}/oauth/token", addr),
    )
}

#[tokio::test]
async fn test_segment_efforts_are_decoded() {
    let client = stub_client().await;

    let efforts = client.segment_efforts(ACCESS, 1).await.unwrap();
    assert_eq!(efforts.len(), 1);
    let effort = &efforts[0];
    assert_eq!(effort.id, 9001);
    assert_eq!(effort.activity_id, 1);
    assert_eq!(effort.elapsed_time, Some(1420));
    assert!(effort.device_watts);
    assert_eq!(effort.segment.id, 8109834);
    assert_eq!(effort.segment.start_latlng, Some((37.3906, -122.2457)));
    assert_eq!(effort.segment.end_latlng, None);

    // An activity without the field has no efforts.
    assert!(client.segment_efforts(ACCESS, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resource_status_mapping() {
    let client = stub_client().await;

    let err = client.segment_efforts(ACCESS, 404).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)), "{:?}", err);

    let err = client.segment_efforts(ACCESS, 429).await.unwrap_err();
    assert!(matches!(err, ApiError::Transient(_)), "{:?}", err);

    let err = client.segment_efforts(ACCESS, 500).await.unwrap_err();
    assert!(matches!(err, ApiError::Transient(_)), "{:?}", err);

    let err = client.segment_efforts("wrong-token", 1).await.unwrap_err();
    assert!(matches!(err, ApiError::FatalAuth(_)), "{:?}", err);

    let err = client.segment(ACCESS, 403).await.unwrap_err();
    assert!(matches!(err, ApiError::FatalAuth(_)), "{:?}", err);
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let client = stub_client().await;

    let err = client.segment_efforts(ACCESS, 2).await.unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)), "{:?}", err);
}

#[tokio::test]
async fn test_segment_detail_and_activity_list() {
    let client = stub_client().await;

    let detail = client.segment(ACCESS, 611413).await.unwrap();
    assert_eq!(detail.summary.id, 611413);
    assert_eq!(detail.summary.name.as_deref(), Some("Kings Mountain"));
    assert_eq!(detail.effort_count, Some(91234));
    assert_eq!(detail.map_polyline.as_deref(), Some("abc"));

    let activities = client
        .list_activities(ACCESS, 1714548600, 1, 30)
        .await
        .unwrap();
    let ids: Vec<u64> = activities.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![11, 12]);
    assert_eq!(activities[0].name.as_deref(), Some("after=1714548600"));
    assert!(activities.iter().all(|a| !a.efforts_processed));

    assert!(client
        .list_activities(ACCESS, 1714548600, 2, 30)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_token_refresh_exchange() {
    let client = stub_client().await;

    let refreshed = client.refresh_token("good").await.unwrap();
    assert_eq!(refreshed.access_token, "new-access");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rotated"));
    assert_eq!(refreshed.expires_at, 1_900_000_000);

    let err = client.refresh_token("revoked").await.unwrap_err();
    assert!(matches!(err, ApiError::FatalAuth(_)), "{:?}", err);

    let err = client.refresh_token("garbled").await.unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)), "{:?}", err);

    let err = client.refresh_token("other").await.unwrap_err();
    assert!(matches!(err, ApiError::Transient(_)), "{:?}", err);
}
