// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP API tests.
//!
//! These tests verify that:
//! 1. Protected routes reject requests without valid tokens
//! 2. Manual workouts and GPS runs are validated, stored and reconciled
//! 3. Streak and workout queries reflect what was stored
//! 4. CORS preflight requests return correct headers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use stride_coach::models::ActivityType;
use tower::ServiceExt;

mod common;
use common::{create_test_app, create_test_jwt, date, plan, planned};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str, user_id: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", create_test_jwt(user_id)))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, user_id: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", create_test_jwt(user_id)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn manual(title: &str, day: u32, distance_km: f64) -> Value {
    json!({
        "title": title,
        "type": "carrera",
        "distance_km": distance_km,
        "duration": "25:00",
        "date_completed": format!("2024-01-{:02}", day),
    })
}

const RUN_ID: &str = "6f1c2a4e-3f56-4d8e-9a55-2b1f0c9d7e11";

fn finished_run(run_id: &str) -> Value {
    let start = Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap();
    json!({
        "run": {
            "id": run_id,
            "start_time": start,
            "end_time": start + Duration::minutes(30),
            "distance_meters": 5200.0,
            "duration_text": "00:28:00",
            "active_seconds": 1680,
            "avg_pace": "5:23/km",
            "route_polyline": "_p~iF~ps|U_ulLnnqC"
        }
    })
}

#[tokio::test]
async fn test_protected_route_without_token() {
    let (app, _, _) = create_test_app();

    let request = Request::builder()
        .uri("/api/streak")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/streak")
        .header(header::AUTHORIZATION, "Bearer invalid.token.here")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let (app, _, _) = create_test_app();

    let request = Request::builder()
        .uri("/api/streak?today=2024-01-15")
        .header(header::COOKIE, format!("stride_token={}", create_test_jwt("u1")))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["streak"], 0);
    assert_eq!(body["week_start"], "2024-01-15");
}

#[tokio::test]
async fn test_manual_workout_validation() {
    let (app, _, db) = create_test_app();

    let (status, body) = send(&app, post("/api/workouts", "u1", manual("", 15, 5.0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let mut bad_duration = manual("Easy", 15, 5.0);
    bad_duration["duration"] = json!("half an hour");
    let (status, _) = send(&app, post("/api/workouts", "u1", bad_duration)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post("/api/workouts", "u1", manual("Easy", 15, -3.0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(db.workout_count(), 0);
}

#[tokio::test]
async fn test_manual_workouts_build_streak() {
    let (app, _, db) = create_test_app();
    plan(&db, "u1", "p1");
    for (n, day) in [(1, 15), (2, 16), (3, 17)] {
        db.put_planned_session(planned("u1", "p1", n, date(2024, 1, day), ActivityType::Run, Some(5.0)));
    }

    for day in [15, 16, 17] {
        let (status, body) = send(&app, post("/api/workouts", "u1", manual("Easy", day, 5.1))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["planned_session_id"], format!("p1-day{}", day - 14));
    }

    let (status, body) = send(&app, get("/api/streak?today=2024-01-17", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["streak"], 3);
    assert_eq!(
        body["week"],
        json!(["done", "done", "done", "future", "future", "future", "future"])
    );
    assert_eq!(body["trained_today"], true);

    let session = db.planned_session("p1-day2").unwrap();
    assert!(session.completed);
    assert_eq!(session.actual_duration.as_deref(), Some("00:25:00"));

    // Another user sees nothing
    let (_, body) = send(&app, get("/api/streak?today=2024-01-17", "u2")).await;
    assert_eq!(body["streak"], 0);
}

#[tokio::test]
async fn test_list_workouts_filters() {
    let (app, _, _) = create_test_app();
    for day in [14, 15, 16, 17] {
        send(&app, post("/api/workouts", "u1", manual("Easy", day, 5.0))).await;
    }

    let (status, body) = send(&app, get("/api/workouts?from=2024-01-15&to=2024-01-16", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    let dates: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["date_completed"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2024-01-16", "2024-01-15"]);

    let (_, body) = send(&app, get("/api/workouts?type=ciclismo", "u1")).await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, _) = send(&app, get("/api/workouts?type=yoga", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/workouts?from=2024-01-17&to=2024-01-15", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_run_upload_saved_or_queued() {
    let (app, state, db) = create_test_app();

    let (status, body) = send(&app, post("/api/runs", "u1", finished_run(RUN_ID))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "saved");

    let (_, body) = send(&app, get("/api/workouts", "u1")).await;
    assert_eq!(body[0]["source"], "gps");
    assert_eq!(body[0]["distance_km"], 5.2);
    assert_eq!(body[0]["date_completed"], "2024-01-15");
    assert_eq!(body[0]["route_polyline"], "_p~iF~ps|U_ulLnnqC");

    db.set_offline(true);
    let second_run = "0b7d9f3a-5c2e-4f1b-8d6a-9e4c3b2a1f00";
    let (status, body) = send(&app, post("/api/runs", "u1", finished_run(second_run))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["pending"], 1);

    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, body) = send(&app, health).await;
    assert_eq!(body["pending_runs"], 1);

    db.set_offline(false);
    let report = state.recorder.flush_pending().await.unwrap();
    assert_eq!(report.saved.len(), 1);
    assert_eq!(db.workout_count(), 2);
}

#[tokio::test]
async fn test_retried_run_upload_is_stored_once() {
    let (app, _, db) = create_test_app();
    plan(&db, "u1", "p1");
    for (n, day) in [(1, 14), (2, 15)] {
        db.put_planned_session(planned("u1", "p1", n, date(2024, 1, day), ActivityType::Run, Some(5.0)));
    }

    let (status, first) = send(&app, post("/api/runs", "u1", finished_run(RUN_ID))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["workout_id"], format!("gps_{}", RUN_ID));
    assert_eq!(first["planned_session_id"], "p1-day2");

    // Client retry after a lost response
    let (status, second) = send(&app, post("/api/runs", "u1", finished_run(RUN_ID))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second, first);

    assert_eq!(db.workout_count(), 1);
    assert!(db.planned_session("p1-day2").unwrap().completed);
    assert!(!db.planned_session("p1-day1").unwrap().completed);
}

#[tokio::test]
async fn test_run_upload_rejects_inconsistent_run() {
    let (app, _, db) = create_test_app();

    let mut run = finished_run(RUN_ID);
    run["run"]["distance_meters"] = json!(-10.0);
    let (status, _) = send(&app, post("/api/runs", "u1", run)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(db.workout_count(), 0);
}

#[tokio::test]
async fn test_sync_unknown_vendor() {
    let (app, _, _) = create_test_app();

    let (status, _) = send(&app, post("/api/sync/polar", "u1", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/streak")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_health_is_public() {
    let (app, _, _) = create_test_app();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["pending_runs"], 0);
}
