// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::db::WorkoutFilter;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{
    ActivityType, CompletedWorkout, FinishedRun, NewCompletedWorkout, StreakSummary, Vendor,
    WorkoutSource,
};
use crate::services::ingest::BatchReport;
use crate::services::recorder::{PendingRun, SaveOutcome};
use crate::time_utils::{format_hms, parse_hms};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::{Validate, ValidationError};

/// Default look-back of a vendor sync without an explicit `after`.
const DEFAULT_SYNC_DAYS: i64 = 30;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/streak", get(get_streak))
        .route("/api/workouts", get(list_workouts).post(create_workout))
        .route("/api/runs", post(upload_run))
        .route("/api/sync/{vendor}", post(sync_vendor))
}

// ─── Streak ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct StreakQuery {
    /// The caller's local date; defaults to the server's UTC date
    today: Option<NaiveDate>,
}

/// Current streak and week view.
async fn get_streak(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<StreakQuery>,
) -> Result<Json<StreakSummary>> {
    let today = query.today.unwrap_or_else(|| Utc::now().date_naive());
    let summary = state.reconciler.refresh_streak(&user.user_id, today).await?;
    Ok(Json(summary))
}

// ─── Workouts ────────────────────────────────────────────────

#[derive(Deserialize)]
struct WorkoutQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    #[serde(rename = "type")]
    activity_type: Option<String>,
    plan_id: Option<String>,
}

/// List completed workouts, newest first. Date bounds are inclusive.
async fn list_workouts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<WorkoutQuery>,
) -> Result<Json<Vec<CompletedWorkout>>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::BadRequest("from is after to".to_string()));
        }
    }
    let activity_type = query
        .activity_type
        .as_deref()
        .map(str::parse::<ActivityType>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let filter = WorkoutFilter {
        from: query.from,
        to: query.to,
        plan_id: query.plan_id,
        activity_type,
    };
    let workouts = state
        .db
        .list_completed_workouts(&user.user_id, &filter)
        .await?;
    Ok(Json(workouts))
}

/// Manually entered workout.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualWorkoutRequest {
    #[validate(length(min = 1, max = 120, message = "Title must be 1-120 characters"))]
    pub title: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[validate(range(min = 0.0, max = 1000.0, message = "Distance must be between 0 and 1000 km"))]
    pub distance_km: f64,
    #[validate(custom(function = "validate_duration"))]
    pub duration: String,
    pub date_completed: NaiveDate,
    pub plan_id: Option<String>,
    #[validate(range(min = 1, max = 104, message = "Week number must be between 1 and 104"))]
    pub week_number: Option<u32>,
}

fn validate_duration(duration: &str) -> std::result::Result<(), ValidationError> {
    match parse_hms(duration) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("duration")
            .with_message("Duration must be HH:MM:SS or MM:SS".into())),
    }
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompletionResponse {
    pub workout_id: String,
    pub planned_session_id: Option<String>,
    pub streak: Option<StreakSummary>,
}

/// Record a manual workout, reconcile it and return the new streak.
async fn create_workout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ManualWorkoutRequest>,
) -> Result<(StatusCode, Json<CompletionResponse>)> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Normalize "25:00" to "00:25:00"
    let duration = parse_hms(&request.duration)
        .map(format_hms)
        .unwrap_or(request.duration);

    let workout = NewCompletedWorkout {
        user_id: user.user_id,
        title: request.title.trim().to_string(),
        activity_type: request.activity_type,
        distance_km: request.distance_km,
        duration,
        date_completed: request.date_completed,
        plan_id: request.plan_id,
        week_number: request.week_number,
        source: WorkoutSource::Manual,
        vendor_activity_id: None,
        run_id: None,
        calories: None,
        average_heart_rate: None,
        route_polyline: None,
    };

    let completion = state.reconciler.record_completion(workout).await?;
    Ok((
        StatusCode::CREATED,
        Json(CompletionResponse {
            workout_id: completion.workout_id,
            planned_session_id: completion.planned_session_id,
            streak: completion.streak,
        }),
    ))
}

// ─── GPS Runs ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunUploadRequest {
    pub run: FinishedRun,
    /// Runner's local date; defaults to the UTC date of the start time
    pub date_completed: Option<NaiveDate>,
    pub plan_id: Option<String>,
    pub week_number: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunUploadResponse {
    Saved {
        workout_id: String,
        planned_session_id: Option<String>,
    },
    /// Not stored yet; the server retries in the background.
    Queued { pending: usize, message: String },
}

/// Store a finished GPS run.
async fn upload_run(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<RunUploadRequest>,
) -> Result<(StatusCode, Json<RunUploadResponse>)> {
    let run = &request.run;
    if !run.distance_meters.is_finite() || run.distance_meters < 0.0 {
        return Err(AppError::BadRequest("distance_meters must be >= 0".to_string()));
    }
    if run.end_time < run.start_time || run.active_seconds < 0 {
        return Err(AppError::BadRequest("run ends before it starts".to_string()));
    }

    let mut pending = PendingRun::new(user.user_id, request.run);
    if let Some(date) = request.date_completed {
        pending.date_completed = date;
    }
    pending.plan_id = request.plan_id;
    pending.week_number = request.week_number;

    let (status, body) = match state.recorder.save(pending).await {
        SaveOutcome::Saved {
            workout_id,
            planned_session_id,
        } => (
            StatusCode::CREATED,
            RunUploadResponse::Saved {
                workout_id,
                planned_session_id,
            },
        ),
        SaveOutcome::QueuedLocally { pending, .. } => (
            StatusCode::ACCEPTED,
            RunUploadResponse::Queued {
                pending,
                message: "Saved locally, will sync later".to_string(),
            },
        ),
    };
    Ok((status, Json(body)))
}

// ─── Vendor Sync ─────────────────────────────────────────────

#[derive(Deserialize)]
struct SyncQuery {
    after: Option<DateTime<Utc>>,
}

/// Pull recent activities from a connected vendor.
async fn sync_vendor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(vendor): Path<String>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<BatchReport>> {
    let vendor = match vendor.as_str() {
        "strava" => Vendor::Strava,
        "garmin" => Vendor::Garmin,
        other => return Err(AppError::BadRequest(format!("Unknown vendor: {}", other))),
    };
    let after = query
        .after
        .unwrap_or_else(|| Utc::now() - Duration::days(DEFAULT_SYNC_DAYS));
    tracing::info!(user_id = %user.user_id, vendor = %vendor, after = %after, "Vendor sync requested");

    let report = match vendor {
        Vendor::Strava => state.strava_service.sync_since(&user.user_id, after).await?,
        Vendor::Garmin => state.garmin_service.sync_since(&user.user_id, after).await?,
    };
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ManualWorkoutRequest {
        ManualWorkoutRequest {
            title: "Tempo".to_string(),
            activity_type: ActivityType::Run,
            distance_km: 8.0,
            duration: "00:40:00".to_string(),
            date_completed: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            plan_id: None,
            week_number: Some(3),
        }
    }

    #[test]
    fn test_manual_workout_validation() {
        assert!(request().validate().is_ok());

        let mut r = request();
        r.title = String::new();
        assert!(r.validate().is_err());

        let mut r = request();
        r.distance_km = -1.0;
        assert!(r.validate().is_err());

        let mut r = request();
        r.duration = "forty minutes".to_string();
        assert!(r.validate().is_err());

        let mut r = request();
        r.week_number = Some(0);
        assert!(r.validate().is_err());
    }
}
