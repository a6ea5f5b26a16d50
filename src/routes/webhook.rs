// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Strava events and Garmin push notifications.

use crate::error::AppError;
use crate::services::garmin::GarminPush;
use crate::services::ingest::{BatchReport, IngestOutcome};
use crate::AppState;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", get(verify).post(handle_event))
        .route("/webhook/garmin", post(handle_garmin_push))
}

/// Strava webhook verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
}

/// Verification response.
#[derive(Serialize, Default)]
struct VerifyResponse {
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

/// Verify webhook subscription (GET).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let token_matches: bool = params
        .verify_token
        .as_bytes()
        .ct_eq(state.config.webhook_verify_token.as_bytes())
        .into();
    if params.mode == "subscribe" && token_matches {
        tracing::info!("Webhook subscription verified");
        (
            StatusCode::OK,
            Json(VerifyResponse {
                challenge: params.challenge,
            }),
        )
    } else {
        tracing::warn!(mode = %params.mode, "Webhook verification failed: invalid token");
        (StatusCode::FORBIDDEN, Json(VerifyResponse::default()))
    }
}

/// Strava webhook event payload.
#[derive(Deserialize, Debug)]
struct WebhookEvent {
    object_type: String, // "activity" or "athlete"
    object_id: u64,
    aspect_type: String, // "create", "update", "delete"
    owner_id: u64,
    subscription_id: u64,
    /// For athlete events, contains {"authorized": "false"} on deauthorization
    #[serde(default)]
    updates: Option<std::collections::HashMap<String, serde_json::Value>>,
}

/// Strava sends: object_type="athlete", aspect_type="update", updates={"authorized": "false"}
fn is_deauthorization(event: &WebhookEvent) -> bool {
    event
        .updates
        .as_ref()
        .and_then(|u| u.get("authorized"))
        .is_some_and(|v| v == false || v == "false")
}

/// Handle incoming Strava webhook events (POST).
///
/// Strava expects a 200 within two seconds, so imports run in the
/// background and their failures are only logged.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let event: WebhookEvent = match serde_json::from_value(payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse webhook event");
            return StatusCode::OK; // 200 anyway so Strava does not retry
        }
    };

    if let Some(expected) = state.config.strava_subscription_id {
        if event.subscription_id != expected {
            tracing::warn!(
                received_id = event.subscription_id,
                expected_id = expected,
                "Security Alert: Webhook subscription ID mismatch"
            );
            return StatusCode::FORBIDDEN;
        }
    }

    tracing::info!(
        object_type = %event.object_type,
        object_id = event.object_id,
        aspect_type = %event.aspect_type,
        owner_id = event.owner_id,
        "Webhook event received"
    );

    match (event.object_type.as_str(), event.aspect_type.as_str()) {
        ("activity", "create") => {
            let strava = state.strava_service.clone();
            let (athlete_id, activity_id) = (event.owner_id, event.object_id);
            tokio::spawn(async move {
                match strava.handle_activity_created(athlete_id, activity_id).await {
                    Ok(IngestOutcome::Inserted { workout_id, .. }) => {
                        tracing::debug!(activity_id, workout_id = %workout_id, "Webhook import done");
                    }
                    Ok(_) => {}
                    Err(AppError::ReconnectRequired(_)) => {
                        tracing::warn!(athlete_id, "Webhook import needs the athlete to reconnect");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, activity_id, "Webhook import failed");
                    }
                }
            });
        }
        ("athlete", "update") if is_deauthorization(&event) => {
            let strava = state.strava_service.clone();
            let athlete_id = event.owner_id;
            tokio::spawn(async move {
                if let Err(e) = strava.handle_deauthorization(athlete_id).await {
                    tracing::error!(error = %e, athlete_id, "Failed to record deauthorization");
                } else {
                    tracing::info!(athlete_id, "Athlete deauthorized");
                }
            });
        }
        _ => {
            tracing::debug!(
                object_type = %event.object_type,
                aspect_type = %event.aspect_type,
                "Ignoring unhandled event type"
            );
        }
    }

    StatusCode::OK
}

/// Garmin push authentication query params.
#[derive(Deserialize)]
struct PushAuth {
    #[serde(default)]
    token: Option<String>,
}

/// Constant-time check of the push token against the configured secret.
/// Nothing is accepted while no secret is configured.
fn push_authorized(secret: Option<&str>, token: Option<&str>) -> bool {
    match (secret, token) {
        (Some(secret), Some(token)) => token.as_bytes().ct_eq(secret.as_bytes()).into(),
        _ => false,
    }
}

/// Garmin activity push (POST). 403 without the shared secret; otherwise
/// always 200, with per-item failures in the report.
async fn handle_garmin_push(
    State(state): State<Arc<AppState>>,
    Query(auth): Query<PushAuth>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<BatchReport>, StatusCode> {
    if !push_authorized(
        state.config.garmin_webhook_secret.as_deref(),
        auth.token.as_deref(),
    ) {
        tracing::warn!(
            configured = state.config.garmin_webhook_secret.is_some(),
            "Security Alert: Garmin push rejected, bad or missing token"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let push: GarminPush = match serde_json::from_value(payload) {
        Ok(push) => push,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse Garmin push");
            return Ok(Json(BatchReport {
                failed: vec![(0, e.to_string())],
                ..BatchReport::default()
            }));
        }
    };

    let report = state.garmin_service.handle_push(push).await;
    tracing::info!(
        ingested = report.ingested,
        duplicates = report.duplicates,
        unresolved = report.unresolved,
        failed = report.failed.len(),
        "Garmin push processed"
    );
    Ok(Json(report))
}
