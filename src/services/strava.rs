// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client and activity import.
//!
//! Handles:
//! - Activity fetching (single activity for webhooks, pages for sync)
//! - Normalization into [`VendorActivity`]
//! - Token refresh and the single retry on a rejected token
//! - Deauthorization (connection flagged for reconnect)

use crate::db::WorkoutGateway;
use crate::error::AppError;
use crate::models::{ActivityType, Vendor};
use crate::services::ingest::{
    ActivityIngestor, BatchReport, IngestOutcome, MalformedActivity, VendorActivity,
};
use crate::services::oauth::{read_json, TokenManager};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

pub const STRAVA_API_URL: &str = "https://www.strava.com/api/v3";
pub const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Page size for activity listing (Strava maximum is 200).
const SYNC_PAGE_SIZE: u32 = 100;
/// Upper bound on pages fetched by one sync.
const SYNC_MAX_PAGES: u32 = 10;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for StravaClient {
    fn default() -> Self {
        Self::new(STRAVA_API_URL)
    }
}

impl StravaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Get a detailed activity by ID.
    pub async fn get_activity(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::VendorApi(Vendor::Strava, e.to_string()))?;

        read_json(Vendor::Strava, response).await
    }

    /// List the athlete's activities started after `after` (paginated).
    pub async fn list_activities(
        &self,
        access_token: &str,
        after: i64, // Unix timestamp
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::VendorApi(Vendor::Strava, e.to_string()))?;

        read_json(Vendor::Strava, response).await
    }
}

/// Athlete reference embedded in activities.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthleteRef {
    pub id: u64,
}

/// Activity map data with polylines.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StravaMap {
    pub polyline: Option<String>,
    pub summary_polyline: Option<String>,
}

/// Strava activity (detailed or summary representation).
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivity {
    pub id: u64,
    pub athlete: StravaAthleteRef,
    #[serde(default)]
    pub name: Option<String>,
    pub sport_type: String,
    pub start_date: String,
    /// Local wall-clock start, formatted with a misleading `Z` suffix
    pub start_date_local: String,
    #[serde(default)]
    pub distance: Option<f64>,
    pub moving_time: i64,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl StravaActivity {
    /// Get the detailed polyline, falling back to summary if not available.
    pub fn get_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.polyline
            .as_deref()
            .or(map.summary_polyline.as_deref())
            .filter(|p| !p.is_empty())
    }

    pub fn to_vendor_activity(&self) -> Result<VendorActivity, MalformedActivity> {
        let local_date = DateTime::parse_from_rfc3339(&self.start_date_local)
            .map_err(|_| MalformedActivity::InvalidValue {
                field: "start_date_local",
                value: self.start_date_local.clone(),
            })?
            .date_naive();

        Ok(VendorActivity {
            vendor: Vendor::Strava,
            external_user_id: self.athlete.id.to_string(),
            activity_id: self.id.to_string(),
            name: self.name.clone(),
            activity_type: map_strava_type(&self.sport_type),
            duration_seconds: self.moving_time,
            local_date,
            distance_meters: self.distance.filter(|d| *d > 0.0),
            calories: self.calories,
            average_heart_rate: self.average_heartrate,
            route_polyline: self.get_polyline().map(String::from),
        })
    }
}

/// Map a Strava `sport_type` onto the local activity categories.
pub fn map_strava_type(sport_type: &str) -> ActivityType {
    match sport_type.to_lowercase().as_str() {
        "run" | "trailrun" | "virtualrun" => ActivityType::Run,
        "ride" | "mountainbikeride" | "gravelride" | "ebikeride" | "emountainbikeride"
        | "virtualride" | "velomobile" => ActivityType::Cycling,
        "walk" | "hike" => ActivityType::Walk,
        "swim" => ActivityType::Swim,
        "weighttraining" | "workout" | "crossfit" | "highintensityintervaltraining"
        | "elliptical" | "stairstepper" => ActivityType::Training,
        _ => ActivityType::Other,
    }
}

/// High-level Strava service: token lifecycle, API calls and import.
#[derive(Clone)]
pub struct StravaService {
    client: StravaClient,
    db: Arc<dyn WorkoutGateway>,
    tokens: TokenManager,
    ingestor: ActivityIngestor,
}

impl StravaService {
    pub fn new(
        client: StravaClient,
        db: Arc<dyn WorkoutGateway>,
        tokens: TokenManager,
        ingestor: ActivityIngestor,
    ) -> Self {
        Self {
            client,
            db,
            tokens,
            ingestor,
        }
    }

    /// Fetch one activity on behalf of a user, retrying once on token expiry.
    pub async fn fetch_activity(
        &self,
        user_id: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError> {
        let client = &self.client;
        self.tokens
            .with_token_retry(user_id, |token| async move {
                client.get_activity(&token, activity_id).await
            })
            .await
    }

    /// Webhook `activity/create`: resolve, fetch and import.
    pub async fn handle_activity_created(
        &self,
        athlete_id: u64,
        activity_id: u64,
    ) -> Result<IngestOutcome, AppError> {
        let Some(connection) = self
            .db
            .find_connection(Vendor::Strava, &athlete_id.to_string())
            .await?
        else {
            tracing::info!(athlete_id, activity_id, "Webhook for unknown athlete, dropping");
            return Ok(IngestOutcome::UnknownUser);
        };

        // Skip the API call for redelivered events.
        if self
            .db
            .find_vendor_workout(Vendor::Strava, &activity_id.to_string())
            .await?
            .is_some()
        {
            tracing::debug!(activity_id, "Activity already imported (webhook redelivery)");
            return Ok(IngestOutcome::Duplicate);
        }

        let activity = self
            .fetch_activity(&connection.user_id, activity_id)
            .await?;
        let normalized = activity
            .to_vendor_activity()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        self.ingestor.ingest(&normalized).await
    }

    /// Webhook athlete deauthorization.
    pub async fn handle_deauthorization(&self, athlete_id: u64) -> Result<(), AppError> {
        match self
            .db
            .find_connection(Vendor::Strava, &athlete_id.to_string())
            .await?
        {
            Some(connection) => self.tokens.mark_needs_reconnect(&connection.user_id).await,
            None => {
                tracing::debug!(athlete_id, "Deauthorization for unknown athlete");
                Ok(())
            }
        }
    }

    /// Import everything the user recorded since `after`.
    ///
    /// Token problems fail the whole sync (reconnect required); individual
    /// bad activities are reported and skipped.
    pub async fn sync_since(
        &self,
        user_id: &str,
        after: DateTime<Utc>,
    ) -> Result<BatchReport, AppError> {
        let client = &self.client;
        let mut activities = Vec::new();

        for page in 1..=SYNC_MAX_PAGES {
            let batch = self
                .tokens
                .with_token_retry(user_id, |token| async move {
                    client
                        .list_activities(&token, after.timestamp(), page, SYNC_PAGE_SIZE)
                        .await
                })
                .await?;

            let done = batch.len() < SYNC_PAGE_SIZE as usize;
            activities.extend(batch);
            if done {
                break;
            }
        }

        tracing::info!(user_id, count = activities.len(), "Strava sync fetched activities");
        let report = self
            .ingestor
            .ingest_batch(activities.iter().map(StravaActivity::to_vendor_activity))
            .await;
        tracing::info!(
            user_id,
            ingested = report.ingested,
            duplicates = report.duplicates,
            failed = report.failed.len(),
            "Strava sync complete"
        );
        Ok(report)
    }
}
