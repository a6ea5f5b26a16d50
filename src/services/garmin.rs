// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Garmin activity import (push notifications and pull sync).

use crate::error::AppError;
use crate::models::{ActivityType, Vendor};
use crate::services::ingest::{ActivityIngestor, BatchReport, MalformedActivity, VendorActivity};
use crate::services::oauth::{read_json, TokenManager};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

pub const GARMIN_API_URL: &str = "https://apis.garmin.com/wellness-api/rest";
pub const GARMIN_TOKEN_URL: &str = "https://diauth.garmin.com/di-oauth2-service/oauth/token";

/// Garmin rejects pull windows longer than a day.
const PULL_WINDOW_SECS: i64 = 24 * 60 * 60;
/// How far back a single pull sync may reach.
const PULL_MAX_DAYS: i64 = 7;

/// Push notification body: `{"activities": [...]}`.
///
/// Items stay raw JSON so one malformed summary does not reject the rest.
#[derive(Debug, Deserialize)]
pub struct GarminPush {
    #[serde(default)]
    pub activities: Vec<serde_json::Value>,
}

/// Garmin activity summary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminActivity {
    pub user_id: String,
    #[serde(default)]
    pub summary_id: Option<String>,
    #[serde(default)]
    pub activity_id: Option<u64>,
    #[serde(default)]
    pub activity_name: Option<String>,
    pub activity_type: String,
    #[serde(default)]
    pub duration_in_seconds: Option<i64>,
    pub start_time_in_seconds: i64,
    /// Offset of the athlete's local time from UTC
    #[serde(default)]
    pub start_time_offset_in_seconds: i64,
    #[serde(default)]
    pub distance_in_meters: Option<f64>,
    #[serde(default)]
    pub active_kilocalories: Option<f64>,
    #[serde(default)]
    pub average_heart_rate_in_beats_per_minute: Option<f64>,
}

impl GarminActivity {
    pub fn from_json(value: serde_json::Value) -> Result<Self, MalformedActivity> {
        serde_json::from_value(value).map_err(|e| MalformedActivity::InvalidValue {
            field: "activity",
            value: e.to_string(),
        })
    }

    pub fn to_vendor_activity(&self) -> Result<VendorActivity, MalformedActivity> {
        let activity_id = self
            .activity_id
            .map(|id| id.to_string())
            .or_else(|| self.summary_id.clone())
            .ok_or(MalformedActivity::MissingField("activityId"))?;
        let duration_seconds = self
            .duration_in_seconds
            .ok_or(MalformedActivity::MissingField("durationInSeconds"))?;

        let local_start = self.start_time_in_seconds + self.start_time_offset_in_seconds;
        let local_date = DateTime::from_timestamp(local_start, 0)
            .ok_or_else(|| MalformedActivity::InvalidValue {
                field: "startTimeInSeconds",
                value: self.start_time_in_seconds.to_string(),
            })?
            .date_naive();

        Ok(VendorActivity {
            vendor: Vendor::Garmin,
            external_user_id: self.user_id.clone(),
            activity_id,
            name: self.activity_name.clone(),
            activity_type: map_garmin_type(&self.activity_type),
            duration_seconds,
            local_date,
            distance_meters: self.distance_in_meters,
            calories: self.active_kilocalories,
            average_heart_rate: self.average_heart_rate_in_beats_per_minute,
            route_polyline: None,
        })
    }
}

/// Map a Garmin activity type key onto the local categories.
pub fn map_garmin_type(garmin_type: &str) -> ActivityType {
    match garmin_type.to_lowercase().as_str() {
        "running" | "trail_running" | "treadmill_running" | "track_running"
        | "street_running" | "indoor_running" | "virtual_run" => ActivityType::Run,
        "cycling" | "road_biking" | "mountain_biking" | "gravel_cycling" | "indoor_cycling"
        | "virtual_ride" | "cyclocross" | "e_bike_fitness" => ActivityType::Cycling,
        "walking" | "casual_walking" | "speed_walking" | "hiking" => ActivityType::Walk,
        "lap_swimming" | "open_water_swimming" | "swimming" => ActivityType::Swim,
        "strength_training" | "fitness_equipment" | "hiit" | "cardio" | "indoor_cardio"
        | "elliptical" | "stair_climbing" => ActivityType::Training,
        _ => ActivityType::Other,
    }
}

/// Garmin import service. Push works without API credentials; pull sync
/// needs them.
#[derive(Clone)]
pub struct GarminService {
    http: reqwest::Client,
    base_url: String,
    tokens: Option<TokenManager>,
    ingestor: ActivityIngestor,
}

impl GarminService {
    pub fn new(ingestor: ActivityIngestor, tokens: Option<TokenManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GARMIN_API_URL.to_string(),
            tokens,
            ingestor,
        }
    }

    /// Ingest a push notification; each summary is handled independently.
    pub async fn handle_push(&self, push: GarminPush) -> BatchReport {
        let items = push
            .activities
            .into_iter()
            .map(|raw| GarminActivity::from_json(raw)?.to_vendor_activity());
        self.ingestor.ingest_batch(items).await
    }

    /// Pull activities uploaded since `after` (at most a week back).
    pub async fn sync_since(
        &self,
        user_id: &str,
        after: DateTime<Utc>,
    ) -> Result<BatchReport, AppError> {
        let tokens = self.tokens.as_ref().ok_or_else(|| {
            AppError::BadRequest("Garmin sync is not configured".to_string())
        })?;

        let now = Utc::now();
        let mut start = after.max(now - Duration::days(PULL_MAX_DAYS)).timestamp();
        let end = now.timestamp();
        let mut summaries = Vec::new();

        while start < end {
            let window_end = (start + PULL_WINDOW_SECS).min(end);
            let page: Vec<GarminActivity> = tokens
                .with_token_retry(user_id, |token| self.fetch_window(token, start, window_end))
                .await?;
            summaries.extend(page);
            start = window_end;
        }

        let report = self
            .ingestor
            .ingest_batch(summaries.iter().map(GarminActivity::to_vendor_activity))
            .await;
        tracing::info!(
            user_id,
            ingested = report.ingested,
            duplicates = report.duplicates,
            failed = report.failed.len(),
            "Garmin sync complete"
        );
        Ok(report)
    }

    async fn fetch_window(
        &self,
        access_token: String,
        start: i64,
        end: i64,
    ) -> Result<Vec<GarminActivity>, AppError> {
        let response = self
            .http
            .get(format!("{}/activities", self.base_url))
            .bearer_auth(access_token)
            .query(&[
                ("uploadStartTimeInSeconds", start.to_string()),
                ("uploadEndTimeInSeconds", end.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::VendorApi(Vendor::Garmin, e.to_string()))?;

        read_json(Vendor::Garmin, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_local_date_uses_start_offset() {
        // 2024-01-16T03:00:00Z, athlete at UTC-8 → still the 15th locally
        let activity = GarminActivity::from_json(json!({
            "userId": "g-1",
            "summaryId": "5001968355",
            "activityType": "RUNNING",
            "durationInSeconds": 1800,
            "startTimeInSeconds": 1705374000,
            "startTimeOffsetInSeconds": -28800,
            "distanceInMeters": 5000.0
        }))
        .unwrap();
        let normalized = activity.to_vendor_activity().unwrap();

        assert_eq!(normalized.local_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(normalized.activity_id, "5001968355");
        assert_eq!(normalized.activity_type, ActivityType::Run);
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let activity = GarminActivity::from_json(json!({
            "userId": "g-1",
            "activityId": 77,
            "activityType": "YOGA",
            "durationInSeconds": 3600,
            "startTimeInSeconds": 1705374000
        }))
        .unwrap();
        let normalized = activity.to_vendor_activity().unwrap();

        assert_eq!(normalized.activity_id, "77");
        assert_eq!(normalized.activity_type, ActivityType::Other);
        assert_eq!(normalized.distance_meters, None);
        assert_eq!(normalized.calories, None);
    }

    #[test]
    fn test_missing_duration_is_malformed() {
        let activity = GarminActivity::from_json(json!({
            "userId": "g-1",
            "activityId": 78,
            "activityType": "RUNNING",
            "startTimeInSeconds": 1705374000
        }))
        .unwrap();
        assert_eq!(
            activity.to_vendor_activity(),
            Err(MalformedActivity::MissingField("durationInSeconds"))
        );
    }

    #[test]
    fn test_map_garmin_type() {
        assert_eq!(map_garmin_type("TRAIL_RUNNING"), ActivityType::Run);
        assert_eq!(map_garmin_type("road_biking"), ActivityType::Cycling);
        assert_eq!(map_garmin_type("LAP_SWIMMING"), ActivityType::Swim);
        assert_eq!(map_garmin_type("STRENGTH_TRAINING"), ActivityType::Training);
        assert_eq!(map_garmin_type("PADDLEBOARDING"), ActivityType::Other);
    }
}
