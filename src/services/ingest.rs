// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vendor activity ingestion.
//!
//! Strava and Garmin payloads are first normalized into a [`VendorActivity`]
//! by their clients. From there every import takes the same path:
//! 1. Resolve the local user from the vendor user ID (unknown → dropped)
//! 2. Skip activities that were already imported
//! 3. Convert to a completed workout in local units
//! 4. Insert, then reconcile against the user's active plan
//!
//! In a batch, a bad item is recorded and skipped; it never aborts the rest.

use crate::db::WorkoutGateway;
use crate::error::AppError;
use crate::models::{ActivityType, NewCompletedWorkout, Vendor, WorkoutSource};
use crate::services::reconcile::Reconciler;
use crate::time_utils::format_hms;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Why a vendor payload item could not be normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedActivity {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Vendor-neutral activity summary.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorActivity {
    pub vendor: Vendor,
    /// Vendor-side user ID (athlete ID, Garmin user ID)
    pub external_user_id: String,
    pub activity_id: String,
    pub name: Option<String>,
    pub activity_type: ActivityType,
    pub duration_seconds: i64,
    /// The athlete's local calendar date at the start of the activity
    pub local_date: NaiveDate,
    /// Absent for non-distance activities
    pub distance_meters: Option<f64>,
    pub calories: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub route_polyline: Option<String>,
}

impl VendorActivity {
    /// Reject values that would corrupt stored totals.
    pub fn validate(&self) -> Result<(), MalformedActivity> {
        if self.activity_id.trim().is_empty() {
            return Err(MalformedActivity::MissingField("activity_id"));
        }
        if self.external_user_id.trim().is_empty() {
            return Err(MalformedActivity::MissingField("user_id"));
        }
        if self.duration_seconds < 0 {
            return Err(MalformedActivity::InvalidValue {
                field: "duration",
                value: self.duration_seconds.to_string(),
            });
        }
        if let Some(d) = self.distance_meters {
            if !d.is_finite() || d < 0.0 {
                return Err(MalformedActivity::InvalidValue {
                    field: "distance",
                    value: d.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Completed-workout record for `user_id` in local units.
    pub fn to_workout(&self, user_id: &str) -> NewCompletedWorkout {
        NewCompletedWorkout {
            user_id: user_id.to_string(),
            title: self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("{} activity", self.vendor)),
            activity_type: self.activity_type,
            distance_km: self.distance_meters.unwrap_or(0.0) / 1000.0,
            duration: format_hms(self.duration_seconds),
            date_completed: self.local_date,
            plan_id: None,
            week_number: None,
            source: WorkoutSource::from(self.vendor),
            vendor_activity_id: Some(self.activity_id.clone()),
            run_id: None,
            calories: self.calories,
            average_heart_rate: self.average_heart_rate,
            route_polyline: self.route_polyline.clone(),
        }
    }
}

/// Outcome of ingesting one activity.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Inserted {
        workout_id: String,
        planned_session_id: Option<String>,
    },
    /// Already imported; nothing written
    Duplicate,
    /// No local user is connected to this vendor account
    UnknownUser,
}

/// Per-batch counts, returned to the webhook caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub ingested: usize,
    pub duplicates: usize,
    pub unresolved: usize,
    /// (index in batch, reason)
    pub failed: Vec<(usize, String)>,
}

#[derive(Clone)]
pub struct ActivityIngestor {
    db: Arc<dyn WorkoutGateway>,
    reconciler: Reconciler,
}

impl ActivityIngestor {
    pub fn new(db: Arc<dyn WorkoutGateway>, reconciler: Reconciler) -> Self {
        Self { db, reconciler }
    }

    /// Import one activity.
    pub async fn ingest(&self, activity: &VendorActivity) -> Result<IngestOutcome, AppError> {
        activity
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let Some(connection) = self
            .db
            .find_connection(activity.vendor, &activity.external_user_id)
            .await?
        else {
            tracing::info!(
                vendor = %activity.vendor,
                external_user_id = %activity.external_user_id,
                activity_id = %activity.activity_id,
                "No local user for vendor account, dropping activity"
            );
            return Ok(IngestOutcome::UnknownUser);
        };

        if self
            .db
            .find_vendor_workout(activity.vendor, &activity.activity_id)
            .await?
            .is_some()
        {
            tracing::debug!(
                vendor = %activity.vendor,
                activity_id = %activity.activity_id,
                "Activity already imported"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let completion = self
            .reconciler
            .record_completion(activity.to_workout(&connection.user_id))
            .await?;

        // Lost a race with a concurrent delivery of the same activity
        if !completion.newly_recorded {
            tracing::debug!(
                vendor = %activity.vendor,
                activity_id = %activity.activity_id,
                "Activity already imported"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        tracing::info!(
            vendor = %activity.vendor,
            activity_id = %activity.activity_id,
            user_id = %connection.user_id,
            workout_id = %completion.workout_id,
            fulfilled = completion.planned_session_id.is_some(),
            "Vendor activity imported"
        );

        Ok(IngestOutcome::Inserted {
            workout_id: completion.workout_id,
            planned_session_id: completion.planned_session_id,
        })
    }

    /// Import a batch, item by item.
    pub async fn ingest_batch<I>(&self, items: I) -> BatchReport
    where
        I: IntoIterator<Item = Result<VendorActivity, MalformedActivity>>,
    {
        let mut report = BatchReport::default();

        for (index, item) in items.into_iter().enumerate() {
            let activity = match item {
                Ok(activity) => activity,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed vendor activity");
                    report.failed.push((index, e.to_string()));
                    continue;
                }
            };

            match self.ingest(&activity).await {
                Ok(IngestOutcome::Inserted { .. }) => report.ingested += 1,
                Ok(IngestOutcome::Duplicate) => report.duplicates += 1,
                Ok(IngestOutcome::UnknownUser) => report.unresolved += 1,
                Err(e) => {
                    tracing::warn!(
                        index,
                        activity_id = %activity.activity_id,
                        error = %e,
                        "Vendor activity import failed"
                    );
                    report.failed.push((index, e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity() -> VendorActivity {
        VendorActivity {
            vendor: Vendor::Garmin,
            external_user_id: "g-1".to_string(),
            activity_id: "555".to_string(),
            name: None,
            activity_type: ActivityType::Run,
            duration_seconds: 3_725,
            local_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            distance_meters: Some(10_250.0),
            calories: Some(640.0),
            average_heart_rate: None,
            route_polyline: None,
        }
    }

    #[test]
    fn test_unit_conversion() {
        let workout = activity().to_workout("u1");
        assert_eq!(workout.distance_km, 10.25);
        assert_eq!(workout.duration, "01:02:05");
        assert_eq!(workout.title, "Garmin activity");
        assert_eq!(workout.source, WorkoutSource::Garmin);
        assert_eq!(workout.vendor_activity_id.as_deref(), Some("555"));
    }

    #[test]
    fn test_missing_distance_is_zero_km() {
        let mut a = activity();
        a.distance_meters = None;
        a.activity_type = ActivityType::Training;
        assert!(a.validate().is_ok());
        assert_eq!(a.to_workout("u1").distance_km, 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut a = activity();
        a.activity_id = " ".to_string();
        assert_eq!(
            a.validate(),
            Err(MalformedActivity::MissingField("activity_id"))
        );

        let mut a = activity();
        a.distance_meters = Some(f64::NAN);
        assert!(a.validate().is_err());

        let mut a = activity();
        a.duration_seconds = -1;
        assert!(a.validate().is_err());
    }
}
