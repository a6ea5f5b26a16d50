// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Completed workout records and the activity/vendor enumerations they use.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activity category, stored with the app's Spanish identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ActivityType {
    #[serde(rename = "carrera")]
    Run,
    #[serde(rename = "ciclismo")]
    Cycling,
    #[serde(rename = "caminata")]
    Walk,
    #[serde(rename = "natacion")]
    Swim,
    #[serde(rename = "entrenamiento")]
    Training,
    /// Rest day; only meaningful on planned sessions.
    #[serde(rename = "descanso")]
    Rest,
    #[serde(rename = "otro", other)]
    Other,
}

impl ActivityType {
    pub fn is_rest(self) -> bool {
        self == ActivityType::Rest
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Run => "carrera",
            ActivityType::Cycling => "ciclismo",
            ActivityType::Walk => "caminata",
            ActivityType::Swim => "natacion",
            ActivityType::Training => "entrenamiento",
            ActivityType::Rest => "descanso",
            ActivityType::Other => "otro",
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carrera" => Ok(ActivityType::Run),
            "ciclismo" => Ok(ActivityType::Cycling),
            "caminata" => Ok(ActivityType::Walk),
            "natacion" => Ok(ActivityType::Swim),
            "entrenamiento" => Ok(ActivityType::Training),
            "descanso" => Ok(ActivityType::Rest),
            "otro" => Ok(ActivityType::Other),
            other => Err(format!("unknown activity type: {}", other)),
        }
    }
}

/// Third-party fitness platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Strava,
    Garmin,
}

impl Vendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::Strava => "strava",
            Vendor::Garmin => "garmin",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Strava => write!(f, "Strava"),
            Vendor::Garmin => write!(f, "Garmin"),
        }
    }
}

/// Where a completed workout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutSource {
    Manual,
    Gps,
    Strava,
    Garmin,
}

impl WorkoutSource {
    pub fn vendor(self) -> Option<Vendor> {
        match self {
            WorkoutSource::Strava => Some(Vendor::Strava),
            WorkoutSource::Garmin => Some(Vendor::Garmin),
            WorkoutSource::Manual | WorkoutSource::Gps => None,
        }
    }
}

impl From<Vendor> for WorkoutSource {
    fn from(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Strava => WorkoutSource::Strava,
            Vendor::Garmin => WorkoutSource::Garmin,
        }
    }
}

/// Stored completed workout, regardless of source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompletedWorkout {
    /// Persistence-assigned ID (also the document ID)
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub distance_km: f64,
    /// `HH:MM:SS`
    pub duration: String,
    /// Calendar date the workout counts for (reconciliation key)
    pub date_completed: NaiveDate,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub week_number: Option<u32>,
    /// Planned session this workout fulfilled
    #[serde(default)]
    pub planned_session_id: Option<String>,
    pub source: WorkoutSource,
    /// Vendor activity ID (de-duplication key together with `source`)
    #[serde(default)]
    pub vendor_activity_id: Option<String>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub average_heart_rate: Option<f64>,
    #[serde(default)]
    pub route_polyline: Option<String>,
    /// When this record was written (ISO 8601)
    pub created_at: String,
}

impl CompletedWorkout {
    /// De-duplication key for vendor imports.
    pub fn vendor_key(&self) -> Option<(Vendor, &str)> {
        match (self.source.vendor(), self.vendor_activity_id.as_deref()) {
            (Some(vendor), Some(id)) => Some((vendor, id)),
            _ => None,
        }
    }
}

/// A completed workout before persistence has assigned an ID.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompletedWorkout {
    pub user_id: String,
    pub title: String,
    pub activity_type: ActivityType,
    pub distance_km: f64,
    pub duration: String,
    pub date_completed: NaiveDate,
    pub plan_id: Option<String>,
    pub week_number: Option<u32>,
    pub source: WorkoutSource,
    pub vendor_activity_id: Option<String>,
    /// Tracker-assigned run ID for GPS runs
    pub run_id: Option<String>,
    pub calories: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub route_polyline: Option<String>,
}

impl NewCompletedWorkout {
    /// Document ID for this record. Vendor imports and GPS runs get a
    /// deterministic ID so a repeated import or upload lands on the same
    /// document.
    pub fn document_id(&self) -> String {
        match (self.source.vendor(), self.vendor_activity_id.as_deref()) {
            (Some(vendor), Some(id)) => vendor_document_id(vendor, id),
            _ => match (self.source, self.run_id.as_deref()) {
                (WorkoutSource::Gps, Some(run_id)) => gps_document_id(run_id),
                _ => uuid::Uuid::new_v4().to_string(),
            },
        }
    }

    pub fn into_record(self, id: String, created_at: String) -> CompletedWorkout {
        CompletedWorkout {
            id,
            user_id: self.user_id,
            title: self.title,
            activity_type: self.activity_type,
            distance_km: self.distance_km,
            duration: self.duration,
            date_completed: self.date_completed,
            plan_id: self.plan_id,
            week_number: self.week_number,
            planned_session_id: None,
            source: self.source,
            vendor_activity_id: self.vendor_activity_id,
            calories: self.calories,
            average_heart_rate: self.average_heart_rate,
            route_polyline: self.route_polyline,
            created_at,
        }
    }
}

/// Deterministic document ID for a vendor activity.
pub fn vendor_document_id(vendor: Vendor, vendor_activity_id: &str) -> String {
    format!("{}_{}", vendor.as_str(), vendor_activity_id)
}

/// Deterministic document ID for a tracked GPS run.
pub fn gps_document_id(run_id: &str) -> String {
    format!("gps_{}", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_uses_stored_identifiers() {
        let json = serde_json::to_string(&ActivityType::Run).unwrap();
        assert_eq!(json, "\"carrera\"");

        let parsed: ActivityType = serde_json::from_str("\"natacion\"").unwrap();
        assert_eq!(parsed, ActivityType::Swim);
    }

    #[test]
    fn test_unknown_activity_type_reads_as_other() {
        let parsed: ActivityType = serde_json::from_str("\"yoga\"").unwrap();
        assert_eq!(parsed, ActivityType::Other);
    }

    #[test]
    fn test_vendor_document_id_is_deterministic() {
        let workout = NewCompletedWorkout {
            user_id: "u1".to_string(),
            title: "Morning Run".to_string(),
            activity_type: ActivityType::Run,
            distance_km: 5.0,
            duration: "00:25:00".to_string(),
            date_completed: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            plan_id: None,
            week_number: None,
            source: WorkoutSource::Garmin,
            vendor_activity_id: Some("987".to_string()),
            run_id: None,
            calories: None,
            average_heart_rate: None,
            route_polyline: None,
        };

        assert_eq!(workout.document_id(), "garmin_987");
        assert_eq!(workout.document_id(), workout.document_id());

        let run = NewCompletedWorkout {
            source: WorkoutSource::Gps,
            vendor_activity_id: None,
            run_id: Some("6f1c2a4e".to_string()),
            ..workout.clone()
        };
        assert_eq!(run.document_id(), "gps_6f1c2a4e");

        let manual = NewCompletedWorkout {
            source: WorkoutSource::Manual,
            vendor_activity_id: None,
            ..workout
        };
        assert_ne!(manual.document_id(), manual.document_id());
    }
}
