// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Training plan records produced by the plan generator.

use crate::models::ActivityType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A generated training plan (header only; sessions are stored separately).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// When the plan was generated (ISO 8601); the newest plan is the active one
    pub created_at: String,
}

/// One day's prescribed workout inside a training plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlannedSession {
    pub id: String,
    pub plan_id: String,
    pub user_id: String,
    pub day_number: u32,
    pub day_date: NaiveDate,
    #[serde(rename = "type")]
    pub session_type: ActivityType,
    #[serde(default)]
    pub planned_distance_km: Option<f64>,
    /// `HH:MM:SS`
    #[serde(default)]
    pub planned_duration: Option<String>,
    /// `M:SS/km`
    #[serde(default)]
    pub target_pace: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub actual_distance_km: Option<f64>,
    #[serde(default)]
    pub actual_duration: Option<String>,
    #[serde(default)]
    pub completion_date: Option<NaiveDate>,
}

impl PlannedSession {
    /// A planned day counts toward streaks and completion rates.
    pub fn is_trainable(&self) -> bool {
        !self.session_type.is_rest()
    }
}
