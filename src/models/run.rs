// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Run session records: the live session owned by the tracker and the
//! immutable record produced when it finishes.

use crate::models::GpsFix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Finished,
}

/// Live view of an in-progress run.
///
/// Only the tracker mutates this; everything else sees cloned snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct RunSession {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated distance over accepted segments
    pub distance_meters: f64,
    /// Active (non-paused) elapsed time as `HH:MM:SS`
    pub duration_text: String,
    pub is_active: bool,
    pub is_paused: bool,
    /// Fixes in arrival order
    pub gps_fixes: Vec<GpsFix>,
    /// Most recent position, for the map dot
    pub current_location: Option<GpsFix>,
    /// Average pace as `M:SS/km`, set at finish
    pub avg_pace: Option<String>,
    /// Last provider error seen while running, cleared by the next fix
    pub last_error: Option<String>,
}

/// Immutable record of a finished run, handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FinishedRun {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub distance_meters: f64,
    pub duration_text: String,
    pub active_seconds: i64,
    pub avg_pace: String,
    #[cfg_attr(feature = "binding-generation", ts(skip))]
    #[serde(default)]
    pub gps_fixes: Vec<GpsFix>,
    /// Encoded polyline (precision 5) of the fixes
    pub route_polyline: Option<String>,
}

impl FinishedRun {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}
