// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streak and weekly-completion summaries returned to the UI.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Status of one day of the current week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Done,
    Missed,
    Rest,
    Future,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StreakSummary {
    /// Consecutive completed planned days ending at or before today
    pub streak: u32,
    /// Monday of the current week
    pub week_start: NaiveDate,
    /// Monday..Sunday
    pub week: [DayStatus; 7],
    /// Whether today has at least one completed workout
    pub trained_today: bool,
}
