// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod connection;
pub mod gps;
pub mod plan;
pub mod run;
pub mod streak;
pub mod workout;

pub use connection::VendorConnection;
pub use gps::GpsFix;
pub use plan::{PlannedSession, TrainingPlan};
pub use run::{FinishedRun, RunSession, RunState};
pub use streak::{DayStatus, StreakSummary};
pub use workout::{ActivityType, CompletedWorkout, NewCompletedWorkout, Vendor, WorkoutSource};
