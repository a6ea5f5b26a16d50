// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! [`WorkoutGateway`] is the persistence surface the tracker, reconciler
//! and ingestion paths depend on. No transaction spans two calls; callers
//! must tolerate seeing one write without the other.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{
    ActivityType, CompletedWorkout, NewCompletedWorkout, PlannedSession, Vendor, VendorConnection,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Collection names as constants.
pub mod collections {
    pub const COMPLETED_WORKOUTS: &str = "completed_workouts";
    pub const PLANNED_SESSIONS: &str = "planned_sessions";
    pub const TRAINING_PLANS: &str = "training_plans";
    /// Vendor connections (keyed by `{vendor}_{user_id}`)
    pub const CONNECTIONS: &str = "vendor_connections";
}

/// Completed-workout query. Date bounds are inclusive calendar dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub plan_id: Option<String>,
    pub activity_type: Option<ActivityType>,
}

impl WorkoutFilter {
    pub fn matches(&self, workout: &CompletedWorkout) -> bool {
        in_range(workout.date_completed, self.from, self.to)
            && self
                .plan_id
                .as_deref()
                .is_none_or(|p| workout.plan_id.as_deref() == Some(p))
            && self
                .activity_type
                .is_none_or(|t| workout.activity_type == t)
    }
}

/// Planned-session query. No `plan_id` means across all of the user's plans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanFilter {
    pub plan_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl PlanFilter {
    pub fn for_plan(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: Some(plan_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, session: &PlannedSession) -> bool {
        in_range(session.day_date, self.from, self.to)
            && self.plan_id.as_deref().is_none_or(|p| session.plan_id == p)
    }
}

fn in_range(date: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.is_none_or(|f| date >= f) && to.is_none_or(|t| date <= t)
}

/// Result of [`WorkoutGateway::insert_completed_workout`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// New record written under this ID
    Inserted(String),
    /// A record with the same deterministic ID was already stored; it is
    /// returned untouched.
    Existing(CompletedWorkout),
}

impl InsertOutcome {
    pub fn workout_id(&self) -> &str {
        match self {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Existing(workout) => &workout.id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Durable store for completed workouts, planned sessions and vendor links.
#[async_trait]
pub trait WorkoutGateway: Send + Sync {
    /// Store a completed workout. Create-only: never overwrites.
    ///
    /// Vendor imports and GPS runs are written under a deterministic
    /// document ID, so two racing inserts of the same activity leave one
    /// record and exactly one caller sees [`InsertOutcome::Inserted`].
    async fn insert_completed_workout(
        &self,
        workout: &NewCompletedWorkout,
    ) -> Result<InsertOutcome, AppError>;

    async fn list_completed_workouts(
        &self,
        user_id: &str,
        filter: &WorkoutFilter,
    ) -> Result<Vec<CompletedWorkout>, AppError>;

    async fn find_vendor_workout(
        &self,
        vendor: Vendor,
        vendor_activity_id: &str,
    ) -> Result<Option<CompletedWorkout>, AppError>;

    /// Record which planned session a workout fulfilled.
    async fn link_planned_session(&self, workout_id: &str, session_id: &str)
        -> Result<(), AppError>;

    async fn list_planned_sessions(
        &self,
        user_id: &str,
        filter: &PlanFilter,
    ) -> Result<Vec<PlannedSession>, AppError>;

    /// ID of the most recently generated plan, if any.
    async fn latest_plan_id(&self, user_id: &str) -> Result<Option<String>, AppError>;

    async fn mark_planned_session_completed(
        &self,
        session_id: &str,
        actual_distance_km: f64,
        actual_duration: &str,
        completion_date: NaiveDate,
    ) -> Result<(), AppError>;

    /// Resolve a vendor-side user ID to its connection.
    async fn find_connection(
        &self,
        vendor: Vendor,
        external_user_id: &str,
    ) -> Result<Option<VendorConnection>, AppError>;

    async fn get_connection(
        &self,
        user_id: &str,
        vendor: Vendor,
    ) -> Result<Option<VendorConnection>, AppError>;

    async fn upsert_connection(&self, connection: &VendorConnection) -> Result<(), AppError>;
}
