// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process storage backend.
//!
//! Used for local runs without GCP credentials and by the test suite.
//! [`MemoryDb::set_offline`] makes every call fail, which is how tests
//! exercise the persistence-failure paths.

use crate::db::{InsertOutcome, PlanFilter, WorkoutFilter, WorkoutGateway};
use crate::error::AppError;
use crate::models::connection::connection_document_id;
use crate::models::{
    CompletedWorkout, NewCompletedWorkout, PlannedSession, TrainingPlan, Vendor, VendorConnection,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    workouts: DashMap<String, CompletedWorkout>,
    sessions: DashMap<String, PlannedSession>,
    plans: DashMap<String, TrainingPlan>,
    connections: DashMap<String, VendorConnection>,
    offline: AtomicBool,
}

/// Cheaply cloneable in-memory database.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost connection: all gateway calls fail while set.
    pub fn set_offline(&self, offline: bool) {
        self.tables.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), AppError> {
        if self.tables.offline.load(Ordering::SeqCst) {
            return Err(AppError::Database(
                "Database not connected (offline mode)".to_string(),
            ));
        }
        Ok(())
    }

    // ─── Plan seeding (plans come from the external generator) ─────

    pub fn put_plan(&self, plan: TrainingPlan) {
        self.tables.plans.insert(plan.id.clone(), plan);
    }

    pub fn put_planned_session(&self, session: PlannedSession) {
        self.tables.sessions.insert(session.id.clone(), session);
    }

    pub fn planned_session(&self, session_id: &str) -> Option<PlannedSession> {
        self.tables.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn workout_count(&self) -> usize {
        self.tables.workouts.len()
    }
}

#[async_trait]
impl WorkoutGateway for MemoryDb {
    async fn insert_completed_workout(
        &self,
        workout: &NewCompletedWorkout,
    ) -> Result<InsertOutcome, AppError> {
        self.check_online()?;
        let id = workout.document_id();
        let now = chrono::Utc::now().to_rfc3339();

        match self.tables.workouts.entry(id.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(workout_id = %id, "Workout already stored");
                Ok(InsertOutcome::Existing(existing.get().clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(workout.clone().into_record(id.clone(), now));
                Ok(InsertOutcome::Inserted(id))
            }
        }
    }

    async fn list_completed_workouts(
        &self,
        user_id: &str,
        filter: &WorkoutFilter,
    ) -> Result<Vec<CompletedWorkout>, AppError> {
        self.check_online()?;
        let mut workouts: Vec<CompletedWorkout> = self
            .tables
            .workouts
            .iter()
            .filter(|w| w.user_id == user_id && filter.matches(w))
            .map(|w| w.clone())
            .collect();
        workouts.sort_by(|a, b| {
            b.date_completed
                .cmp(&a.date_completed)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(workouts)
    }

    async fn find_vendor_workout(
        &self,
        vendor: Vendor,
        vendor_activity_id: &str,
    ) -> Result<Option<CompletedWorkout>, AppError> {
        self.check_online()?;
        Ok(self
            .tables
            .workouts
            .iter()
            .find(|w| w.vendor_key() == Some((vendor, vendor_activity_id)))
            .map(|w| w.clone()))
    }

    async fn link_planned_session(
        &self,
        workout_id: &str,
        session_id: &str,
    ) -> Result<(), AppError> {
        self.check_online()?;
        let mut workout = self
            .tables
            .workouts
            .get_mut(workout_id)
            .ok_or_else(|| AppError::NotFound(format!("Workout {}", workout_id)))?;
        workout.planned_session_id = Some(session_id.to_string());
        Ok(())
    }

    async fn list_planned_sessions(
        &self,
        user_id: &str,
        filter: &PlanFilter,
    ) -> Result<Vec<PlannedSession>, AppError> {
        self.check_online()?;
        let mut sessions: Vec<PlannedSession> = self
            .tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && filter.matches(s))
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| a.day_date.cmp(&b.day_date).then(a.day_number.cmp(&b.day_number)));
        Ok(sessions)
    }

    async fn latest_plan_id(&self, user_id: &str) -> Result<Option<String>, AppError> {
        self.check_online()?;
        Ok(self
            .tables
            .plans
            .iter()
            .filter(|p| p.user_id == user_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .map(|p| p.id.clone()))
    }

    async fn mark_planned_session_completed(
        &self,
        session_id: &str,
        actual_distance_km: f64,
        actual_duration: &str,
        completion_date: NaiveDate,
    ) -> Result<(), AppError> {
        self.check_online()?;
        let mut session = self
            .tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("Planned session {}", session_id)))?;
        session.completed = true;
        session.actual_distance_km = Some(actual_distance_km);
        session.actual_duration = Some(actual_duration.to_string());
        session.completion_date = Some(completion_date);
        Ok(())
    }

    async fn find_connection(
        &self,
        vendor: Vendor,
        external_user_id: &str,
    ) -> Result<Option<VendorConnection>, AppError> {
        self.check_online()?;
        Ok(self
            .tables
            .connections
            .iter()
            .find(|c| c.vendor == vendor && c.external_user_id == external_user_id)
            .map(|c| c.clone()))
    }

    async fn get_connection(
        &self,
        user_id: &str,
        vendor: Vendor,
    ) -> Result<Option<VendorConnection>, AppError> {
        self.check_online()?;
        Ok(self
            .tables
            .connections
            .get(&connection_document_id(user_id, vendor))
            .map(|c| c.clone()))
    }

    async fn upsert_connection(&self, connection: &VendorConnection) -> Result<(), AppError> {
        self.check_online()?;
        self.tables
            .connections
            .insert(connection.document_id(), connection.clone());
        Ok(())
    }
}
