// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the [`WorkoutGateway`] operations over:
//! - Completed workouts (all sources; vendor imports under deterministic IDs)
//! - Planned sessions and training plans (written by the plan generator)
//! - Vendor connections (OAuth tokens per user and vendor)

use crate::db::{collections, InsertOutcome, PlanFilter, WorkoutFilter, WorkoutGateway};
use crate::error::AppError;
use crate::models::connection::connection_document_id;
use crate::models::workout::vendor_document_id;
use crate::models::{
    CompletedWorkout, NewCompletedWorkout, PlannedSession, TrainingPlan, Vendor, VendorConnection,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    async fn get_workout(&self, workout_id: &str) -> Result<Option<CompletedWorkout>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::COMPLETED_WORKOUTS)
            .obj()
            .one(workout_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn set_workout(&self, workout: &CompletedWorkout) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::COMPLETED_WORKOUTS)
            .document_id(&workout.id)
            .object(workout)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Plan writes (used by the plan generator and emulator tests) ─

    pub async fn put_plan(&self, plan: &TrainingPlan) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::TRAINING_PLANS)
            .document_id(&plan.id)
            .object(plan)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn put_planned_session(&self, session: &PlannedSession) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::PLANNED_SESSIONS)
            .document_id(&session.id)
            .object(session)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl WorkoutGateway for FirestoreDb {
    async fn insert_completed_workout(
        &self,
        workout: &NewCompletedWorkout,
    ) -> Result<InsertOutcome, AppError> {
        let id = workout.document_id();
        let record = workout
            .clone()
            .into_record(id.clone(), chrono::Utc::now().to_rfc3339());

        // Create-only: Firestore rejects the write if the document exists
        let inserted: Result<CompletedWorkout, _> = self
            .client
            .fluent()
            .insert()
            .into(collections::COMPLETED_WORKOUTS)
            .document_id(&id)
            .object(&record)
            .execute()
            .await;

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(id)),
            Err(firestore::errors::FirestoreError::DataConflictError(_)) => {
                tracing::debug!(workout_id = %id, "Workout already stored");
                let existing = self
                    .get_workout(&id)
                    .await?
                    .ok_or_else(|| AppError::Database(format!("Workout {} vanished", id)))?;
                Ok(InsertOutcome::Existing(existing))
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn list_completed_workouts(
        &self,
        user_id: &str,
        filter: &WorkoutFilter,
    ) -> Result<Vec<CompletedWorkout>, AppError> {
        let user_id = user_id.to_string();
        let from = filter.from.map(|d| d.to_string());
        let to = filter.to.map(|d| d.to_string());
        let plan_id = filter.plan_id.clone();
        let activity_type = filter.activity_type.map(|t| t.as_str());

        self.client
            .fluent()
            .select()
            .from(collections::COMPLETED_WORKOUTS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id.clone()),
                    from.clone()
                        .and_then(|d| q.field("date_completed").greater_than_or_equal(d)),
                    to.clone()
                        .and_then(|d| q.field("date_completed").less_than_or_equal(d)),
                    plan_id.clone().and_then(|p| q.field("plan_id").eq(p)),
                    activity_type.and_then(|t| q.field("type").eq(t)),
                ])
            })
            .order_by([(
                "date_completed",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_vendor_workout(
        &self,
        vendor: Vendor,
        vendor_activity_id: &str,
    ) -> Result<Option<CompletedWorkout>, AppError> {
        self.get_workout(&vendor_document_id(vendor, vendor_activity_id))
            .await
    }

    async fn link_planned_session(
        &self,
        workout_id: &str,
        session_id: &str,
    ) -> Result<(), AppError> {
        let mut workout = self
            .get_workout(workout_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workout {}", workout_id)))?;
        workout.planned_session_id = Some(session_id.to_string());
        self.set_workout(&workout).await
    }

    async fn list_planned_sessions(
        &self,
        user_id: &str,
        filter: &PlanFilter,
    ) -> Result<Vec<PlannedSession>, AppError> {
        let user_id = user_id.to_string();
        let plan_id = filter.plan_id.clone();
        let from = filter.from.map(|d| d.to_string());
        let to = filter.to.map(|d| d.to_string());

        // Cross-plan listing needs the (user_id, day_date) composite index;
        // without it Firestore fails the query and callers fall back.
        self.client
            .fluent()
            .select()
            .from(collections::PLANNED_SESSIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id.clone()),
                    plan_id.clone().and_then(|p| q.field("plan_id").eq(p)),
                    from.clone()
                        .and_then(|d| q.field("day_date").greater_than_or_equal(d)),
                    to.clone().and_then(|d| q.field("day_date").less_than_or_equal(d)),
                ])
            })
            .order_by([("day_date", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn latest_plan_id(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let user_id = user_id.to_string();
        let plans: Vec<TrainingPlan> = self
            .client
            .fluent()
            .select()
            .from(collections::TRAINING_PLANS)
            .filter(move |q| q.for_all([q.field("user_id").eq(user_id.clone())]))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(plans.into_iter().next().map(|p| p.id))
    }

    async fn mark_planned_session_completed(
        &self,
        session_id: &str,
        actual_distance_km: f64,
        actual_duration: &str,
        completion_date: NaiveDate,
    ) -> Result<(), AppError> {
        let client = &self.client;
        let mut session: PlannedSession = client
            .fluent()
            .select()
            .by_id_in(collections::PLANNED_SESSIONS)
            .obj()
            .one(session_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Planned session {}", session_id)))?;

        session.completed = true;
        session.actual_distance_km = Some(actual_distance_km);
        session.actual_duration = Some(actual_duration.to_string());
        session.completion_date = Some(completion_date);

        self.put_planned_session(&session).await
    }

    async fn find_connection(
        &self,
        vendor: Vendor,
        external_user_id: &str,
    ) -> Result<Option<VendorConnection>, AppError> {
        let external_user_id = external_user_id.to_string();
        let connections: Vec<VendorConnection> = self
            .client
            .fluent()
            .select()
            .from(collections::CONNECTIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("vendor").eq(vendor.as_str()),
                    q.field("external_user_id").eq(external_user_id.clone()),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(connections.into_iter().next())
    }

    async fn get_connection(
        &self,
        user_id: &str,
        vendor: Vendor,
    ) -> Result<Option<VendorConnection>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::CONNECTIONS)
            .obj()
            .one(&connection_document_id(user_id, vendor))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_connection(&self, connection: &VendorConnection) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::CONNECTIONS)
            .document_id(connection.document_id())
            .object(connection)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
