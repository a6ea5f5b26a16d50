// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Finish-time persistence of GPS runs.
//!
//! A finished run is never dropped. If the store rejects it, the run is
//! queued in memory (and spooled to disk when a path is configured) and
//! the caller gets [`SaveOutcome::QueuedLocally`] instead of an error.

use crate::error::AppError;
use crate::models::{ActivityType, FinishedRun, NewCompletedWorkout, WorkoutSource};
use crate::services::reconcile::Reconciler;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// A finished run waiting to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRun {
    pub user_id: String,
    /// Calendar date the run counts for. Defaults to the UTC date of the
    /// start; callers that know the runner's time zone pass the local date.
    pub date_completed: NaiveDate,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub week_number: Option<u32>,
    pub run: FinishedRun,
}

impl PendingRun {
    pub fn new(user_id: impl Into<String>, run: FinishedRun) -> Self {
        Self {
            user_id: user_id.into(),
            date_completed: run.start_time.date_naive(),
            plan_id: None,
            week_number: None,
            run,
        }
    }

    pub fn to_workout(&self) -> NewCompletedWorkout {
        NewCompletedWorkout {
            user_id: self.user_id.clone(),
            title: "Carrera GPS".to_string(),
            activity_type: ActivityType::Run,
            distance_km: self.run.distance_km(),
            duration: self.run.duration_text.clone(),
            date_completed: self.date_completed,
            plan_id: self.plan_id.clone(),
            week_number: self.week_number,
            source: WorkoutSource::Gps,
            vendor_activity_id: None,
            run_id: Some(self.run.id.to_string()),
            calories: None,
            average_heart_rate: None,
            route_polyline: self.run.route_polyline.clone(),
        }
    }
}

/// What happened to a finished run handed to [`RunRecorder::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        workout_id: String,
        planned_session_id: Option<String>,
    },
    /// Kept locally; will be retried by [`RunRecorder::flush_pending`].
    QueuedLocally { pending: usize, reason: String },
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub saved: Vec<String>,
    pub remaining: usize,
}

pub struct RunRecorder {
    reconciler: Reconciler,
    spool_path: Option<PathBuf>,
    pending: Mutex<VecDeque<PendingRun>>,
}

impl RunRecorder {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            spool_path: None,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Recorder backed by a JSON spool file; runs left over from a previous
    /// process are loaded into the queue.
    pub async fn with_spool(reconciler: Reconciler, path: PathBuf) -> anyhow::Result<Self> {
        let pending = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<VecDeque<PendingRun>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), path = %path.display(), "Loaded unsaved runs");
        }
        Ok(Self {
            reconciler,
            spool_path: Some(path),
            pending: Mutex::new(pending),
        })
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Persist a finished run, queueing it locally if the store fails.
    pub async fn save(&self, run: PendingRun) -> SaveOutcome {
        match self.reconciler.record_completion(run.to_workout()).await {
            Ok(completion) => {
                if completion.newly_recorded {
                    tracing::info!(
                        run_id = %run.run.id,
                        workout_id = %completion.workout_id,
                        distance_meters = run.run.distance_meters,
                        "Run saved"
                    );
                } else {
                    tracing::info!(run_id = %run.run.id, "Run already saved");
                }
                SaveOutcome::Saved {
                    workout_id: completion.workout_id,
                    planned_session_id: completion.planned_session_id,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, run_id = %run.run.id, "Failed to save run, queueing locally");
                let mut pending = self.pending.lock().await;
                pending.push_back(run);
                self.write_spool(&pending).await;
                SaveOutcome::QueuedLocally {
                    pending: pending.len(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Retry queued runs oldest first, stopping at the first failure.
    pub async fn flush_pending(&self) -> Result<FlushReport, AppError> {
        let mut pending = self.pending.lock().await;
        let mut report = FlushReport::default();

        while let Some(run) = pending.front() {
            match self.reconciler.record_completion(run.to_workout()).await {
                Ok(completion) => {
                    report.saved.push(completion.workout_id);
                    pending.pop_front();
                }
                Err(e) => {
                    tracing::warn!(error = %e, remaining = pending.len(), "Flush stopped");
                    report.remaining = pending.len();
                    self.write_spool(&pending).await;
                    if report.saved.is_empty() {
                        return Err(e);
                    }
                    return Ok(report);
                }
            }
        }

        self.write_spool(&pending).await;
        Ok(report)
    }

    async fn write_spool(&self, pending: &VecDeque<PendingRun>) {
        let Some(path) = &self.spool_path else {
            return;
        };
        let result = match serde_json::to_vec(pending) {
            Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            // The in-memory queue still holds the runs.
            tracing::error!(error = %e, path = %path.display(), "Failed to write run spool");
        }
    }
}
