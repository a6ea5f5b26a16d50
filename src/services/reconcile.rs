// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streak and weekly-completion reconciliation.
//!
//! Completed workouts and planned sessions are written independently (GPS
//! finish, manual entry, vendor webhooks, plan generator). This module is
//! the only place that reads both. All status is derived from the *set* of
//! dates with a completion, so duplicate rows or repeated runs never change
//! the answer.

use crate::config::PlanMatchConfig;
use crate::db::{InsertOutcome, PlanFilter, WorkoutFilter, WorkoutGateway};
use crate::error::AppError;
use crate::events::{AppEvent, EventBus};
use crate::models::{
    CompletedWorkout, DayStatus, NewCompletedWorkout, PlannedSession, StreakSummary,
};
use crate::time_utils::week_start;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Calendar dates with at least one completed workout.
pub fn completed_dates<'a>(
    workouts: impl IntoIterator<Item = &'a CompletedWorkout>,
) -> BTreeSet<NaiveDate> {
    workouts.into_iter().map(|w| w.date_completed).collect()
}

/// Trainable planned dates, ascending and de-duplicated.
pub fn planned_days<'a>(
    sessions: impl IntoIterator<Item = &'a PlannedSession>,
) -> BTreeSet<NaiveDate> {
    sessions
        .into_iter()
        .filter(|s| s.is_trainable())
        .map(|s| s.day_date)
        .collect()
}

/// Consecutive completed planned days, counted backward from `today`.
///
/// Future planned days are skipped. The first planned day on or before
/// today without a completion ends the count.
pub fn compute_streak(
    planned: &BTreeSet<NaiveDate>,
    completed: &BTreeSet<NaiveDate>,
    today: NaiveDate,
) -> u32 {
    let mut streak = 0;
    for day in planned.range(..=today).rev() {
        if !completed.contains(day) {
            break;
        }
        streak += 1;
    }
    streak
}

/// Monday-indexed status of the week containing `today`.
pub fn week_status(
    planned: &BTreeSet<NaiveDate>,
    completed: &BTreeSet<NaiveDate>,
    today: NaiveDate,
) -> [DayStatus; 7] {
    let monday = week_start(today);
    std::array::from_fn(|i| {
        let day = monday + Duration::days(i as i64);
        if day > today {
            DayStatus::Future
        } else if !planned.contains(&day) {
            DayStatus::Rest
        } else if completed.contains(&day) {
            DayStatus::Done
        } else {
            DayStatus::Missed
        }
    })
}

/// Streak plus week view. An empty plan is treated as "today is planned".
pub fn summarize(
    planned: &BTreeSet<NaiveDate>,
    completed: &BTreeSet<NaiveDate>,
    today: NaiveDate,
) -> StreakSummary {
    let today_only;
    let planned = if planned.is_empty() {
        today_only = BTreeSet::from([today]);
        &today_only
    } else {
        planned
    };

    StreakSummary {
        streak: compute_streak(planned, completed, today),
        week_start: week_start(today),
        week: week_status(planned, completed, today),
        trained_today: completed.contains(&today),
    }
}

/// Pick the unfulfilled planned session a workout satisfies.
///
/// Candidates must have the same type, be dated on or before the workout
/// and within the matching window, and (when a distance is prescribed) be
/// within the distance tolerance. The closest-dated candidate wins.
pub fn match_planned_session<'a>(
    workout: &CompletedWorkout,
    sessions: &'a [PlannedSession],
    config: &PlanMatchConfig,
) -> Option<&'a PlannedSession> {
    let earliest = workout.date_completed - Duration::days(config.window_days);

    sessions
        .iter()
        .filter(|s| !s.completed && s.is_trainable())
        .filter(|s| s.session_type == workout.activity_type)
        .filter(|s| s.day_date <= workout.date_completed && s.day_date >= earliest)
        .filter(|s| match s.planned_distance_km {
            Some(planned) if planned > 0.0 => {
                (workout.distance_km - planned).abs() <= planned * config.distance_tolerance
            }
            _ => true,
        })
        .max_by(|a, b| {
            a.day_date
                .cmp(&b.day_date)
                .then_with(|| b.day_number.cmp(&a.day_number))
        })
}

/// Result of recording one completed workout.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub workout_id: String,
    pub planned_session_id: Option<String>,
    pub streak: Option<StreakSummary>,
    /// False when the workout was already stored by an earlier call
    pub newly_recorded: bool,
}

/// Reconciles completions against the training plan and publishes updates.
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<dyn WorkoutGateway>,
    events: EventBus,
    config: PlanMatchConfig,
}

impl Reconciler {
    pub fn new(db: Arc<dyn WorkoutGateway>, events: EventBus, config: PlanMatchConfig) -> Self {
        Self { db, events, config }
    }

    /// Store a workout, fulfil its planned session and refresh the streak.
    ///
    /// Only the insert is fatal. Matching and streak failures are logged;
    /// the next refresh recomputes everything from scratch anyway.
    ///
    /// A workout that was already stored is returned as it is: it is not
    /// matched again and no completion event is published.
    pub async fn record_completion(
        &self,
        workout: NewCompletedWorkout,
    ) -> Result<Completion, AppError> {
        let workout_id = match self.db.insert_completed_workout(&workout).await? {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Existing(existing) => {
                tracing::debug!(workout_id = %existing.id, "Completion already recorded");
                return Ok(Completion {
                    workout_id: existing.id,
                    planned_session_id: existing.planned_session_id,
                    streak: None,
                    newly_recorded: false,
                });
            }
        };
        let record = workout.into_record(workout_id.clone(), Utc::now().to_rfc3339());

        let planned_session_id = match self.fulfil_planned_session(&record).await {
            Ok(session) => session.map(|s| s.id),
            Err(e) => {
                tracing::warn!(error = %e, workout_id = %workout_id, "Plan matching failed");
                None
            }
        };

        self.events.publish(AppEvent::WorkoutCompleted {
            user_id: record.user_id.clone(),
            workout_id: workout_id.clone(),
            date: record.date_completed,
            planned_session_id: planned_session_id.clone(),
        });

        let streak = match self
            .refresh_streak(&record.user_id, Utc::now().date_naive())
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %record.user_id, "Streak refresh failed");
                None
            }
        };

        Ok(Completion {
            workout_id,
            planned_session_id,
            streak,
            newly_recorded: true,
        })
    }

    /// Mark the matching planned session of the user's active plan completed.
    pub async fn fulfil_planned_session(
        &self,
        workout: &CompletedWorkout,
    ) -> Result<Option<PlannedSession>, AppError> {
        let plan_id = match &workout.plan_id {
            Some(id) => Some(id.clone()),
            None => self.db.latest_plan_id(&workout.user_id).await?,
        };
        let Some(plan_id) = plan_id else {
            tracing::debug!(user_id = %workout.user_id, "No active plan to reconcile against");
            return Ok(None);
        };

        let filter = PlanFilter {
            plan_id: Some(plan_id),
            from: Some(workout.date_completed - Duration::days(self.config.window_days)),
            to: Some(workout.date_completed),
        };
        let sessions = self
            .db
            .list_planned_sessions(&workout.user_id, &filter)
            .await?;

        let Some(session) = match_planned_session(workout, &sessions, &self.config) else {
            tracing::debug!(workout_id = %workout.id, "No planned session matched");
            return Ok(None);
        };

        self.db
            .mark_planned_session_completed(
                &session.id,
                workout.distance_km,
                &workout.duration,
                workout.date_completed,
            )
            .await?;
        self.db.link_planned_session(&workout.id, &session.id).await?;

        tracing::info!(
            workout_id = %workout.id,
            session_id = %session.id,
            day_number = session.day_number,
            "Planned session fulfilled"
        );

        let mut fulfilled = session.clone();
        fulfilled.completed = true;
        fulfilled.actual_distance_km = Some(workout.distance_km);
        fulfilled.actual_duration = Some(workout.duration.clone());
        fulfilled.completion_date = Some(workout.date_completed);
        Ok(Some(fulfilled))
    }

    /// Recompute streak and week view and publish the new streak.
    pub async fn refresh_streak(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<StreakSummary, AppError> {
        // Completions from every plan count, so no plan filter here.
        let workouts = self
            .db
            .list_completed_workouts(user_id, &WorkoutFilter::default())
            .await?;
        let completed = completed_dates(&workouts);
        let planned = self.load_planned_days(user_id).await;

        let summary = summarize(&planned, &completed, today);
        tracing::debug!(
            user_id,
            streak = summary.streak,
            planned_days = planned.len(),
            completed_days = completed.len(),
            "Streak recomputed"
        );

        self.events.publish(AppEvent::StreakUpdated {
            user_id: user_id.to_string(),
            streak: summary.streak,
        });
        Ok(summary)
    }

    /// Planned days across all plans, else the latest plan, else nothing.
    async fn load_planned_days(&self, user_id: &str) -> BTreeSet<NaiveDate> {
        match self
            .db
            .list_planned_sessions(user_id, &PlanFilter::default())
            .await
        {
            Ok(sessions) => {
                let days = planned_days(&sessions);
                if !days.is_empty() {
                    return days;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id, "Global planned-session listing failed");
            }
        }

        let plan_id = match self.db.latest_plan_id(user_id).await {
            Ok(Some(id)) => id,
            Ok(None) => return BTreeSet::new(),
            Err(e) => {
                tracing::warn!(error = %e, user_id, "Could not load latest plan");
                return BTreeSet::new();
            }
        };

        match self
            .db
            .list_planned_sessions(user_id, &PlanFilter::for_plan(plan_id))
            .await
        {
            Ok(sessions) => planned_days(&sessions),
            Err(e) => {
                tracing::warn!(error = %e, user_id, "Latest-plan session listing failed");
                BTreeSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityType, WorkoutSource};

    fn d(day: u32) -> NaiveDate {
        // 2024-01-15 is a Monday
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dates(days: &[u32]) -> BTreeSet<NaiveDate> {
        days.iter().map(|&day| d(day)).collect()
    }

    fn session(id: &str, day: u32, kind: ActivityType, km: Option<f64>) -> PlannedSession {
        PlannedSession {
            id: id.to_string(),
            plan_id: "p1".to_string(),
            user_id: "u1".to_string(),
            day_number: day,
            day_date: d(day),
            session_type: kind,
            planned_distance_km: km,
            planned_duration: None,
            target_pace: None,
            completed: false,
            actual_distance_km: None,
            actual_duration: None,
            completion_date: None,
        }
    }

    fn workout(day: u32, kind: ActivityType, km: f64) -> CompletedWorkout {
        CompletedWorkout {
            id: "w1".to_string(),
            user_id: "u1".to_string(),
            title: "Workout".to_string(),
            activity_type: kind,
            distance_km: km,
            duration: "00:30:00".to_string(),
            date_completed: d(day),
            plan_id: None,
            week_number: None,
            planned_session_id: None,
            source: WorkoutSource::Manual,
            vendor_activity_id: None,
            calories: None,
            average_heart_rate: None,
            route_polyline: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_streak_breaks_at_first_missed_day() {
        let planned = dates(&[15, 16, 17, 18]);
        // Today (18) not completed
        assert_eq!(compute_streak(&planned, &dates(&[15, 17]), d(18)), 0);
        // Today completed, yesterday missed
        assert_eq!(compute_streak(&planned, &dates(&[15, 16, 18]), d(18)), 1);
        // All completed
        assert_eq!(compute_streak(&planned, &dates(&[15, 16, 17, 18]), d(18)), 4);
    }

    #[test]
    fn test_streak_skips_future_days() {
        let planned = dates(&[15, 16, 19, 20]);
        assert_eq!(compute_streak(&planned, &dates(&[15, 16]), d(17)), 2);
    }

    #[test]
    fn test_unplanned_completion_does_not_extend_streak() {
        let planned = dates(&[15, 17]);
        // The run on the 16th was extra; only planned days count
        assert_eq!(compute_streak(&planned, &dates(&[15, 16, 17]), d(17)), 2);
        assert_eq!(compute_streak(&planned, &dates(&[16]), d(17)), 0);
    }

    #[test]
    fn test_rest_sessions_excluded_from_planned_days() {
        let sessions = vec![
            session("a", 15, ActivityType::Run, None),
            session("b", 16, ActivityType::Rest, None),
            session("c", 17, ActivityType::Run, None),
        ];
        let planned = planned_days(&sessions);
        assert_eq!(planned, dates(&[15, 17]));
        // Rest day between does not break the streak
        assert_eq!(compute_streak(&planned, &dates(&[15, 17]), d(17)), 2);
    }

    #[test]
    fn test_week_status() {
        let planned = dates(&[15, 16, 17, 19]);
        let completed = dates(&[15, 17, 18]);
        let week = week_status(&planned, &completed, d(17));
        assert_eq!(
            week,
            [
                DayStatus::Done,   // Mon
                DayStatus::Missed, // Tue
                DayStatus::Done,   // Wed (today)
                DayStatus::Future, // Thu, unplanned but upcoming
                DayStatus::Future, // Fri
                DayStatus::Future,
                DayStatus::Future,
            ]
        );

        let week = week_status(&planned, &completed, d(21));
        assert_eq!(week[3], DayStatus::Rest);
        assert_eq!(week[4], DayStatus::Missed);
        assert_eq!(week[6], DayStatus::Rest);
    }

    #[test]
    fn test_empty_plan_treats_today_as_planned() {
        let summary = summarize(&BTreeSet::new(), &dates(&[17]), d(17));
        assert_eq!(summary.streak, 1);
        assert!(summary.trained_today);
        assert_eq!(summary.week[2], DayStatus::Done);
        assert_eq!(summary.week_start, d(15));

        let summary = summarize(&BTreeSet::new(), &BTreeSet::new(), d(17));
        assert_eq!(summary.streak, 0);
        assert_eq!(summary.week[2], DayStatus::Missed);
    }

    #[test]
    fn test_duplicate_completions_count_once() {
        let mut a = workout(17, ActivityType::Run, 5.0);
        let mut b = a.clone();
        a.id = "a".to_string();
        b.id = "b".to_string();
        let completed = completed_dates([&a, &b]);
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn test_summary_is_idempotent() {
        let planned = dates(&[15, 16, 17]);
        let completed = dates(&[16, 17]);
        assert_eq!(
            summarize(&planned, &completed, d(17)),
            summarize(&planned, &completed, d(17))
        );
    }

    #[test]
    fn test_match_within_distance_tolerance() {
        let config = PlanMatchConfig::default();
        let sessions = vec![session("s1", 17, ActivityType::Run, Some(10.0))];

        let hit = match_planned_session(&workout(17, ActivityType::Run, 9.2), &sessions, &config);
        assert_eq!(hit.map(|s| s.id.as_str()), Some("s1"));

        let miss = match_planned_session(&workout(17, ActivityType::Run, 8.5), &sessions, &config);
        assert!(miss.is_none());
    }

    #[test]
    fn test_match_requires_same_type_and_date_window() {
        let config = PlanMatchConfig::default();
        let sessions = vec![session("s1", 17, ActivityType::Run, Some(5.0))];

        assert!(
            match_planned_session(&workout(17, ActivityType::Cycling, 5.0), &sessions, &config)
                .is_none()
        );
        // Workout before the planned day
        assert!(
            match_planned_session(&workout(16, ActivityType::Run, 5.0), &sessions, &config)
                .is_none()
        );
        // Later the same week is fine
        assert!(
            match_planned_session(&workout(19, ActivityType::Run, 5.0), &sessions, &config)
                .is_some()
        );
        // More than a week later is not
        assert!(
            match_planned_session(&workout(25, ActivityType::Run, 5.0), &sessions, &config)
                .is_none()
        );
    }

    #[test]
    fn test_match_prefers_closest_unfulfilled_session() {
        let config = PlanMatchConfig::default();
        let mut done = session("s3", 18, ActivityType::Run, None);
        done.completed = true;
        let sessions = vec![
            session("s1", 15, ActivityType::Run, None),
            session("s2", 17, ActivityType::Run, None),
            done,
        ];
        let hit = match_planned_session(&workout(18, ActivityType::Run, 6.0), &sessions, &config);
        assert_eq!(hit.map(|s| s.id.as_str()), Some("s2"));
    }
}
