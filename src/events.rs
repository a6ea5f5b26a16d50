// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process publish/subscribe bus for UI-facing notifications.
//!
//! The bus is owned by `AppState` (or by whoever embeds the tracker) and
//! handed to producers explicitly. Publishing never blocks and never fails:
//! with no subscribers the event is simply dropped.

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 64;

/// Notifications emitted by the tracking and reconciliation services.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A workout was recorded (local GPS finish, manual entry or vendor import).
    WorkoutCompleted {
        user_id: String,
        workout_id: String,
        date: NaiveDate,
        /// Planned session fulfilled by this workout, if any.
        planned_session_id: Option<String>,
    },
    /// The user's streak was recomputed.
    StreakUpdated { user_id: String, streak: u32 },
}

/// Cloneable handle to the shared broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, event: AppEvent) {
        // Err only means nobody is listening right now.
        if self.sender.send(event).is_err() {
            tracing::trace!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}
