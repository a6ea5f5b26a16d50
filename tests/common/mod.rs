// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_coach::config::Config;
use stride_coach::db::{FirestoreDb, MemoryDb};
use stride_coach::models::{
    ActivityType, GpsFix, PlannedSession, TrainingPlan, Vendor, VendorConnection,
};
use stride_coach::routes::create_router;
use stride_coach::services::location::{
    LocationError, LocationEvent, LocationProvider, Permission, Platform, WatchHandle,
    WatchOptions,
};
use stride_coach::services::tracker::Clock;
use stride_coach::AppState;
use tokio::sync::mpsc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app on in-memory storage.
/// Returns the router, the shared state and a handle to the storage.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, MemoryDb) {
    let db = MemoryDb::new();
    let state = Arc::new(AppState::new(Config::test_default(), Arc::new(db.clone())));
    (create_router(state.clone()), state, db)
}

/// Session JWT signed with the test config key.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str) -> String {
    stride_coach::middleware::auth::create_jwt(user_id, &Config::test_default().jwt_signing_key)
        .unwrap()
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[allow(dead_code)]
pub fn plan(db: &MemoryDb, user_id: &str, plan_id: &str) {
    db.put_plan(TrainingPlan {
        id: plan_id.to_string(),
        user_id: user_id.to_string(),
        name: "10K base".to_string(),
        created_at: Utc::now().to_rfc3339(),
    });
}

/// Planned session of `plan_id` on `day_date`.
#[allow(dead_code)]
pub fn planned(
    user_id: &str,
    plan_id: &str,
    day_number: u32,
    day_date: NaiveDate,
    session_type: ActivityType,
    planned_distance_km: Option<f64>,
) -> PlannedSession {
    PlannedSession {
        id: format!("{}-day{}", plan_id, day_number),
        plan_id: plan_id.to_string(),
        user_id: user_id.to_string(),
        day_number,
        day_date,
        session_type,
        planned_distance_km,
        planned_duration: None,
        target_pace: None,
        completed: false,
        actual_distance_km: None,
        actual_duration: None,
        completion_date: None,
    }
}

/// Vendor connection with a token valid for another hour.
#[allow(dead_code)]
pub fn connection(user_id: &str, vendor: Vendor, external_user_id: &str) -> VendorConnection {
    VendorConnection {
        user_id: user_id.to_string(),
        vendor,
        external_user_id: external_user_id.to_string(),
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        expires_at: (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        scopes: vec!["activity:read_all".to_string()],
        needs_reconnect: false,
        updated_at: Utc::now().to_rfc3339(),
    }
}

/// Clock the test moves by hand.
#[allow(dead_code)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

#[allow(dead_code)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(start)))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Location provider whose watch feed is pushed by the test.
#[allow(dead_code)]
pub struct ScriptedProvider {
    permission: Permission,
    feed: Mutex<Option<mpsc::UnboundedSender<LocationEvent>>>,
    watch_count: Mutex<usize>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new(permission: Permission) -> Arc<Self> {
        Arc::new(Self {
            permission,
            feed: Mutex::new(None),
            watch_count: Mutex::new(0),
        })
    }

    /// Deliver an event to the current watcher. Returns false with none.
    pub fn push(&self, event: LocationEvent) -> bool {
        match self.feed.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn push_fix(&self, fix: GpsFix) -> bool {
        self.push(LocationEvent::Fix(fix))
    }

    pub fn watch_count(&self) -> usize {
        *self.watch_count.lock().unwrap()
    }

    pub fn is_watching(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    fn platform(&self) -> Platform {
        Platform::Browser
    }

    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn current_fix(
        &self,
        _timeout: Duration,
        _max_age: Duration,
    ) -> Result<GpsFix, LocationError> {
        match self.permission {
            Permission::Granted => Ok(GpsFix::new(37.0, -122.0, Utc::now()).with_accuracy(5.0)),
            Permission::Denied => Err(LocationError::PermissionDenied),
        }
    }

    fn watch(
        &self,
        _options: WatchOptions,
        events: mpsc::UnboundedSender<LocationEvent>,
    ) -> WatchHandle {
        *self.feed.lock().unwrap() = Some(events);
        *self.watch_count.lock().unwrap() += 1;
        WatchHandle::spawn(std::future::pending())
    }

    fn unwatch(&self, handle: &WatchHandle) {
        self.feed.lock().unwrap().take();
        handle.stop();
    }
}
