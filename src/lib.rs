// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stride Coach: GPS run tracking and training-plan streaks.
//!
//! This crate provides the run tracker (location backends, noise filtering,
//! pause-aware timing), the streak reconciler that matches completed
//! workouts to planned sessions, Strava/Garmin activity import, and the
//! HTTP API the frontend talks to.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::WorkoutGateway;
use events::EventBus;
use models::Vendor;
use services::garmin::GARMIN_TOKEN_URL;
use services::strava::STRAVA_TOKEN_URL;
use services::{
    ActivityIngestor, GarminService, OAuthClient, Reconciler, RunRecorder, StravaClient,
    StravaService, TokenManager,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn WorkoutGateway>,
    pub events: EventBus,
    pub reconciler: Reconciler,
    pub ingestor: ActivityIngestor,
    pub recorder: RunRecorder,
    pub strava_service: StravaService,
    pub garmin_service: GarminService,
}

impl AppState {
    /// Wire all services over `db`. Unsaved runs are kept in memory only.
    pub fn new(config: Config, db: Arc<dyn WorkoutGateway>) -> Self {
        let events = EventBus::new();
        let reconciler = Reconciler::new(db.clone(), events.clone(), config.plan_matching.clone());
        let recorder = RunRecorder::new(reconciler.clone());
        Self::assemble(config, db, events, reconciler, recorder)
    }

    /// Like [`AppState::new`], with unsaved runs spooled to `path`.
    pub async fn with_spool(
        config: Config,
        db: Arc<dyn WorkoutGateway>,
        path: PathBuf,
    ) -> anyhow::Result<Self> {
        let events = EventBus::new();
        let reconciler = Reconciler::new(db.clone(), events.clone(), config.plan_matching.clone());
        let recorder = RunRecorder::with_spool(reconciler.clone(), path).await?;
        Ok(Self::assemble(config, db, events, reconciler, recorder))
    }

    fn assemble(
        config: Config,
        db: Arc<dyn WorkoutGateway>,
        events: EventBus,
        reconciler: Reconciler,
        recorder: RunRecorder,
    ) -> Self {
        let ingestor = ActivityIngestor::new(db.clone(), reconciler.clone());

        let strava_tokens = TokenManager::new(
            db.clone(),
            Arc::new(OAuthClient::new(
                Vendor::Strava,
                STRAVA_TOKEN_URL,
                config.strava_client_id.clone(),
                config.strava_client_secret.clone(),
            )),
        );
        let strava_service = StravaService::new(
            StravaClient::default(),
            db.clone(),
            strava_tokens,
            ingestor.clone(),
        );

        let garmin_tokens = config.garmin_credentials().map(|(id, secret)| {
            TokenManager::new(
                db.clone(),
                Arc::new(OAuthClient::new(Vendor::Garmin, GARMIN_TOKEN_URL, id, secret)),
            )
        });
        if garmin_tokens.is_none() {
            tracing::info!("Garmin credentials not configured; pull sync disabled");
        }
        let garmin_service = GarminService::new(ingestor.clone(), garmin_tokens);

        Self {
            config,
            db,
            events,
            reconciler,
            ingestor,
            recorder,
            strava_service,
            garmin_service,
        }
    }
}
