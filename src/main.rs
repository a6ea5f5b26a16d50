// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stride Coach API Server
//!
//! Records GPS runs and manual workouts, imports Strava and Garmin
//! activities, and keeps training-plan streaks up to date.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use stride_coach::{
    config::{Config, StorageBackend},
    db::{FirestoreDb, MemoryDb, WorkoutGateway},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often runs that failed to save are retried.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        port = config.port,
        storage = config.storage_backend.as_str(),
        "Starting Stride Coach API"
    );

    let db: Arc<dyn WorkoutGateway> = match config.storage_backend {
        StorageBackend::Firestore => Arc::new(
            FirestoreDb::new(&config.gcp_project_id)
                .await
                .context("Failed to connect to Firestore")?,
        ),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    let state = match config.offline_queue_path.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "Unsaved runs spool enabled");
            AppState::with_spool(config.clone(), db, path).await?
        }
        None => AppState::new(config.clone(), db),
    };
    let state = Arc::new(state);

    tokio::spawn(flush_pending_runs(state.clone()));

    let app = stride_coach::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Retry queued runs in the background.
async fn flush_pending_runs(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if state.recorder.pending_count().await == 0 {
            continue;
        }
        match state.recorder.flush_pending().await {
            Ok(report) => tracing::info!(
                saved = report.saved.len(),
                remaining = report.remaining,
                "Flushed unsaved runs"
            ),
            Err(e) => tracing::warn!(error = %e, "Unsaved runs still cannot be stored"),
        }
    }
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stride_coach=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
