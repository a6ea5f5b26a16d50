// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod garmin;
pub mod ingest;
pub mod location;
pub mod oauth;
pub mod pace;
pub mod reconcile;
pub mod recorder;
pub mod strava;
pub mod tracker;

pub use garmin::{GarminPush, GarminService};
pub use ingest::{ActivityIngestor, BatchReport, IngestOutcome, VendorActivity};
pub use location::{detect_provider, LocationProvider, Platform};
pub use oauth::{OAuthClient, TokenManager, TokenRefresher};
pub use reconcile::{Completion, Reconciler};
pub use recorder::{PendingRun, RunRecorder, SaveOutcome};
pub use strava::{StravaClient, StravaService};
pub use tracker::{RunStateMachine, RunTracker};
