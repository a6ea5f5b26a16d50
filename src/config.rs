// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! GPS noise thresholds live here as well so that tuning them touches a
//! single place; the defaults mirror the constants in `services::pace`.

use crate::services::pace;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which `WorkoutGateway` implementation the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::Firestore => "firestore",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL (CORS origin)
    pub frontend_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Storage backend for workouts and plans
    pub storage_backend: StorageBackend,
    /// Server port
    pub port: u16,
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Strava push subscription ID, if one has been registered
    pub strava_subscription_id: Option<u64>,
    /// Garmin OAuth client ID; Garmin sync is disabled when absent
    pub garmin_client_id: Option<String>,

    // --- Secrets ---
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Garmin OAuth client secret
    pub garmin_client_secret: Option<String>,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Webhook verification token
    pub webhook_verify_token: String,
    /// Shared secret carried as `?token=` on the registered Garmin push URL;
    /// pushes are refused when unset
    pub garmin_webhook_secret: Option<String>,

    // --- Tracking and reconciliation tuning ---
    pub tracking: TrackingConfig,
    pub plan_matching: PlanMatchConfig,
    /// Where unsaved GPS runs are spooled until they can be persisted
    pub offline_queue_path: Option<PathBuf>,
}

/// Thresholds for the location watcher and the distance accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Fixes with a worse (larger) accuracy radius never count toward distance.
    pub max_accuracy_meters: f64,
    /// Segments at or below this length are jitter.
    pub min_segment_meters: f64,
    /// Segments at or above this length are sensor teleports.
    pub max_segment_meters: f64,
    /// Watchers do not deliver fixes closer together than this.
    pub watch_min_distance_meters: f64,
    /// Hard timeout for a one-shot position request.
    pub fix_timeout: Duration,
    /// Oldest cached position acceptable for a one-shot request.
    pub fix_max_age: Duration,
    /// Runtime platform string used to pick the location backend.
    pub platform: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_accuracy_meters: pace::MAX_FIX_ACCURACY_METERS,
            min_segment_meters: pace::MIN_SEGMENT_METERS,
            max_segment_meters: pace::MAX_SEGMENT_METERS,
            watch_min_distance_meters: pace::WATCH_MIN_DISTANCE_METERS,
            fix_timeout: Duration::from_millis(pace::FIX_TIMEOUT_MS),
            fix_max_age: Duration::from_millis(pace::FIX_MAX_AGE_MS),
            platform: "web".to_string(),
        }
    }
}

/// Tolerances for matching a completed workout to a planned session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanMatchConfig {
    /// Relative distance tolerance (0.10 = within 10% of the planned distance).
    pub distance_tolerance: f64,
    /// How many days after a planned day a workout may still fulfil it.
    pub window_days: i64,
}

impl Default for PlanMatchConfig {
    fn default() -> Self {
        Self {
            distance_tolerance: 0.10,
            window_days: 7,
        }
    }
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            storage_backend: StorageBackend::Memory,
            port: 8080,
            strava_client_id: "test_client_id".to_string(),
            strava_subscription_id: Some(12345),
            garmin_client_id: Some("test_garmin_id".to_string()),
            strava_client_secret: "test_secret".to_string(),
            garmin_client_secret: Some("test_garmin_secret".to_string()),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            webhook_verify_token: "test_verify_token".to_string(),
            garmin_webhook_secret: Some("test_garmin_push_secret".to_string()),
            tracking: TrackingConfig::default(),
            plan_matching: PlanMatchConfig::default(),
            offline_queue_path: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let gcp_project_id = env::var("GCP_PROJECT_ID").ok();
        let storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("firestore") => StorageBackend::Firestore,
            Some("memory") => StorageBackend::Memory,
            Some(_) => return Err(ConfigError::Invalid("STORAGE_BACKEND")),
            None if gcp_project_id.is_some() => StorageBackend::Firestore,
            None => StorageBackend::Memory,
        };

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: gcp_project_id.unwrap_or_else(|| "local-dev".to_string()),
            storage_backend,
            port: parse_or("PORT", 8080)?,
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            strava_subscription_id: parse_optional("STRAVA_SUBSCRIPTION_ID")?,
            garmin_client_id: env::var("GARMIN_CLIENT_ID").ok(),

            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,
            garmin_client_secret: env::var("GARMIN_CLIENT_SECRET")
                .ok()
                .map(|v| v.trim().to_string()),
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            webhook_verify_token: env::var("WEBHOOK_VERIFY_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_VERIFY_TOKEN"))?,
            garmin_webhook_secret: env::var("GARMIN_WEBHOOK_SECRET")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            tracking: TrackingConfig::from_env()?,
            plan_matching: PlanMatchConfig {
                distance_tolerance: parse_or("PLAN_MATCH_DISTANCE_TOLERANCE", 0.10)?,
                window_days: parse_or("PLAN_MATCH_WINDOW_DAYS", 7)?,
            },
            offline_queue_path: env::var("OFFLINE_QUEUE_PATH").ok().map(PathBuf::from),
        })
    }

    /// Garmin credentials, if both halves are configured.
    pub fn garmin_credentials(&self) -> Option<(String, String)> {
        match (&self.garmin_client_id, &self.garmin_client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        }
    }
}

impl TrackingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_accuracy_meters: parse_or("GPS_MAX_ACCURACY_METERS", defaults.max_accuracy_meters)?,
            min_segment_meters: parse_or("GPS_MIN_SEGMENT_METERS", defaults.min_segment_meters)?,
            max_segment_meters: parse_or("GPS_MAX_SEGMENT_METERS", defaults.max_segment_meters)?,
            watch_min_distance_meters: parse_or(
                "GPS_WATCH_MIN_DISTANCE_METERS",
                defaults.watch_min_distance_meters,
            )?,
            fix_timeout: Duration::from_millis(parse_or("GPS_FIX_TIMEOUT_MS", pace::FIX_TIMEOUT_MS)?),
            fix_max_age: Duration::from_millis(parse_or("GPS_FIX_MAX_AGE_MS", pace::FIX_MAX_AGE_MS)?),
            platform: env::var("RUNTIME_PLATFORM").unwrap_or(defaults.platform),
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn parse_optional<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("STRAVA_CLIENT_ID", "test_id");
        env::set_var("STRAVA_CLIENT_SECRET", "test_secret");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("WEBHOOK_VERIFY_TOKEN", "test_verify");
        env::set_var("GPS_MAX_SEGMENT_METERS", "150");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.strava_client_id, "test_id");
        assert_eq!(config.strava_client_secret, "test_secret");
        assert_eq!(config.tracking.max_segment_meters, 150.0);
        assert_eq!(config.tracking.fix_timeout, Duration::from_millis(8000));
        assert_eq!(config.plan_matching, PlanMatchConfig::default());

        env::remove_var("GPS_MAX_SEGMENT_METERS");
    }

    #[test]
    fn test_garmin_credentials_require_both_halves() {
        let mut config = Config::test_default();
        assert!(config.garmin_credentials().is_some());

        config.garmin_client_secret = None;
        assert!(config.garmin_credentials().is_none());
    }
}
