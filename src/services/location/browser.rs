// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Browser geolocation backend (foreground only).

use super::{
    with_timeout, FixFilter, LocationError, LocationEvent, LocationProvider, Permission, Platform,
    WatchHandle, WatchOptions,
};
use crate::models::GpsFix;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// `GeolocationPositionError.PERMISSION_DENIED`
pub const PERMISSION_DENIED: u16 = 1;
/// `GeolocationPositionError.POSITION_UNAVAILABLE`
pub const POSITION_UNAVAILABLE: u16 = 2;
/// `GeolocationPositionError.TIMEOUT`
pub const TIMEOUT: u16 = 3;

/// Options mirroring the browser `PositionOptions` dictionary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

/// `GeolocationPosition`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserPosition {
    pub coords: BrowserCoordinates,
    /// Epoch milliseconds
    pub timestamp: f64,
}

/// `GeolocationCoordinates`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl BrowserPosition {
    pub fn into_fix(self) -> Option<GpsFix> {
        if !self.timestamp.is_finite() {
            return None;
        }
        let timestamp = DateTime::from_timestamp_millis(self.timestamp as i64)?;
        Some(GpsFix {
            latitude: self.coords.latitude,
            longitude: self.coords.longitude,
            altitude: self.coords.altitude,
            accuracy: Some(self.coords.accuracy),
            speed: self.coords.speed,
            timestamp,
        })
    }
}

/// `GeolocationPositionError`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PositionError {
    pub code: u16,
    pub message: String,
}

impl PositionError {
    pub fn classify(&self) -> LocationError {
        match self.code {
            PERMISSION_DENIED => LocationError::PermissionDenied,
            TIMEOUT => LocationError::Timeout,
            _ => LocationError::Unavailable(self.message.clone()),
        }
    }
}

/// Result of the Permissions API query for `geolocation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// A `watchPosition` registration.
#[derive(Debug)]
pub struct BrowserWatch {
    /// Watch ID, passed back to `clearWatch`
    pub id: i32,
    pub positions: mpsc::UnboundedReceiver<Result<BrowserPosition, PositionError>>,
}

/// The `navigator.geolocation` surface this backend needs.
#[async_trait]
pub trait BrowserGeolocation: Send + Sync {
    async fn permission_state(&self) -> PermissionState;

    async fn get_current_position(
        &self,
        options: PositionOptions,
    ) -> Result<BrowserPosition, PositionError>;

    fn watch_position(&self, options: PositionOptions) -> BrowserWatch;

    fn clear_watch(&self, id: i32);

    /// `document.visibilityState == "visible"`
    fn is_visible(&self) -> bool;
}

/// Foreground-only location provider.
pub struct BrowserLocationProvider {
    geolocation: Arc<dyn BrowserGeolocation>,
}

impl BrowserLocationProvider {
    pub fn new(geolocation: Arc<dyn BrowserGeolocation>) -> Self {
        Self { geolocation }
    }
}

#[async_trait]
impl LocationProvider for BrowserLocationProvider {
    fn platform(&self) -> Platform {
        Platform::Browser
    }

    async fn request_permission(&self) -> Permission {
        match self.geolocation.permission_state().await {
            PermissionState::Granted => return Permission::Granted,
            PermissionState::Denied => return Permission::Denied,
            PermissionState::Prompt => {}
        }

        // Browsers only prompt on an actual position request.
        let options = PositionOptions {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(crate::services::pace::FIX_TIMEOUT_MS),
            maximum_age: Duration::ZERO,
        };
        match self.geolocation.get_current_position(options).await {
            Ok(_) => Permission::Granted,
            Err(e) if e.code == PERMISSION_DENIED => Permission::Denied,
            Err(e) => {
                tracing::debug!(error = %e.message, "Position request after prompt failed");
                match self.geolocation.permission_state().await {
                    PermissionState::Granted => Permission::Granted,
                    _ => Permission::Denied,
                }
            }
        }
    }

    async fn current_fix(
        &self,
        timeout: Duration,
        max_age: Duration,
    ) -> Result<GpsFix, LocationError> {
        let options = PositionOptions {
            enable_high_accuracy: true,
            timeout,
            maximum_age: max_age,
        };
        with_timeout(timeout, async {
            let position = self
                .geolocation
                .get_current_position(options)
                .await
                .map_err(|e| e.classify())?;
            position
                .into_fix()
                .ok_or_else(|| LocationError::Unavailable("invalid timestamp".to_string()))
        })
        .await
    }

    fn watch(
        &self,
        options: WatchOptions,
        events: mpsc::UnboundedSender<LocationEvent>,
    ) -> WatchHandle {
        let BrowserWatch { id, mut positions } = self.geolocation.watch_position(PositionOptions {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(crate::services::pace::FIX_TIMEOUT_MS),
            maximum_age: Duration::ZERO,
        });
        let geolocation = self.geolocation.clone();
        let release = self.geolocation.clone();

        WatchHandle::spawn(async move {
            let mut filter = FixFilter::new(options);
            while let Some(item) = positions.recv().await {
                let event = match item {
                    Ok(position) => {
                        if !geolocation.is_visible() {
                            continue;
                        }
                        match position.into_fix() {
                            Some(fix) if filter.admit(&fix) => LocationEvent::Fix(fix),
                            _ => continue,
                        }
                    }
                    Err(e) => LocationEvent::Error(e.classify()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            tracing::debug!("Browser watcher ended");
        })
        .on_release(move || release.clear_watch(id))
    }
}
