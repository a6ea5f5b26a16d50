// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Native (iOS/Android) location backend.
//!
//! Wraps the background-geolocation plugin of the mobile shell. Watchers
//! keep delivering while the app is in the background, which is what lets
//! a run continue with the screen off.

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

/// Timeout for the confirmation fetch after a permission prompt.
const PERMISSION_CONFIRM_TIMEOUT: Duration = Duration::from_secs(8);

/// Location as reported by the native plugin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    /// Epoch milliseconds
    pub time: i64,
}

impl NativeLocation {
    /// Normalize to a [`GpsFix`]. Returns `None` for an unusable timestamp.
    pub fn into_fix(self) -> Option<GpsFix> {
        let timestamp = DateTime::from_timestamp_millis(self.time)?;
        Some(GpsFix {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            accuracy: self.accuracy,
            // Some devices report -1 for "unknown"
            speed: self.speed.filter(|s| *s >= 0.0),
            timestamp,
        })
    }
}

/// Error as reported by the native plugin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NativeError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl NativeError {
    /// Map plugin codes and messages onto the shared taxonomy.
    pub fn classify(&self) -> LocationError {
        let code = self.code.as_deref().unwrap_or("");
        let message = self.message.to_ascii_lowercase();
        if code == "NOT_AUTHORIZED" || message.contains("denied") || message.contains("permission")
        {
            LocationError::PermissionDenied
        } else if code == "TIMEOUT" || message.contains("timeout") || message.contains("timed out")
        {
            LocationError::Timeout
        } else {
            LocationError::Unavailable(self.message.clone())
        }
    }
}

/// Options passed when registering a native watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeWatcherRequest {
    /// Text of the persistent notification shown while tracking in background
    pub background_message: String,
    pub background_title: String,
    /// Prompt for permissions if not yet granted
    pub request_permissions: bool,
    /// Deliver cached (stale) locations
    pub stale: bool,
    /// Native distance filter in meters
    pub distance_filter: f64,
}

/// A registered native watcher.
#[derive(Debug)]
pub struct NativeWatcher {
    /// Plugin-assigned ID, passed back to `removeWatcher`
    pub id: String,
    pub locations: mpsc::UnboundedReceiver<Result<NativeLocation, NativeError>>,
}

/// The plugin surface this backend needs.
#[async_trait]
pub trait NativeBridge: Send + Sync {
    async fn request_permissions(&self) -> Result<(), NativeError>;

    async fn current_location(
        &self,
        timeout: Duration,
        max_age: Duration,
    ) -> Result<NativeLocation, NativeError>;

    fn add_watcher(&self, request: NativeWatcherRequest) -> NativeWatcher;

    /// Stop the plugin's background watcher.
    fn remove_watcher(&self, id: &str);
}

/// Background-capable location provider.
pub struct NativeLocationProvider {
    bridge: Arc<dyn NativeBridge>,
}

impl NativeLocationProvider {
    pub fn new(bridge: Arc<dyn NativeBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LocationProvider for NativeLocationProvider {
    fn platform(&self) -> Platform {
        Platform::Native
    }

    async fn request_permission(&self) -> Permission {
        if let Err(e) = self.bridge.request_permissions().await {
            if e.classify() == LocationError::PermissionDenied {
                tracing::info!("Native location permission denied");
                return Permission::Denied;
            }
            tracing::warn!(error = %e.message, "Native permission request failed");
        }

        // The plugin only settles the permission once a position is requested.
        match self
            .current_fix(PERMISSION_CONFIRM_TIMEOUT, Duration::ZERO)
            .await
        {
            Err(LocationError::PermissionDenied) => Permission::Denied,
            Err(e) => {
                tracing::debug!(error = %e, "Permission confirmation fetch failed");
                Permission::Granted
            }
            Ok(_) => Permission::Granted,
        }
    }

    async fn current_fix(
        &self,
        timeout: Duration,
        max_age: Duration,
    ) -> Result<GpsFix, LocationError> {
        with_timeout(timeout, async {
            let location = self
                .bridge
                .current_location(timeout, max_age)
                .await
                .map_err(|e| e.classify())?;
            location
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
        let NativeWatcher { id, mut locations } = self.bridge.add_watcher(NativeWatcherRequest {
            background_message: "Tracking your run".to_string(),
            background_title: "Run in progress".to_string(),
            request_permissions: false,
            stale: false,
            distance_filter: options.min_distance_meters,
        });
        let bridge = self.bridge.clone();

        WatchHandle::spawn(async move {
            let mut filter = FixFilter::new(options);
            while let Some(item) = locations.recv().await {
                let event = match item {
                    Ok(location) => match location.into_fix() {
                        Some(fix) if filter.admit(&fix) => LocationEvent::Fix(fix),
                        _ => continue,
                    },
                    Err(e) => LocationEvent::Error(e.classify()),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            tracing::debug!("Native watcher ended");
        })
        .on_release(move || {
            tracing::debug!(watcher_id = %id, "Removing native watcher");
            bridge.remove_watcher(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::location::fake::{
        native_error, native_location, FakeNativeBridge, NATIVE_WATCHER_ID,
    };

    #[test]
    fn test_classify_native_errors() {
        assert_eq!(
            native_error(Some("NOT_AUTHORIZED"), "nope").classify(),
            LocationError::PermissionDenied
        );
        assert_eq!(
            native_error(None, "Location permission was denied").classify(),
            LocationError::PermissionDenied
        );
        assert_eq!(
            native_error(None, "Request timed out").classify(),
            LocationError::Timeout
        );
        assert_eq!(
            native_error(None, "GPS off").classify(),
            LocationError::Unavailable("GPS off".to_string())
        );
    }

    #[test]
    fn test_native_location_normalization() {
        let raw: NativeLocation = serde_json::from_str(
            r#"{"latitude":37.33,"longitude":-122.03,"accuracy":6.5,"speed":-1,"time":1705312800000}"#,
        )
        .unwrap();
        let fix = raw.into_fix().unwrap();

        assert_eq!(fix.latitude, 37.33);
        assert_eq!(fix.accuracy, Some(6.5));
        assert_eq!(fix.speed, None);
        assert_eq!(fix.timestamp.timestamp(), 1_705_312_800);
    }

    #[tokio::test]
    async fn test_permission_prompt_denied() {
        let bridge = FakeNativeBridge {
            permission: Err(native_error(Some("NOT_AUTHORIZED"), "User denied location")),
            ..FakeNativeBridge::new()
        };
        let provider = NativeLocationProvider::new(Arc::new(bridge));
        assert_eq!(provider.request_permission().await, Permission::Denied);
    }

    #[tokio::test]
    async fn test_permission_settled_by_confirmation_fetch() {
        // Prompt accepted, but the first position request reports denial
        let bridge = FakeNativeBridge {
            current: Err(native_error(None, "Location permission was denied")),
            ..FakeNativeBridge::new()
        };
        let provider = NativeLocationProvider::new(Arc::new(bridge));
        assert_eq!(provider.request_permission().await, Permission::Denied);

        // Prompt errored for another reason; the fetch succeeds
        let bridge = FakeNativeBridge {
            permission: Err(native_error(None, "Request timed out")),
            ..FakeNativeBridge::new()
        };
        let provider = NativeLocationProvider::new(Arc::new(bridge));
        assert_eq!(provider.request_permission().await, Permission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_confirmation_timeout_is_not_denial() {
        let bridge = FakeNativeBridge {
            hang: true,
            ..FakeNativeBridge::new()
        };
        let provider = NativeLocationProvider::new(Arc::new(bridge));
        assert_eq!(provider.request_permission().await, Permission::Granted);
        assert_eq!(
            provider
                .current_fix(Duration::from_secs(8), Duration::ZERO)
                .await,
            Err(LocationError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_watch_filters_and_classifies() {
        let bridge = Arc::new(FakeNativeBridge::new());
        let provider = NativeLocationProvider::new(bridge.clone());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = provider.watch(
            WatchOptions {
                min_distance_meters: 5.0,
                max_accuracy_meters: 20.0,
            },
            events_tx,
        );

        let requests = bridge.requests();
        let request = &requests[0];
        assert_eq!(request.distance_filter, 5.0);
        assert!(!request.request_permissions);
        assert!(!request.stale);

        let tx = &bridge.feed_tx;
        tx.send(Ok(native_location(37.0, 5.0))).unwrap();
        tx.send(Ok(native_location(37.0005, 50.0))).unwrap(); // too inaccurate
        tx.send(Ok(native_location(37.00001, 5.0))).unwrap(); // ~1 m: too close
        tx.send(Ok(NativeLocation {
            time: i64::MAX,
            ..native_location(37.001, 5.0)
        }))
        .unwrap(); // unusable timestamp
        tx.send(Ok(native_location(37.0002, 5.0))).unwrap();
        tx.send(Err(native_error(Some("TIMEOUT"), "no fix"))).unwrap();
        tx.send(Err(native_error(Some("NOT_AUTHORIZED"), "revoked"))).unwrap();

        let mut latitudes = Vec::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                LocationEvent::Fix(fix) => latitudes.push(fix.latitude),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(latitudes, vec![37.0, 37.0002]);
        assert_eq!(
            events.recv().await.unwrap(),
            LocationEvent::Error(LocationError::Timeout)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            LocationEvent::Error(LocationError::PermissionDenied)
        );

        provider.unwatch(&handle);
        provider.unwatch(&handle);
        drop(handle);
        assert_eq!(bridge.removed(), vec![NATIVE_WATCHER_ID.to_string()]);
    }
}
