// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Location provider abstraction.
//!
//! The tracker only sees [`LocationProvider`]. Two backends exist: a
//! background-capable native watcher and a foreground-only browser watcher.
//! Each wraps a platform bridge trait so the platform facility itself can
//! be injected (and faked in tests). The backend is chosen once per
//! process by [`Platform::detect`].

pub mod browser;
#[cfg(test)]
pub(crate) mod fake;
pub mod native;

pub use browser::{BrowserGeolocation, BrowserLocationProvider};
pub use native::{NativeBridge, NativeLocationProvider};

use crate::config::TrackingConfig;
use crate::models::GpsFix;
use crate::services::pace::haversine_distance;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Outcome of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Normalized location failures across backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out waiting for a position")]
    Timeout,
}

/// Item delivered by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(GpsFix),
    Error(LocationError),
}

/// Noise suppression applied before fixes reach the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Do not deliver a fix closer than this to the previously delivered one.
    pub min_distance_meters: f64,
    /// Do not deliver fixes whose accuracy radius is above this.
    pub max_accuracy_meters: f64,
}

impl From<&TrackingConfig> for WatchOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            min_distance_meters: config.watch_min_distance_meters,
            max_accuracy_meters: config.max_accuracy_meters,
        }
    }
}

/// Stateful filter for one watch subscription.
#[derive(Debug)]
pub struct FixFilter {
    options: WatchOptions,
    last_delivered: Option<GpsFix>,
}

impl FixFilter {
    pub fn new(options: WatchOptions) -> Self {
        Self {
            options,
            last_delivered: None,
        }
    }

    /// Returns true if the fix should be delivered (and remembers it).
    pub fn admit(&mut self, fix: &GpsFix) -> bool {
        if !fix.is_valid() {
            return false;
        }
        if fix
            .accuracy
            .is_some_and(|a| !(a <= self.options.max_accuracy_meters))
        {
            return false;
        }
        if let Some(last) = &self.last_delivered {
            if haversine_distance(last, fix) < self.options.min_distance_meters {
                return false;
            }
        }
        self.last_delivered = Some(fix.clone());
        true
    }
}

/// Platform-side teardown for a watcher (`removeWatcher`, `clearWatch`).
type Release = Box<dyn FnOnce() + Send>;

/// Handle to a running watch subscription.
///
/// Stopping is idempotent: it is safe on a handle that was never started,
/// was already stopped, or whose watcher ended on its own. The platform
/// watcher is released exactly once. Dropping the handle stops it too.
pub struct WatchHandle {
    active: Arc<AtomicBool>,
    task: Option<AbortHandle>,
    release: Mutex<Option<Release>>,
}

impl WatchHandle {
    /// Run `forward` as the watcher task.
    pub fn spawn<F>(forward: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let task = tokio::spawn(async move {
            forward.await;
            flag.store(false, Ordering::SeqCst);
        });
        Self {
            active,
            task: Some(task.abort_handle()),
            release: Mutex::new(None),
        }
    }

    /// A handle that never delivered anything.
    pub fn inactive() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            task: None,
            release: Mutex::new(None),
        }
    }

    /// Run `release` when the handle is stopped, to tear down the platform
    /// watcher behind it.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Mutex::new(Some(Box::new(release)));
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
        let release = self
            .release
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(release) = release {
            release();
        }
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Location watch stopped");
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Which backend a provider is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// iOS/Android shell with a background location facility
    Native,
    /// Plain browser geolocation, foreground only
    Browser,
}

static DETECTED_PLATFORM: OnceLock<Platform> = OnceLock::new();

impl Platform {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ios" | "android" | "native" => Platform::Native,
            _ => Platform::Browser,
        }
    }

    /// Platform for this process; the first call decides.
    pub fn detect(config: &TrackingConfig) -> Self {
        *DETECTED_PLATFORM.get_or_init(|| {
            let platform = Self::from_name(&config.platform);
            tracing::info!(platform = ?platform, "Location backend selected");
            platform
        })
    }
}

/// Capability interface the tracker depends on.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Show the platform permission prompt once.
    async fn request_permission(&self) -> Permission;

    /// One-shot position with a hard timeout.
    async fn current_fix(&self, timeout: Duration, max_age: Duration)
        -> Result<GpsFix, LocationError>;

    /// Start continuous delivery into `events`.
    fn watch(&self, options: WatchOptions, events: mpsc::UnboundedSender<LocationEvent>)
        -> WatchHandle;

    /// Stop delivery. Never fails.
    fn unwatch(&self, handle: &WatchHandle) {
        handle.stop();
    }
}

/// Provider for this process's platform (see [`Platform::detect`]).
pub fn detect_provider(
    config: &TrackingConfig,
    native: impl FnOnce() -> Arc<dyn NativeBridge>,
    browser: impl FnOnce() -> Arc<dyn BrowserGeolocation>,
) -> Arc<dyn LocationProvider> {
    select_provider(Platform::detect(config), native, browser)
}

/// Build the provider for `platform` from whichever bridge it needs.
pub fn select_provider(
    platform: Platform,
    native: impl FnOnce() -> Arc<dyn NativeBridge>,
    browser: impl FnOnce() -> Arc<dyn BrowserGeolocation>,
) -> Arc<dyn LocationProvider> {
    match platform {
        Platform::Native => Arc::new(NativeLocationProvider::new(native())),
        Platform::Browser => Arc::new(BrowserLocationProvider::new(browser())),
    }
}

/// Apply the hard timeout shared by both backends.
pub(crate) async fn with_timeout<F>(timeout: Duration, request: F) -> Result<GpsFix, LocationError>
where
    F: Future<Output = Result<GpsFix, LocationError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Position request timed out");
            Err(LocationError::Timeout)
        }
    }
}
