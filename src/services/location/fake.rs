// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scriptable platform bridges for unit tests.

use super::browser::{
    BrowserCoordinates, BrowserGeolocation, BrowserPosition, BrowserWatch, PermissionState,
    PositionError, PositionOptions,
};
use super::native::{NativeBridge, NativeError, NativeLocation, NativeWatcher, NativeWatcherRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const BROWSER_WATCH_ID: i32 = 7;
pub const NATIVE_WATCHER_ID: &str = "watcher-1";

/// Take the scripted feed on the first watch; later watches get a closed one.
fn take_feed<T>(slot: &Mutex<Option<mpsc::UnboundedReceiver<T>>>) -> mpsc::UnboundedReceiver<T> {
    slot.lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| mpsc::unbounded_channel().1)
}

pub fn position(lat: f64, accuracy: f64) -> BrowserPosition {
    BrowserPosition {
        coords: BrowserCoordinates {
            latitude: lat,
            longitude: -122.0,
            altitude: None,
            accuracy,
            speed: None,
        },
        timestamp: 1_705_312_800_000.0,
    }
}

pub struct FakeGeolocation {
    pub state: PermissionState,
    pub current: Result<BrowserPosition, PositionError>,
    /// Number of upcoming visibility checks that report hidden
    pub hidden_checks: AtomicUsize,
    pub feed_tx: mpsc::UnboundedSender<Result<BrowserPosition, PositionError>>,
    pub feed: Mutex<Option<mpsc::UnboundedReceiver<Result<BrowserPosition, PositionError>>>>,
    pub cleared: Mutex<Vec<i32>>,
}

impl FakeGeolocation {
    pub fn new(state: PermissionState, current: Result<BrowserPosition, PositionError>) -> Self {
        let (feed_tx, feed) = mpsc::unbounded_channel();
        Self {
            state,
            current,
            hidden_checks: AtomicUsize::new(0),
            feed_tx,
            feed: Mutex::new(Some(feed)),
            cleared: Mutex::new(Vec::new()),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionState::Granted, Ok(position(37.0, 5.0)))
    }

    /// IDs passed to `clearWatch`, in call order.
    pub fn cleared(&self) -> Vec<i32> {
        self.cleared.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserGeolocation for FakeGeolocation {
    async fn permission_state(&self) -> PermissionState {
        self.state
    }

    async fn get_current_position(
        &self,
        _options: PositionOptions,
    ) -> Result<BrowserPosition, PositionError> {
        self.current.clone()
    }

    fn watch_position(&self, _options: PositionOptions) -> BrowserWatch {
        BrowserWatch {
            id: BROWSER_WATCH_ID,
            positions: take_feed(&self.feed),
        }
    }

    fn clear_watch(&self, id: i32) {
        self.cleared.lock().unwrap().push(id);
    }

    fn is_visible(&self) -> bool {
        self.hidden_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

pub fn native_location(lat: f64, accuracy: f64) -> NativeLocation {
    NativeLocation {
        latitude: lat,
        longitude: -122.0,
        altitude: None,
        accuracy: Some(accuracy),
        speed: None,
        time: 1_705_312_800_000,
    }
}

pub fn native_error(code: Option<&str>, message: &str) -> NativeError {
    NativeError {
        code: code.map(String::from),
        message: message.to_string(),
    }
}

pub struct FakeNativeBridge {
    pub permission: Result<(), NativeError>,
    pub current: Result<NativeLocation, NativeError>,
    /// `current_location` never answers
    pub hang: bool,
    pub feed_tx: mpsc::UnboundedSender<Result<NativeLocation, NativeError>>,
    pub feed: Mutex<Option<mpsc::UnboundedReceiver<Result<NativeLocation, NativeError>>>>,
    pub requests: Mutex<Vec<NativeWatcherRequest>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeNativeBridge {
    pub fn new() -> Self {
        let (feed_tx, feed) = mpsc::unbounded_channel();
        Self {
            permission: Ok(()),
            current: Ok(native_location(37.0, 5.0)),
            hang: false,
            feed_tx,
            feed: Mutex::new(Some(feed)),
            requests: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<NativeWatcherRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// IDs passed to `removeWatcher`, in call order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NativeBridge for FakeNativeBridge {
    async fn request_permissions(&self) -> Result<(), NativeError> {
        self.permission.clone()
    }

    async fn current_location(
        &self,
        _timeout: Duration,
        _max_age: Duration,
    ) -> Result<NativeLocation, NativeError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.current.clone()
    }

    fn add_watcher(&self, request: NativeWatcherRequest) -> NativeWatcher {
        self.requests.lock().unwrap().push(request);
        NativeWatcher {
            id: NATIVE_WATCHER_ID.to_string(),
            locations: take_feed(&self.feed),
        }
    }

    fn remove_watcher(&self, id: &str) {
        self.removed.lock().unwrap().push(id.to_string());
    }
}
