// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GPS run tracking.
//!
//! [`RunStateMachine`] is the synchronous core: it owns the live
//! [`RunSession`] and applies fixes, clock ticks and pause/resume/finish
//! with explicit timestamps. [`RunTracker`] drives it from a location
//! provider and a one-second ticker on tokio. Both event sources mutate the
//! machine under the same lock, so a tick and a fix arriving together can
//! never overwrite each other's update.

use crate::config::TrackingConfig;
use crate::models::{FinishedRun, GpsFix, RunSession, RunState};
use crate::services::location::{
    LocationError, LocationEvent, LocationProvider, Permission, WatchHandle, WatchOptions,
};
use crate::services::pace::{
    check_segment, compute_pace, encode_route, haversine_distance, NoiseReason, SegmentLimits,
};
use crate::time_utils::format_hms;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// How often the displayed duration is refreshed without new fixes.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tracker errors. None of them change the tracker state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("A run is already in progress")]
    AlreadyActive,

    #[error("No run in progress")]
    NotActive,

    #[error("Run is already paused")]
    AlreadyPaused,

    #[error("Run is not paused")]
    NotPaused,
}

/// What happened to a fix handed to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// No run, or the run is paused
    Ignored,
    /// First fix of the run; nothing to measure against yet
    First,
    /// Segment added to the distance total
    Accumulated(f64),
    /// Fix recorded but its segment was noise
    Rejected(NoiseReason),
    /// Captured before the previous fix; dropped
    OutOfOrder,
}

/// Time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct ActiveRun {
    session: RunSession,
    /// Active time accumulated before the current running stretch
    active_before: ChronoDuration,
    /// Start of the current running stretch (None while paused)
    resumed_at: Option<DateTime<Utc>>,
}

impl ActiveRun {
    fn active_elapsed(&self, now: DateTime<Utc>) -> ChronoDuration {
        match self.resumed_at {
            Some(resumed) if now > resumed => self.active_before + (now - resumed),
            _ => self.active_before,
        }
    }

    fn refresh_duration(&mut self, now: DateTime<Utc>) {
        self.session.duration_text = format_hms(self.active_elapsed(now).num_seconds());
    }
}

/// Synchronous run lifecycle: Idle → Running ⇄ Paused → Finished.
pub struct RunStateMachine {
    limits: SegmentLimits,
    run: Option<ActiveRun>,
    finished: bool,
}

impl RunStateMachine {
    pub fn new(limits: SegmentLimits) -> Self {
        Self {
            limits,
            run: None,
            finished: false,
        }
    }

    pub fn state(&self) -> RunState {
        match &self.run {
            Some(run) if run.session.is_paused => RunState::Paused,
            Some(_) => RunState::Running,
            None if self.finished => RunState::Finished,
            None => RunState::Idle,
        }
    }

    /// Snapshot of the live session.
    pub fn session(&self) -> Option<&RunSession> {
        self.run.as_ref().map(|r| &r.session)
    }

    /// Begin a new run with a fresh ID.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<&RunSession, TrackerError> {
        if self.run.is_some() {
            return Err(TrackerError::AlreadyActive);
        }
        let session = RunSession {
            id: Uuid::new_v4(),
            start_time: now,
            end_time: None,
            distance_meters: 0.0,
            duration_text: format_hms(0),
            is_active: true,
            is_paused: false,
            gps_fixes: Vec::new(),
            current_location: None,
            avg_pace: None,
            last_error: None,
        };
        tracing::info!(run_id = %session.id, "Run started");

        self.finished = false;
        let run = self.run.insert(ActiveRun {
            session,
            active_before: ChronoDuration::zero(),
            resumed_at: Some(now),
        });
        Ok(&run.session)
    }

    /// Apply one fix in arrival order.
    pub fn on_fix(&mut self, fix: GpsFix) -> FixOutcome {
        let Some(run) = self.run.as_mut() else {
            return FixOutcome::Ignored;
        };
        if run.session.is_paused || !fix.is_valid() {
            return FixOutcome::Ignored;
        }

        let outcome = match run.session.gps_fixes.last() {
            None => FixOutcome::First,
            Some(previous) if fix.timestamp < previous.timestamp => {
                tracing::debug!(
                    run_id = %run.session.id,
                    previous = %previous.timestamp,
                    received = %fix.timestamp,
                    "Dropping out-of-order fix"
                );
                return FixOutcome::OutOfOrder;
            }
            Some(previous) => {
                let segment = haversine_distance(previous, &fix);
                match check_segment(segment, fix.accuracy, &self.limits) {
                    Ok(()) => {
                        run.session.distance_meters += segment;
                        FixOutcome::Accumulated(segment)
                    }
                    Err(reason) => {
                        tracing::debug!(run_id = %run.session.id, reason = ?reason, "Segment rejected as noise");
                        FixOutcome::Rejected(reason)
                    }
                }
            }
        };

        run.session.current_location = Some(fix.clone());
        run.session.last_error = None;
        run.session.gps_fixes.push(fix);
        outcome
    }

    /// Refresh the displayed duration. No effect while paused.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(run) = self.run.as_mut() {
            if !run.session.is_paused {
                run.refresh_duration(now);
            }
        }
    }

    /// Remember a provider error for display. The run carries on.
    pub fn record_error(&mut self, error: &LocationError) {
        if let Some(run) = self.run.as_mut() {
            run.session.last_error = Some(error.to_string());
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let run = self.run.as_mut().ok_or(TrackerError::NotActive)?;
        if run.session.is_paused {
            return Err(TrackerError::AlreadyPaused);
        }
        run.active_before = run.active_elapsed(now);
        run.resumed_at = None;
        run.session.is_paused = true;
        run.refresh_duration(now);
        tracing::info!(run_id = %run.session.id, duration = %run.session.duration_text, "Run paused");
        Ok(())
    }

    /// Resume; the next fix is measured against the last fix before the pause.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let run = self.run.as_mut().ok_or(TrackerError::NotActive)?;
        if !run.session.is_paused {
            return Err(TrackerError::NotPaused);
        }
        run.resumed_at = Some(now);
        run.session.is_paused = false;
        tracing::info!(run_id = %run.session.id, "Run resumed");
        Ok(())
    }

    /// Freeze the run and hand back its immutable record.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<FinishedRun, TrackerError> {
        let mut run = self.run.take().ok_or(TrackerError::NotActive)?;
        let active_seconds = run.active_elapsed(now).num_seconds().max(0);
        run.active_before = ChronoDuration::seconds(active_seconds);
        run.resumed_at = None;

        let session = &mut run.session;
        session.end_time = Some(now);
        session.duration_text = format_hms(active_seconds);
        let avg_pace = compute_pace(session.distance_meters, &session.duration_text);
        session.avg_pace = Some(avg_pace.clone());
        session.is_active = false;
        session.is_paused = false;
        self.finished = true;

        tracing::info!(
            run_id = %session.id,
            distance_meters = session.distance_meters,
            duration = %session.duration_text,
            pace = %avg_pace,
            fixes = session.gps_fixes.len(),
            "Run finished"
        );

        let route_polyline = encode_route(&session.gps_fixes);
        Ok(FinishedRun {
            id: session.id,
            start_time: session.start_time,
            end_time: now,
            distance_meters: session.distance_meters,
            duration_text: session.duration_text.clone(),
            active_seconds,
            avg_pace,
            gps_fixes: std::mem::take(&mut session.gps_fixes),
            route_polyline,
        })
    }
}

/// Watch subscription and driver task of a running session.
struct ActiveTracking {
    watch: WatchHandle,
    driver: JoinHandle<()>,
}

impl Drop for ActiveTracking {
    fn drop(&mut self) {
        // WatchHandle stops itself on drop.
        self.driver.abort();
    }
}

/// Async tracker: permission, location watch, ticker and live snapshots.
pub struct RunTracker {
    provider: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    watch_options: WatchOptions,
    fix_timeout: Duration,
    fix_max_age: Duration,
    machine: Arc<Mutex<RunStateMachine>>,
    live: Arc<watch::Sender<Option<RunSession>>>,
    active: tokio::sync::Mutex<Option<ActiveTracking>>,
}

impl RunTracker {
    pub fn new(provider: Arc<dyn LocationProvider>, config: &TrackingConfig) -> Self {
        Self::with_clock(provider, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn LocationProvider>,
        config: &TrackingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (live, _) = watch::channel(None);
        Self {
            provider,
            clock,
            watch_options: WatchOptions::from(config),
            fix_timeout: config.fix_timeout,
            fix_max_age: config.fix_max_age,
            machine: Arc::new(Mutex::new(RunStateMachine::new(SegmentLimits::from(config)))),
            live: Arc::new(live),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Live session updates; `None` when no run is in progress.
    pub fn subscribe(&self) -> watch::Receiver<Option<RunSession>> {
        self.live.subscribe()
    }

    pub fn state(&self) -> RunState {
        lock(&self.machine).state()
    }

    pub fn snapshot(&self) -> Option<RunSession> {
        lock(&self.machine).session().cloned()
    }

    /// One-shot position (e.g. to center the map before starting).
    pub async fn locate(&self) -> Result<GpsFix, LocationError> {
        self.provider
            .current_fix(self.fix_timeout, self.fix_max_age)
            .await
    }

    /// Ask for permission, then start a new run and its location watch.
    pub async fn start(&self) -> Result<RunSession, TrackerError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(TrackerError::AlreadyActive);
        }

        if self.provider.request_permission().await == Permission::Denied {
            tracing::info!("Run not started: location permission denied");
            return Err(TrackerError::PermissionDenied);
        }

        let session = lock(&self.machine).start(self.clock.now())?.clone();
        self.live.send_replace(Some(session.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let watch = self.provider.watch(self.watch_options, tx);
        let driver = tokio::spawn(drive(
            self.machine.clone(),
            self.clock.clone(),
            self.live.clone(),
            rx,
        ));
        *active = Some(ActiveTracking { watch, driver });

        Ok(session)
    }

    pub fn pause(&self) -> Result<(), TrackerError> {
        let mut machine = lock(&self.machine);
        machine.pause(self.clock.now())?;
        self.live.send_replace(machine.session().cloned());
        Ok(())
    }

    pub fn resume(&self) -> Result<(), TrackerError> {
        let mut machine = lock(&self.machine);
        machine.resume(self.clock.now())?;
        self.live.send_replace(machine.session().cloned());
        Ok(())
    }

    /// Stop the watch and ticker, then finalize the run.
    pub async fn finish(&self) -> Result<FinishedRun, TrackerError> {
        let mut active = self.active.lock().await;
        let tracking = active.take().ok_or(TrackerError::NotActive)?;
        self.provider.unwatch(&tracking.watch);
        drop(tracking);

        let finished = lock(&self.machine).finish(self.clock.now())?;
        self.live.send_replace(None);
        Ok(finished)
    }
}

fn lock(machine: &Mutex<RunStateMachine>) -> MutexGuard<'_, RunStateMachine> {
    machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event loop for one run: provider events and the duration ticker.
async fn drive(
    machine: Arc<Mutex<RunStateMachine>>,
    clock: Arc<dyn Clock>,
    live: Arc<watch::Sender<Option<RunSession>>>,
    mut events: mpsc::UnboundedReceiver<LocationEvent>,
) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feed_open = true;

    loop {
        tokio::select! {
            event = events.recv(), if feed_open => {
                let mut m = lock(&machine);
                match event {
                    Some(LocationEvent::Fix(fix)) => {
                        m.on_fix(fix);
                    }
                    Some(LocationEvent::Error(e)) => {
                        tracing::warn!(error = %e, "Location provider error during run");
                        m.record_error(&e);
                    }
                    None => {
                        tracing::warn!("Location feed closed; distance will not advance");
                        feed_open = false;
                    }
                }
                live.send_replace(m.session().cloned());
            }
            _ = ticker.tick() => {
                let mut m = lock(&machine);
                m.tick(clock.now());
                live.send_replace(m.session().cloned());
            }
        }
    }
}
