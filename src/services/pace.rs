// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Distance and pace calculations for GPS tracking.
//!
//! Everything here is pure so the noise-filtering policy can be tested
//! without a live GPS feed. The thresholds are the defaults for
//! `config::TrackingConfig`.

use crate::models::GpsFix;
use crate::time_utils::{format_hms, parse_hms};
use chrono::{DateTime, Utc};
use geo::{Coord, LineString};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
/// Fixes less accurate than this never move the accumulator.
pub const MAX_FIX_ACCURACY_METERS: f64 = 20.0;
/// Segments this short are jitter around a stationary position.
pub const MIN_SEGMENT_METERS: f64 = 0.5;
/// Segments this long between consecutive fixes are sensor teleports.
pub const MAX_SEGMENT_METERS: f64 = 100.0;
/// Minimum spacing between fixes delivered by a watcher.
pub const WATCH_MIN_DISTANCE_METERS: f64 = 5.0;
/// Hard timeout for a one-shot position request.
pub const FIX_TIMEOUT_MS: u64 = 8_000;
/// Oldest cached position accepted by a one-shot request.
pub const FIX_MAX_AGE_MS: u64 = 5_000;
/// Shown instead of a pace when no distance has been covered.
pub const PACE_PLACEHOLDER: &str = "--:--";

/// Bounds applied to every candidate segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentLimits {
    pub min_segment_meters: f64,
    pub max_segment_meters: f64,
    pub max_accuracy_meters: f64,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            min_segment_meters: MIN_SEGMENT_METERS,
            max_segment_meters: MAX_SEGMENT_METERS,
            max_accuracy_meters: MAX_FIX_ACCURACY_METERS,
        }
    }
}

impl From<&crate::config::TrackingConfig> for SegmentLimits {
    fn from(config: &crate::config::TrackingConfig) -> Self {
        Self {
            min_segment_meters: config.min_segment_meters,
            max_segment_meters: config.max_segment_meters,
            max_accuracy_meters: config.max_accuracy_meters,
        }
    }
}

/// Why a segment was left out of the distance total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseReason {
    /// Shorter than the jitter floor
    Jitter(f64),
    /// Longer than the teleport ceiling
    Teleport(f64),
    /// The new fix's accuracy radius is above the ceiling
    LowAccuracy(f64),
}

/// Great-circle distance between two fixes, in meters.
pub fn haversine_distance(a: &GpsFix, b: &GpsFix) -> f64 {
    let (pa, pb) = (a.point(), b.point());
    let lat1 = pa.y().to_radians();
    let lat2 = pb.y().to_radians();
    let d_lat = (pb.y() - pa.y()).to_radians();
    let d_lon = (pb.x() - pa.x()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Decide whether a segment counts toward the accumulated distance.
///
/// `Ok(())` means add it. A fix with no reported accuracy is trusted.
pub fn check_segment(
    segment_meters: f64,
    fix_accuracy: Option<f64>,
    limits: &SegmentLimits,
) -> Result<(), NoiseReason> {
    if let Some(accuracy) = fix_accuracy {
        if !(accuracy <= limits.max_accuracy_meters) {
            return Err(NoiseReason::LowAccuracy(accuracy));
        }
    }
    if !segment_meters.is_finite() || segment_meters >= limits.max_segment_meters {
        return Err(NoiseReason::Teleport(segment_meters));
    }
    if segment_meters <= limits.min_segment_meters {
        return Err(NoiseReason::Jitter(segment_meters));
    }
    Ok(())
}

/// Boolean form of [`check_segment`].
pub fn should_accumulate(segment_meters: f64, fix_accuracy: Option<f64>, limits: &SegmentLimits) -> bool {
    check_segment(segment_meters, fix_accuracy, limits).is_ok()
}

/// Elapsed time between two instants as `HH:MM:SS`.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format_hms((end - start).num_seconds())
}

/// Pace per kilometre as `M:SS/km`.
///
/// Returns [`PACE_PLACEHOLDER`] when there is no distance or the duration
/// cannot be read, so callers never render a division by zero.
pub fn compute_pace(distance_meters: f64, duration_text: &str) -> String {
    let Some(seconds) = parse_hms(duration_text) else {
        return PACE_PLACEHOLDER.to_string();
    };
    pace_from_seconds(distance_meters, seconds)
}

/// Pace per kilometre from a raw second count.
pub fn pace_from_seconds(distance_meters: f64, seconds: i64) -> String {
    if !distance_meters.is_finite() || distance_meters <= 0.0 || seconds < 0 {
        return PACE_PLACEHOLDER.to_string();
    }
    let per_km = (seconds as f64 / (distance_meters / 1000.0)).round();
    if !per_km.is_finite() {
        return PACE_PLACEHOLDER.to_string();
    }
    let per_km = per_km as i64;
    format!("{}:{:02}/km", per_km / 60, per_km % 60)
}

/// Encode fixes as a polyline (precision 5, the Strava map format).
pub fn encode_route(fixes: &[GpsFix]) -> Option<String> {
    if fixes.len() < 2 {
        return None;
    }
    let line: LineString<f64> = fixes
        .iter()
        .map(|f| Coord {
            x: f.longitude,
            y: f.latitude,
        })
        .collect();

    match polyline::encode_coordinates(line, 5) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode route polyline");
            None
        }
    }
}
