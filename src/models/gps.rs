// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GPS position samples.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

/// One location sample delivered by a location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    /// Meters above sea level
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in meters (lower is better)
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Ground speed in meters/second
    #[serde(default)]
    pub speed: Option<f64>,
    /// Capture instant
    pub timestamp: DateTime<Utc>,
}

impl GpsFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    /// Position as a geo point (x = longitude, y = latitude).
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Whether the coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}
