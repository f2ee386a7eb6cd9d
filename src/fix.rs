//! Validated position fixes.

use location_provider::{PositionInfo, StatusCode};
use serde::Serialize;

/// A position the provider reported with usable coordinates.
///
/// Serializes to the mapping handed to scripts: `latitude`, `longitude`,
/// `altitude`, `vertical_accuracy`, `horizontal_accuracy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub vertical_accuracy: f64,
    pub horizontal_accuracy: f64,
}

impl PositionFix {
    /// Accepts `info` only when latitude and longitude are finite.
    ///
    /// Partial updates are never requested, so a record missing either
    /// coordinate is rejected with [`StatusCode::INVALID_FIX`].
    pub fn validate(info: PositionInfo) -> Result<Self, StatusCode> {
        if !info.latitude.is_finite() || !info.longitude.is_finite() {
            return Err(StatusCode::INVALID_FIX);
        }

        Ok(Self {
            latitude: info.latitude,
            longitude: info.longitude,
            altitude: info.altitude,
            vertical_accuracy: info.vertical_accuracy,
            horizontal_accuracy: info.horizontal_accuracy,
        })
    }
}
