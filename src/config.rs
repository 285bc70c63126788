//! Engine configuration.
//!
//! Every numeric threshold the state machines use lives here. Reference
//! values match the production plate (24-bit load cell, ~1.28 kHz), but none
//! of them are invariants: plates differ in gain and noise floor, so callers
//! tune them per installation.

use crate::buffer::DEFAULT_CAPACITY;

/// Physical constants and scale shared by every component.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlateConfig {
    /// Gravitational acceleration (m/s²).
    pub gravity: f64,
    /// Zero-adjusted raw counts per kilogram.
    pub raw_per_kg: f64,
    /// Nominal sampling rate (Hz). The device may report a new one at runtime.
    pub frequency_hz: f64,
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            gravity: 9.80665,
            raw_per_kg: 12560.0,
            frequency_hz: 1280.0,
        }
    }
}

impl PlateConfig {
    /// Convert zero-adjusted raw counts to kilograms (0 if the scale is unset).
    pub fn counts_to_kg(&self, counts: f64) -> f64 {
        if self.raw_per_kg > 0.0 {
            counts / self.raw_per_kg
        } else {
            0.0
        }
    }
}

/// State-machine thresholds and timing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Thresholds {
    /// Zero-adjusted raw counts below which the plate reads as unloaded.
    pub air_threshold: f64,
    /// Raw-count deviation from static bodyweight that starts propulsion.
    pub movement_threshold: f64,
    /// Widest block-average spread (kg) accepted as a stable bodyweight.
    pub stability_tolerance_kg: f64,
    pub max_propulsion_time_ms: f64,
    pub min_air_time_ms: f64,
    pub max_air_time_ms: f64,
    /// Unloaded with downward velocity for this long means the athlete stepped off.
    pub step_off_timeout_ms: f64,
    /// Delay between landing and result emission, so the curve covers the landing.
    pub result_emit_delay_ms: f64,
    /// Length of one bodyweight measurement attempt.
    pub weighing_window_ms: f64,
    pub weighing_block_size: usize,
    pub settle_block_size: usize,
    /// Number of settle blocks compared before a rep counts as finished.
    pub settle_block_count: usize,
    /// Widest settle-block spread (kg) accepted as standing still.
    pub settle_noise_kg: f64,
    /// Largest drift (kg) from bodyweight accepted as standing still.
    pub settle_drift_kg: f64,
    pub retro_lookback_ms: f64,
    pub retro_lookback_samples: usize,
    /// Back-scan stops at the first sample this close (kg) to bodyweight.
    pub retro_match_tolerance_kg: f64,
    /// Same as `retro_match_tolerance_kg` for manual-mass estimation.
    pub estimation_match_tolerance_kg: f64,
    pub estimation_timeout_ms: f64,
    pub unweighting_lookback_samples: usize,
    /// Context kept before the jump start in emitted curves.
    pub curve_context_ms: f64,
    /// Context kept before contact start in contact-time curves.
    pub contact_curve_context_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            air_threshold: 90_000.0,
            movement_threshold: 26_000.0,
            stability_tolerance_kg: 0.5,
            max_propulsion_time_ms: 100_000.0,
            min_air_time_ms: 150.0,
            max_air_time_ms: 1_500.0,
            step_off_timeout_ms: 500.0,
            result_emit_delay_ms: 600.0,
            weighing_window_ms: 300.0,
            weighing_block_size: 25,
            settle_block_size: 20,
            settle_block_count: 10,
            settle_noise_kg: 1.0,
            settle_drift_kg: 2.0,
            retro_lookback_ms: 600.0,
            retro_lookback_samples: 600,
            retro_match_tolerance_kg: 0.5,
            estimation_match_tolerance_kg: 2.0,
            estimation_timeout_ms: 5_000.0,
            unweighting_lookback_samples: 200,
            curve_context_ms: 600.0,
            contact_curve_context_ms: 500.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    pub plate: PlateConfig,
    pub thresholds: Thresholds,
    /// Samples retained for retroactive integration and curve replay.
    pub buffer_capacity: usize,
    /// Averaging window for taring.
    pub tare_window_ms: f64,
    /// Averaging window for known-weight scale calibration.
    pub calibration_window_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plate: PlateConfig::default(),
            thresholds: Thresholds::default(),
            buffer_capacity: DEFAULT_CAPACITY,
            tare_window_ms: 600.0,
            calibration_window_ms: 600.0,
        }
    }
}

#[cfg(feature = "json")]
impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration; missing keys keep defaults.
    pub fn from_json_str(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
