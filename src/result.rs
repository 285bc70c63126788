//! Jump results, delayed emission, and the flight/impulse formulas.

use crate::curve::ForceCurvePoint;
use crate::modes::ModeKind;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Countermovement phase markers (logical ms), captured at takeoff.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTimes {
    /// Last near-zero velocity before the dip.
    pub unweighting_start: Option<f64>,
    /// Bottom of the countermovement.
    pub min_velocity_time: Option<f64>,
    /// First negative to non-negative velocity transition.
    pub zero_crossing_time: Option<f64>,
    pub takeoff_time: f64,
}

/// One completed repetition. Created once, then owned by the caller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JumpResult {
    pub mode: ModeKind,
    /// Logical time of the event the record describes (landing, takeoff, or contact end).
    pub timestamp: f64,
    /// Flight time (ms); estimated from takeoff velocity in Jump Estimation.
    pub flight_time_ms: f64,
    /// Height from flight time (cm)
    pub height_flight_cm: Option<f64>,
    /// Height from takeoff velocity (cm)
    pub height_impulse_cm: f64,
    pub peak_power_w: f64,
    /// Mean power over samples with positive velocity (W)
    pub avg_power_w: f64,
    /// Sayers peak power estimate (W)
    pub formula_peak_power_w: Option<f64>,
    /// Harman average power estimate (W)
    pub formula_avg_power_w: Option<f64>,
    pub velocity_takeoff_mps: f64,
    /// Takeoff velocity implied by flight time (m/s)
    pub velocity_flight_mps: Option<f64>,
    /// Peak force (kg)
    pub max_force_kg: f64,
    pub jumper_mass_kg: f64,
    pub force_curve: Vec<ForceCurvePoint>,
    pub phase_times: Option<PhaseTimes>,
    pub contact_time_ms: Option<f64>,
    pub contact_start_time: Option<f64>,
    pub contact_end_time: Option<f64>,
    /// First point of `force_curve`.
    pub curve_start_time: f64,
    /// Where velocity integration (and the average-power window) began.
    pub integration_start_time: Option<f64>,
}

// ---------------------------------------------------------------------------
// Delayed emission
// ---------------------------------------------------------------------------

/// A computed result waiting for its emission time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResult<T> {
    pub data: T,
    /// Logical time from which the result may be emitted.
    pub emit_at: f64,
}

/// Holds at most one pending result.
///
/// Landing metrics are known immediately, but the curve should include the
/// landing itself, so the record is staged and emitted after a delay, or
/// early when the next repetition begins.
#[derive(Debug, Clone)]
pub struct ResultStage<T> {
    pending: Option<PendingResult<T>>,
}

impl<T> Default for ResultStage<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> ResultStage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `data` for emission at `emit_at`, replacing anything pending.
    pub fn stage(&mut self, data: T, emit_at: f64) {
        self.pending = Some(PendingResult { data, emit_at });
    }

    /// Take the pending data if its time has come (or unconditionally when `force`).
    pub fn try_emit(&mut self, now: f64, force: bool) -> Option<T> {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|p| force || now >= p.emit_at);
        if ready {
            self.pending.take().map(|p| p.data)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Jump height from flight time (cm): `g·t²/8`.
pub fn height_from_flight_cm(flight_time_ms: f64, gravity: f64) -> f64 {
    let t = flight_time_ms / 1000.0;
    gravity * t * t / 8.0 * 100.0
}

/// Takeoff velocity implied by a symmetric flight (m/s).
pub fn velocity_from_flight(flight_time_ms: f64, gravity: f64) -> f64 {
    gravity * (flight_time_ms / 1000.0) / 2.0
}

/// Jump height from takeoff velocity (cm): `v²/2g`.
pub fn height_from_velocity_cm(velocity_mps: f64, gravity: f64) -> f64 {
    velocity_mps * velocity_mps / (2.0 * gravity) * 100.0
}

/// Flight time implied by a takeoff velocity (ms): `2v/g`.
pub fn flight_time_from_velocity_ms(velocity_mps: f64, gravity: f64) -> f64 {
    2.0 * velocity_mps / gravity * 1000.0
}

/// Sayers peak power estimate (W), floored at zero.
pub fn sayers_peak_power(height_cm: f64, mass_kg: f64) -> f64 {
    (60.7 * height_cm + 45.3 * mass_kg - 2055.0).max(0.0)
}

/// Harman average power estimate (W), floored at zero.
pub fn harman_avg_power(height_cm: f64, mass_kg: f64) -> f64 {
    (21.2 * height_cm + 23.0 * mass_kg - 1393.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const G: f64 = 9.80665;

    #[test]
    fn flight_height_of_300ms() {
        assert_relative_eq!(height_from_flight_cm(300.0, G), G * 0.09 / 8.0 * 100.0);
        assert_relative_eq!(velocity_from_flight(300.0, G), G * 0.15);
    }

    #[test]
    fn impulse_and_flight_heights_agree_for_ideal_flight() {
        let v = velocity_from_flight(500.0, G);
        assert_relative_eq!(height_from_velocity_cm(v, G), height_from_flight_cm(500.0, G), max_relative = 1e-12);
        assert_relative_eq!(flight_time_from_velocity_ms(v, G), 500.0, max_relative = 1e-12);
    }

    #[test]
    fn power_formulas_floor_at_zero() {
        assert_eq!(sayers_peak_power(0.0, 10.0), 0.0);
        assert_eq!(harman_avg_power(0.0, 10.0), 0.0);
        assert_relative_eq!(sayers_peak_power(40.0, 80.0), 60.7 * 40.0 + 45.3 * 80.0 - 2055.0);
        assert_relative_eq!(harman_avg_power(40.0, 80.0), 21.2 * 40.0 + 23.0 * 80.0 - 1393.0);
    }

    #[test]
    fn stage_waits_for_emit_time() {
        let mut stage = ResultStage::new();
        stage.stage("jump", 600.0);
        assert_eq!(stage.try_emit(599.0, false), None);
        assert!(stage.is_pending());
        assert_eq!(stage.try_emit(600.0, false), Some("jump"));
        assert!(!stage.is_pending());
        assert_eq!(stage.try_emit(700.0, false), None);
    }

    #[test]
    fn forced_emit_ignores_delay() {
        let mut stage = ResultStage::new();
        assert_eq!(stage.try_emit(0.0, true), None::<u8>);
        stage.stage(1u8, 1_000.0);
        assert_eq!(stage.try_emit(0.0, true), Some(1));
    }

    #[test]
    fn restaging_replaces_pending() {
        let mut stage = ResultStage::new();
        stage.stage(1, 10.0);
        stage.stage(2, 20.0);
        assert_eq!(stage.try_emit(20.0, false), Some(2));
        stage.stage(3, 0.0);
        stage.clear();
        assert_eq!(stage.try_emit(100.0, true), None);
    }
}
