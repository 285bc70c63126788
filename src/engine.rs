//! The physics engine: one plate, one buffer, one active exercise.
//!
//! Every decoded sample goes through [`PhysicsEngine::process_sample`], which
//! advances the logical clock, intercepts taring and calibration, routes the
//! sample to the active mode, and finally appends it to the ring buffer.
//! Synchronous and allocation-free on the hot path except when a result is
//! emitted.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::buffer::{Sample, SampleRingBuffer};
use crate::clock::LogicClock;
use crate::config::EngineConfig;
use crate::error::ControlError;
use crate::modes::{self, ModeContext, ModeKind, ModeOutput, PhysicsMode, PlateState, SampleInput};
use crate::tare::{Calibration, ScaleCalibrator, TareController};

pub struct PhysicsEngine {
    config: EngineConfig,
    buffer: SampleRingBuffer,
    clock: LogicClock,
    tare: TareController,
    calibrator: ScaleCalibrator,
    zero_offset: f64,
    modes: BTreeMap<ModeKind, Box<dyn PhysicsMode>>,
    active: ModeKind,
    /// Completed calibration not yet collected by the caller.
    calibration: Option<f64>,
}

impl std::fmt::Debug for PhysicsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsEngine")
            .field("active", &self.active)
            .field("state", &self.state())
            .field("zero_offset", &self.zero_offset)
            .field("buffered", &self.buffer.len())
            .field("now_ms", &self.clock.now_ms())
            .finish_non_exhaustive()
    }
}

impl Default for PhysicsEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PhysicsEngine {
    /// Engine with every mode constructed and Single Jump active.
    pub fn new(config: EngineConfig) -> Self {
        let modes = modes::all_modes()
            .into_iter()
            .map(|m| (m.kind(), m))
            .collect();
        Self {
            buffer: SampleRingBuffer::new(config.buffer_capacity),
            tare: TareController::new(config.tare_window_ms),
            calibrator: ScaleCalibrator::new(config.calibration_window_ms),
            clock: LogicClock::new(),
            zero_offset: 0.0,
            modes,
            active: ModeKind::SingleJump,
            calibration: None,
            config,
        }
    }

    // -- Sample path --------------------------------------------------------

    /// Process one raw sample.
    ///
    /// `timestamp_ms` is the host receive time; it only seeds the logical
    /// clock. `device_clock` is the firmware's µs counter (0 if absent).
    pub fn process_sample(&mut self, raw: i32, timestamp_ms: f64, device_clock: u32) -> ModeOutput {
        let freq = self.config.plate.frequency_hz;
        let dt = self.clock.step_seconds(device_clock, freq);
        let now = self.clock.advance(timestamp_ms, device_clock, freq);
        let counts = f64::from(raw) - self.zero_offset;

        if self.tare.is_active() {
            let display_kg = self.config.plate.counts_to_kg(counts);
            if let Some(offset) = self.tare.accumulate(f64::from(raw), now) {
                info!(offset, "tare complete");
                self.zero_offset = offset;
                self.reset_state();
            }
            return self.intercepted(PlateState::Taring, display_kg);
        }

        if self.calibrator.is_active() {
            let display_kg = self.config.plate.counts_to_kg(counts);
            match self.calibrator.accumulate(counts, now) {
                Some(Calibration::Scale(raw_per_kg)) => {
                    info!(raw_per_kg, "calibration complete");
                    self.config.plate.raw_per_kg = raw_per_kg;
                    self.calibration = Some(raw_per_kg);
                    self.reset_state();
                }
                Some(Calibration::Rejected { mean_counts }) => {
                    warn!(mean_counts, "calibration rejected, keeping previous scale");
                }
                None => {}
            }
            return self.intercepted(PlateState::Calibrating, display_kg);
        }

        let input = SampleInput {
            raw,
            timestamp_ms,
            device_clock,
            now,
            dt,
        };
        let ctx = ModeContext {
            buffer: &self.buffer,
            plate: &self.config.plate,
            thresholds: &self.config.thresholds,
            zero_offset: self.zero_offset,
        };
        let Some(mode) = self.modes.get_mut(&self.active) else {
            return self.intercepted(PlateState::Idle, self.config.plate.counts_to_kg(counts));
        };
        let out = mode.process_sample(&ctx, &input);
        if out.result.is_some() {
            debug!(mode = %self.active, now, "result emitted");
        }

        self.buffer.append(now, out.display_kg, device_clock);
        out
    }

    fn intercepted(&self, state: PlateState, display_kg: f64) -> ModeOutput {
        ModeOutput {
            state,
            display_kg,
            result: None,
            jumper_mass_kg: self.jumper_mass_kg(),
            velocity: 0.0,
        }
    }

    // -- Control ------------------------------------------------------------

    /// Switch exercise; any repetition in progress is discarded.
    pub fn set_mode(&mut self, kind: ModeKind) {
        if kind != self.active {
            info!(mode = %kind, "mode switched");
        }
        self.active = kind;
        self.reset_state();
    }

    pub fn active_mode(&self) -> ModeKind {
        self.active
    }

    /// Reset the logical clock, cancel taring/calibration and reset the active mode.
    ///
    /// Buffered samples, the zero offset and the scale are kept.
    pub fn reset_state(&mut self) {
        self.clock.reset();
        self.tare.cancel();
        self.calibrator.cancel();
        if let Some(mode) = self.modes.get_mut(&self.active) {
            mode.reset_state();
        }
    }

    /// [`reset_state`](Self::reset_state) and drop every buffered sample.
    pub fn reset(&mut self) {
        self.reset_state();
        self.buffer.clear();
    }

    pub fn set_zero(&mut self, offset: f64) {
        self.zero_offset = offset;
        self.reset_state();
    }

    pub fn zero_offset(&self) -> f64 {
        self.zero_offset
    }

    /// Update the nominal sampling rate (e.g. reported by the device).
    pub fn set_frequency(&mut self, hz: f64) -> Result<(), ControlError> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(ControlError::InvalidValue {
                what: "frequency",
                value: hz,
            });
        }
        if hz != self.config.plate.frequency_hz {
            info!(hz, "sampling frequency updated");
        }
        self.config.plate.frequency_hz = hz;
        Ok(())
    }

    /// Adopt a scale factor (e.g. restored from settings).
    pub fn set_raw_per_kg(&mut self, raw_per_kg: f64) -> Result<(), ControlError> {
        if !(raw_per_kg.is_finite() && raw_per_kg > 0.0) {
            return Err(ControlError::InvalidValue {
                what: "raw_per_kg",
                value: raw_per_kg,
            });
        }
        self.config.plate.raw_per_kg = raw_per_kg;
        // Bodyweight measured under the old scale no longer applies.
        self.reset_state();
        Ok(())
    }

    /// Begin taring; the plate must be empty for the next window.
    pub fn start_tare(&mut self) {
        info!("taring");
        self.calibrator.cancel();
        self.tare.start();
    }

    /// Begin calibrating the scale against `known_kg` resting on the (tared) plate.
    pub fn start_calibration(&mut self, known_kg: f64) -> Result<(), ControlError> {
        if !(known_kg.is_finite() && known_kg > 0.0) {
            return Err(ControlError::InvalidValue {
                what: "calibration mass",
                value: known_kg,
            });
        }
        info!(known_kg, "calibrating");
        self.tare.cancel();
        self.calibrator.start(known_kg);
        Ok(())
    }

    /// The scale from the last completed calibration, once.
    pub fn take_calibration(&mut self) -> Option<f64> {
        self.calibration.take()
    }

    pub fn is_taring(&self) -> bool {
        self.tare.is_active()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrator.is_active()
    }

    /// Set the jumper's mass on modes that take it manually.
    pub fn set_mass(&mut self, kg: f64) -> Result<(), ControlError> {
        let active = self.active;
        let mode = self
            .modes
            .get_mut(&active)
            .and_then(|m| m.as_mass_adjustable())
            .ok_or(ControlError::Unsupported {
                mode: active,
                capability: "manual mass",
            })?;
        if !(kg.is_finite() && kg > 0.0) {
            return Err(ControlError::InvalidValue {
                what: "mass",
                value: kg,
            });
        }
        mode.set_mass(kg);
        Ok(())
    }

    /// Set the velocity at integration start on modes that support it.
    pub fn set_start_velocity(&mut self, mps: f64) -> Result<(), ControlError> {
        let active = self.active;
        let mode = self
            .modes
            .get_mut(&active)
            .and_then(|m| m.as_velocity_adjustable())
            .ok_or(ControlError::Unsupported {
                mode: active,
                capability: "start velocity",
            })?;
        if !mps.is_finite() {
            return Err(ControlError::InvalidValue {
                what: "start velocity",
                value: mps,
            });
        }
        mode.set_start_velocity(mps);
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    pub fn state(&self) -> PlateState {
        if self.tare.is_active() {
            PlateState::Taring
        } else if self.calibrator.is_active() {
            PlateState::Calibrating
        } else {
            self.modes
                .get(&self.active)
                .map_or(PlateState::Idle, |m| m.state())
        }
    }

    pub fn jumper_mass_kg(&self) -> f64 {
        self.modes
            .get(&self.active)
            .map_or(0.0, |m| m.jumper_mass_kg())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer(&self) -> &SampleRingBuffer {
        &self.buffer
    }

    /// Buffered samples with `time_ms >= end_ms - duration_ms`, oldest first.
    pub fn window_since(&self, end_ms: f64, duration_ms: f64) -> Vec<Sample> {
        self.buffer.window_since(end_ms, duration_ms)
    }

    /// Current logical time, if a sample has been processed since the last reset.
    pub fn now_ms(&self) -> Option<f64> {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticPlate;
    use approx::assert_relative_eq;

    #[test]
    fn countermovement_jump_end_to_end() {
        let mut plate = SyntheticPlate::new();
        plate.hold(75.0, 400);
        assert_eq!(plate.engine.state(), PlateState::Ready);
        assert_relative_eq!(plate.engine.jumper_mass_kg(), 75.0, epsilon = 1e-3);

        plate.hold(150.0, 200);
        plate.hold(0.0, 300);
        plate.hold(75.0, 1_000);

        assert_eq!(plate.results.len(), 1);
        let r = &plate.results[0];
        assert_relative_eq!(r.flight_time_ms, 300.0, epsilon = 1e-6);
        assert_relative_eq!(r.height_flight_cm.unwrap(), 9.80665 * 0.09 / 8.0 * 100.0, epsilon = 1e-6);
        assert!(r.formula_peak_power_w.unwrap() >= 0.0);
        assert!(r.formula_avg_power_w.unwrap() >= 0.0);
        assert!(r.force_curve.windows(2).all(|w| w[0].t < w[1].t));
    }

    #[test]
    fn zero_stream_never_jumps() {
        let mut plate = SyntheticPlate::new();
        for kind in ModeKind::ALL {
            plate.engine.set_mode(kind);
            let states = plate.hold_raw(0, 3_000);
            assert!(
                states.iter().all(|s| matches!(s, PlateState::Idle | PlateState::Ready)),
                "{kind}"
            );
        }
        assert!(plate.results.is_empty());
    }

    #[test]
    fn buffer_receives_processed_samples() {
        let mut plate = SyntheticPlate::new();
        plate.hold(20.0, 50);
        assert_eq!(plate.engine.buffer().len(), 50);
        let last = plate.engine.buffer().latest().unwrap();
        assert_relative_eq!(last.weight_kg, 20.0, epsilon = 1e-3);
        assert_eq!(plate.engine.window_since(last.time_ms, 9.0).len(), 10);
    }

    #[test]
    fn tare_sets_offset_without_buffering() {
        let mut plate = SyntheticPlate::new();
        plate.engine.start_tare();
        let states = plate.hold_raw(5_000, 601);
        assert!(states.iter().all(|s| *s == PlateState::Taring));
        assert_relative_eq!(plate.engine.zero_offset(), 5_000.0);
        assert!(!plate.engine.is_taring());
        assert!(plate.engine.buffer().is_empty());
        // The logical clock was reset with the mode.
        assert_eq!(plate.engine.now_ms(), None);

        plate.hold_raw(5_000, 10);
        let last = plate.engine.buffer().latest().unwrap();
        assert_relative_eq!(last.weight_kg, 0.0);
    }

    #[test]
    fn calibration_adopts_scale() {
        let mut plate = SyntheticPlate::new();
        plate.engine.set_zero(1_000.0);
        plate.engine.start_calibration(20.0).unwrap();
        let states = plate.hold_raw(1_000 + 20 * 12_000, 601);
        assert!(states.iter().all(|s| *s == PlateState::Calibrating));
        assert_eq!(plate.engine.take_calibration(), Some(12_000.0));
        assert_eq!(plate.engine.take_calibration(), None);
        assert_eq!(plate.engine.config().plate.raw_per_kg, 12_000.0);
    }

    #[test]
    fn new_scale_discards_measured_bodyweight() {
        let mut plate = SyntheticPlate::new();
        plate.hold(75.0, 400);
        assert_relative_eq!(plate.engine.jumper_mass_kg(), 75.0, epsilon = 1e-3);

        plate.engine.set_raw_per_kg(10_000.0).unwrap();
        assert_eq!(plate.engine.state(), PlateState::Idle);
        assert_eq!(plate.engine.jumper_mass_kg(), 0.0);

        plate.hold(75.0, 400);
        assert_eq!(plate.engine.state(), PlateState::Ready);
        assert_relative_eq!(plate.engine.jumper_mass_kg(), 75.0, epsilon = 1e-3);
    }

    #[test]
    fn calibration_on_empty_plate_is_rejected() {
        let mut plate = SyntheticPlate::new();
        plate.engine.start_calibration(20.0).unwrap();
        plate.hold_raw(0, 700);
        assert!(!plate.engine.is_calibrating());
        assert_eq!(plate.engine.take_calibration(), None);
        assert_eq!(plate.engine.config().plate.raw_per_kg, 12_560.0);
    }

    #[test]
    fn tare_and_calibration_cancel_each_other() {
        let mut engine = PhysicsEngine::default();
        engine.start_tare();
        engine.start_calibration(10.0).unwrap();
        assert!(!engine.is_taring());
        assert_eq!(engine.state(), PlateState::Calibrating);
        engine.start_tare();
        assert!(!engine.is_calibrating());
        assert_eq!(engine.state(), PlateState::Taring);
    }

    #[test]
    fn capabilities_follow_active_mode() {
        let mut engine = PhysicsEngine::default();
        assert_eq!(
            engine.set_mass(80.0),
            Err(ControlError::Unsupported {
                mode: ModeKind::SingleJump,
                capability: "manual mass",
            })
        );
        engine.set_mode(ModeKind::JumpEstimation);
        engine.set_mass(80.0).unwrap();
        assert_eq!(engine.jumper_mass_kg(), 80.0);
        assert!(matches!(
            engine.set_mass(0.0),
            Err(ControlError::InvalidValue { what: "mass", .. })
        ));
        engine.set_start_velocity(0.3).unwrap();

        engine.set_mode(ModeKind::ContactTime);
        assert!(matches!(
            engine.set_start_velocity(0.3),
            Err(ControlError::Unsupported { .. })
        ));
    }

    #[test]
    fn frequency_rejects_non_positive() {
        let mut engine = PhysicsEngine::default();
        assert!(engine.set_frequency(0.0).is_err());
        assert!(engine.set_frequency(f64::NAN).is_err());
        engine.set_frequency(1_000.0).unwrap();
        assert_eq!(engine.config().plate.frequency_hz, 1_000.0);
    }

    #[test]
    fn mode_switch_discards_repetition() {
        let mut plate = SyntheticPlate::new();
        plate.hold(75.0, 400);
        plate.hold(150.0, 100);
        assert_eq!(plate.engine.state(), PlateState::Propulsion);
        plate.engine.set_mode(ModeKind::SingleJump);
        assert_eq!(plate.engine.state(), PlateState::Idle);
        assert_eq!(plate.engine.jumper_mass_kg(), 0.0);
    }

    #[test]
    fn reset_state_is_idempotent() {
        let mut plate = SyntheticPlate::new();
        plate.hold(75.0, 450);
        plate.engine.reset_state();
        let once = format!("{:?}", plate.engine);
        plate.engine.reset_state();
        assert_eq!(format!("{:?}", plate.engine), once);

        plate.engine.reset();
        assert!(plate.engine.buffer().is_empty());
    }
}
