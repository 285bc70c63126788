//! Contact Time: ground contact between two flights (drop/rebound jumps).
//!
//! ```text
//! READY -> PROPULSION -> IN_AIR_1 -> CONTACT -> IN_AIR_2 -> RESULT -> READY
//! ```
//!
//! No velocity model; the emitted curve is force only.

use tracing::debug;

use super::{ModeContext, ModeKind, ModeOutput, PhysicsMode, PlateState, SampleInput};
use crate::curve::{self, CurveRequest};
use crate::result::JumpResult;

#[derive(Debug, Clone)]
pub struct ContactTime {
    state: PlateState,
    in_air_since: f64,
    first_flight_ms: f64,
    contact_start_time: f64,
    contact_end_time: f64,
    contact_time_ms: f64,
    max_force_kg: f64,
}

impl Default for ContactTime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactTime {
    pub fn new() -> Self {
        Self {
            state: PlateState::Ready,
            in_air_since: 0.0,
            first_flight_ms: 0.0,
            contact_start_time: 0.0,
            contact_end_time: 0.0,
            contact_time_ms: 0.0,
            max_force_kg: 0.0,
        }
    }

    fn build_result(&self, ctx: &ModeContext<'_>) -> JumpResult {
        let curve_start_time = self.contact_start_time - ctx.thresholds.contact_curve_context_ms;
        let force_curve = curve::generate_power_curve(
            ctx.buffer,
            ctx.plate,
            ctx.thresholds.air_threshold,
            &CurveRequest::force_only(curve_start_time),
        );
        JumpResult {
            mode: ModeKind::ContactTime,
            timestamp: self.contact_end_time,
            flight_time_ms: self.first_flight_ms,
            height_flight_cm: None,
            height_impulse_cm: 0.0,
            peak_power_w: 0.0,
            avg_power_w: 0.0,
            formula_peak_power_w: None,
            formula_avg_power_w: None,
            velocity_takeoff_mps: 0.0,
            velocity_flight_mps: None,
            max_force_kg: self.max_force_kg,
            jumper_mass_kg: 0.0,
            force_curve,
            phase_times: None,
            contact_time_ms: Some(self.contact_time_ms),
            contact_start_time: Some(self.contact_start_time),
            contact_end_time: Some(self.contact_end_time),
            curve_start_time,
            integration_start_time: None,
        }
    }
}

impl PhysicsMode for ContactTime {
    fn kind(&self) -> ModeKind {
        ModeKind::ContactTime
    }

    fn state(&self) -> PlateState {
        self.state
    }

    fn process_sample(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput) -> ModeOutput {
        let th = ctx.thresholds;
        let now = sample.now;
        let weight = ctx.weight(sample.raw);
        let display_kg = ctx.display_kg(sample.raw);
        let loaded = weight > th.air_threshold;
        let mut result = None;

        match self.state {
            PlateState::Ready => {
                if loaded {
                    self.state = PlateState::Propulsion;
                }
            }
            PlateState::Propulsion => {
                if weight < th.air_threshold {
                    self.in_air_since = now;
                    self.state = PlateState::InAir1;
                }
            }
            PlateState::InAir1 => {
                let air_time = now - self.in_air_since;
                if air_time > th.max_air_time_ms {
                    debug!(air_time, "first flight too long");
                    self.reset_state();
                } else if loaded {
                    self.first_flight_ms = air_time;
                    self.contact_start_time = now;
                    self.max_force_kg = display_kg;
                    self.state = PlateState::Contact;
                }
            }
            PlateState::Contact => {
                if display_kg > self.max_force_kg {
                    self.max_force_kg = display_kg;
                }
                if weight < th.air_threshold {
                    self.contact_end_time = now;
                    self.contact_time_ms = now - self.contact_start_time;
                    self.in_air_since = now;
                    self.state = PlateState::InAir2;
                }
            }
            PlateState::InAir2 => {
                let air_time = now - self.in_air_since;
                if air_time > th.max_air_time_ms {
                    debug!(air_time, "second flight too long");
                    self.reset_state();
                } else if loaded {
                    let r = self.build_result(ctx);
                    debug!(contact_ms = self.contact_time_ms, "contact measured");
                    result = Some(r);
                    self.state = PlateState::Result;
                }
            }
            PlateState::Result => {
                if weight < th.air_threshold {
                    self.reset_state();
                }
            }
            _ => self.state = PlateState::Ready,
        }

        ModeOutput {
            state: self.state,
            display_kg,
            result,
            jumper_mass_kg: 0.0,
            velocity: 0.0,
        }
    }

    fn reset_state(&mut self) {
        *self = Self::new();
    }

    fn jumper_mass_kg(&self) -> f64 {
        0.0
    }

    fn velocity(&self) -> f64 {
        0.0
    }
}
