//! Jump Estimation: manual mass, results from takeoff impulse.
//!
//! No bodyweight measurement and no flight timing: the result is computed
//! at takeoff from the integrated velocity, so the athlete does not need to
//! land back on the plate.

use tracing::debug;

use super::propulsion::{self, Propulsion, RetroRequest};
use super::{
    MassAdjustable, ModeContext, ModeKind, ModeOutput, PhysicsMode, PlateState, SampleInput,
    VelocityAdjustable,
};
use crate::curve::{self, CurveRequest};
use crate::result::{self, JumpResult};

pub const DEFAULT_MASS_KG: f64 = 75.0;

#[derive(Debug, Clone)]
pub struct JumpEstimation {
    state: PlateState,
    manual_mass_kg: f64,
    start_velocity: f64,
    propulsion: Propulsion,
    integration_start_time: f64,
    jump_start_time: f64,
}

impl Default for JumpEstimation {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpEstimation {
    pub fn new() -> Self {
        Self {
            state: PlateState::Ready,
            manual_mass_kg: DEFAULT_MASS_KG,
            start_velocity: 0.0,
            propulsion: Propulsion::new(),
            integration_start_time: 0.0,
            jump_start_time: 0.0,
        }
    }

    pub fn start_velocity(&self) -> f64 {
        self.start_velocity
    }

    fn takeoff(&mut self, ctx: &ModeContext<'_>, now: f64) -> Option<JumpResult> {
        let g = ctx.plate.gravity;
        let v_to = self.propulsion.velocity + self.start_velocity;
        if v_to <= 0.0 {
            debug!(velocity = v_to, "unloaded without upward velocity, not a jump");
            self.state = PlateState::Ready;
            self.propulsion = Propulsion::new();
            return None;
        }

        let force_curve = curve::generate_power_curve(
            ctx.buffer,
            ctx.plate,
            ctx.thresholds.air_threshold,
            &CurveRequest::integrated(
                self.jump_start_time,
                self.integration_start_time,
                self.manual_mass_kg,
                self.start_velocity,
            ),
        );
        let height = result::height_from_velocity_cm(v_to, g);
        debug!(velocity = v_to, height_cm = height, "takeoff");
        self.state = PlateState::InAir;

        Some(JumpResult {
            mode: ModeKind::JumpEstimation,
            timestamp: now,
            flight_time_ms: result::flight_time_from_velocity_ms(v_to, g),
            height_flight_cm: None,
            height_impulse_cm: height,
            peak_power_w: self.propulsion.peak_power,
            avg_power_w: self.propulsion.avg_power(),
            formula_peak_power_w: None,
            formula_avg_power_w: None,
            velocity_takeoff_mps: v_to,
            velocity_flight_mps: None,
            max_force_kg: self.propulsion.max_force_kg(g),
            jumper_mass_kg: self.manual_mass_kg,
            force_curve,
            phase_times: None,
            contact_time_ms: None,
            contact_start_time: None,
            contact_end_time: None,
            curve_start_time: self.jump_start_time,
            integration_start_time: Some(self.integration_start_time),
        })
    }

    fn start_propulsion(&mut self, ctx: &ModeContext<'_>, now: f64) {
        let th = ctx.thresholds;
        self.state = PlateState::Propulsion;
        self.integration_start_time = now;
        self.jump_start_time = now;
        self.propulsion = Propulsion::new();

        let fix = propulsion::retroactive_propulsion_fix(
            ctx.buffer,
            ctx.plate,
            &RetroRequest {
                target_mass_kg: self.manual_mass_kg,
                match_tolerance_kg: th.estimation_match_tolerance_kg,
                lookback_ms: th.retro_lookback_ms,
                lookback_samples: th.retro_lookback_samples,
                now,
                velocity_offset: self.start_velocity,
            },
        );
        if let Some(fix) = fix {
            self.integration_start_time = fix.start_time;
            self.jump_start_time = fix.start_time;
            self.propulsion = fix.propulsion;
        }
    }
}

impl PhysicsMode for JumpEstimation {
    fn kind(&self) -> ModeKind {
        ModeKind::JumpEstimation
    }

    fn state(&self) -> PlateState {
        self.state
    }

    fn process_sample(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput) -> ModeOutput {
        let th = ctx.thresholds;
        let now = sample.now;
        let display_kg = ctx.display_kg(sample.raw);
        let mut result = None;

        if self.state == PlateState::Idle {
            self.state = PlateState::Ready;
        }

        if ctx.weight(sample.raw) < th.air_threshold {
            if self.state == PlateState::Propulsion {
                result = self.takeoff(ctx, now);
            }
        } else {
            match self.state {
                PlateState::InAir => self.state = PlateState::Ready,
                PlateState::Propulsion => {
                    if now - self.integration_start_time > th.estimation_timeout_ms {
                        debug!("estimation propulsion timed out");
                        self.state = PlateState::Ready;
                        self.propulsion = Propulsion::new();
                    } else {
                        self.propulsion.integrate(
                            display_kg,
                            self.manual_mass_kg,
                            ctx.plate.gravity,
                            sample.dt,
                            self.start_velocity,
                        );
                    }
                }
                _ => {
                    if (display_kg - self.manual_mass_kg).abs() > 2.0 * th.stability_tolerance_kg {
                        self.start_propulsion(ctx, now);
                    }
                }
            }
        }

        ModeOutput {
            state: self.state,
            display_kg,
            result,
            jumper_mass_kg: self.manual_mass_kg,
            velocity: self.propulsion.velocity,
        }
    }

    /// Abandons the current repetition; manual mass and start velocity are kept.
    fn reset_state(&mut self) {
        self.state = PlateState::Ready;
        self.propulsion = Propulsion::new();
        self.integration_start_time = 0.0;
        self.jump_start_time = 0.0;
    }

    fn jumper_mass_kg(&self) -> f64 {
        self.manual_mass_kg
    }

    fn velocity(&self) -> f64 {
        self.propulsion.velocity
    }

    fn as_mass_adjustable(&mut self) -> Option<&mut dyn MassAdjustable> {
        Some(self)
    }

    fn as_velocity_adjustable(&mut self) -> Option<&mut dyn VelocityAdjustable> {
        Some(self)
    }
}

impl MassAdjustable for JumpEstimation {
    fn set_mass(&mut self, kg: f64) {
        self.manual_mass_kg = kg;
    }
}

impl VelocityAdjustable for JumpEstimation {
    fn set_start_velocity(&mut self, mps: f64) {
        self.start_velocity = mps;
    }
}
