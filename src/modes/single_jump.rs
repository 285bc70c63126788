//! Single Jump: automatic bodyweight, then countermovement jumps.
//!
//! ```text
//! IDLE -> WEIGHING -> READY -> PROPULSION -> IN_AIR -> LANDING -> READY
//!                                  ^                      |
//!                                  +------ rebound -------+
//! ```
//!
//! Metrics are computed at landing but staged for `result_emit_delay_ms` so
//! the emitted curve includes the landing. A rebound takeoff, the stability
//! exit, or a step-off emits a staged result early.

use std::collections::VecDeque;

use tracing::{debug, info};

use super::propulsion::{self, Propulsion, RetroRequest};
use super::{ModeContext, ModeKind, ModeOutput, PhysicsMode, PlateState, SampleInput};
use crate::curve::{self, CurveRequest};
use crate::result::{self, JumpResult, PhaseTimes, ResultStage};

/// Velocity (m/s) below which the athlete is considered to be dipping.
const UNWEIGHTING_VELOCITY_MPS: f64 = -0.1;

// ---------------------------------------------------------------------------
// Block averaging
// ---------------------------------------------------------------------------

/// Averages fixed-size blocks of samples and keeps the most recent block means.
#[derive(Debug, Clone)]
pub struct BlockAverager {
    block_size: usize,
    keep: usize,
    sum: f64,
    count: usize,
    averages: VecDeque<f64>,
}

impl BlockAverager {
    pub fn new(block_size: usize, keep: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            keep: keep.max(1),
            sum: 0.0,
            count: 0,
            averages: VecDeque::new(),
        }
    }

    /// Add a value. Returns true when it completed a block.
    pub fn push(&mut self, value: f64) -> bool {
        self.sum += value;
        self.count += 1;
        if self.count < self.block_size {
            return false;
        }
        self.averages.push_back(self.sum / self.block_size as f64);
        while self.averages.len() > self.keep {
            self.averages.pop_front();
        }
        self.sum = 0.0;
        self.count = 0;
        true
    }

    /// Number of completed blocks retained.
    pub fn len(&self) -> usize {
        self.averages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }

    /// Max minus min of the retained block means.
    pub fn spread(&self) -> Option<f64> {
        let min = self.averages.iter().copied().reduce(f64::min)?;
        let max = self.averages.iter().copied().reduce(f64::max)?;
        Some(max - min)
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.averages.is_empty())
            .then(|| self.averages.iter().sum::<f64>() / self.averages.len() as f64)
    }

    pub fn clear(&mut self) {
        self.sum = 0.0;
        self.count = 0;
        self.averages.clear();
    }
}

// ---------------------------------------------------------------------------
// Phase markers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct PhaseTracker {
    unweighting_detected: bool,
    unweighting_start: Option<f64>,
    min_velocity: f64,
    min_velocity_time: Option<f64>,
    zero_crossing_time: Option<f64>,
}

impl PhaseTracker {
    /// Phases of a rebound start at the landing itself.
    fn from_landing(now: f64) -> Self {
        Self {
            unweighting_detected: true,
            unweighting_start: Some(now),
            ..Self::default()
        }
    }

    fn snapshot(&self, takeoff_time: f64) -> PhaseTimes {
        PhaseTimes {
            unweighting_start: self.unweighting_start,
            min_velocity_time: self.min_velocity_time,
            zero_crossing_time: self.zero_crossing_time,
            takeoff_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// A landed jump waiting for its curve.
#[derive(Debug, Clone)]
struct StagedJump {
    result: JumpResult,
    curve: CurveRequest,
}

#[derive(Debug, Clone)]
pub struct SingleJump {
    state: PlateState,

    // Bodyweight
    weight_confirmed: bool,
    weighing_started_at: Option<f64>,
    weighing_sum: f64,
    weighing_count: u64,
    weighing_blocks: BlockAverager,
    static_weight_raw: f64,
    jumper_mass_kg: f64,

    // Integration
    propulsion: Propulsion,
    settle_blocks: BlockAverager,
    phases: PhaseTracker,
    integration_start_time: f64,
    jump_start_time: f64,
    phase_start_velocity: f64,
    low_weight_since: Option<f64>,

    // Flight
    takeoff_time: f64,
    last_takeoff_velocity: f64,
    saved_phase_times: Option<PhaseTimes>,

    stage: ResultStage<StagedJump>,
}

impl Default for SingleJump {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleJump {
    pub fn new() -> Self {
        Self {
            state: PlateState::Idle,
            weight_confirmed: false,
            weighing_started_at: None,
            weighing_sum: 0.0,
            weighing_count: 0,
            weighing_blocks: BlockAverager::new(1, usize::MAX),
            static_weight_raw: 0.0,
            jumper_mass_kg: 0.0,
            propulsion: Propulsion::new(),
            settle_blocks: BlockAverager::new(1, 1),
            phases: PhaseTracker::default(),
            integration_start_time: 0.0,
            jump_start_time: 0.0,
            phase_start_velocity: 0.0,
            low_weight_since: None,
            takeoff_time: 0.0,
            last_takeoff_velocity: 0.0,
            saved_phase_times: None,
            stage: ResultStage::new(),
        }
    }

    /// Whether bodyweight has been measured since the athlete stepped on.
    pub fn weight_confirmed(&self) -> bool {
        self.weight_confirmed
    }

    fn output(&self, display_kg: f64, result: Option<JumpResult>) -> ModeOutput {
        ModeOutput {
            state: self.state,
            display_kg,
            result,
            jumper_mass_kg: self.jumper_mass_kg,
            velocity: self.propulsion.velocity,
        }
    }

    fn unconfirm_weight(&mut self) {
        self.weight_confirmed = false;
        self.jumper_mass_kg = 0.0;
    }

    fn reset_integration(&mut self) {
        self.propulsion = Propulsion::new();
        self.settle_blocks.clear();
        self.phases = PhaseTracker::default();
        self.saved_phase_times = None;
    }

    fn try_emit(&mut self, ctx: &ModeContext<'_>, now: f64, force: bool) -> Option<JumpResult> {
        let StagedJump { mut result, curve } = self.stage.try_emit(now, force)?;
        result.force_curve = curve::generate_power_curve(
            ctx.buffer,
            ctx.plate,
            ctx.thresholds.air_threshold,
            &curve,
        );
        debug!(points = result.force_curve.len(), "emitting single jump result");
        Some(result)
    }

    // -- IN_AIR -------------------------------------------------------------

    fn handle_landing(&mut self, ctx: &ModeContext<'_>, now: f64, air_time_ms: f64) {
        let g = ctx.plate.gravity;
        let th = ctx.thresholds;
        let mass = self.jumper_mass_kg;

        let height_flight = result::height_from_flight_cm(air_time_ms, g);
        let velocity_flight = result::velocity_from_flight(air_time_ms, g);
        let curve_start_time = self.jump_start_time - th.curve_context_ms;

        let jump = JumpResult {
            mode: ModeKind::SingleJump,
            timestamp: now,
            flight_time_ms: air_time_ms,
            height_flight_cm: Some(height_flight),
            height_impulse_cm: result::height_from_velocity_cm(self.last_takeoff_velocity, g),
            peak_power_w: self.propulsion.peak_power,
            avg_power_w: self.propulsion.avg_power(),
            formula_peak_power_w: Some(result::sayers_peak_power(height_flight, mass)),
            formula_avg_power_w: Some(result::harman_avg_power(height_flight, mass)),
            velocity_takeoff_mps: self.last_takeoff_velocity,
            velocity_flight_mps: Some(velocity_flight),
            max_force_kg: self.propulsion.max_force_kg(g),
            jumper_mass_kg: mass,
            force_curve: Vec::new(),
            phase_times: self.saved_phase_times.take(),
            contact_time_ms: None,
            contact_start_time: None,
            contact_end_time: None,
            curve_start_time,
            integration_start_time: Some(self.integration_start_time),
        };
        info!(
            flight_ms = air_time_ms,
            height_cm = height_flight,
            takeoff_mps = self.last_takeoff_velocity,
            "landing"
        );
        let curve = CurveRequest::integrated(
            curve_start_time,
            self.integration_start_time,
            mass,
            self.phase_start_velocity,
        );
        self.stage.stage(StagedJump { result: jump, curve }, now + th.result_emit_delay_ms);

        // Integrate the landing as the eccentric phase of a possible rebound.
        let impact = -velocity_flight;
        self.propulsion = Propulsion::starting_at(impact);
        self.settle_blocks = BlockAverager::new(th.settle_block_size, th.settle_block_count);
        self.phases = PhaseTracker::from_landing(now);
        self.state = PlateState::Landing;
        self.integration_start_time = now;
        self.jump_start_time = now;
        self.phase_start_velocity = impact;
        self.low_weight_since = None;
    }

    // -- PROPULSION / LANDING ----------------------------------------------

    fn integration_step(
        &mut self,
        ctx: &ModeContext<'_>,
        sample: &SampleInput,
        weight: f64,
        display_kg: f64,
    ) -> Option<JumpResult> {
        let th = ctx.thresholds;
        let now = sample.now;
        let mut result = None;

        if self.state == PlateState::Landing {
            result = self.try_emit(ctx, now, false);
        }

        if weight < th.air_threshold && self.propulsion.velocity < 0.0 {
            match self.low_weight_since {
                None => self.low_weight_since = Some(now),
                Some(since) if now - since > th.step_off_timeout_ms => {
                    debug!("stepped off during integration");
                    let forced = self.try_emit(ctx, now, true);
                    self.state = PlateState::Idle;
                    self.unconfirm_weight();
                    self.reset_integration();
                    self.low_weight_since = None;
                    return result.or(forced);
                }
                Some(_) => {}
            }
        } else {
            self.low_weight_since = None;
        }

        if self.jumper_mass_kg > 0.0
            && now - self.integration_start_time <= th.max_propulsion_time_ms
        {
            self.integrate_sample(ctx, sample, display_kg);
            if let Some(r) = self.stability_exit(ctx, now, display_kg) {
                result = Some(r);
            }
        }

        if now - self.integration_start_time > th.max_propulsion_time_ms {
            debug!("propulsion timed out");
            self.state = PlateState::Ready;
            self.reset_integration();
        }

        result
    }

    fn integrate_sample(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput, display_kg: f64) {
        let now = sample.now;
        let prev = self.propulsion.velocity;
        self.propulsion
            .integrate(display_kg, self.jumper_mass_kg, ctx.plate.gravity, sample.dt, 0.0);
        let v = self.propulsion.velocity;

        let phases = &mut self.phases;
        if !phases.unweighting_detected && v < UNWEIGHTING_VELOCITY_MPS {
            phases.unweighting_detected = true;
            phases.unweighting_start = propulsion::find_unweighting_start(
                ctx.buffer,
                ctx.plate,
                self.jumper_mass_kg,
                ctx.thresholds.unweighting_lookback_samples,
            );
        }
        if v < phases.min_velocity {
            phases.min_velocity = v;
            phases.min_velocity_time = Some(now);
        }
        if prev < 0.0 && v >= 0.0 && phases.zero_crossing_time.is_none() {
            phases.zero_crossing_time = Some(now);
        }
    }

    fn stability_exit(
        &mut self,
        ctx: &ModeContext<'_>,
        now: f64,
        display_kg: f64,
    ) -> Option<JumpResult> {
        let th = ctx.thresholds;
        if !self.settle_blocks.push(display_kg) || self.settle_blocks.len() < th.settle_block_count {
            return None;
        }
        let noise = self.settle_blocks.spread()?;
        let mean = self.settle_blocks.mean()?;
        if noise > th.settle_noise_kg || (mean - self.jumper_mass_kg).abs() > th.settle_drift_kg {
            return None;
        }

        let result = self.try_emit(ctx, now, true);
        debug!(mass_kg = mean, "settled, back to ready");
        self.jumper_mass_kg = mean;
        self.static_weight_raw = mean * ctx.plate.raw_per_kg;
        self.state = PlateState::Ready;
        self.reset_integration();
        self.phase_start_velocity = 0.0;
        self.stage.clear();
        result
    }

    // -- WEIGHING / READY ---------------------------------------------------

    fn ready_step(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput, weight: f64) {
        let th = ctx.thresholds;
        let now = sample.now;

        if !self.weight_confirmed {
            self.state = PlateState::Weighing;
            let started_at = match self.weighing_started_at {
                Some(t) => t,
                None => {
                    self.weighing_sum = 0.0;
                    self.weighing_count = 0;
                    self.weighing_blocks = BlockAverager::new(th.weighing_block_size, usize::MAX);
                    self.weighing_started_at = Some(now);
                    now
                }
            };

            self.weighing_sum += weight;
            self.weighing_count += 1;
            self.weighing_blocks.push(weight);

            if now - started_at >= th.weighing_window_ms {
                if let Some(spread) = self.weighing_blocks.spread() {
                    let noise_kg = ctx.plate.counts_to_kg(spread);
                    if noise_kg <= th.stability_tolerance_kg {
                        self.static_weight_raw = self.weighing_sum / self.weighing_count as f64;
                        self.jumper_mass_kg = ctx.plate.counts_to_kg(self.static_weight_raw);
                        self.weight_confirmed = true;
                        self.state = PlateState::Ready;
                        info!(mass_kg = self.jumper_mass_kg, "bodyweight confirmed");
                    } else {
                        debug!(noise_kg, "bodyweight unstable, weighing again");
                    }
                }
                self.weighing_started_at = None;
            }
            return;
        }

        if (weight - self.static_weight_raw).abs() > th.movement_threshold {
            self.state = PlateState::Propulsion;
            self.reset_integration();
            self.settle_blocks = BlockAverager::new(th.settle_block_size, th.settle_block_count);
            self.integration_start_time = now;
            self.jump_start_time = now;
            self.phase_start_velocity = 0.0;

            let fix = propulsion::retroactive_propulsion_fix(
                ctx.buffer,
                ctx.plate,
                &RetroRequest {
                    target_mass_kg: self.jumper_mass_kg,
                    match_tolerance_kg: th.retro_match_tolerance_kg,
                    lookback_ms: th.retro_lookback_ms,
                    lookback_samples: th.retro_lookback_samples,
                    now,
                    velocity_offset: 0.0,
                },
            );
            if let Some(fix) = fix {
                self.integration_start_time = fix.start_time;
                self.jump_start_time = fix.start_time;
                self.propulsion = fix.propulsion;
            }
            debug!(start = self.integration_start_time, "movement detected");
        } else {
            self.state = PlateState::Ready;
            self.phase_start_velocity = 0.0;
        }
    }
}

impl PhysicsMode for SingleJump {
    fn kind(&self) -> ModeKind {
        ModeKind::SingleJump
    }

    fn state(&self) -> PlateState {
        self.state
    }

    fn process_sample(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput) -> ModeOutput {
        let th = ctx.thresholds;
        let now = sample.now;
        let weight = ctx.weight(sample.raw);
        let display_kg = ctx.display_kg(sample.raw);
        let airborne = weight < th.air_threshold;

        if self.state == PlateState::InAir {
            let air_time = now - self.takeoff_time;
            if !airborne {
                if air_time >= th.min_air_time_ms {
                    self.handle_landing(ctx, now, air_time);
                }
            } else if air_time > th.max_air_time_ms {
                debug!(air_time, "no landing, athlete left the plate");
                self.state = PlateState::Idle;
                self.unconfirm_weight();
                self.weighing_started_at = None;
            }
            return self.output(display_kg, None);
        }

        if airborne
            && self.propulsion.velocity > 0.0
            && matches!(
                self.state,
                PlateState::Ready | PlateState::Propulsion | PlateState::Landing
            )
        {
            self.saved_phase_times = Some(self.phases.snapshot(now));
            let result = self.try_emit(ctx, now, true);
            self.last_takeoff_velocity = self.propulsion.velocity;
            self.takeoff_time = now;
            self.state = PlateState::InAir;
            debug!(velocity = self.last_takeoff_velocity, "takeoff");
            return self.output(display_kg, result);
        }

        if airborne
            && !matches!(
                self.state,
                PlateState::Propulsion | PlateState::Landing | PlateState::InAir
            )
        {
            if self.weight_confirmed {
                debug!("plate unloaded, bodyweight cleared");
                self.unconfirm_weight();
            }
            self.state = PlateState::Idle;
            self.weighing_started_at = None;
            return self.output(display_kg, None);
        }

        let result = if matches!(self.state, PlateState::Propulsion | PlateState::Landing) {
            self.integration_step(ctx, sample, weight, display_kg)
        } else {
            self.ready_step(ctx, sample, weight);
            None
        };
        self.output(display_kg, result)
    }

    fn reset_state(&mut self) {
        *self = Self::new();
    }

    fn jumper_mass_kg(&self) -> f64 {
        self.jumper_mass_kg
    }

    fn velocity(&self) -> f64 {
        self.propulsion.velocity
    }
}
