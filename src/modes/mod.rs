//! Exercise state machines.
//!
//! Each exercise is a [`PhysicsMode`]: it receives every processed sample with
//! the shared engine context, owns its per-repetition accumulators, and
//! returns at most one [`JumpResult`] per completed repetition.
//!
//! - [`SingleJump`]: measures bodyweight, then tracks countermovement jumps.
//! - [`JumpEstimation`]: manual mass, results from takeoff impulse.
//! - [`ContactTime`]: ground contact between two flights.
//!
//! Optional controls are exposed as capability traits ([`MassAdjustable`],
//! [`VelocityAdjustable`]) rather than on every mode.

pub mod contact_time;
pub mod jump_estimation;
pub mod propulsion;
pub mod single_jump;

pub use contact_time::ContactTime;
pub use jump_estimation::JumpEstimation;
pub use single_jump::SingleJump;

use std::fmt;
use std::str::FromStr;

use crate::buffer::SampleRingBuffer;
use crate::config::{PlateConfig, Thresholds};
use crate::error::UnknownMode;
use crate::result::JumpResult;

// ---------------------------------------------------------------------------
// Mode identity
// ---------------------------------------------------------------------------

/// The exercises the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModeKind {
    #[cfg_attr(feature = "serde", serde(rename = "Single Jump"))]
    SingleJump,
    #[cfg_attr(feature = "serde", serde(rename = "Jump Estimation"))]
    JumpEstimation,
    #[cfg_attr(feature = "serde", serde(rename = "Contact Time"))]
    ContactTime,
}

impl ModeKind {
    pub const ALL: [ModeKind; 3] = [Self::SingleJump, Self::JumpEstimation, Self::ContactTime];

    /// Display name, as shown to the athlete and accepted by `from_str`.
    pub fn name(self) -> &'static str {
        match self {
            Self::SingleJump => "Single Jump",
            Self::JumpEstimation => "Jump Estimation",
            Self::ContactTime => "Contact Time",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModeKind {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// State tags
// ---------------------------------------------------------------------------

/// State reported with every processed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PlateState {
    Idle,
    Weighing,
    Ready,
    Propulsion,
    Landing,
    InAir,
    #[cfg_attr(feature = "serde", serde(rename = "IN_AIR_1"))]
    InAir1,
    Contact,
    #[cfg_attr(feature = "serde", serde(rename = "IN_AIR_2"))]
    InAir2,
    Result,
    Taring,
    Calibrating,
}

impl PlateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Weighing => "WEIGHING",
            Self::Ready => "READY",
            Self::Propulsion => "PROPULSION",
            Self::Landing => "LANDING",
            Self::InAir => "IN_AIR",
            Self::InAir1 => "IN_AIR_1",
            Self::Contact => "CONTACT",
            Self::InAir2 => "IN_AIR_2",
            Self::Result => "RESULT",
            Self::Taring => "TARING",
            Self::Calibrating => "CALIBRATING",
        }
    }
}

impl fmt::Display for PlateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Per-sample plumbing
// ---------------------------------------------------------------------------

/// Engine state a mode may read while processing a sample.
#[derive(Debug, Clone, Copy)]
pub struct ModeContext<'a> {
    /// Previously processed samples (the current one is appended afterwards).
    pub buffer: &'a SampleRingBuffer,
    pub plate: &'a PlateConfig,
    pub thresholds: &'a Thresholds,
    pub zero_offset: f64,
}

impl ModeContext<'_> {
    /// Zero-adjusted raw counts.
    pub fn weight(&self, raw: i32) -> f64 {
        f64::from(raw) - self.zero_offset
    }

    /// Zero-adjusted load in kg.
    pub fn display_kg(&self, raw: i32) -> f64 {
        self.plate.counts_to_kg(self.weight(raw))
    }
}

/// One sample as presented to a mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInput {
    pub raw: i32,
    /// Host receive time (ms).
    pub timestamp_ms: f64,
    pub device_clock: u32,
    /// Logical time (ms).
    pub now: f64,
    /// Integration step (s).
    pub dt: f64,
}

/// What a mode reports back for each sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeOutput {
    pub state: PlateState,
    pub display_kg: f64,
    pub result: Option<JumpResult>,
    pub jumper_mass_kg: f64,
    pub velocity: f64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An exercise state machine.
pub trait PhysicsMode: Send {
    fn kind(&self) -> ModeKind;

    fn state(&self) -> PlateState;

    fn process_sample(&mut self, ctx: &ModeContext<'_>, sample: &SampleInput) -> ModeOutput;

    /// Discard the current repetition and return to the mode's initial state.
    fn reset_state(&mut self);

    fn jumper_mass_kg(&self) -> f64;

    fn velocity(&self) -> f64;

    fn as_mass_adjustable(&mut self) -> Option<&mut dyn MassAdjustable> {
        None
    }

    fn as_velocity_adjustable(&mut self) -> Option<&mut dyn VelocityAdjustable> {
        None
    }
}

/// Modes that take the jumper's mass from the user.
pub trait MassAdjustable {
    fn set_mass(&mut self, kg: f64);
}

/// Modes that accept a non-zero velocity at integration start.
pub trait VelocityAdjustable {
    fn set_start_velocity(&mut self, mps: f64);
}

/// Fresh instances of every mode, in [`ModeKind::ALL`] order.
pub fn all_modes() -> Vec<Box<dyn PhysicsMode>> {
    vec![
        Box::new(SingleJump::new()),
        Box::new(JumpEstimation::new()),
        Box::new(ContactTime::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_round_trip() {
        for kind in ModeKind::ALL {
            assert_eq!(kind.name().parse::<ModeKind>().unwrap(), kind);
        }
        assert_eq!("contact time".parse::<ModeKind>().unwrap(), ModeKind::ContactTime);
    }

    #[test]
    fn unknown_mode_name() {
        assert_eq!(
            "Drop Jump".parse::<ModeKind>(),
            Err(UnknownMode("Drop Jump".to_string()))
        );
    }

    #[test]
    fn all_modes_match_kinds() {
        let kinds: Vec<ModeKind> = all_modes().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, ModeKind::ALL.to_vec());
    }

    #[test]
    fn capabilities_per_mode() {
        let mut modes = all_modes();
        let caps: Vec<(bool, bool)> = modes
            .iter_mut()
            .map(|m| {
                let mass = m.as_mass_adjustable().is_some();
                let vel = m.as_velocity_adjustable().is_some();
                (mass, vel)
            })
            .collect();
        assert_eq!(caps, vec![(false, false), (true, true), (false, false)]);
    }

    #[cfg(feature = "json")]
    #[test]
    fn state_tags_serialize_like_display() {
        for state in [PlateState::InAir1, PlateState::Weighing, PlateState::InAir] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
