//! Velocity integration shared by the integrating modes.
//!
//! Movement is only detected once the load has already departed from
//! bodyweight by a threshold, so the first tens of milliseconds of the
//! countermovement are missed live. [`retroactive_propulsion_fix`] rewinds
//! through the sample buffer to the last point that still looked like quiet
//! standing and replays the integration forward from there.

use crate::buffer::{Sample, SampleRingBuffer};
use crate::clock;
use crate::config::PlateConfig;

/// Velocity band (m/s) treated as standing still when locating the dip start.
pub const STILL_VELOCITY_MPS: f64 = 0.02;

/// Running state of one propulsion phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Propulsion {
    /// Integrated centre-of-mass velocity (m/s), excluding any start offset.
    pub velocity: f64,
    pub peak_power: f64,
    sum_power: f64,
    power_samples: u64,
    /// Highest force seen (N).
    pub max_force_n: f64,
}

impl Propulsion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh accumulators with an initial velocity (e.g. impact velocity on landing).
    pub fn starting_at(velocity: f64) -> Self {
        Self {
            velocity,
            ..Self::default()
        }
    }

    /// Integrate one sample of `force_kg` over `dt` seconds.
    ///
    /// `velocity_offset` is added to the integrated velocity for power.
    /// Returns the instantaneous power, or 0 without integrating when the
    /// mass is unknown.
    pub fn integrate(
        &mut self,
        force_kg: f64,
        mass_kg: f64,
        gravity: f64,
        dt: f64,
        velocity_offset: f64,
    ) -> f64 {
        if mass_kg <= 0.0 {
            return 0.0;
        }
        let force_n = force_kg * gravity;
        let acc = (force_kg - mass_kg) * gravity / mass_kg;
        self.velocity += acc * dt;

        let v = self.velocity + velocity_offset;
        let power = force_n * v;
        if v > 0.0 {
            self.sum_power += power;
            self.power_samples += 1;
        }
        if force_n > self.max_force_n {
            self.max_force_n = force_n;
        }
        if power > self.peak_power {
            self.peak_power = power;
        }
        power
    }

    /// Mean power over samples with upward velocity (0 if none).
    pub fn avg_power(&self) -> f64 {
        self.sum_power / self.power_samples.max(1) as f64
    }

    pub fn power_samples(&self) -> u64 {
        self.power_samples
    }

    pub fn max_force_kg(&self, gravity: f64) -> f64 {
        if gravity > 0.0 {
            self.max_force_n / gravity
        } else {
            0.0
        }
    }
}

/// Parameters for [`retroactive_propulsion_fix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetroRequest {
    /// Load (kg) that counts as quiet standing.
    pub target_mass_kg: f64,
    /// Back-scan stops at the first sample within this distance of the target.
    pub match_tolerance_kg: f64,
    pub lookback_ms: f64,
    pub lookback_samples: usize,
    /// Logical time of the triggering sample.
    pub now: f64,
    pub velocity_offset: f64,
}

/// A rewound integration start.
#[derive(Debug, Clone, PartialEq)]
pub struct RetroFix {
    /// Time of the sample integration was replayed from.
    pub start_time: f64,
    /// Accumulators after replaying up to the newest buffered sample.
    pub propulsion: Propulsion,
}

/// Rewind to the best quiet-standing sample and replay integration forward.
///
/// Scans backwards from the newest sample, stopping at the first one within
/// `match_tolerance_kg` of the target, otherwise keeping the closest one seen
/// inside the lookback limits. Returns `None` when the buffer is empty or the
/// mass is unknown.
pub fn retroactive_propulsion_fix(
    buffer: &SampleRingBuffer,
    plate: &PlateConfig,
    req: &RetroRequest,
) -> Option<RetroFix> {
    if buffer.is_empty() || req.target_mass_kg <= 0.0 {
        return None;
    }

    let mut best = 0;
    let mut best_diff = f64::INFINITY;
    for n in 0..req.lookback_samples.min(buffer.len()) {
        let Some(s) = buffer.nth_latest(n) else { break };
        if req.now - s.time_ms > req.lookback_ms {
            break;
        }
        let diff = (s.weight_kg - req.target_mass_kg).abs();
        if diff < req.match_tolerance_kg {
            best = n;
            break;
        }
        if diff < best_diff {
            best_diff = diff;
            best = n;
        }
    }

    let start_time = buffer.nth_latest(best)?.time_ms;
    let propulsion = replay(
        buffer.tail(best + 1),
        plate,
        req.target_mass_kg,
        Propulsion::new(),
        req.velocity_offset,
    );
    Some(RetroFix {
        start_time,
        propulsion,
    })
}

fn replay<'a>(
    samples: impl Iterator<Item = &'a Sample>,
    plate: &PlateConfig,
    mass_kg: f64,
    mut propulsion: Propulsion,
    velocity_offset: f64,
) -> Propulsion {
    let mut last_ticks: Option<u32> = None;
    for s in samples {
        let dt = clock::step_seconds(
            last_ticks.unwrap_or(s.device_clock),
            s.device_clock,
            plate.frequency_hz,
        );
        last_ticks = Some(s.device_clock);
        propulsion.integrate(s.weight_kg, mass_kg, plate.gravity, dt, velocity_offset);
    }
    propulsion
}

/// Locate the start of the unweighting phase.
///
/// Integrates the last `lookback_samples` buffered samples from rest and
/// returns the last time velocity was still within [`STILL_VELOCITY_MPS`] of
/// zero (the first sample's time if it never was). `None` for an empty
/// buffer or unknown mass.
pub fn find_unweighting_start(
    buffer: &SampleRingBuffer,
    plate: &PlateConfig,
    mass_kg: f64,
    lookback_samples: usize,
) -> Option<f64> {
    if mass_kg <= 0.0 {
        return None;
    }
    let first = buffer.nth_latest(lookback_samples.min(buffer.len()).checked_sub(1)?)?;

    let mut velocity = 0.0_f64;
    let mut last_still = first.time_ms;
    let mut last_ticks = first.device_clock;
    for s in buffer.tail(lookback_samples) {
        let dt = clock::step_seconds(last_ticks, s.device_clock, plate.frequency_hz);
        last_ticks = s.device_clock;
        if velocity.abs() <= STILL_VELOCITY_MPS {
            last_still = s.time_ms;
        }
        velocity += (s.weight_kg - mass_kg) * plate.gravity / mass_kg * dt;
    }
    Some(last_still)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const G: f64 = 9.80665;

    fn plate() -> PlateConfig {
        PlateConfig {
            frequency_hz: 1000.0,
            ..PlateConfig::default()
        }
    }

    fn buffer_from(n: usize, kg: impl Fn(usize) -> f64) -> SampleRingBuffer {
        let mut buf = SampleRingBuffer::new(4096);
        for i in 0..n {
            buf.append(i as f64, kg(i), 1_000 + i as u32 * 1_000);
        }
        buf
    }

    fn request(mass: f64, now: f64) -> RetroRequest {
        RetroRequest {
            target_mass_kg: mass,
            match_tolerance_kg: 0.5,
            lookback_ms: 600.0,
            lookback_samples: 600,
            now,
            velocity_offset: 0.0,
        }
    }

    #[test]
    fn integrate_tracks_power_and_force() {
        let mut p = Propulsion::new();
        let power = p.integrate(160.0, 80.0, G, 0.01, 0.0);
        assert_relative_eq!(p.velocity, G * 0.01);
        assert_relative_eq!(power, 160.0 * G * G * 0.01);
        assert_relative_eq!(p.peak_power, power);
        assert_relative_eq!(p.avg_power(), power);
        assert_relative_eq!(p.max_force_kg(G), 160.0);
    }

    #[test]
    fn downward_velocity_is_not_averaged() {
        let mut p = Propulsion::new();
        p.integrate(40.0, 80.0, G, 0.01, 0.0);
        assert!(p.velocity < 0.0);
        assert_eq!(p.power_samples(), 0);
        assert_eq!(p.avg_power(), 0.0);
    }

    #[test]
    fn offset_counts_towards_power() {
        let mut p = Propulsion::new();
        let power = p.integrate(80.0, 80.0, G, 0.01, 1.0);
        assert_relative_eq!(p.velocity, 0.0);
        assert_relative_eq!(power, 80.0 * G);
        assert_eq!(p.power_samples(), 1);
    }

    #[test]
    fn zero_mass_is_ignored() {
        let mut p = Propulsion::starting_at(-1.0);
        assert_eq!(p.integrate(100.0, 0.0, G, 0.01, 0.0), 0.0);
        assert_eq!(p.velocity, -1.0);
    }

    #[test]
    fn retro_fix_rewinds_to_last_quiet_sample() {
        // Quiet at 80 kg until t=90, then a dip to 60 kg.
        let buf = buffer_from(100, |i| if i < 90 { 80.0 } else { 60.0 });
        let fix = retroactive_propulsion_fix(&buf, &plate(), &request(80.0, 100.0)).unwrap();
        assert_eq!(fix.start_time, 89.0);
        // One quiet sample then ten 1 ms steps at -20 kg.
        assert_relative_eq!(fix.propulsion.velocity, -20.0 * G / 80.0 * 0.010, max_relative = 1e-9);
    }

    #[test]
    fn retro_fix_keeps_closest_when_nothing_matches() {
        let buf = buffer_from(50, |i| 70.0 + i as f64 * 0.1);
        let mut req = request(90.0, 50.0);
        req.match_tolerance_kg = 0.01;
        let fix = retroactive_propulsion_fix(&buf, &plate(), &req).unwrap();
        assert_eq!(fix.start_time, 49.0);
    }

    #[test]
    fn retro_fix_respects_time_window() {
        // Matching sample exists, but only outside the window.
        let buf = buffer_from(100, |i| if i < 10 { 80.0 } else { 60.0 });
        let mut req = request(80.0, 100.0);
        req.lookback_ms = 50.0;
        let fix = retroactive_propulsion_fix(&buf, &plate(), &req).unwrap();
        assert!(fix.start_time >= 50.0);
    }

    #[test]
    fn retro_fix_needs_samples_and_mass() {
        let empty = SampleRingBuffer::new(8);
        assert!(retroactive_propulsion_fix(&empty, &plate(), &request(80.0, 0.0)).is_none());
        let buf = buffer_from(10, |_| 80.0);
        assert!(retroactive_propulsion_fix(&buf, &plate(), &request(0.0, 10.0)).is_none());
    }

    #[test]
    fn unweighting_start_is_last_still_point() {
        let buf = buffer_from(300, |i| if i < 250 { 80.0 } else { 40.0 });
        let t = find_unweighting_start(&buf, &plate(), 80.0, 200).unwrap();
        // Velocity leaves the still band a few samples into the dip.
        assert!(t >= 250.0 && t < 260.0, "t = {t}");
    }

    #[test]
    fn unweighting_scan_is_bounded_by_lookback() {
        // Dipping throughout: the window opens at t=100 and velocity leaves
        // the still band after four 1 ms steps at -g/2.
        let buf = buffer_from(300, |_| 40.0);
        assert_eq!(find_unweighting_start(&buf, &plate(), 80.0, 200), Some(104.0));
        assert_eq!(find_unweighting_start(&SampleRingBuffer::new(4), &plate(), 80.0, 200), None);
    }
}
