//! Post-hoc force/power/velocity curves.
//!
//! Replays a time range of the sample buffer through the same projectile
//! equations the live state machines use, producing one point per sample for
//! plotting and persistence. Mode-agnostic: a force-only request (or an
//! unknown mass) yields points without power or velocity.

use crate::buffer::SampleRingBuffer;
use crate::clock;
use crate::config::PlateConfig;

/// One point of an emitted curve.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForceCurvePoint {
    /// Logical time (ms).
    pub t: f64,
    /// Measured load (kg).
    #[cfg_attr(feature = "serde", serde(rename = "v"))]
    pub force_kg: f64,
    /// Force used for power (N); zero while airborne inside the integration range.
    #[cfg_attr(feature = "serde", serde(rename = "f"))]
    pub force_n: f64,
    /// Instantaneous power (W), `None` when no velocity model applies.
    #[cfg_attr(feature = "serde", serde(rename = "p"))]
    pub power: Option<f64>,
    /// Centre-of-mass velocity (m/s), `None` when no velocity model applies.
    #[cfg_attr(feature = "serde", serde(rename = "vel"))]
    pub velocity: Option<f64>,
}

/// Parameters for [`generate_power_curve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveRequest {
    /// First sample time included in the curve.
    pub start_time: f64,
    /// Velocity integration begins here; earlier samples are context only.
    pub integration_start_time: f64,
    /// Mass used by the velocity model; `None` requests a force-only curve.
    pub jumper_mass_kg: Option<f64>,
    /// Velocity at `integration_start_time` (m/s).
    pub start_velocity: f64,
}

impl CurveRequest {
    /// Curve with velocity and power integrated from `integration_start_time`.
    pub fn integrated(
        start_time: f64,
        integration_start_time: f64,
        jumper_mass_kg: f64,
        start_velocity: f64,
    ) -> Self {
        Self {
            start_time,
            integration_start_time,
            jumper_mass_kg: Some(jumper_mass_kg),
            start_velocity,
        }
    }

    /// Curve of measured force only.
    pub fn force_only(start_time: f64) -> Self {
        Self {
            start_time,
            integration_start_time: start_time,
            jumper_mass_kg: None,
            start_velocity: 0.0,
        }
    }
}

/// Replay `buffer` from `req.start_time` to its newest sample.
///
/// `air_threshold` is in zero-adjusted raw counts; inside the integration
/// range, loads below it are treated as no contact so flight integrates as
/// free fall instead of sensor noise.
pub fn generate_power_curve(
    buffer: &SampleRingBuffer,
    plate: &PlateConfig,
    air_threshold: f64,
    req: &CurveRequest,
) -> Vec<ForceCurvePoint> {
    let mass = req.jumper_mass_kg.filter(|m| *m > 0.0);
    let g = plate.gravity;

    let mut curve = Vec::new();
    let mut delta_v = 0.0;
    let mut last_ticks: Option<u32> = None;

    for s in buffer.since(req.start_time) {
        let dt = clock::step_seconds(
            last_ticks.unwrap_or(s.device_clock),
            s.device_clock,
            plate.frequency_hz,
        );
        last_ticks = Some(s.device_clock);

        let Some(mass) = mass else {
            curve.push(ForceCurvePoint {
                t: s.time_ms,
                force_kg: s.weight_kg,
                force_n: s.weight_kg * g,
                power: None,
                velocity: None,
            });
            continue;
        };

        if s.time_ms < req.integration_start_time {
            curve.push(ForceCurvePoint {
                t: s.time_ms,
                force_kg: s.weight_kg,
                force_n: s.weight_kg * g,
                power: Some(0.0),
                velocity: Some(0.0),
            });
            continue;
        }

        let effective_kg = if s.weight_kg * plate.raw_per_kg < air_threshold {
            0.0
        } else {
            s.weight_kg
        };
        let force_n = effective_kg * g;
        let acc = (effective_kg - mass) * g / mass;
        delta_v += acc * dt;
        let velocity = req.start_velocity + delta_v;

        curve.push(ForceCurvePoint {
            t: s.time_ms,
            force_kg: s.weight_kg,
            force_n,
            power: Some(force_n * velocity),
            velocity: Some(velocity),
        });
    }

    curve
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const AIR: f64 = 90_000.0;

    fn plate() -> PlateConfig {
        PlateConfig {
            frequency_hz: 1000.0,
            ..PlateConfig::default()
        }
    }

    /// 1 kHz samples with µs ticks, `kg(i)` giving the load of sample `i`.
    fn buffer_from(n: usize, kg: impl Fn(usize) -> f64) -> SampleRingBuffer {
        let mut buf = SampleRingBuffer::new(4096);
        for i in 0..n {
            buf.append(i as f64, kg(i), 1_000 + i as u32 * 1_000);
        }
        buf
    }

    #[test]
    fn static_bodyweight_has_zero_velocity() {
        let buf = buffer_from(100, |_| 80.0);
        let curve = generate_power_curve(&buf, &plate(), AIR, &CurveRequest::integrated(0.0, 0.0, 80.0, 0.0));
        assert_eq!(curve.len(), 100);
        for p in &curve {
            assert_relative_eq!(p.velocity.unwrap(), 0.0);
            assert_relative_eq!(p.force_n, 80.0 * 9.80665);
        }
    }

    #[test]
    fn double_bodyweight_accelerates_at_g() {
        // First sample integrates with the nominal 1 ms step, the rest with 1 ms ticks.
        let buf = buffer_from(101, |_| 160.0);
        let curve = generate_power_curve(&buf, &plate(), AIR, &CurveRequest::integrated(0.0, 0.0, 80.0, 0.0));
        let last = curve.last().unwrap();
        assert_relative_eq!(last.velocity.unwrap(), 9.80665 * 0.101, max_relative = 1e-9);
        assert_relative_eq!(last.power.unwrap(), 160.0 * 9.80665 * last.velocity.unwrap());
    }

    #[test]
    fn context_samples_carry_force_only() {
        let buf = buffer_from(20, |i| if i < 10 { 70.0 } else { 140.0 });
        let curve = generate_power_curve(&buf, &plate(), AIR, &CurveRequest::integrated(0.0, 10.0, 70.0, 0.0));
        assert_eq!(curve[5].velocity, Some(0.0));
        assert_eq!(curve[5].power, Some(0.0));
        assert_relative_eq!(curve[5].force_n, 70.0 * 9.80665);
        assert!(curve[19].velocity.unwrap() > 0.0);
    }

    #[test]
    fn airborne_load_integrates_as_free_fall() {
        // 2 kg of noise is below the air threshold (2 * 12560 < 90000).
        let buf = buffer_from(100, |_| 2.0);
        let curve =
            generate_power_curve(&buf, &plate(), AIR, &CurveRequest::integrated(0.0, 0.0, 75.0, 1.0));
        let last = curve.last().unwrap();
        assert_relative_eq!(last.velocity.unwrap(), 1.0 - 9.80665 * 0.1, max_relative = 1e-9);
        assert_eq!(last.force_n, 0.0);
        assert_eq!(last.power, Some(0.0));
        assert_eq!(last.force_kg, 2.0);
    }

    #[test]
    fn start_time_filters_samples() {
        let buf = buffer_from(50, |_| 70.0);
        let curve = generate_power_curve(&buf, &plate(), AIR, &CurveRequest::force_only(40.0));
        assert_eq!(curve.len(), 10);
        assert_eq!(curve[0].t, 40.0);
    }

    #[test]
    fn force_only_and_massless_requests_omit_physics() {
        let buf = buffer_from(10, |_| 70.0);
        let force_only = generate_power_curve(&buf, &plate(), AIR, &CurveRequest::force_only(0.0));
        assert!(force_only.iter().all(|p| p.power.is_none() && p.velocity.is_none()));

        let massless =
            generate_power_curve(&buf, &plate(), AIR, &CurveRequest::integrated(0.0, 0.0, 0.0, 0.0));
        assert!(massless.iter().all(|p| p.power.is_none() && p.velocity.is_none()));
    }

    #[test]
    fn empty_buffer_gives_empty_curve() {
        let buf = SampleRingBuffer::new(8);
        assert!(generate_power_curve(&buf, &plate(), AIR, &CurveRequest::force_only(0.0)).is_empty());
    }
}
