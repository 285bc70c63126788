//! Synthetic 1 kHz plate for engine-level tests.

use crate::config::{EngineConfig, PlateConfig};
use crate::engine::PhysicsEngine;
use crate::modes::PlateState;
use crate::result::JumpResult;

pub struct SyntheticPlate {
    pub engine: PhysicsEngine,
    pub results: Vec<JumpResult>,
    i: u32,
}

impl SyntheticPlate {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            plate: PlateConfig {
                frequency_hz: 1000.0,
                ..PlateConfig::default()
            },
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            engine: PhysicsEngine::new(config),
            results: Vec::new(),
            i: 0,
        }
    }

    /// Host timestamp and device clock of the next sample (1 ms apart, ticks never 0).
    pub fn next_stamp(&mut self) -> (f64, u32) {
        let stamp = (f64::from(self.i), (self.i + 1) * 1_000);
        self.i += 1;
        stamp
    }

    /// Feed `count` identical raw samples, returning the reported states.
    pub fn hold_raw(&mut self, raw: i32, count: u32) -> Vec<PlateState> {
        (0..count)
            .map(|_| {
                let (ts, ticks) = self.next_stamp();
                let out = self.engine.process_sample(raw, ts, ticks);
                self.results.extend(out.result);
                out.state
            })
            .collect()
    }

    /// Hold `kg` (at the engine's current scale and zero) for `ms` milliseconds.
    pub fn hold(&mut self, kg: f64, ms: u32) -> Vec<PlateState> {
        let cfg = self.engine.config();
        let raw = (kg * cfg.plate.raw_per_kg + self.engine.zero_offset()).round() as i32;
        self.hold_raw(raw, ms)
    }
}
