//! Device-clock arithmetic and the engine's logical clock.
//!
//! The plate firmware stamps every sample with a free-running 32-bit
//! microsecond counter. Deltas are computed modulo 2^32 so a rollover between
//! two samples still yields the true spacing. A tick value of 0 means the
//! firmware did not send one.

/// Device clock resolution.
pub const TICKS_PER_SECOND: f64 = 1_000_000.0;

/// Largest tick delta accepted as a per-sample integration step (100 ms).
pub const MAX_STEP_TICKS: u32 = 100_000;

/// Largest tick delta accepted for advancing logical time (1 s).
pub const MAX_ADVANCE_TICKS: u32 = 1_000_000;

/// Tick delta from `prev` to `cur`, unwrapping a 32-bit rollover.
///
/// Returns `None` when either stamp is unavailable (0).
pub fn tick_delta(prev: u32, cur: u32) -> Option<u32> {
    if prev == 0 || cur == 0 {
        return None;
    }
    Some(cur.wrapping_sub(prev))
}

/// Integration step in seconds between two consecutive samples.
///
/// Uses the device clock when the delta is sane (`0 < delta < 100 ms`),
/// otherwise the nominal `1 / frequency_hz`.
pub fn step_seconds(prev: u32, cur: u32, frequency_hz: f64) -> f64 {
    match tick_delta(prev, cur) {
        Some(d) if d > 0 && d < MAX_STEP_TICKS => f64::from(d) / TICKS_PER_SECOND,
        _ => nominal_step_seconds(frequency_hz),
    }
}

/// `1 / frequency_hz`, guarding against a non-positive rate.
pub fn nominal_step_seconds(frequency_hz: f64) -> f64 {
    if frequency_hz > 0.0 {
        1.0 / frequency_hz
    } else {
        0.0
    }
}

/// Monotonic logical time (ms) derived from sample stamps.
///
/// Seeded from the first sample's host timestamp, then advanced by device
/// clock deltas (or the nominal period when the clock is missing or jumps),
/// so host jitter and out-of-order host stamps never move it backwards.
#[derive(Debug, Clone, Default)]
pub struct LogicClock {
    now_ms: Option<f64>,
    last_ticks: u32,
}

impl LogicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time, if any sample has been seen.
    pub fn now_ms(&self) -> Option<f64> {
        self.now_ms
    }

    /// Device clock value of the previous sample (0 if none).
    pub fn last_ticks(&self) -> u32 {
        self.last_ticks
    }

    /// Integration step for a sample stamped `ticks`, relative to the previous one.
    pub fn step_seconds(&self, ticks: u32, frequency_hz: f64) -> f64 {
        step_seconds(self.last_ticks, ticks, frequency_hz)
    }

    /// Advance to the sample stamped (`timestamp_ms`, `ticks`) and return the new time.
    pub fn advance(&mut self, timestamp_ms: f64, ticks: u32, frequency_hz: f64) -> f64 {
        let period_ms = nominal_step_seconds(frequency_hz) * 1000.0;
        let next = match self.now_ms {
            None => timestamp_ms,
            Some(now) => match tick_delta(self.last_ticks, ticks) {
                Some(d) if d > 0 && d < MAX_ADVANCE_TICKS => now + f64::from(d) / 1000.0,
                _ => now + period_ms,
            },
        };
        if ticks != 0 {
            self.last_ticks = ticks;
        }
        self.now_ms = Some(next);
        next
    }

    /// Forget all history; the next sample re-seeds from its host timestamp.
    pub fn reset(&mut self) {
        self.now_ms = None;
        self.last_ticks = 0;
    }
}
