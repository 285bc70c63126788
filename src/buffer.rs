//! Fixed-capacity circular sample store.
//!
//! Holds the last `capacity` processed samples (about 8 s at 1.2 kHz with
//! the default size) for retroactive integration and curve replay. Slots are
//! preallocated; `append` never allocates once constructed.

/// Default number of retained samples.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// One processed sample, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Logical time (ms).
    pub time_ms: f64,
    /// Zero-adjusted load (kg).
    pub weight_kg: f64,
    /// Device clock stamp (µs ticks, 0 = unavailable).
    pub device_clock: u32,
}

/// Circular buffer of [`Sample`]s with a write index and a wrapped flag.
///
/// Chronological order is `slots[write_index..] ++ slots[..write_index]`
/// once the buffer has wrapped, `slots[..write_index]` before that.
#[derive(Debug, Clone)]
pub struct SampleRingBuffer {
    slots: Vec<Sample>,
    write_index: usize,
    full: bool,
}

impl SampleRingBuffer {
    /// Create a buffer holding `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Sample::default(); capacity.max(1)],
            write_index: 0,
            full: false,
        }
    }

    /// Store a sample, overwriting the oldest one when full.
    pub fn append(&mut self, time_ms: f64, weight_kg: f64, device_clock: u32) {
        self.slots[self.write_index] = Sample {
            time_ms,
            weight_kg,
            device_clock,
        };
        self.write_index = (self.write_index + 1) % self.slots.len();
        if self.write_index == 0 {
            self.full = true;
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        if self.full {
            self.slots.len()
        } else {
            self.write_index
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the buffer has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Slot the next `append` will overwrite.
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// The stored samples as (older, newer) contiguous segments.
    pub fn as_slices(&self) -> (&[Sample], &[Sample]) {
        if self.full {
            (&self.slots[self.write_index..], &self.slots[..self.write_index])
        } else {
            (&self.slots[..self.write_index], &[])
        }
    }

    /// Samples oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> + '_ {
        let (older, newer) = self.as_slices();
        older.iter().chain(newer.iter())
    }

    /// Owned chronological copy of the buffer.
    pub fn chronological_view(&self) -> Vec<Sample> {
        self.iter().copied().collect()
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.nth_latest(0)
    }

    /// The `n`-th most recent sample (0 = newest).
    pub fn nth_latest(&self, n: usize) -> Option<&Sample> {
        if n >= self.len() {
            return None;
        }
        let cap = self.slots.len();
        let idx = (self.write_index + cap - 1 - n) % cap;
        Some(&self.slots[idx])
    }

    /// Samples with `time_ms >= start_ms`, oldest to newest.
    ///
    /// Times are monotonic within the buffer except across an engine reset,
    /// so this filters rather than binary-searching.
    pub fn since(&self, start_ms: f64) -> impl Iterator<Item = &Sample> + '_ {
        self.iter().filter(move |s| s.time_ms >= start_ms)
    }

    /// The last `n` samples (or fewer), oldest to newest.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &Sample> + '_ {
        self.iter().skip(self.len().saturating_sub(n))
    }

    /// Suffix of the chronological view with `time_ms >= end_ms - duration_ms`.
    pub fn window_since(&self, end_ms: f64, duration_ms: f64) -> Vec<Sample> {
        self.since(end_ms - duration_ms).copied().collect()
    }

    /// Drop all samples (capacity is kept).
    pub fn clear(&mut self) {
        self.slots.fill(Sample::default());
        self.write_index = 0;
        self.full = false;
    }
}

impl Default for SampleRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
