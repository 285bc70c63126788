//! Zero-offset taring and known-weight scale calibration.
//!
//! Both are the same operation: average raw counts over a fixed window of
//! logical time, then derive a constant from the mean. The window opens at
//! the first sample seen after `start`, not at the call itself, so a long gap
//! before the first sample does not shorten it.

/// Running mean over a fixed span of logical time.
#[derive(Debug, Clone)]
pub struct AveragingWindow {
    duration_ms: f64,
    started_at: Option<f64>,
    sum: f64,
    count: u64,
}

impl AveragingWindow {
    pub fn new(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            started_at: None,
            sum: 0.0,
            count: 0,
        }
    }

    /// Add a value observed at `now`; returns the mean once the window has elapsed.
    ///
    /// Never divides by zero: with no samples the window stays open.
    pub fn push(&mut self, value: f64, now: f64) -> Option<f64> {
        let start = *self.started_at.get_or_insert(now);
        self.sum += value;
        self.count += 1;
        if now - start >= self.duration_ms {
            self.mean()
        } else {
            None
        }
    }

    /// Mean of the values so far, if any.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Establishes the zero offset by averaging the unloaded plate.
#[derive(Debug, Clone)]
pub struct TareController {
    window: AveragingWindow,
    active: bool,
}

impl TareController {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window: AveragingWindow::new(window_ms),
            active: false,
        }
    }

    /// Begin (or restart) taring.
    pub fn start(&mut self) {
        self.window.reset();
        self.active = true;
    }

    /// Abandon taring without producing an offset.
    pub fn cancel(&mut self) {
        self.window.reset();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed a raw sample. Returns the new zero offset when the window completes.
    pub fn accumulate(&mut self, raw: f64, now: f64) -> Option<f64> {
        if !self.active {
            return None;
        }
        let offset = self.window.push(raw, now)?;
        self.active = false;
        self.window.reset();
        Some(offset)
    }
}

/// Derives `raw_per_kg` from a reference mass resting on the plate.
#[derive(Debug, Clone)]
pub struct ScaleCalibrator {
    window: AveragingWindow,
    known_kg: Option<f64>,
}

/// Outcome of a completed calibration window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    /// New scale factor (raw counts per kg).
    Scale(f64),
    /// The reading did not yield a usable factor (e.g. empty plate).
    Rejected { mean_counts: f64 },
}

impl ScaleCalibrator {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window: AveragingWindow::new(window_ms),
            known_kg: None,
        }
    }

    /// Begin calibrating against `known_kg`.
    pub fn start(&mut self, known_kg: f64) {
        self.window.reset();
        self.known_kg = Some(known_kg);
    }

    pub fn cancel(&mut self) {
        self.window.reset();
        self.known_kg = None;
    }

    pub fn is_active(&self) -> bool {
        self.known_kg.is_some()
    }

    /// Feed a zero-adjusted raw sample; returns the outcome when the window completes.
    pub fn accumulate(&mut self, counts: f64, now: f64) -> Option<Calibration> {
        let known_kg = self.known_kg?;
        let mean_counts = self.window.push(counts, now)?;
        self.cancel();
        let scale = mean_counts / known_kg;
        if known_kg > 0.0 && scale.is_finite() && scale > 0.0 {
            Some(Calibration::Scale(scale))
        } else {
            Some(Calibration::Rejected { mean_counts })
        }
    }
}
