//! Turns elapsed-time markers into progress-bar values and milestone logs.

/// Default minimum movement (in percentage points) before the bar is updated.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.5;
/// Default milestone spacing in percent.
pub const DEFAULT_MILESTONE_STEP: u32 = 10;

/// What a single elapsed-time marker produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressUpdate {
    /// New value for the progress bar, if it moved far enough.
    pub percent: Option<f64>,
    /// Decile (0, 10, ..., 100) newly reached, if any.
    pub milestone: Option<u32>,
}

/// Per-job progress state. Owned by the task that reads the diagnostic
/// stream and never shared.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    effective_duration: Option<f64>,
    threshold: f64,
    milestone_step: u32,
    last_reported: f64,
    last_logged_decile: Option<u32>,
}

impl ProgressTracker {
    pub fn new(effective_duration: Option<f64>, threshold: f64, milestone_step: u32) -> Self {
        Self {
            effective_duration: effective_duration.filter(|d| *d > 0.0),
            threshold: threshold.max(0.0),
            milestone_step: milestone_step.clamp(1, 100),
            last_reported: -1.0,
            last_logged_decile: None,
        }
    }

    pub fn with_defaults(effective_duration: Option<f64>) -> Self {
        Self::new(effective_duration, DEFAULT_CHANGE_THRESHOLD, DEFAULT_MILESTONE_STEP)
    }

    pub fn effective_duration(&self) -> Option<f64> {
        self.effective_duration
    }

    /// Last value handed to the progress bar, if any.
    pub fn last_reported(&self) -> Option<f64> {
        (self.last_reported >= 0.0).then_some(self.last_reported)
    }

    /// Percentage for an elapsed time, clamped to [0, 100].
    pub fn raw_percentage(&self, elapsed_seconds: f64) -> Option<f64> {
        let duration = self.effective_duration?;
        Some((elapsed_seconds / duration * 100.0).clamp(0.0, 100.0))
    }

    pub fn observe(&mut self, elapsed_seconds: f64) -> ProgressUpdate {
        let Some(raw) = self.raw_percentage(elapsed_seconds) else {
            return ProgressUpdate::default();
        };
        self.observe_percentage(raw)
    }

    /// Feed an already-computed percentage through both filters.
    pub fn observe_percentage(&mut self, raw: f64) -> ProgressUpdate {
        let raw = raw.clamp(0.0, 100.0);
        let mut update = ProgressUpdate::default();

        // Backwards movement never clears the threshold, so the bar only grows.
        if raw - self.last_reported > self.threshold {
            self.last_reported = raw;
            update.percent = Some(raw);
        }

        let decile = (raw as u32 / self.milestone_step) * self.milestone_step;
        if self.last_logged_decile.map_or(true, |last| decile > last) {
            self.last_logged_decile = Some(decile);
            update.milestone = Some(decile);
        }

        update
    }

    /// Completion after the tool has exited cleanly. The last stats line
    /// often lands a frame short of the end, so whatever is missing of the
    /// bar and of the final milestone is reported here.
    pub fn finish(&mut self) -> ProgressUpdate {
        let mut update = ProgressUpdate::default();
        if self.effective_duration.is_none() {
            return update;
        }
        if self.last_reported < 100.0 {
            self.last_reported = 100.0;
            update.percent = Some(100.0);
        }
        if self.last_logged_decile.map_or(true, |last| last < 100) {
            self.last_logged_decile = Some(100);
            update.milestone = Some(100);
        }
        update
    }
}
