//! Timing consistency detector.
//!
//! Humans browse with irregular gaps. A standard deviation under 10% of the
//! mean over the last 10 intervals is clock-driven.

use super::{mean_variance, recent_intervals_ms, DetectionContext, Detector, DetectorResult};

pub const CONSISTENT_TIMING_POINTS: u32 = 45;

/// Coefficient of variation below which timing is considered scripted.
const MAX_SCRIPTED_CV: f64 = 0.10;

/// Timing consistency detector.
#[derive(Debug, Clone)]
pub struct TimingDetector {
    min_history: usize,
}

impl TimingDetector {
    pub fn new(min_history: usize) -> Self {
        Self {
            min_history: min_history.max(3),
        }
    }

    /// Coefficient of variation of the intervals. `None` without data or
    /// when the mean interval is not positive.
    pub fn coefficient_of_variation(intervals: &[f64]) -> Option<f64> {
        let (mean, variance) = mean_variance(intervals)?;
        if mean <= 0.0 {
            return None;
        }
        Some(variance.sqrt() / mean)
    }
}

impl Default for TimingDetector {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Detector for TimingDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let mut result = DetectorResult::new(0);
        if ctx.history.len() < self.min_history {
            return result;
        }

        let intervals = recent_intervals_ms(ctx.history);
        if let Some(cv) = Self::coefficient_of_variation(&intervals) {
            if cv < MAX_SCRIPTED_CV {
                result.add(CONSISTENT_TIMING_POINTS, "consistent_timing");
            }
            result = result.with_metadata("timing_cv", format!("{:.3}", cv));
        }

        result
    }

    fn name(&self) -> &'static str {
        "timing"
    }
}
