//! Behavioral detector.
//!
//! Looks at how the origin has been requesting pages:
//! - Machine-like request cadence over the last 10 intervals
//! - Long dwell time without any scrolling

use super::{mean_variance, recent_intervals_ms, DetectionContext, Detector, DetectorResult};

pub const AUTOMATED_TIMING_POINTS: u32 = 60;
pub const LONG_DWELL_POINTS: u32 = 40;

/// Variance (ms^2) below which the cadence is machine-like.
const MAX_HUMAN_VARIANCE_MS2: f64 = 1000.0;
/// Mean interval (ms) below which the cadence is machine-like.
const MAX_AUTOMATED_MEAN_MS: f64 = 5000.0;

/// Behavioral detector.
#[derive(Debug, Clone)]
pub struct BehavioralDetector {
    long_dwell_ms: u64,
    min_history: usize,
}

impl BehavioralDetector {
    pub fn new(long_dwell_ms: u64, min_history: usize) -> Self {
        Self {
            long_dwell_ms,
            min_history: min_history.max(2),
        }
    }
}

impl Default for BehavioralDetector {
    fn default() -> Self {
        Self::new(30_000, 5)
    }
}

impl Detector for BehavioralDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let mut result = DetectorResult::new(0);

        if ctx.history.len() >= self.min_history {
            let intervals = recent_intervals_ms(ctx.history);
            if let Some((mean, variance)) = mean_variance(&intervals) {
                if variance < MAX_HUMAN_VARIANCE_MS2 && mean < MAX_AUTOMATED_MEAN_MS {
                    result.add(AUTOMATED_TIMING_POINTS, "automated_timing");
                }
                result = result
                    .with_metadata("cadence_mean_ms", format!("{:.1}", mean))
                    .with_metadata("cadence_variance_ms2", format!("{:.1}", variance));
            }
        }

        if let (Some(dwell), Some(scroll)) = (ctx.signals.dwell_time_ms, ctx.signals.scroll_depth) {
            if dwell > self.long_dwell_ms && scroll <= 0.0 {
                result.add(LONG_DWELL_POINTS, "long_dwell_no_scroll");
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        "behavioral"
    }
}
