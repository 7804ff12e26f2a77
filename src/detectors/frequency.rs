//! Request frequency detector.
//!
//! - More than the allowed requests within the last minute
//! - Systematic traversal: a full window of recent requests with no
//!   repeated path, the way crawlers walk a site

use super::{DetectionContext, Detector, DetectorResult};
use chrono::Duration;
use std::collections::HashSet;

pub const HIGH_FREQUENCY_POINTS: u32 = 40;
pub const SYSTEMATIC_TRAVERSAL_POINTS: u32 = 30;

/// Request frequency detector.
#[derive(Debug, Clone)]
pub struct FrequencyDetector {
    rpm_threshold: u32,
    traversal_window: usize,
}

impl FrequencyDetector {
    pub fn new(rpm_threshold: u32, traversal_window: usize) -> Self {
        Self {
            rpm_threshold,
            traversal_window: traversal_window.max(2),
        }
    }
}

impl Default for FrequencyDetector {
    fn default() -> Self {
        Self::new(30, 20)
    }
}

impl Detector for FrequencyDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let mut result = DetectorResult::new(0);
        let now = ctx.signals.timestamp;
        let window_start = now - Duration::minutes(1);

        let last_minute = ctx
            .history
            .iter()
            .filter(|r| r.timestamp > window_start && r.timestamp <= now)
            .count();
        if last_minute > self.rpm_threshold as usize {
            result.add(HIGH_FREQUENCY_POINTS, "high_request_frequency");
        }
        result = result.with_metadata("requests_last_minute", last_minute.to_string());

        if ctx.history.len() >= self.traversal_window {
            let window = &ctx.history[ctx.history.len() - self.traversal_window..];
            let distinct: HashSet<&str> = window
                .iter()
                .map(|r| r.path.split('?').next().unwrap_or(&r.path))
                .collect();
            if distinct.len() == window.len() {
                result.add(SYSTEMATIC_TRAVERSAL_POINTS, "systematic_traversal");
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        "frequency"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CompiledCatalog;
    use crate::history::RequestRecord;
    use crate::signals::{RawRequest, SignalExtractor};
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    fn analyze(history: &[RequestRecord], now: DateTime<Utc>) -> DetectorResult {
        let signals = SignalExtractor::new().extract(&RawRequest::new("127.0.0.1", "/", now));
        let catalog = CompiledCatalog::default();
        let ctx = DetectionContext { signals: &signals, history, catalog: &catalog };
        FrequencyDetector::default().analyze(&ctx)
    }

    #[test]
    fn test_high_frequency() {
        // 40 requests on the same path, 1s apart
        let history: Vec<_> = (0..40)
            .map(|i| RequestRecord::new(t0() + Duration::seconds(i), "/"))
            .collect();
        let result = analyze(&history, t0() + Duration::seconds(39));
        assert_eq!(result.score, 40);
        assert_eq!(result.reasons, vec!["high_request_frequency"]);
    }

    #[test]
    fn test_systematic_traversal() {
        let history: Vec<_> = (0..20)
            .map(|i| RequestRecord::new(t0() + Duration::seconds(i * 10), format!("/page/{}", i)))
            .collect();
        let result = analyze(&history, t0() + Duration::seconds(190));
        assert_eq!(result.score, 30);
    }

    #[test]
    fn test_repeated_paths_not_systematic() {
        let history: Vec<_> = (0..20)
            .map(|i| RequestRecord::new(t0() + Duration::seconds(i * 10), format!("/page/{}", i % 5)))
            .collect();
        let result = analyze(&history, t0() + Duration::seconds(190));
        assert_eq!(result.score, 0);
    }
}
