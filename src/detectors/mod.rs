//! Bot detection modules.
//!
//! Each detector checks one family of signals and returns the fixed points
//! of every rule it triggered. Points are summed by the score calculator.

pub mod behavioral;
pub mod frequency;
pub mod headers;
pub mod network;
pub mod timing;
pub mod user_agent;

pub use behavioral::BehavioralDetector;
pub use frequency::FrequencyDetector;
pub use headers::HeaderDetector;
pub use network::NetworkDetector;
pub use timing::TimingDetector;
pub use user_agent::UserAgentDetector;

use crate::catalog::CompiledCatalog;
use crate::history::RequestRecord;
use crate::signals::RequestSignals;
use std::collections::HashMap;

/// Metadata key carrying the name of a matched known bot.
pub const META_KNOWN_BOT: &str = "known_bot";
/// Metadata key set to "true" when the matched bot is a good bot.
pub const META_KNOWN_BOT_GOOD: &str = "known_bot_good";

/// Inputs available to every detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub signals: &'a RequestSignals,
    /// Origin history, oldest first, including the current request
    pub history: &'a [RequestRecord],
    pub catalog: &'a CompiledCatalog,
}

/// Result from a detector.
#[derive(Debug, Clone, Default)]
pub struct DetectorResult {
    /// Points contributed (not clamped)
    pub score: u32,
    /// Reasons for the score
    pub reasons: Vec<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl DetectorResult {
    /// Create a new detector result.
    pub fn new(score: u32) -> Self {
        Self {
            score,
            reasons: vec![],
            metadata: HashMap::new(),
        }
    }

    /// Add points with a reason.
    pub fn add(&mut self, points: u32, reason: impl Into<String>) {
        self.score = self.score.saturating_add(points);
        self.reasons.push(reason.into());
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn triggered(&self) -> bool {
        self.score > 0
    }
}

/// Trait for bot detectors.
pub trait Detector: Send + Sync {
    /// Analyze the request and return a detection result.
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult;

    /// Get the detector name.
    fn name(&self) -> &'static str;
}

/// Trailing intervals inspected by the cadence and timing rules.
pub(crate) const CADENCE_INTERVALS: usize = 10;

/// Millisecond intervals between the last [`CADENCE_INTERVALS`] + 1 records.
pub(crate) fn recent_intervals_ms(records: &[RequestRecord]) -> Vec<f64> {
    let start = records.len().saturating_sub(CADENCE_INTERVALS + 1);
    intervals_ms(&records[start..])
}

/// Millisecond intervals between consecutive records.
pub(crate) fn intervals_ms(records: &[RequestRecord]) -> Vec<f64> {
    records
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64)
        .collect()
}

/// Mean and population variance.
pub(crate) fn mean_variance(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance))
}
