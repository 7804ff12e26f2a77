//! Bot score calculation and types.

use crate::detectors::{DetectorResult, META_KNOWN_BOT, META_KNOWN_BOT_GOOD};
use serde::{Deserialize, Serialize};

/// Bot classification of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotClassification {
    /// Likely a human visitor
    #[default]
    Human,
    /// Known well-behaved crawler (search, social preview, monitoring)
    GoodBot,
    /// Automated traffic with a high score
    BadBot,
    /// Over the bot threshold but not conclusive
    Suspicious,
}

impl BotClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotClassification::Human => "human",
            BotClassification::GoodBot => "good_bot",
            BotClassification::BadBot => "bad_bot",
            BotClassification::Suspicious => "suspicious",
        }
    }
}

/// Points contributed by each detector family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotDetectionDetails {
    pub user_agent: u32,
    pub behavioral: u32,
    pub network: u32,
    pub timing: u32,
    pub frequency: u32,
    pub headers: u32,
}

impl BotDetectionDetails {
    pub fn total(&self) -> u32 {
        self.user_agent
            .saturating_add(self.behavioral)
            .saturating_add(self.network)
            .saturating_add(self.timing)
            .saturating_add(self.frequency)
            .saturating_add(self.headers)
    }
}

/// Individual signal contributions collected from the detectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub details: BotDetectionDetails,
    /// Detector names that triggered, in evaluation order
    pub detection_methods: Vec<String>,
    /// Reasons from each detector
    pub flags: Vec<String>,
    /// Known bot name if the User-Agent matched one
    pub matched_bot: Option<String>,
    pub matched_bot_good: bool,
}

impl SignalBreakdown {
    /// Fold one detector's result into the breakdown.
    pub fn record(&mut self, detector: &str, result: &DetectorResult) {
        let slot = match detector {
            "user_agent" => &mut self.details.user_agent,
            "behavioral" => &mut self.details.behavioral,
            "network" => &mut self.details.network,
            "timing" => &mut self.details.timing,
            "frequency" => &mut self.details.frequency,
            "headers" => &mut self.details.headers,
            _ => return,
        };
        *slot = slot.saturating_add(result.score);

        if result.triggered() && !self.detection_methods.iter().any(|m| m == detector) {
            self.detection_methods.push(detector.to_string());
        }
        self.flags.extend(result.reasons.iter().cloned());

        if let Some(name) = result.metadata.get(META_KNOWN_BOT) {
            self.matched_bot = Some(name.clone());
            self.matched_bot_good = result
                .metadata
                .get(META_KNOWN_BOT_GOOD)
                .is_some_and(|v| v == "true");
        }
    }
}

/// Bot detection result for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotDetectionResult {
    pub is_bot: bool,
    /// 0 = human, 100 = certainly automated
    pub bot_score: u8,
    pub confidence: u8,
    pub detection_methods: Vec<String>,
    pub flags: Vec<String>,
    pub classification: BotClassification,
    pub details: BotDetectionDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_bot: Option<String>,
}

impl BotDetectionResult {
    /// Result for a request that triggered nothing.
    pub fn human() -> Self {
        ScoreCalculator::default().calculate(&SignalBreakdown::default())
    }
}

/// Turns a breakdown into a final score and classification.
#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    pub bot_threshold: u8,
    pub bad_bot_threshold: u8,
    pub good_bot_cap: u8,
}

impl ScoreCalculator {
    pub fn new(bot_threshold: u8, bad_bot_threshold: u8, good_bot_cap: u8) -> Self {
        Self {
            bot_threshold,
            bad_bot_threshold,
            good_bot_cap,
        }
    }

    /// Calculate the final bot score.
    ///
    /// The sum is clamped to 100 before classifying; the good-bot cap is
    /// applied after, so a capped good bot keeps `is_bot`.
    pub fn calculate(&self, signals: &SignalBreakdown) -> BotDetectionResult {
        let mut score = signals.details.total().min(100) as u8;
        let is_bot = score > self.bot_threshold;

        let classification = if !is_bot {
            BotClassification::Human
        } else if signals.matched_bot_good {
            score = score.min(self.good_bot_cap);
            BotClassification::GoodBot
        } else if score > self.bad_bot_threshold {
            BotClassification::BadBot
        } else {
            BotClassification::Suspicious
        };

        let methods = signals.detection_methods.len().min(10) as u8;
        let confidence = (50 + 10 * methods).min(95);

        BotDetectionResult {
            is_bot,
            bot_score: score,
            confidence,
            detection_methods: signals.detection_methods.clone(),
            flags: signals.flags.clone(),
            classification,
            details: signals.details.clone(),
            matched_bot: signals.matched_bot.clone(),
        }
    }
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new(50, 80, 70)
    }
}
