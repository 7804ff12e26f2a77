//! User-Agent detector.
//!
//! Checks the User-Agent string for bot indicators:
//! - Known bot signatures (good and bad)
//! - Tooling and script substrings (curl, wget, python, ...)
//! - Empty User-Agent

use super::{DetectionContext, Detector, DetectorResult, META_KNOWN_BOT, META_KNOWN_BOT_GOOD};

pub const KNOWN_BOT_POINTS: u32 = 80;
pub const SUSPICIOUS_UA_POINTS: u32 = 30;

/// User-Agent detector.
#[derive(Debug, Clone, Default)]
pub struct UserAgentDetector;

impl UserAgentDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for UserAgentDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let ua = ctx.signals.user_agent.as_str();
        let mut result = DetectorResult::new(0);

        if ua.is_empty() {
            result.add(SUSPICIOUS_UA_POINTS, "empty_user_agent");
            return result;
        }

        if let Some(bot) = ctx.catalog.match_known_bot(ua) {
            result.add(
                KNOWN_BOT_POINTS,
                format!("known_bot_{}", bot.name.to_lowercase().replace(' ', "_")),
            );
            result = result
                .with_metadata(META_KNOWN_BOT, bot.name.clone())
                .with_metadata(META_KNOWN_BOT_GOOD, bot.is_good.to_string())
                .with_metadata("bot_category", bot.category.clone());
        }

        let markers: Vec<&str> = ctx.catalog.suspicious_markers(&ctx.signals.user_agent_lower).collect();
        if let Some(first) = markers.first() {
            result.add(
                SUSPICIOUS_UA_POINTS,
                format!("suspicious_ua_{}", first.replace(['-', '/'], "_")),
            );
            result = result.with_metadata("ua_markers", markers.join(","));
        }

        result
    }

    fn name(&self) -> &'static str {
        "user_agent"
    }
}
