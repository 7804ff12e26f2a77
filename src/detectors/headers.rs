//! Header analysis detector.
//!
//! Analyzes request headers for bot indicators:
//! - Missing Accept-Language
//! - Generic `*/*` Accept
//! - Automation tool names in header values
//!
//! Requests captured without any headers are not scored here.

use super::{DetectionContext, Detector, DetectorResult};

pub const MISSING_ACCEPT_LANGUAGE_POINTS: u32 = 20;
pub const GENERIC_ACCEPT_POINTS: u32 = 15;
pub const AUTOMATION_HEADER_POINTS: u32 = 50;

/// Header analyzer detector.
#[derive(Debug, Clone, Default)]
pub struct HeaderDetector;

impl HeaderDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for HeaderDetector {
    fn analyze(&self, ctx: &DetectionContext<'_>) -> DetectorResult {
        let mut result = DetectorResult::new(0);
        let signals = ctx.signals;
        if signals.headers.is_empty() {
            return result;
        }

        match signals.header("accept-language") {
            Some(lang) if !lang.trim().is_empty() => {}
            _ => result.add(MISSING_ACCEPT_LANGUAGE_POINTS, "missing_accept_language"),
        }

        if signals.header("accept").map(str::trim) == Some("*/*") {
            result.add(GENERIC_ACCEPT_POINTS, "generic_accept_header");
        }

        // One hit is enough, however many headers carry the marker
        let automation = signals.headers.iter().find_map(|(name, value)| {
            let value = value.to_lowercase();
            ctx.catalog
                .automation_tools
                .iter()
                .find(|tool| value.contains(tool.as_str()))
                .map(|tool| (name.as_str(), tool.as_str()))
        });
        if let Some((header, tool)) = automation {
            result.add(AUTOMATION_HEADER_POINTS, format!("automation_header_{}", tool));
            result = result.with_metadata("automation_header", header.to_string());
        }

        result
    }

    fn name(&self) -> &'static str {
        "headers"
    }
}
