//! Catalog-driven pattern detectors.
//!
//! - AI assistants: weighted by how many available signal classes matched
//! - Search engines and social networks: any referrer or User-Agent match

use super::{DetectionMethod, SourceDetector, SourceMatch};
use crate::catalog::{CompiledCatalog, CompiledSignature};
use crate::signals::RequestSignals;

/// Default minimum confidence for an AI-assistant match.
pub const DEFAULT_AI_MIN_CONFIDENCE: u8 = 70;

/// Detects traffic referred by AI assistants.
#[derive(Debug, Clone)]
pub struct AiAssistantDetector {
    min_confidence: u8,
}

impl AiAssistantDetector {
    pub fn new(min_confidence: u8) -> Self {
        Self { min_confidence }
    }

    /// Score one signature against the request.
    ///
    /// A signal class is checked only when the request carries that signal
    /// and the signature defines patterns for it. A stock browser User-Agent
    /// says nothing about the referring assistant and is not checked.
    /// Returns `(matches, checks)`.
    pub fn match_ratio(sig: &CompiledSignature, signals: &RequestSignals) -> (u32, u32) {
        let mut checks = 0;
        let mut matches = 0;

        if let Some(host) = signals.referrer_host.as_deref() {
            if !sig.referrer.is_empty() {
                checks += 1;
                if sig.matches_referrer(host) {
                    matches += 1;
                }
            }
        }

        if !signals.user_agent.is_empty() && !signals.ua_is_generic_browser && !sig.user_agent.is_empty() {
            checks += 1;
            if sig.matches_user_agent(&signals.user_agent) {
                matches += 1;
            }
        }

        if !signals.query.is_empty() && !sig.url.is_empty() {
            checks += 1;
            if sig.matches_url(&signals.query_string()) {
                matches += 1;
            }
        }

        (matches, checks)
    }

    /// Confidence of one signature: base confidence scaled by the match ratio.
    pub fn signature_confidence(sig: &CompiledSignature, signals: &RequestSignals) -> u8 {
        let (matches, checks) = Self::match_ratio(sig, signals);
        if checks == 0 || matches == 0 {
            return 0;
        }
        let ratio = matches as f64 / checks as f64;
        (sig.confidence as f64 * ratio).round().min(100.0) as u8
    }
}

impl Default for AiAssistantDetector {
    fn default() -> Self {
        Self::new(DEFAULT_AI_MIN_CONFIDENCE)
    }
}

impl SourceDetector for AiAssistantDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        let mut best: Option<(&CompiledSignature, u8)> = None;

        for sig in &catalog.ai_assistants {
            let confidence = Self::signature_confidence(sig, signals);
            if confidence < self.min_confidence {
                continue;
            }
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some((sig, confidence));
            }
        }

        best.map(|(sig, confidence)| {
            SourceMatch::new(sig.category, sig.name.clone(), confidence, DetectionMethod::AiPattern)
        })
    }

    fn name(&self) -> &'static str {
        "ai_assistant"
    }
}

/// First signature matching the referrer or User-Agent. Webmail hosts
/// (`mail.google.com`, `mail.yahoo.com`) share domains with search and social
/// signatures and are left to the email step.
fn first_signature_match(
    signatures: &[CompiledSignature],
    signals: &RequestSignals,
    catalog: &CompiledCatalog,
    method: DetectionMethod,
) -> Option<SourceMatch> {
    let referrer_host = signals
        .referrer_host
        .as_deref()
        .filter(|host| !catalog.is_email_host(host));

    signatures
        .iter()
        .find(|sig| {
            let referrer_hit = referrer_host.is_some_and(|host| sig.matches_referrer(host));
            let ua_hit = !signals.user_agent.is_empty() && sig.matches_user_agent(&signals.user_agent);
            referrer_hit || ua_hit
        })
        .map(|sig| SourceMatch::new(sig.category, sig.name.clone(), sig.confidence, method))
}

/// Detects organic search traffic.
#[derive(Debug, Clone, Default)]
pub struct SearchEngineDetector;

impl SourceDetector for SearchEngineDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        first_signature_match(&catalog.search_engines, signals, catalog, DetectionMethod::SearchEngine)
    }

    fn name(&self) -> &'static str {
        "search_engine"
    }
}

/// Detects social network traffic.
#[derive(Debug, Clone, Default)]
pub struct SocialMediaDetector;

impl SourceDetector for SocialMediaDetector {
    fn detect(&self, signals: &RequestSignals, catalog: &CompiledCatalog) -> Option<SourceMatch> {
        first_signature_match(&catalog.social_networks, signals, catalog, DetectionMethod::SocialMedia)
    }

    fn name(&self) -> &'static str {
        "social_media"
    }
}
