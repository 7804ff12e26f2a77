//! Signature catalog for traffic sources and bots.
//!
//! The catalog is plain data: named signatures with their patterns and base
//! confidence. It can be loaded from a JSON file so new signatures can be
//! added without touching classifier logic; any table missing from the file
//! keeps its built-in default. [`PatternCatalog::compile`] turns the data into
//! case-insensitive regexes once at startup.

use crate::source::TrafficCategory;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// A named traffic-source signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSignature {
    /// Source name (e.g., "ChatGPT")
    pub name: String,

    /// Traffic category assigned on match
    pub category: TrafficCategory,

    /// Patterns matched against the referrer host
    #[serde(default)]
    pub referrer_patterns: Vec<String>,

    /// Patterns matched against the User-Agent
    #[serde(default)]
    pub ua_patterns: Vec<String>,

    /// Patterns matched against the decoded query string
    #[serde(default)]
    pub url_patterns: Vec<String>,

    /// Base confidence (0-100)
    pub confidence: u8,
}

/// A known bot definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSignature {
    /// Bot name (e.g., "Googlebot")
    pub name: String,

    /// Free-form category (search_engine, social_media, automation, ...)
    pub category: String,

    /// User-Agent patterns to match
    pub ua_patterns: Vec<String>,

    /// Whether this is a "good" bot
    #[serde(default)]
    pub is_good: bool,
}

/// A URL click-id parameter that identifies paid traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickIdParam {
    pub param: String,
    pub source: String,
}

/// All signature tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCatalog {
    pub ai_assistants: Vec<SourceSignature>,
    pub search_engines: Vec<SourceSignature>,
    pub social_networks: Vec<SourceSignature>,

    /// Referrer substrings of webmail and newsletter platforms
    pub email_platforms: Vec<String>,

    /// UTM mediums that denote paid traffic
    pub paid_mediums: Vec<String>,

    /// UTM source substrings that denote paid traffic
    pub paid_sources: Vec<String>,

    pub click_ids: Vec<ClickIdParam>,

    /// UTM source names resolved to each category
    pub utm_search_sources: Vec<String>,
    pub utm_social_sources: Vec<String>,
    pub utm_ai_sources: Vec<String>,

    pub known_bots: Vec<BotSignature>,

    /// User-Agent substrings typical of tooling and scripts
    pub suspicious_ua: Vec<String>,

    /// Automation tool names looked for in header values
    pub automation_tools: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn signature(
    name: &str,
    category: TrafficCategory,
    referrer: &[&str],
    ua: &[&str],
    url: &[&str],
    confidence: u8,
) -> SourceSignature {
    SourceSignature {
        name: name.to_string(),
        category,
        referrer_patterns: strings(referrer),
        ua_patterns: strings(ua),
        url_patterns: strings(url),
        confidence,
    }
}

fn bot(name: &str, category: &str, ua: &[&str], is_good: bool) -> BotSignature {
    BotSignature {
        name: name.to_string(),
        category: category.to_string(),
        ua_patterns: strings(ua),
        is_good,
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        use TrafficCategory::{AiAssistant, Organic, Social};

        Self {
            ai_assistants: vec![
                signature(
                    "ChatGPT",
                    AiAssistant,
                    &[r"(^|\.)chatgpt\.com$", r"^chat\.openai\.com$"],
                    &[r"chatgpt-user", r"oai-searchbot"],
                    &[r"(^|&)(ref|source)=chatgpt"],
                    95,
                ),
                signature(
                    "Perplexity",
                    AiAssistant,
                    &[r"(^|\.)perplexity\.ai$"],
                    &[r"perplexity-user", r"perplexitybot"],
                    &[r"(^|&)(ref|source)=perplexity"],
                    95,
                ),
                signature(
                    "Claude",
                    AiAssistant,
                    &[r"(^|\.)claude\.ai$"],
                    &[r"claude-user", r"claude-web"],
                    &[r"(^|&)(ref|source)=claude"],
                    95,
                ),
                signature(
                    "Gemini",
                    AiAssistant,
                    &[r"^gemini\.google\.com$", r"^bard\.google\.com$"],
                    &[],
                    &[r"(^|&)(ref|source)=gemini"],
                    92,
                ),
                signature(
                    "Microsoft Copilot",
                    AiAssistant,
                    &[r"^copilot\.microsoft\.com$", r"^copilot\.cloud\.microsoft$"],
                    &[],
                    &[r"(^|&)(ref|source)=copilot"],
                    90,
                ),
                signature("DeepSeek", AiAssistant, &[r"^chat\.deepseek\.com$"], &[], &[], 88),
                signature("You.com", AiAssistant, &[r"^you\.com$"], &[], &[], 85),
                signature("Phind", AiAssistant, &[r"(^|\.)phind\.com$"], &[], &[], 85),
            ],
            search_engines: vec![
                signature("Google", Organic, &[r"(^|\.)google\.[a-z.]+$"], &[r"googlebot"], &[], 98),
                signature("Bing", Organic, &[r"(^|\.)bing\.com$"], &[r"bingbot"], &[], 97),
                signature("Yahoo", Organic, &[r"(^|\.)yahoo\.[a-z.]+$"], &[r"slurp"], &[], 96),
                signature("DuckDuckGo", Organic, &[r"(^|\.)duckduckgo\.com$"], &[r"duckduckbot"], &[], 96),
                signature("Baidu", Organic, &[r"(^|\.)baidu\.com$"], &[r"baiduspider"], &[], 95),
                signature("Yandex", Organic, &[r"(^|\.)yandex\.[a-z.]+$"], &[r"yandexbot"], &[], 95),
                signature("Ecosia", Organic, &[r"(^|\.)ecosia\.org$"], &[], &[], 95),
            ],
            social_networks: vec![
                signature(
                    "Facebook",
                    Social,
                    &[r"(^|\.)facebook\.com$", r"^fb\.me$"],
                    &[r"facebookexternalhit", r"facebot"],
                    &[],
                    95,
                ),
                signature("Instagram", Social, &[r"(^|\.)instagram\.com$"], &[r"instagram"], &[], 95),
                signature(
                    "Twitter",
                    Social,
                    &[r"^t\.co$", r"(^|\.)twitter\.com$", r"^x\.com$"],
                    &[r"twitterbot"],
                    &[],
                    95,
                ),
                signature(
                    "LinkedIn",
                    Social,
                    &[r"(^|\.)linkedin\.com$", r"^lnkd\.in$"],
                    &[r"linkedinbot"],
                    &[],
                    95,
                ),
                signature("YouTube", Social, &[r"(^|\.)youtube\.com$", r"^youtu\.be$"], &[], &[], 95),
                signature("Reddit", Social, &[r"(^|\.)reddit\.com$"], &[], &[], 95),
                signature("Pinterest", Social, &[r"(^|\.)pinterest\.[a-z.]+$"], &[r"pinterest"], &[], 95),
                signature("TikTok", Social, &[r"(^|\.)tiktok\.com$"], &[], &[], 95),
                signature("WhatsApp", Social, &[r"(^|\.)whatsapp\.com$", r"^wa\.me$"], &[r"whatsapp"], &[], 95),
                signature("Quora", Social, &[r"(^|\.)quora\.com$"], &[], &[], 95),
            ],
            email_platforms: strings(&[
                "mail.google.com",
                "outlook.live.com",
                "outlook.office.com",
                "outlook.office365.com",
                "mail.yahoo.com",
                "mail.proton.me",
                "webmail",
                "mailchi.mp",
                "list-manage.com",
                "sendgrid.net",
            ]),
            paid_mediums: strings(&["cpc", "ppc", "paid", "cpm", "display", "paid_social", "paidsocial"]),
            paid_sources: strings(&[
                "adwords",
                "googleads",
                "google_ads",
                "facebook_ads",
                "fb_ads",
                "bing_ads",
                "linkedin_ads",
                "adroll",
                "taboola",
                "outbrain",
                "criteo",
            ]),
            click_ids: vec![
                ClickIdParam { param: "gclid".into(), source: "google_ads".into() },
                ClickIdParam { param: "wbraid".into(), source: "google_ads".into() },
                ClickIdParam { param: "gbraid".into(), source: "google_ads".into() },
                ClickIdParam { param: "dclid".into(), source: "google_display".into() },
                ClickIdParam { param: "msclkid".into(), source: "microsoft_ads".into() },
                ClickIdParam { param: "ttclid".into(), source: "tiktok_ads".into() },
                ClickIdParam { param: "li_fat_id".into(), source: "linkedin_ads".into() },
            ],
            utm_search_sources: strings(&[
                "google", "bing", "yahoo", "duckduckgo", "baidu", "yandex", "ecosia",
            ]),
            utm_social_sources: strings(&[
                "facebook", "fb", "instagram", "ig", "twitter", "x", "linkedin", "youtube",
                "pinterest", "tiktok", "reddit", "whatsapp", "quora",
            ]),
            utm_ai_sources: strings(&[
                "chatgpt", "chatgpt.com", "openai", "claude", "claude.ai", "anthropic",
                "perplexity", "gemini", "bard", "copilot", "deepseek", "you.com", "phind",
            ]),
            known_bots: vec![
                bot("Googlebot", "search_engine", &[r"googlebot", r"google-inspectiontool"], true),
                bot("Bingbot", "search_engine", &[r"bingbot", r"msnbot"], true),
                bot("Yahoo Slurp", "search_engine", &[r"slurp"], true),
                bot("DuckDuckBot", "search_engine", &[r"duckduckbot"], true),
                bot("Baiduspider", "search_engine", &[r"baiduspider"], true),
                bot("YandexBot", "search_engine", &[r"yandexbot"], true),
                bot("Applebot", "search_engine", &[r"applebot"], true),
                bot("Facebookbot", "social_media", &[r"facebookexternalhit", r"facebot"], true),
                bot("Twitterbot", "social_media", &[r"twitterbot"], true),
                bot("LinkedInBot", "social_media", &[r"linkedinbot"], true),
                bot("GPTBot", "ai_crawler", &[r"gptbot", r"chatgpt-user", r"oai-searchbot"], true),
                bot("PerplexityBot", "ai_crawler", &[r"perplexitybot", r"perplexity-user"], true),
                bot("ClaudeBot", "ai_crawler", &[r"claudebot", r"claude-web", r"claude-user"], true),
                bot("UptimeRobot", "monitoring", &[r"uptimerobot"], true),
                bot("Pingdom", "monitoring", &[r"pingdom"], true),
                bot("Selenium", "headless_browser", &[r"selenium", r"webdriver"], false),
                bot("HeadlessChrome", "headless_browser", &[r"headlesschrome"], false),
                bot("PhantomJS", "headless_browser", &[r"phantomjs"], false),
                bot("Puppeteer", "headless_browser", &[r"puppeteer"], false),
                bot("Playwright", "headless_browser", &[r"playwright"], false),
                bot("Scrapy", "scraper", &[r"scrapy"], false),
                bot("sqlmap", "security_scanner", &[r"sqlmap"], false),
                bot("Nikto", "security_scanner", &[r"nikto"], false),
                bot("masscan", "security_scanner", &[r"masscan"], false),
                bot("zgrab", "security_scanner", &[r"zgrab"], false),
                bot("Nuclei", "security_scanner", &[r"nuclei"], false),
                bot("AhrefsBot", "seo_tool", &[r"ahrefsbot"], false),
                bot("SemrushBot", "seo_tool", &[r"semrushbot"], false),
                bot("MJ12bot", "seo_tool", &[r"mj12bot"], false),
                bot("DotBot", "seo_tool", &[r"dotbot"], false),
            ],
            suspicious_ua: strings(&[
                "bot", "crawler", "spider", "scraper", "scrapy", "curl", "wget", "python",
                "java/", "go-http-client", "okhttp", "axios", "node-fetch", "libwww",
                "httpclient", "headless", "phantom", "selenium", "webdriver", "puppeteer",
                "playwright",
            ]),
            automation_tools: strings(&[
                "selenium", "webdriver", "puppeteer", "playwright", "phantomjs",
                "headlesschrome", "cypress", "nightmare",
            ]),
        }
    }
}

impl PatternCatalog {
    /// Load a catalog from a JSON file, falling back to the built-in tables
    /// when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Catalog file not found, using built-in signatures");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let catalog: PatternCatalog = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            ai_assistants = catalog.ai_assistants.len(),
            search_engines = catalog.search_engines.len(),
            social_networks = catalog.social_networks.len(),
            known_bots = catalog.known_bots.len(),
            "Loaded signature catalog"
        );
        Ok(catalog)
    }

    /// Compile every table into case-insensitive matchers.
    pub fn compile(&self) -> CompiledCatalog {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        let set = |items: &[String]| -> HashSet<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };

        CompiledCatalog {
            ai_assistants: self.ai_assistants.iter().map(compile_signature).collect(),
            search_engines: self.search_engines.iter().map(compile_signature).collect(),
            social_networks: self.social_networks.iter().map(compile_signature).collect(),
            email_platforms: lower(&self.email_platforms),
            paid_mediums: set(&self.paid_mediums),
            paid_sources: lower(&self.paid_sources),
            click_ids: self
                .click_ids
                .iter()
                .map(|c| (c.param.to_lowercase(), c.source.clone()))
                .collect(),
            utm_search_sources: set(&self.utm_search_sources),
            utm_social_sources: set(&self.utm_social_sources),
            utm_ai_sources: set(&self.utm_ai_sources),
            known_bots: self
                .known_bots
                .iter()
                .map(|b| CompiledBot {
                    name: b.name.clone(),
                    category: b.category.clone(),
                    ua_patterns: compile_patterns(&b.name, &b.ua_patterns),
                    is_good: b.is_good,
                })
                .collect(),
            suspicious_ua: lower(&self.suspicious_ua),
            automation_tools: lower(&self.automation_tools),
        }
    }
}

fn compile_patterns(owner: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(signature = owner, pattern = %p, error = %e, "Skipping invalid pattern");
                None
            }
        })
        .collect()
}

fn compile_signature(sig: &SourceSignature) -> CompiledSignature {
    CompiledSignature {
        name: sig.name.clone(),
        category: sig.category,
        referrer: compile_patterns(&sig.name, &sig.referrer_patterns),
        user_agent: compile_patterns(&sig.name, &sig.ua_patterns),
        url: compile_patterns(&sig.name, &sig.url_patterns),
        confidence: sig.confidence.min(100),
    }
}

/// Source signature with pre-compiled regexes.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub name: String,
    pub category: TrafficCategory,
    pub referrer: Vec<Regex>,
    pub user_agent: Vec<Regex>,
    pub url: Vec<Regex>,
    pub confidence: u8,
}

impl CompiledSignature {
    pub fn matches_referrer(&self, host: &str) -> bool {
        self.referrer.iter().any(|p| p.is_match(host))
    }

    pub fn matches_user_agent(&self, ua: &str) -> bool {
        self.user_agent.iter().any(|p| p.is_match(ua))
    }

    pub fn matches_url(&self, query: &str) -> bool {
        self.url.iter().any(|p| p.is_match(query))
    }
}

/// Bot signature with pre-compiled regexes.
#[derive(Debug, Clone)]
pub struct CompiledBot {
    pub name: String,
    pub category: String,
    pub ua_patterns: Vec<Regex>,
    pub is_good: bool,
}

/// Compiled, immutable form of [`PatternCatalog`].
#[derive(Debug, Clone)]
pub struct CompiledCatalog {
    pub ai_assistants: Vec<CompiledSignature>,
    pub search_engines: Vec<CompiledSignature>,
    pub social_networks: Vec<CompiledSignature>,
    pub email_platforms: Vec<String>,
    pub paid_mediums: HashSet<String>,
    pub paid_sources: Vec<String>,
    pub click_ids: Vec<(String, String)>,
    pub utm_search_sources: HashSet<String>,
    pub utm_social_sources: HashSet<String>,
    pub utm_ai_sources: HashSet<String>,
    pub known_bots: Vec<CompiledBot>,
    pub suspicious_ua: Vec<String>,
    pub automation_tools: Vec<String>,
}

impl CompiledCatalog {
    /// First known bot whose pattern matches the User-Agent.
    pub fn match_known_bot(&self, ua: &str) -> Option<&CompiledBot> {
        if ua.is_empty() {
            return None;
        }
        self.known_bots
            .iter()
            .find(|b| b.ua_patterns.iter().any(|p| p.is_match(ua)))
    }

    /// Suspicious substrings contained in a lower-cased User-Agent.
    pub fn suspicious_markers<'a>(&'a self, ua_lower: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.suspicious_ua
            .iter()
            .filter(move |s| ua_lower.contains(s.as_str()))
            .map(|s| s.as_str())
    }

    /// Whether a referrer host belongs to a webmail or newsletter platform.
    pub fn is_email_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.email_platforms.iter().any(|p| host.contains(p.as_str()))
    }

    pub fn is_paid_source(&self, source: &str) -> bool {
        let source = source.to_lowercase();
        self.paid_sources.iter().any(|p| source.contains(p.as_str()))
    }
}

impl Default for CompiledCatalog {
    fn default() -> Self {
        PatternCatalog::default().compile()
    }
}
