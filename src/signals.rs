//! Request signal extraction.
//!
//! Normalizes a raw request record into the signals consumed by source
//! classification and bot scoring:
//! - Referrer host (internal referrers are ignored)
//! - Query parameters and UTM fields
//! - User-Agent tokens and a browser / OS / device guess
//! - Lower-cased header map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw inbound request as handed over by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequest {
    /// Origin key for behavioral history (usually the client IP)
    pub origin: String,
    /// Referer header value
    #[serde(default)]
    pub referrer: Option<String>,
    /// User-Agent header value
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Full request URL (absolute or path-only)
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// When the request was received
    pub timestamp: DateTime<Utc>,
    /// Time spent on the previous page, when reported by the client
    #[serde(default)]
    pub dwell_time_ms: Option<u64>,
    /// Scroll depth reached on the previous page (0-100)
    #[serde(default)]
    pub scroll_depth: Option<f64>,
}

impl RawRequest {
    /// Create a minimal request for the given URL.
    pub fn new(origin: impl Into<String>, url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            origin: origin.into(),
            referrer: None,
            user_agent: None,
            url: url.into(),
            headers: HashMap::new(),
            timestamp,
            dwell_time_ms: None,
            scroll_depth: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// UTM campaign parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtmParameters {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl UtmParameters {
    /// Returns true if no UTM field is set.
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }

    /// Iterate over the set fields as `(name, value)`.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("utm_source", self.source.as_deref()),
            ("utm_medium", self.medium.as_deref()),
            ("utm_campaign", self.campaign.as_deref()),
            ("utm_term", self.term.as_deref()),
            ("utm_content", self.content.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }

    /// Fill unset fields from another parameter set.
    pub fn merged_with(mut self, other: &UtmParameters) -> Self {
        if self.source.is_none() {
            self.source = other.source.clone();
        }
        if self.medium.is_none() {
            self.medium = other.medium.clone();
        }
        if self.campaign.is_none() {
            self.campaign = other.campaign.clone();
        }
        if self.term.is_none() {
            self.term = other.term.clone();
        }
        if self.content.is_none() {
            self.content = other.content.clone();
        }
        self
    }
}

/// Normalized signals for one request.
#[derive(Debug, Clone)]
pub struct RequestSignals {
    pub origin: String,
    /// Trimmed referrer, `None` when absent or internal
    pub referrer: Option<String>,
    /// Referrer host without `www.`, `None` when absent or internal
    pub referrer_host: Option<String>,
    /// Referrer pointed at the same host as the request URL
    pub internal_referrer: bool,
    pub user_agent: String,
    pub user_agent_lower: String,
    /// Plain browser UA with no agent or crawler marker
    pub ua_is_generic_browser: bool,
    pub url: String,
    pub host: Option<String>,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub utm: UtmParameters,
    /// Headers keyed by lower-cased name
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub dwell_time_ms: Option<u64>,
    pub scroll_depth: Option<f64>,
    pub browser: String,
    pub os: String,
    pub device_type: String,
}

impl RequestSignals {
    /// Get a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Get a query parameter by name (case-insensitive).
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query string re-joined as `k=v&k=v`, decoded.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Turns raw requests into [`RequestSignals`].
#[derive(Debug, Clone, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract normalized signals from a raw request.
    pub fn extract(&self, raw: &RawRequest) -> RequestSignals {
        let url = raw.url.trim().to_string();
        let host = host_of(&url);
        let query = parse_query(&url);
        let utm = utm_from_query(&query);

        let referrer = raw
            .referrer
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let referrer_host = referrer.as_deref().and_then(host_of);
        let internal_referrer = match (&referrer_host, &host) {
            (Some(r), Some(h)) => r == h,
            _ => false,
        };

        let user_agent = raw.user_agent.as_deref().unwrap_or("").trim().to_string();
        let user_agent_lower = user_agent.to_lowercase();

        let headers = raw
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        RequestSignals {
            origin: raw.origin.clone(),
            referrer: if internal_referrer { None } else { referrer },
            referrer_host: if internal_referrer { None } else { referrer_host },
            internal_referrer,
            ua_is_generic_browser: is_generic_browser(&user_agent_lower),
            browser: guess_browser(&user_agent).to_string(),
            os: guess_os(&user_agent).to_string(),
            device_type: guess_device(&user_agent).to_string(),
            user_agent,
            user_agent_lower,
            path: path_of(&url),
            host,
            url,
            query,
            utm,
            headers,
            timestamp: raw.timestamp,
            dwell_time_ms: raw.dwell_time_ms,
            scroll_depth: raw.scroll_depth,
        }
    }
}

/// Parse the UTM parameters of a URL. Empty or unparsable input yields an empty set.
pub fn parse_utm(url: &str) -> UtmParameters {
    utm_from_query(&parse_query(url))
}

fn utm_from_query(query: &[(String, String)]) -> UtmParameters {
    let get = |name: &str| {
        query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    UtmParameters {
        source: get("utm_source"),
        medium: get("utm_medium"),
        campaign: get("utm_campaign"),
        term: get("utm_term"),
        content: get("utm_content"),
    }
}

/// Parse the query string of a URL into decoded `(key, value)` pairs.
pub fn parse_query(url: &str) -> Vec<(String, String)> {
    let without_fragment = url.split('#').next().unwrap_or("");
    let query = match without_fragment.split_once('?') {
        Some((_, q)) => q,
        None => return Vec::new(),
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let key = percent_decode(k);
            if key.is_empty() {
                None
            } else {
                Some((key, percent_decode(v)))
            }
        })
        .collect()
}

/// Decode `%XX` escapes and `+` as space. Invalid escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Host of an absolute URL, lower-cased and without `www.` or port.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r)?;
    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = authority.split(':').next().unwrap_or("").to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Path component of a URL (absolute or path-only), defaulting to `/`.
pub fn path_of(url: &str) -> String {
    let rest = match url.split_once("://") {
        Some((_, r)) => match r.find(|c| c == '/' || c == '?' || c == '#') {
            Some(idx) => &r[idx..],
            None => "",
        },
        None => url,
    };
    let path = rest
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or("")
        .trim();

    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn is_generic_browser(ua_lower: &str) -> bool {
    ua_lower.starts_with("mozilla/")
        && !ua_lower.contains("compatible;")
        && !["bot", "crawler", "spider", "headless"]
            .iter()
            .any(|marker| ua_lower.contains(marker))
}

fn guess_browser(ua: &str) -> &'static str {
    if ua.is_empty() {
        "Unknown"
    } else if ua.contains("Edg/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Chrome/") && !ua.contains("Chromium/") {
        "Chrome"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Safari/") && ua.contains("Version/") {
        "Safari"
    } else {
        "Other"
    }
}

fn guess_os(ua: &str) -> &'static str {
    if ua.contains("Windows NT") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("CrOS") {
        "ChromeOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn guess_device(ua: &str) -> &'static str {
    if ua.contains("iPad") || (ua.contains("Android") && !ua.contains("Mobile")) {
        "tablet"
    } else if ua.contains("Mobi") || ua.contains("iPhone") {
        "mobile"
    } else if ua.is_empty() {
        "unknown"
    } else {
        "desktop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_parse_utm() {
        let utm = parse_utm("https://example.com/?utm_source=google&utm_medium=organic&utm_campaign=spring%20sale");
        assert_eq!(utm.source.as_deref(), Some("google"));
        assert_eq!(utm.medium.as_deref(), Some("organic"));
        assert_eq!(utm.campaign.as_deref(), Some("spring sale"));
        assert!(utm.term.is_none());
    }

    #[test]
    fn test_parse_utm_invalid_input() {
        assert!(parse_utm("").is_empty());
        assert!(parse_utm("not a url").is_empty());
        assert!(parse_utm("https://example.com/?utm_source=").is_empty());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_host_and_path() {
        assert_eq!(host_of("https://www.Google.com/search?q=x").as_deref(), Some("google.com"));
        assert_eq!(host_of("https://user@chat.openai.com:443/").as_deref(), Some("chat.openai.com"));
        assert_eq!(host_of("/relative"), None);
        assert_eq!(path_of("https://example.com"), "/");
        assert_eq!(path_of("https://example.com/pricing?plan=pro"), "/pricing");
        assert_eq!(path_of("/courses/cpl#top"), "/courses/cpl");
    }

    #[test]
    fn test_internal_referrer_ignored() {
        let raw = RawRequest::new("1.2.3.4", "https://example.com/about", ts())
            .with_referrer("https://www.example.com/");
        let signals = SignalExtractor::new().extract(&raw);
        assert!(signals.internal_referrer);
        assert!(signals.referrer.is_none());
        assert!(signals.referrer_host.is_none());
    }

    #[test]
    fn test_browser_guess() {
        let raw = RawRequest::new("1.2.3.4", "/", ts()).with_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        let signals = SignalExtractor::new().extract(&raw);
        assert_eq!(signals.browser, "Safari");
        assert_eq!(signals.os, "iOS");
        assert_eq!(signals.device_type, "mobile");
        assert!(signals.ua_is_generic_browser);
    }

    #[test]
    fn test_headers_lowercased() {
        let raw = RawRequest::new("1.2.3.4", "/", ts()).with_header("Accept-Language", "en-US");
        let signals = SignalExtractor::new().extract(&raw);
        assert_eq!(signals.header("accept-language"), Some("en-US"));
        assert_eq!(signals.header("ACCEPT-LANGUAGE"), Some("en-US"));
    }
}
