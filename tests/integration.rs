//! Integration tests for the traffic attribution engine.
//!
//! These tests drive the public API end to end: configuration loading,
//! source classification, bot scoring, journey tracking, funnels,
//! attribution and the data quality gate.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use traffic_attribution::catalog::CompiledCatalog;
use traffic_attribution::config::QualityConfig;
use traffic_attribution::funnel::FunnelStepDefinition;
use traffic_attribution::history::InMemoryHistoryStore;
use traffic_attribution::journey::{CollectingSink, InMemoryJourneyStore, OutcomeType};
use traffic_attribution::source::DetectionMethod;
use traffic_attribution::{
    analyze_funnel, attribute_conversion, attribution_weights, AttributionModel, BotClassification,
    DataQualityGate, EngineConfig, FunnelDefinition, JourneyOutcome, ManualClock, PageView, RawRequest,
    TimeRange, Touchpoint, TrafficCategory, TrafficEngine, TrafficMetricsRecord, UserJourneyDocument,
    UtmParameters,
};

const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn t0() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().unwrap()
}

fn engine_at(start: DateTime<Utc>) -> (TrafficEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let engine = TrafficEngine::with_stores(
        EngineConfig::default(),
        CompiledCatalog::default(),
        Arc::new(InMemoryHistoryStore::default()),
        Arc::new(InMemoryJourneyStore::new()),
        clock.clone(),
    );
    (engine, clock)
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_default_config_is_valid() {
    let config = EngineConfig::default();

    assert_eq!(config.source.ai_min_confidence, 70);
    assert_eq!(config.bot.max_history, 100);
    assert_eq!(config.bot.rpm_threshold, 30);
    assert_eq!(config.journey.timeout_seconds, 1800);
    assert_eq!(config.journey.attribution_model, AttributionModel::PositionBased);
    assert_eq!(config.quality.min_baseline, 7);
    assert!(!config.bot.datacenter_ranges.is_empty());
}

#[test]
fn test_config_from_file() {
    let path = std::env::temp_dir().join(format!("traffic-attribution-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{
            "bot": { "bot_threshold": 40 },
            "journey": { "timeout_seconds": 600, "attribution_model": "linear" }
        }"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.bot.bot_threshold, 40);
    assert_eq!(config.bot.bad_bot_threshold, 80);
    assert_eq!(config.journey.timeout_seconds, 600);
    assert_eq!(config.journey.attribution_model, AttributionModel::Linear);
}

#[test]
fn test_engine_builds_without_catalog_file() {
    let engine = TrafficEngine::new(EngineConfig::default(), Arc::new(ManualClock::new(t0())));
    assert!(engine.is_ok());
}

// =============================================================================
// Source Classification Tests
// =============================================================================

#[test]
fn test_chatgpt_referrer_is_ai_assistant() {
    let engine = TrafficEngine::with_defaults();
    let result = engine.classify_source(
        Some("https://chat.openai.com/"),
        Some("Mozilla/5.0"),
        "https://example.com/",
        &UtmParameters::default(),
        t0(),
    );

    assert_eq!(result.source.category, TrafficCategory::AiAssistant);
    assert_eq!(result.source.source, "ChatGPT");
    assert!(result.confidence >= 70);
}

#[test]
fn test_utm_organic_is_certain() {
    let engine = TrafficEngine::with_defaults();
    let result = engine.classify_source(
        None,
        Some(CHROME),
        "https://example.com/?utm_source=google&utm_medium=organic",
        &UtmParameters::default(),
        t0(),
    );

    assert_eq!(result.source.category, TrafficCategory::Organic);
    assert_eq!(result.confidence, 100);
    assert_eq!(result.detection_method, DetectionMethod::UtmParameters);
}

#[test]
fn test_no_signals_is_direct() {
    let engine = TrafficEngine::with_defaults();
    let raw = RawRequest::new("198.51.100.4", "https://example.com/", t0()).with_user_agent(CHROME);
    let processed = engine.process_request(&raw);

    assert_eq!(processed.source.category, TrafficCategory::Direct);
    assert!(processed.source.is_authentic);
    assert!(processed.authenticity_flags.is_empty());
}

#[test]
fn test_classification_is_deterministic() {
    let a = TrafficEngine::with_defaults().classify_source(
        Some("https://www.linkedin.com/feed/"),
        Some(CHROME),
        "https://example.com/blog/post",
        &UtmParameters::default(),
        t0(),
    );
    let b = TrafficEngine::with_defaults().classify_source(
        Some("https://www.linkedin.com/feed/"),
        Some(CHROME),
        "https://example.com/blog/post",
        &UtmParameters::default(),
        t0(),
    );

    assert_eq!(a, b);
    assert_eq!(a.source.category, TrafficCategory::Social);
}

#[test]
fn test_email_platform_referrers_are_email() {
    let engine = TrafficEngine::with_defaults();
    let referrers = [
        "https://mail.google.com/mail/u/0/",
        "https://outlook.live.com/mail/0/inbox",
        "https://outlook.office.com/mail/",
        "https://outlook.office365.com/owa/",
        "https://mail.yahoo.com/d/folders/1",
        "https://mail.proton.me/u/0/inbox",
        "https://webmail.example.net/",
        "https://mailchi.mp/acme/spring-sale",
        "https://acme.us1.list-manage.com/track/click",
        "https://u1.ct.sendgrid.net/ls/click",
    ];

    for referrer in referrers {
        let result =
            engine.classify_source(Some(referrer), Some(CHROME), "https://example.com/", &UtmParameters::default(), t0());
        assert_eq!(result.source.category, TrafficCategory::Email, "{}", referrer);
        assert_eq!(result.detection_method, DetectionMethod::EmailReferrer, "{}", referrer);
    }
}

#[test]
fn test_ai_assistant_hosts_precede_search() {
    let engine = TrafficEngine::with_defaults();
    let cases = [
        ("https://gemini.google.com/app", TrafficCategory::AiAssistant, "Gemini"),
        ("https://bard.google.com/", TrafficCategory::AiAssistant, "Gemini"),
        ("https://www.google.com/", TrafficCategory::Organic, "Google"),
    ];

    for (referrer, category, source) in cases {
        let result =
            engine.classify_source(Some(referrer), Some(CHROME), "https://example.com/", &UtmParameters::default(), t0());
        assert_eq!(result.source.category, category, "{}", referrer);
        assert_eq!(result.source.source, source, "{}", referrer);
    }
}

#[test]
fn test_bot_user_agent_fails_authenticity() {
    let engine = TrafficEngine::with_defaults();
    let raw = RawRequest::new("198.51.100.4", "https://example.com/", t0())
        .with_referrer("https://www.google.com/")
        .with_user_agent("Selenium/4.0 webdriver");
    let processed = engine.process_request(&raw);

    assert!(processed.authenticity_flags.contains(&"automated_user_agent".to_string()));
    assert!(processed.source.confidence < 70);
}

// =============================================================================
// Bot Scoring Tests
// =============================================================================

#[test]
fn test_selenium_is_bad_bot() {
    let engine = TrafficEngine::with_defaults();
    let raw = RawRequest::new("198.51.100.4", "https://example.com/", t0())
        .with_user_agent("Selenium/4.0 webdriver");
    let bot = engine.process_request(&raw).bot;

    assert!(bot.is_bot);
    assert_eq!(bot.classification, BotClassification::BadBot);
    assert_eq!(bot.bot_score, 100);
    assert_eq!(bot.matched_bot.as_deref(), Some("Selenium"));
}

#[test]
fn test_good_bot_is_capped() {
    let engine = TrafficEngine::with_defaults();
    let raw = RawRequest::new("198.51.100.4", "https://example.com/", t0())
        .with_user_agent("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)");
    let bot = engine.process_request(&raw).bot;

    assert_eq!(bot.classification, BotClassification::GoodBot);
    assert!(bot.bot_score <= 70);
}

#[test]
fn test_machine_cadence_is_flagged() {
    let engine = TrafficEngine::with_defaults();
    let mut last = None;
    for i in 0..10 {
        let raw = RawRequest::new("198.51.100.9", "https://example.com/", t0() + Duration::seconds(i))
            .with_user_agent(CHROME);
        last = Some(engine.process_request(&raw).bot);
    }
    let bot = last.unwrap();

    assert!(bot.is_bot);
    assert!(bot.flags.contains(&"automated_timing".to_string()));
    assert!(bot.flags.contains(&"consistent_timing".to_string()));
}

#[test]
fn test_datacenter_origin_scores() {
    let engine = TrafficEngine::with_defaults();
    let raw = RawRequest::new("52.1.2.3", "https://example.com/", t0()).with_user_agent(CHROME);
    let bot = engine.process_request(&raw).bot;

    assert_eq!(bot.details.network, 50);
    assert!(!bot.is_bot);
}

// =============================================================================
// Journey Tests
// =============================================================================

#[test]
fn test_single_page_five_seconds_is_bounce() {
    let (engine, clock) = engine_at(t0());
    let tracker = engine.tracker();
    let id = tracker.start_journey("u1", "s1", &PageView::new("https://example.com/"));
    clock.advance(Duration::seconds(5));

    let doc = tracker.complete_journey(&id, JourneyOutcome::exit("navigation")).unwrap();
    assert!(doc.metrics.is_bounce);
    assert_eq!(doc.outcome.outcome_type, OutcomeType::Bounce);
}

#[test]
fn test_multi_channel_conversion() {
    let (engine, clock) = engine_at(t0());
    let tracker = engine.tracker();
    let id = tracker.start_journey(
        "u1",
        "s1",
        &PageView::new("https://example.com/").with_referrer("https://www.google.com/"),
    );
    clock.advance(Duration::minutes(1));
    tracker
        .track_page_visit(&id, &PageView::new("https://example.com/blog").with_referrer("https://www.facebook.com/"))
        .unwrap();
    clock.advance(Duration::minutes(1));
    tracker
        .track_page_visit(&id, &PageView::new("https://example.com/pricing?utm_source=newsletter&utm_medium=email"))
        .unwrap();
    clock.advance(Duration::minutes(1));
    tracker
        .track_page_visit(&id, &PageView::new("https://example.com/contact").with_referrer("https://chat.openai.com/"))
        .unwrap();
    clock.advance(Duration::minutes(1));

    let doc = tracker
        .complete_journey(&id, JourneyOutcome::conversion("demo_request", Some(1000.0)))
        .unwrap();
    let weights: Vec<f64> = doc.attribution.touchpoints.iter().map(|t| t.weight).collect();
    let expected = [0.4, 0.1, 0.1, 0.4];

    assert_eq!(weights.len(), 4);
    for (w, e) in weights.iter().zip(expected) {
        assert!((w - e).abs() < 1e-9);
    }
    assert_eq!(doc.attribution.first_touch.category, TrafficCategory::Organic);
    assert_eq!(doc.attribution.last_touch.category, TrafficCategory::AiAssistant);

    let report = engine.channel_report(&[doc]);
    assert_eq!(report.converted_journeys, 1);
    assert!((report.total_value - 1000.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_sweeper_finalizes_timed_out_journeys() {
    let (engine, clock) = engine_at(t0());
    engine.tracker().start_journey("u1", "s1", &PageView::new("https://example.com/pricing"));
    engine.tracker().start_journey("u2", "s2", &PageView::new("https://example.com/"));
    clock.advance(Duration::minutes(20));
    engine.tracker().start_journey("u3", "s3", &PageView::new("https://example.com/"));
    clock.advance(Duration::minutes(15));

    let sink = Arc::new(CollectingSink::new());
    let sweeper = engine.sweeper(sink.clone());
    assert_eq!(sweeper.sweep_once().await, 2);

    let journeys = sink.take().await;
    assert!(journeys.iter().all(|j| j.outcome.outcome_type == OutcomeType::Exit));
    assert!(journeys.iter().all(|j| j.outcome.exit_reason.as_deref() == Some("timeout")));
    assert_eq!(engine.tracker().active_count(), 1);
}

// =============================================================================
// Funnel Tests
// =============================================================================

fn replay(engine: &TrafficEngine, clock: &ManualClock, session: &str, paths: &[&str], convert: bool) -> UserJourneyDocument {
    let tracker = engine.tracker();
    let id = tracker.start_journey(session, session, &PageView::new(format!("https://example.com{}", paths[0])));
    for path in &paths[1..] {
        clock.advance(Duration::seconds(30));
        tracker
            .track_page_visit(&id, &PageView::new(format!("https://example.com{}", path)))
            .unwrap();
    }
    clock.advance(Duration::seconds(30));
    let outcome = if convert {
        JourneyOutcome::conversion("signup", None)
    } else {
        JourneyOutcome::exit("navigation")
    };
    tracker.complete_journey(&id, outcome).unwrap()
}

#[test]
fn test_funnel_over_tracked_journeys() {
    let (engine, clock) = engine_at(t0());
    let journeys = vec![
        replay(&engine, &clock, "a", &["/", "/pricing", "/signup"], true),
        replay(&engine, &clock, "b", &["/", "/pricing"], false),
        replay(&engine, &clock, "c", &["/", "/blog"], false),
        replay(&engine, &clock, "d", &["/pricing", "/signup"], false),
    ];
    let definition = FunnelDefinition::new(
        "signup",
        vec![
            FunnelStepDefinition::new("Landing", "^/$"),
            FunnelStepDefinition::new("Pricing", "^/pricing"),
            FunnelStepDefinition::new("Signup", "^/signup"),
        ],
    );

    let funnel = engine.analyze_funnel(&definition, &journeys, None);
    let visitors: Vec<_> = funnel.steps.iter().map(|s| s.visitors).collect();
    assert_eq!(visitors, vec![3, 2, 1]);
    for pair in funnel.steps.windows(2) {
        assert!(pair[0].visitors >= pair[1].visitors);
    }

    let later = TimeRange::new(t0() + Duration::days(1), t0() + Duration::days(2));
    assert_eq!(analyze_funnel(&definition, &journeys, Some(later)).total_journeys, 0);
}

// =============================================================================
// Attribution Tests
// =============================================================================

#[test]
fn test_weights_sum_to_one_for_every_model() {
    for model in [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::PositionBased,
    ] {
        for n in 1..=12 {
            let sum: f64 = attribution_weights(n, model).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{} n={}", model, n);
        }
    }
}

#[test]
fn test_attribute_conversion_splits_value() {
    let engine = TrafficEngine::with_defaults();
    let source = engine
        .classify_source(Some("https://www.google.com/"), Some(CHROME), "https://example.com/", &UtmParameters::default(), t0())
        .source;
    let touchpoints: Vec<Touchpoint> = (0..3)
        .map(|i| Touchpoint::new(source.clone(), t0() + Duration::hours(i), "/"))
        .collect();

    let weighted = attribute_conversion(&touchpoints, AttributionModel::Linear, 300.0);
    assert!(weighted.iter().all(|t| (t.conversion_contribution - 100.0).abs() < 1e-9));
    assert!(attribute_conversion(&[], AttributionModel::Linear, 300.0).is_empty());
}

// =============================================================================
// Data Quality Tests
// =============================================================================

#[test]
fn test_quality_gate_accepts_and_flags_spike() {
    let gate = DataQualityGate::new(QualityConfig::default());
    let record = TrafficMetricsRecord {
        page_path: "/pricing".into(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        page_views: 900,
        sessions: 300,
        visitors: 250,
        bounce_rate: 35.0,
        avg_session_duration: 120.0,
    };
    let baseline = [100.0, 110.0, 95.0, 105.0, 98.0, 102.0, 101.0];

    let report = gate.evaluate(&record, &baseline);
    assert!(report.accepted);
    assert_eq!(report.warnings().count(), 1);
    assert!(report.is_anomalous());
}

#[test]
fn test_quality_gate_rejects_bad_rates() {
    let gate = DataQualityGate::default();
    let record = TrafficMetricsRecord {
        page_path: "/".into(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        bounce_rate: -5.0,
        ..Default::default()
    };

    let report = gate.evaluate(&record, &[]);
    assert!(!report.accepted);
    assert_eq!(report.errors().count(), 1);
}
