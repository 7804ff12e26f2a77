//! Traffic attribution CLI
//!
//! Classifies request logs, replays tracking events into journeys and
//! weights touchpoints for attribution.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use traffic_attribution::attribution::ChannelReport;
use traffic_attribution::funnel::{summarize_journeys, JourneySummary};
use traffic_attribution::journey::{CollectingSink, JourneyError};
use traffic_attribution::{
    attribute_conversion, AttributionModel, Clock, ConversionFunnel, EngineConfig, FunnelDefinition,
    JourneyOutcome, JourneyStateTracker, ManualClock, PageView, RawRequest, SystemClock, TimeRange,
    Touchpoint, TrafficEngine, UserJourneyDocument,
};

#[derive(Parser, Debug)]
#[command(name = "traffic-attribution")]
#[command(author, version, about = "Traffic source classification, bot scoring and attribution")]
struct Args {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify JSON-lines requests, one result per line
    Classify {
        /// Input file, stdin when omitted or "-"
        input: Option<PathBuf>,
    },
    /// Replay JSON-lines tracking events into finalized journeys
    Replay {
        /// Input file, stdin when omitted or "-"
        input: Option<PathBuf>,

        /// Funnel definition to evaluate (JSON or YAML)
        #[arg(long)]
        funnel: Option<PathBuf>,

        /// Only count journeys started at or after this instant
        #[arg(long, requires = "until")]
        since: Option<DateTime<Utc>>,

        /// Only count journeys started before this instant
        #[arg(long, requires = "since")]
        until: Option<DateTime<Utc>>,
    },
    /// Weight a JSON touchpoint list with an attribution model
    Attribute {
        /// Touchpoint list (JSON array)
        input: PathBuf,

        /// first_touch, last_touch, linear, time_decay or position_based
        #[arg(short, long, default_value = "position_based")]
        model: AttributionModel,

        /// Conversion value to split across touchpoints
        #[arg(long, default_value_t = 0.0)]
        value: f64,
    },
}

/// One line of a replay stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TrackingEvent {
    PageView {
        session_id: String,
        #[serde(default)]
        user_id: Option<String>,
        timestamp: DateTime<Utc>,
        page: PageView,
    },
    Interaction {
        session_id: String,
        timestamp: DateTime<Utc>,
        event_type: String,
        #[serde(default)]
        element: Option<String>,
        #[serde(default)]
        value: Option<f64>,
    },
    Scroll {
        session_id: String,
        timestamp: DateTime<Utc>,
        depth: f64,
    },
    Conversion {
        session_id: String,
        timestamp: DateTime<Utc>,
        conversion_type: String,
        #[serde(default)]
        value: Option<f64>,
    },
    Exit {
        session_id: String,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl TrackingEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TrackingEvent::PageView { timestamp, .. }
            | TrackingEvent::Interaction { timestamp, .. }
            | TrackingEvent::Scroll { timestamp, .. }
            | TrackingEvent::Conversion { timestamp, .. }
            | TrackingEvent::Exit { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    journeys: Vec<UserJourneyDocument>,
    summary: JourneySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    funnel: Option<ConversionFunnel>,
    channels: ChannelReport,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env()
        .add_directive(level.into());

    // Logs go to stderr; stdout carries results
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Classify { input } => classify(config, input.as_deref()),
        Command::Replay {
            input,
            funnel,
            since,
            until,
        } => {
            let range = since.zip(until).map(|(start, end)| TimeRange::new(start, end));
            replay(config, input.as_deref(), funnel.as_deref(), range).await
        }
        Command::Attribute { input, model, value } => attribute(&input, model, value),
    }
}

fn classify(config: EngineConfig, input: Option<&Path>) -> Result<()> {
    let engine = TrafficEngine::new(config, Arc::new(SystemClock))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut processed = 0usize;

    for (line_no, request) in read_json_lines::<RawRequest>(input)? {
        let result = engine.process_request(&request);
        serde_json::to_writer(&mut out, &result)?;
        out.write_all(b"\n")?;
        processed += 1;
        if processed % 1000 == 0 {
            info!(line = line_no, processed, "Classification progress");
        }
    }

    let stats = engine.cache_stats();
    info!(
        processed,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "Classification finished"
    );
    Ok(())
}

async fn replay(
    config: EngineConfig,
    input: Option<&Path>,
    funnel: Option<&Path>,
    range: Option<TimeRange>,
) -> Result<()> {
    let funnel = funnel.map(read_structured::<FunnelDefinition>).transpose()?;
    let mut events = read_json_lines::<TrackingEvent>(input)?;
    events.sort_by_key(|(_, e)| e.timestamp());

    let start = events.first().map(|(_, e)| e.timestamp()).unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let engine = TrafficEngine::new(config, clock.clone())?;
    let tracker = engine.tracker().clone();
    let sink = Arc::new(CollectingSink::new());
    let sweeper = engine.sweeper(sink.clone());
    let mut journeys = Vec::new();

    for (line_no, event) in events {
        clock.set(event.timestamp());
        // Journeys idle past the timeout end before the next event is applied
        sweeper.sweep_once().await;

        let result = match event {
            TrackingEvent::PageView {
                session_id,
                user_id,
                page,
                ..
            } => match tracker.store().journey_for_session(&session_id) {
                Some(id) => tracker.track_page_visit(&id, &page),
                None => {
                    let user_id = user_id.unwrap_or_else(|| session_id.clone());
                    tracker.start_journey(&user_id, &session_id, &page);
                    Ok(())
                }
            },
            TrackingEvent::Interaction {
                session_id,
                event_type,
                element,
                value,
                ..
            } => with_session(&tracker, &session_id, |id| {
                tracker.track_interaction(id, &event_type, element.as_deref(), value)
            }),
            TrackingEvent::Scroll { session_id, depth, .. } => with_session(&tracker, &session_id, |id| {
                tracker.track_scroll_depth(id, depth).map(|_| ())
            }),
            TrackingEvent::Conversion {
                session_id,
                conversion_type,
                value,
                ..
            } => with_session(&tracker, &session_id, |id| {
                let outcome = JourneyOutcome::conversion(conversion_type.as_str(), value);
                tracker.complete_journey(id, outcome).map(|doc| journeys.push(doc))
            }),
            TrackingEvent::Exit { session_id, reason, .. } => with_session(&tracker, &session_id, |id| {
                let outcome = JourneyOutcome::exit(reason.as_deref().unwrap_or("exit"));
                tracker.complete_journey(id, outcome).map(|doc| journeys.push(doc))
            }),
        };

        if let Err(e) = result {
            warn!(line = line_no, error = %e, "Skipped tracking event");
        }
    }

    // Whatever is still live ends with the stream
    let remaining = tracker.store().idle_since(clock.now() + chrono::Duration::seconds(1));
    for id in remaining {
        if let Ok(doc) = tracker.complete_journey(&id, JourneyOutcome::exit("end_of_stream")) {
            journeys.push(doc);
        }
    }
    journeys.extend(sink.take().await);
    journeys.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.journey_id.cmp(&b.journey_id)));

    let funnel = funnel.map(|def| engine.analyze_funnel(&def, &journeys, range));
    let report = ReplayReport {
        summary: summarize_journeys(&journeys),
        channels: engine.channel_report(&journeys),
        funnel,
        journeys,
    };

    info!(
        journeys = report.summary.total_journeys,
        conversions = report.summary.conversions,
        "Replay finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn attribute(input: &Path, model: AttributionModel, value: f64) -> Result<()> {
    let mut touchpoints: Vec<Touchpoint> = read_structured(input)?;
    touchpoints.sort_by_key(|tp| tp.timestamp);

    let weighted = attribute_conversion(&touchpoints, model, value);
    info!(model = %model, touchpoints = weighted.len(), "Touchpoints attributed");
    println!("{}", serde_json::to_string_pretty(&weighted)?);
    Ok(())
}

/// Run `apply` on the live journey of a session.
fn with_session<F>(tracker: &JourneyStateTracker, session_id: &str, apply: F) -> Result<(), JourneyError>
where
    F: FnOnce(&str) -> Result<(), JourneyError>,
{
    match tracker.store().journey_for_session(session_id) {
        Some(id) => apply(&id),
        None => Err(JourneyError::UnknownJourney(format!("session:{}", session_id))),
    }
}

/// Parse a JSON-lines stream, skipping blank and malformed lines.
fn read_json_lines<T: DeserializeOwned>(input: Option<&Path>) -> Result<Vec<(usize, T)>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) if path != Path::new("-") => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        _ => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut items = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push((idx + 1, item)),
            Err(e) => warn!(line = idx + 1, error = %e, "Skipping malformed input line"),
        }
    }
    Ok(items)
}

/// Read a JSON or YAML document (by extension).
fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(value)
}
