//! Funnel analysis over finalized journeys.
//!
//! A journey reaches step N only after reaching step N-1; the page path is
//! matched against the steps as an ordered subsequence.

use crate::config::FunnelConfig;
use crate::journey::UserJourneyDocument;
use crate::source::TrafficCategory;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Entries kept in the top-N lists of a summary.
const TOP_N: usize = 10;

/// One step of a funnel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStepDefinition {
    pub name: String,
    /// Case-insensitive regex matched against the page path
    pub page_pattern: String,
}

impl FunnelStepDefinition {
    pub fn new(name: impl Into<String>, page_pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_pattern: page_pattern.into(),
        }
    }
}

/// Named, ordered funnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelDefinition {
    pub name: String,
    pub steps: Vec<FunnelStepDefinition>,
}

impl FunnelDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<FunnelStepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// Half-open interval `[start, end)` on journey start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Evaluated funnel step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub step_number: usize,
    pub name: String,
    pub page_pattern: String,
    pub visitors: usize,
    pub conversions: usize,
    /// Percent of this step's visitors that converted
    pub conversion_rate: f64,
    /// Percent of the previous step's visitors lost before this step
    pub drop_off_rate: f64,
    pub average_time_spent: f64,
}

/// Step boundary where attrition exceeded the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropOffPoint {
    pub from_step: String,
    pub to_step: String,
    pub drop_off_rate: f64,
    pub lost_visitors: usize,
}

/// Result of evaluating a funnel over a journey set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFunnel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub total_journeys: usize,
    pub steps: Vec<FunnelStep>,
    /// Percent of journeys in range that reached the last step
    pub overall_conversion_rate: f64,
    pub drop_off_points: Vec<DropOffPoint>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

enum StepMatcher {
    Pattern(Regex),
    Literal(String),
}

impl StepMatcher {
    fn compile(pattern: &str) -> Self {
        match Regex::new(&format!("(?i){}", pattern)) {
            Ok(re) => StepMatcher::Pattern(re),
            Err(e) => {
                warn!(pattern, error = %e, "Invalid funnel step pattern, matching literally");
                StepMatcher::Literal(pattern.to_lowercase())
            }
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            StepMatcher::Pattern(re) => re.is_match(path),
            StepMatcher::Literal(s) => path.to_lowercase().contains(s.as_str()),
        }
    }
}

/// Evaluates funnel definitions.
#[derive(Debug, Clone, Default)]
pub struct FunnelAnalyzer {
    config: FunnelConfig,
}

impl FunnelAnalyzer {
    pub fn new(config: FunnelConfig) -> Self {
        Self { config }
    }

    /// Evaluate a funnel over the journeys that started within `range`
    /// (all journeys when `None`).
    pub fn analyze(
        &self,
        definition: &FunnelDefinition,
        journeys: &[UserJourneyDocument],
        range: Option<TimeRange>,
    ) -> ConversionFunnel {
        let matchers: Vec<StepMatcher> = definition
            .steps
            .iter()
            .map(|s| StepMatcher::compile(&s.page_pattern))
            .collect();
        let step_count = matchers.len();

        let mut visitors = vec![0usize; step_count];
        let mut conversions = vec![0usize; step_count];
        let mut time_spent = vec![0f64; step_count];
        let mut total = 0;

        for journey in journeys
            .iter()
            .filter(|j| range.map_or(true, |r| r.contains(j.start_time)))
        {
            total += 1;
            let mut reached = 0;
            for page in &journey.pages {
                if reached < step_count && matchers[reached].matches(&page.path) {
                    time_spent[reached] += page.time_spent_seconds;
                    reached += 1;
                }
            }
            for step in 0..reached {
                visitors[step] += 1;
                if journey.converted() {
                    conversions[step] += 1;
                }
            }
        }

        let mut steps = Vec::with_capacity(step_count);
        let mut drop_off_points = Vec::new();
        for (i, def) in definition.steps.iter().enumerate() {
            let drop_off_rate = if i == 0 {
                0.0
            } else {
                percent(visitors[i - 1] - visitors[i], visitors[i - 1])
            };
            if i > 0 && drop_off_rate > self.config.drop_off_threshold {
                drop_off_points.push(DropOffPoint {
                    from_step: definition.steps[i - 1].name.clone(),
                    to_step: def.name.clone(),
                    drop_off_rate,
                    lost_visitors: visitors[i - 1] - visitors[i],
                });
            }

            steps.push(FunnelStep {
                step_number: i + 1,
                name: def.name.clone(),
                page_pattern: def.page_pattern.clone(),
                visitors: visitors[i],
                conversions: conversions[i],
                conversion_rate: percent(conversions[i], visitors[i]),
                drop_off_rate,
                average_time_spent: if visitors[i] == 0 {
                    0.0
                } else {
                    time_spent[i] / visitors[i] as f64
                },
            });
        }

        let overall_conversion_rate = percent(visitors.last().copied().unwrap_or(0), total);
        debug!(
            funnel = %definition.name,
            journeys = total,
            drop_offs = drop_off_points.len(),
            "Funnel evaluated"
        );

        ConversionFunnel {
            name: definition.name.clone(),
            time_range: range,
            total_journeys: total,
            steps,
            overall_conversion_rate,
            drop_off_points,
        }
    }
}

/// Evaluate a funnel with the default drop-off threshold.
pub fn analyze_funnel(
    definition: &FunnelDefinition,
    journeys: &[UserJourneyDocument],
    range: Option<TimeRange>,
) -> ConversionFunnel {
    FunnelAnalyzer::default().analyze(definition, journeys, range)
}

/// Performance of one traffic category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePerformance {
    pub category: TrafficCategory,
    pub journeys: usize,
    pub conversions: usize,
    pub conversion_rate: f64,
    pub average_engagement: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCount {
    pub path: String,
    pub count: usize,
}

/// Aggregate statistics of a batch of journeys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneySummary {
    pub total_journeys: usize,
    pub conversions: usize,
    pub bounces: usize,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub average_engagement: f64,
    pub average_pages: f64,
    pub average_duration_seconds: f64,
    pub by_source: Vec<SourcePerformance>,
    pub top_entry_pages: Vec<PageCount>,
    pub top_exit_pages: Vec<PageCount>,
    /// Page sequences joined with " > "
    pub common_paths: Vec<PageCount>,
}

fn top_counts(counts: HashMap<String, usize>) -> Vec<PageCount> {
    let mut list: Vec<_> = counts
        .into_iter()
        .map(|(path, count)| PageCount { path, count })
        .collect();
    list.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
    list.truncate(TOP_N);
    list
}

/// Summarize a batch of finalized journeys.
pub fn summarize_journeys(journeys: &[UserJourneyDocument]) -> JourneySummary {
    let total = journeys.len();
    let mut conversions = 0;
    let mut bounces = 0;
    let mut engagement = 0.0;
    let mut pages = 0usize;
    let mut duration = 0.0;
    let mut by_source: HashMap<TrafficCategory, (usize, usize, f64)> = HashMap::new();
    let mut entries: HashMap<String, usize> = HashMap::new();
    let mut exits: HashMap<String, usize> = HashMap::new();
    let mut paths: HashMap<String, usize> = HashMap::new();

    for journey in journeys {
        let converted = journey.converted();
        conversions += converted as usize;
        bounces += journey.metrics.is_bounce as usize;
        engagement += journey.metrics.engagement_score;
        pages += journey.pages.len();
        duration += journey.metrics.total_time_seconds;

        let slot = by_source.entry(journey.entry.source.category).or_default();
        slot.0 += 1;
        slot.1 += converted as usize;
        slot.2 += journey.metrics.engagement_score;

        if let Some(first) = journey.pages.first() {
            *entries.entry(first.path.clone()).or_default() += 1;
        }
        if let Some(last) = journey.pages.last() {
            *exits.entry(last.path.clone()).or_default() += 1;
        }
        let path = journey.page_paths().collect::<Vec<_>>().join(" > ");
        *paths.entry(path).or_default() += 1;
    }

    let average = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };

    let mut by_source: Vec<SourcePerformance> = by_source
        .into_iter()
        .map(|(category, (count, converted, engagement))| SourcePerformance {
            category,
            journeys: count,
            conversions: converted,
            conversion_rate: percent(converted, count),
            average_engagement: engagement / count as f64,
        })
        .collect();
    by_source.sort_by(|a, b| {
        b.journeys
            .cmp(&a.journeys)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
    });

    JourneySummary {
        total_journeys: total,
        conversions,
        bounces,
        conversion_rate: percent(conversions, total),
        bounce_rate: percent(bounces, total),
        average_engagement: average(engagement),
        average_pages: average(pages as f64),
        average_duration_seconds: average(duration),
        by_source,
        top_entry_pages: top_counts(entries),
        top_exit_pages: top_counts(exits),
        common_paths: top_counts(paths),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::Touchpoint;
    use crate::journey::{
        DeviceInfo, FunnelStage, JourneyAttribution, JourneyEntry, JourneyMetrics, JourneyOutcome,
        PageCategory, PageVisitData,
    };
    use crate::source::TrafficSource;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    fn source(category: TrafficCategory) -> TrafficSource {
        TrafficSource {
            id: "x".into(),
            category,
            source: category.as_str().into(),
            medium: category.default_medium().into(),
            campaign: None,
            content: None,
            term: None,
            is_authentic: true,
            confidence: 90,
            detected_at: t0(),
        }
    }

    fn journey(paths: &[&str], converted: bool, start: DateTime<Utc>) -> UserJourneyDocument {
        let pages: Vec<_> = paths
            .iter()
            .map(|p| {
                let mut page = PageVisitData::new(*p, "", PageCategory::Other, start, false);
                page.time_spent_seconds = 10.0;
                page
            })
            .collect();
        let src = source(TrafficCategory::Organic);
        UserJourneyDocument {
            journey_id: "j".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            start_time: start,
            end_time: start,
            entry: JourneyEntry {
                page: paths[0].into(),
                source: src.clone(),
                utm: Default::default(),
                referrer: None,
                timestamp: start,
            },
            metrics: JourneyMetrics {
                page_count: pages.len(),
                is_bounce: pages.len() == 1,
                engagement_score: 40.0,
                ..Default::default()
            },
            pages,
            device: DeviceInfo::default(),
            attribution: JourneyAttribution {
                first_touch: src.clone(),
                last_touch: src.clone(),
                touchpoints: vec![Touchpoint::new(src, start, paths[0])],
                model: None,
            },
            outcome: if converted {
                JourneyOutcome::conversion("signup", Some(10.0))
            } else {
                JourneyOutcome::exit("navigation")
            },
            funnel_stage: FunnelStage::Awareness,
        }
    }

    fn definition() -> FunnelDefinition {
        FunnelDefinition::new(
            "signup",
            vec![
                FunnelStepDefinition::new("Landing", "^/$"),
                FunnelStepDefinition::new("Pricing", "^/pricing"),
                FunnelStepDefinition::new("Signup", "^/signup"),
            ],
        )
    }

    #[test]
    fn test_funnel_progression() {
        let journeys = vec![
            journey(&["/", "/pricing", "/signup"], true, t0()),
            journey(&["/", "/pricing"], false, t0()),
            journey(&["/", "/blog"], false, t0()),
            // skips pricing: stops at step 1
            journey(&["/", "/signup"], false, t0()),
        ];
        let funnel = analyze_funnel(&definition(), &journeys, None);
        let visitors: Vec<_> = funnel.steps.iter().map(|s| s.visitors).collect();
        assert_eq!(visitors, vec![4, 2, 1]);
        assert_eq!(funnel.steps[0].conversions, 1);
        assert_eq!(funnel.steps[1].drop_off_rate, 50.0);
        assert_eq!(funnel.steps[2].conversion_rate, 100.0);
        assert_eq!(funnel.overall_conversion_rate, 25.0);
        assert_eq!(funnel.drop_off_points.len(), 2);
        assert_eq!(funnel.drop_off_points[0].lost_visitors, 2);
    }

    #[test]
    fn test_visitors_non_increasing_and_time_range() {
        let journeys = vec![
            journey(&["/signup", "/", "/pricing", "/signup"], true, t0()),
            journey(&["/pricing", "/signup"], false, t0()),
            journey(&["/", "/pricing", "/signup"], true, t0() + Duration::days(3)),
        ];
        let range = TimeRange::new(t0() - Duration::hours(1), t0() + Duration::days(1));
        let funnel = analyze_funnel(&definition(), &journeys, Some(range));
        assert_eq!(funnel.total_journeys, 2);
        for pair in funnel.steps.windows(2) {
            assert!(pair[0].visitors >= pair[1].visitors);
        }
        assert_eq!(funnel.steps[0].visitors, 1);
        assert_eq!(funnel.steps[2].visitors, 1);
    }

    #[test]
    fn test_small_drop_off_not_reported() {
        let mut journeys: Vec<_> = (0..10).map(|_| journey(&["/", "/pricing"], false, t0())).collect();
        journeys.push(journey(&["/"], false, t0()));
        let funnel = analyze_funnel(&definition(), &journeys, None);
        // 11 -> 10 is ~9%, 10 -> 0 is 100%
        assert_eq!(funnel.drop_off_points.len(), 1);
        assert_eq!(funnel.drop_off_points[0].to_step, "Signup");
    }

    #[test]
    fn test_empty_funnel() {
        let funnel = analyze_funnel(&definition(), &[], None);
        assert!(funnel.steps.iter().all(|s| s.visitors == 0 && s.conversion_rate == 0.0));
        assert!(funnel.drop_off_points.is_empty());
    }

    #[test]
    fn test_summarize_journeys() {
        let journeys = vec![
            journey(&["/", "/pricing", "/signup"], true, t0()),
            journey(&["/", "/pricing"], false, t0()),
            journey(&["/blog"], false, t0()),
            journey(&["/", "/pricing"], false, t0()),
        ];
        let summary = summarize_journeys(&journeys);
        assert_eq!(summary.total_journeys, 4);
        assert_eq!(summary.conversions, 1);
        assert_eq!(summary.bounces, 1);
        assert_eq!(summary.conversion_rate, 25.0);
        assert_eq!(summary.average_pages, 2.0);
        assert_eq!(summary.top_entry_pages[0], PageCount { path: "/".into(), count: 3 });
        assert_eq!(summary.common_paths[0].path, "/ > /pricing");
        assert_eq!(summary.by_source[0].category, TrafficCategory::Organic);
        assert_eq!(summary.by_source[0].average_engagement, 40.0);
    }
}
