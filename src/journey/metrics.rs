//! Journey engagement metrics.

use super::{FunnelStage, PageVisitData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Elapsed time that earns the full time component.
const TIME_REFERENCE_SECONDS: f64 = 30.0;
const TIME_POINTS: f64 = 30.0;
const PAGE_POINTS: f64 = 5.0;
const MAX_PAGE_POINTS: f64 = 25.0;
const INTERACTION_POINTS: f64 = 2.0;
const MAX_INTERACTION_POINTS: f64 = 25.0;
const SCROLL_POINTS: f64 = 20.0;

/// Summary metrics of a journey.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneyMetrics {
    pub total_time_seconds: f64,
    pub page_count: usize,
    pub unique_pages: usize,
    pub total_interactions: u32,
    /// Mean of each page's maximum scroll depth (percent)
    pub average_scroll_depth: f64,
    /// 0-100
    pub engagement_score: f64,
    pub is_bounce: bool,
    pub funnel_stage: FunnelStage,
}

/// Engagement score (0-100).
///
/// Time up to 30 points against a 30s reference, 5 points per page up to 25,
/// 2 points per interaction up to 25, and up to 20 for average scroll depth.
pub fn engagement_score(elapsed_seconds: f64, pages: usize, interactions: u32, average_scroll: f64) -> f64 {
    let time = (elapsed_seconds.max(0.0) / TIME_REFERENCE_SECONDS).min(1.0) * TIME_POINTS;
    let pages = (pages as f64 * PAGE_POINTS).min(MAX_PAGE_POINTS);
    let interactions = (interactions as f64 * INTERACTION_POINTS).min(MAX_INTERACTION_POINTS);
    let scroll = (average_scroll.clamp(0.0, 100.0) / 100.0) * SCROLL_POINTS;

    let score = time + pages + interactions + scroll;
    (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

/// Single page, short, and almost no interaction.
pub fn is_bounce(
    page_count: usize,
    elapsed_seconds: f64,
    interactions: u32,
    bounce_max_seconds: u64,
    bounce_max_interactions: u32,
) -> bool {
    page_count == 1 && elapsed_seconds < bounce_max_seconds as f64 && interactions < bounce_max_interactions
}

/// Compute metrics over a journey's pages.
pub fn compute_metrics(
    pages: &[PageVisitData],
    total_interactions: u32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    bounce_max_seconds: u64,
    bounce_max_interactions: u32,
) -> JourneyMetrics {
    let elapsed = (end - start).num_milliseconds().max(0) as f64 / 1000.0;
    let unique_pages = pages.iter().map(|p| p.path.as_str()).collect::<HashSet<_>>().len();
    let average_scroll_depth = if pages.is_empty() {
        0.0
    } else {
        pages.iter().map(|p| p.max_scroll_depth).sum::<f64>() / pages.len() as f64
    };
    let funnel_stage = pages
        .iter()
        .map(|p| p.category.funnel_stage())
        .max()
        .unwrap_or_default();

    JourneyMetrics {
        total_time_seconds: elapsed,
        page_count: pages.len(),
        unique_pages,
        total_interactions,
        average_scroll_depth,
        engagement_score: engagement_score(elapsed, pages.len(), total_interactions, average_scroll_depth),
        is_bounce: is_bounce(
            pages.len(),
            elapsed,
            total_interactions,
            bounce_max_seconds,
            bounce_max_interactions,
        ),
        funnel_stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::PageCategory;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_engagement_components() {
        assert_eq!(engagement_score(0.0, 0, 0, 0.0), 0.0);
        assert_eq!(engagement_score(15.0, 1, 0, 0.0), 20.0);
        // every component saturated
        assert_eq!(engagement_score(600.0, 10, 40, 100.0), 100.0);
        assert_eq!(engagement_score(30.0, 2, 3, 50.0), 30.0 + 10.0 + 6.0 + 10.0);
    }

    #[test]
    fn test_bounce_rule() {
        assert!(is_bounce(1, 5.0, 0, 10, 2));
        assert!(is_bounce(1, 9.9, 1, 10, 2));
        assert!(!is_bounce(1, 10.0, 0, 10, 2));
        assert!(!is_bounce(1, 5.0, 2, 10, 2));
        assert!(!is_bounce(2, 5.0, 0, 10, 2));
    }

    #[test]
    fn test_compute_metrics() {
        let mut home = PageVisitData::new("/", "Home", PageCategory::Home, t0(), true);
        home.max_scroll_depth = 50.0;
        let mut pricing = PageVisitData::new("/pricing", "Pricing", PageCategory::Pricing, t0(), false);
        pricing.max_scroll_depth = 100.0;
        let again = PageVisitData::new("/", "Home", PageCategory::Home, t0(), false);

        let metrics = compute_metrics(&[home, pricing, again], 4, t0(), t0() + Duration::seconds(45), 10, 2);
        assert_eq!(metrics.page_count, 3);
        assert_eq!(metrics.unique_pages, 2);
        assert_eq!(metrics.average_scroll_depth, 50.0);
        assert_eq!(metrics.funnel_stage, FunnelStage::Consideration);
        assert!(!metrics.is_bounce);
        assert_eq!(metrics.engagement_score, 30.0 + 15.0 + 8.0 + 10.0);
    }
}
