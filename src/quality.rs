//! Data quality gate for inbound traffic metric records.
//!
//! Structural problems reject a record. Inconsistent counts
//! (`sessions > visitors`, `page_views < sessions`) are tolerated as
//! warnings since upstream analytics counts are noisy.

use crate::config::QualityConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Daily metrics of one page, as delivered by an analytics export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficMetricsRecord {
    pub page_path: String,
    pub date: Option<NaiveDate>,
    pub page_views: i64,
    pub sessions: i64,
    pub visitors: i64,
    /// Percent
    pub bounce_rate: f64,
    /// Seconds
    pub avg_session_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One finding about a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

impl QualityIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// z-score of a value against a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCheck {
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
}

/// Outcome of the gate for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub accepted: bool,
    pub issues: Vec<QualityIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyCheck>,
}

impl QualityReport {
    pub fn errors(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_anomalous(&self) -> bool {
        self.anomaly.as_ref().is_some_and(|a| a.is_anomaly)
    }
}

/// Validates records before they are accepted downstream.
#[derive(Debug, Clone, Default)]
pub struct DataQualityGate {
    config: QualityConfig,
}

impl DataQualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Structural and range checks.
    pub fn validate(&self, record: &TrafficMetricsRecord) -> Vec<QualityIssue> {
        let mut issues = Vec::new();

        if record.page_path.trim().is_empty() {
            issues.push(QualityIssue::error("page_path", "page path is required"));
        }
        if record.date.is_none() {
            issues.push(QualityIssue::error("date", "date is required"));
        }

        for (field, value) in [
            ("page_views", record.page_views),
            ("sessions", record.sessions),
            ("visitors", record.visitors),
        ] {
            if value < 0 {
                issues.push(QualityIssue::error(field, format!("{} must not be negative", value)));
            }
        }

        if !record.bounce_rate.is_finite() || !(0.0..=100.0).contains(&record.bounce_rate) {
            issues.push(QualityIssue::error(
                "bounce_rate",
                format!("{} is outside 0-100", record.bounce_rate),
            ));
        }

        let duration = record.avg_session_duration;
        if !duration.is_finite() || duration < 0.0 {
            issues.push(QualityIssue::error(
                "avg_session_duration",
                format!("{} must be a non-negative number", duration),
            ));
        } else if duration > self.config.max_session_duration_seconds {
            issues.push(QualityIssue::warning(
                "avg_session_duration",
                format!("{}s is implausibly long", duration),
            ));
        }

        if record.sessions > record.visitors {
            issues.push(QualityIssue::warning(
                "sessions",
                format!("sessions ({}) exceed visitors ({})", record.sessions, record.visitors),
            ));
        }
        if record.page_views < record.sessions {
            issues.push(QualityIssue::warning(
                "page_views",
                format!("page views ({}) below sessions ({})", record.page_views, record.sessions),
            ));
        }

        issues
    }

    /// z-score of `value` against `baseline`. `None` while the baseline is
    /// smaller than the configured minimum.
    pub fn check_anomaly(&self, value: f64, baseline: &[f64]) -> Option<AnomalyCheck> {
        if baseline.len() < self.config.min_baseline.max(2) {
            return None;
        }

        let n = baseline.len() as f64;
        let mean = baseline.iter().sum::<f64>() / n;
        let variance = baseline.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();

        // A flat baseline gives no scale to measure against
        let z_score = if std_dev > 0.0 { (value - mean) / std_dev } else { 0.0 };

        Some(AnomalyCheck {
            value,
            baseline_mean: mean,
            baseline_std_dev: std_dev,
            z_score,
            is_anomaly: z_score.abs() > self.config.anomaly_z_threshold,
        })
    }

    /// Validate a record and check its page views against prior values.
    pub fn evaluate(&self, record: &TrafficMetricsRecord, baseline_page_views: &[f64]) -> QualityReport {
        let issues = self.validate(record);
        let accepted = !issues.iter().any(|i| i.severity == Severity::Error);
        let anomaly = self.check_anomaly(record.page_views as f64, baseline_page_views);

        if !accepted {
            warn!(page = %record.page_path, issues = issues.len(), "Rejected traffic metrics record");
        } else if anomaly.as_ref().is_some_and(|a| a.is_anomaly) {
            warn!(page = %record.page_path, page_views = record.page_views, "Anomalous page views");
        } else {
            debug!(page = %record.page_path, warnings = issues.len(), "Accepted traffic metrics record");
        }

        QualityReport {
            accepted,
            issues,
            anomaly,
        }
    }
}
