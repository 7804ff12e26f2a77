//! Multi-touch conversion attribution.
//!
//! Distributes the value of a conversion across the traffic sources a
//! journey was exposed to. Pure functions, no I/O.

use crate::journey::UserJourneyDocument;
use crate::source::{TrafficCategory, TrafficSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const POSITION_ENDPOINT_WEIGHT: f64 = 0.4;

/// Weighting model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    #[default]
    PositionBased,
}

impl AttributionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first_touch",
            AttributionModel::LastTouch => "last_touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time_decay",
            AttributionModel::PositionBased => "position_based",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "first_touch" => Ok(AttributionModel::FirstTouch),
            "last_touch" => Ok(AttributionModel::LastTouch),
            "linear" => Ok(AttributionModel::Linear),
            "time_decay" => Ok(AttributionModel::TimeDecay),
            "position_based" => Ok(AttributionModel::PositionBased),
            other => Err(format!("unknown attribution model: {}", other)),
        }
    }
}

/// One traffic-source exposure along a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub source: TrafficSource,
    pub timestamp: DateTime<Utc>,
    pub page: String,
    /// 0-1, set by [`attribute_conversion`]
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub conversion_contribution: f64,
}

impl Touchpoint {
    pub fn new(source: TrafficSource, timestamp: DateTime<Utc>, page: impl Into<String>) -> Self {
        Self {
            source,
            timestamp,
            page: page.into(),
            weight: 0.0,
            conversion_contribution: 0.0,
        }
    }
}

/// Weights for `n` chronologically ordered touchpoints. Sums to 1 for n >= 1.
pub fn attribution_weights(n: usize, model: AttributionModel) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }

    match model {
        AttributionModel::FirstTouch => (0..n).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect(),
        AttributionModel::LastTouch => (0..n).map(|i| if i == n - 1 { 1.0 } else { 0.0 }).collect(),
        AttributionModel::Linear => vec![1.0 / n as f64; n],
        AttributionModel::TimeDecay => {
            // 2^i scaled by 2^-(n-1) so long journeys stay finite
            let raw: Vec<f64> = (0..n).map(|i| 2f64.powi(i as i32 - (n as i32 - 1))).collect();
            let total: f64 = raw.iter().sum();
            raw.into_iter().map(|w| w / total).collect()
        }
        AttributionModel::PositionBased => match n {
            1 => vec![1.0],
            2 => vec![0.5, 0.5],
            _ => {
                let interior = (1.0 - 2.0 * POSITION_ENDPOINT_WEIGHT) / (n - 2) as f64;
                (0..n)
                    .map(|i| {
                        if i == 0 || i == n - 1 {
                            POSITION_ENDPOINT_WEIGHT
                        } else {
                            interior
                        }
                    })
                    .collect()
            }
        },
    }
}

/// Weight touchpoints and split the conversion value across them.
pub fn attribute_conversion(
    touchpoints: &[Touchpoint],
    model: AttributionModel,
    conversion_value: f64,
) -> Vec<Touchpoint> {
    attribution_weights(touchpoints.len(), model)
        .into_iter()
        .zip(touchpoints)
        .map(|(weight, tp)| Touchpoint {
            weight,
            conversion_contribution: conversion_value * weight,
            ..tp.clone()
        })
        .collect()
}

/// Credit received by one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAttribution {
    pub channel: String,
    pub category: TrafficCategory,
    pub source: String,
    /// Fractional conversions credited
    pub conversions: f64,
    pub value: f64,
    pub touchpoints: usize,
}

/// Credited conversions and value per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub model: AttributionModel,
    pub converted_journeys: usize,
    pub total_value: f64,
    pub channels: Vec<ChannelAttribution>,
}

/// Aggregate attribution across the converted journeys of a batch.
pub fn channel_report(journeys: &[UserJourneyDocument], model: AttributionModel) -> ChannelReport {
    let mut channels: HashMap<String, ChannelAttribution> = HashMap::new();
    let mut converted = 0;
    let mut total_value = 0.0;

    for journey in journeys.iter().filter(|j| j.converted()) {
        converted += 1;
        let value = journey.outcome.conversion_value.unwrap_or(0.0);
        total_value += value;

        let fallback;
        let touchpoints = if journey.attribution.touchpoints.is_empty() {
            fallback = vec![Touchpoint::new(
                journey.attribution.first_touch.clone(),
                journey.start_time,
                journey.entry.page.clone(),
            )];
            &fallback
        } else {
            &journey.attribution.touchpoints
        };

        for tp in attribute_conversion(touchpoints, model, value) {
            let key = tp.source.channel_key();
            let entry = channels.entry(key.clone()).or_insert_with(|| ChannelAttribution {
                channel: key,
                category: tp.source.category,
                source: tp.source.source.clone(),
                conversions: 0.0,
                value: 0.0,
                touchpoints: 0,
            });
            entry.conversions += tp.weight;
            entry.value += tp.conversion_contribution;
            entry.touchpoints += 1;
        }
    }

    let mut channels: Vec<_> = channels.into_values().collect();
    channels.sort_by(|a, b| {
        b.conversions
            .total_cmp(&a.conversions)
            .then_with(|| b.value.total_cmp(&a.value))
            .then_with(|| a.channel.cmp(&b.channel))
    });

    ChannelReport {
        model,
        converted_journeys: converted,
        total_value,
        channels,
    }
}
