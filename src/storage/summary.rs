//! Aggregate statistics written into each daily snapshot and the rolling
//! summary store.

use crate::models::{BranchRateRecord, ProductCategory};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateStats {
    pub count: usize,
    pub average_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateSummary {
    pub total_banks: usize,
    pub total_products: usize,
    pub average_rate: f64,
    pub rate_range: RateRange,
    pub duration_stats: BTreeMap<u32, RateStats>,
    pub product_type_stats: BTreeMap<ProductCategory, RateStats>,
    pub crawled_at: NaiveDateTime,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn stats_of(rates: &[f64]) -> Option<RateStats> {
    if rates.is_empty() {
        return None;
    }
    let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
    let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(RateStats {
        count: rates.len(),
        average_rate: round2(rates.iter().sum::<f64>() / rates.len() as f64),
        min_rate: round2(min),
        max_rate: round2(max),
    })
}

/// Summarise every quote across `records`. Empty input gives an all-zero summary.
pub fn summarize(records: &[BranchRateRecord], now: NaiveDateTime) -> RateSummary {
    let quotes: Vec<_> = records.iter().flat_map(|r| r.products.iter()).collect();

    let mut by_duration: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut by_category: BTreeMap<ProductCategory, Vec<f64>> = BTreeMap::new();
    for q in &quotes {
        by_duration.entry(q.duration_months).or_default().push(q.rate_percent);
        by_category.entry(q.product_category).or_default().push(q.rate_percent);
    }

    let rates: Vec<f64> = quotes.iter().map(|q| q.rate_percent).filter(|r| *r > 0.0).collect();
    let overall = stats_of(&rates);

    RateSummary {
        total_banks: records.len(),
        total_products: quotes.len(),
        average_rate: overall.as_ref().map(|s| s.average_rate).unwrap_or(0.0),
        rate_range: overall
            .as_ref()
            .map(|s| RateRange { min: s.min_rate, max: s.max_rate })
            .unwrap_or_default(),
        duration_stats: by_duration
            .into_iter()
            .filter_map(|(k, v)| stats_of(&v).map(|s| (k, s)))
            .collect(),
        product_type_stats: by_category
            .into_iter()
            .filter_map(|(k, v)| stats_of(&v).map(|s| (k, s)))
            .collect(),
        crawled_at: now,
    }
}
