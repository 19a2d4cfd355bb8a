//! # Price Extraction and Statistics
//!
//! Heuristic extraction of currency tokens from raw scrape output, kept
//! behind a narrow `parse_prices` seam so the statistical side — noise
//! bounds, IQR outlier suppression, confidence labeling — is testable
//! independent of whatever the scraping format looks like this week.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Hard cap on tokens pulled out of one response body.
pub const MAX_EXTRACTED: usize = 80;

/// Of the extracted tokens, how many feed the statistics.
pub const MAX_RETAINED: usize = 40;

/// Values at or below this are treated as parsing noise (shipping lines,
/// per-unit teasers).
const NOISE_FLOOR: f64 = 1.0;

/// Values at or above this are treated as parsing noise (concatenated
/// digits, item numbers).
const NOISE_CEILING: f64 = 100_000.0;

/// Minimum surviving sample size before the IQR filter is applied.
const IQR_MIN_SAMPLES: usize = 10;

/// Confidence label derived from how many samples survived filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn from_sample_count(count: usize) -> Self {
        if count >= 10 {
            Confidence::High
        } else if count >= 3 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Aggregate statistics over the surviving price samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub confidence: Confidence,
    /// The sorted samples that survived filtering, for listing-level output
    pub samples: Vec<f64>,
}

fn price_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\s?([0-9][0-9,]*(?:\.[0-9]{1,2})?)").expect("static price pattern")
    })
}

/// Extract currency-formatted numeric tokens from a raw text blob.
///
/// Values outside `(1, 100_000)` are discarded as noise, and extraction
/// stops after [`MAX_EXTRACTED`] kept tokens.
pub fn parse_prices(text: &str) -> Vec<f64> {
    let mut prices = Vec::new();
    for capture in price_token_pattern().captures_iter(text) {
        let token = capture[1].replace(',', "");
        let Ok(value) = token.parse::<f64>() else {
            continue;
        };
        if value <= NOISE_FLOOR || value >= NOISE_CEILING {
            continue;
        }
        prices.push(value);
        if prices.len() >= MAX_EXTRACTED {
            break;
        }
    }
    prices
}

/// Compute mean/min/max/count over the retained samples, IQR-filtering
/// outliers when the sample is large enough to make quartiles meaningful.
///
/// Returns `None` when no samples remain.
pub fn compute_stats(prices: &[f64]) -> Option<PriceStats> {
    let mut sample: Vec<f64> = prices.iter().copied().take(MAX_RETAINED).collect();
    if sample.is_empty() {
        return None;
    }
    sample.sort_by(f64::total_cmp);

    let surviving = if sample.len() >= IQR_MIN_SAMPLES {
        iqr_filter(&sample)
    } else {
        sample
    };
    // The filter keeps at least the inner quartiles, so this cannot be empty.
    let count = surviving.len();

    let min = surviving[0];
    let max = surviving[count - 1];
    let mean = surviving.iter().sum::<f64>() / count as f64;

    Some(PriceStats {
        mean: round_cents(mean),
        min,
        max,
        count,
        confidence: Confidence::from_sample_count(count),
        samples: surviving,
    })
}

/// Drop values outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`. Input must be sorted.
fn iqr_filter(sorted: &[f64]) -> Vec<f64> {
    let q1 = quantile(sorted, 0.25);
    let q3 = quantile(sorted, 0.75);
    let iqr = q3 - q1;
    let lo = q1 - 1.5 * iqr;
    let hi = q3 + 1.5 * iqr;
    sorted.iter().copied().filter(|v| *v >= lo && *v <= hi).collect()
}

/// Linear-interpolation quantile over a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = pos - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
