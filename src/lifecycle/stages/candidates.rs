//! Categorical candidate discovery (diagnostic only)
//!
//! Profiles columns that look like categories and tags them with typed
//! signals. Nothing here changes data; signals only inform the
//! standardization decision a person writes.

use crate::dataset::values::{distinct_in_order, is_numeric_dtype, is_text_dtype};
use crate::error::Result;
use crate::utils::{normalize_text, round_to};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MAX_UNIQUE_RATIO: f64 = 0.5;
pub const MAX_UNIQUE_COUNT: usize = 50;
pub const SAMPLE_VALUES: usize = 6;
pub const TOP_N: usize = 30;

/// Paired opposites a binary-like column may draw its values from.
const BINARY_PAIRS: [[&str; 2]; 4] = [["yes", "no"], ["0", "1"], ["true", "false"], ["y", "n"]];

/// Heuristic thresholds for candidate discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CandidateThresholds {
    pub max_unique_ratio: f64,
    pub max_unique_count: usize,
    pub sample_values: usize,
    pub top_n: usize,
    pub include_numeric_small: bool,
}

impl Default for CandidateThresholds {
    fn default() -> Self {
        Self {
            max_unique_ratio: MAX_UNIQUE_RATIO,
            max_unique_count: MAX_UNIQUE_COUNT,
            sample_values: SAMPLE_VALUES,
            top_n: TOP_N,
            include_numeric_small: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSignal {
    Textual,
    LowCardinalityNumeric,
    BinaryLike,
    ServicePhraseLike,
    HighCardinality,
}

impl CandidateSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Textual => "textual",
            Self::LowCardinalityNumeric => "low-cardinality-numeric",
            Self::BinaryLike => "binary-like",
            Self::ServicePhraseLike => "service-phrase-like",
            Self::HighCardinality => "high-cardinality",
        }
    }
}

impl std::fmt::Display for CandidateSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalCandidate {
    pub column: String,
    pub dtype: String,
    pub distinct_count: usize,
    /// Distinct values over rows, 0..=1 rounded to 4 dp
    pub distinct_pct: f64,
    pub null_count: usize,
    pub samples: Vec<String>,
    pub signals: Vec<CandidateSignal>,
}

impl CategoricalCandidate {
    pub fn has(&self, signal: CandidateSignal) -> bool {
        self.signals.contains(&signal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub thresholds: CandidateThresholds,
    pub analyzed_columns: usize,
    pub excluded_columns: Vec<String>,
    /// Ranked candidates, at most `top_n`
    pub candidates: Vec<CategoricalCandidate>,
    pub binary_like: Vec<String>,
    pub service_phrase_like: Vec<String>,
}

/// Trimmed, lowercased; integral numbers collapse to their integer form.
fn signal_form(value: &str) -> String {
    let norm = normalize_text(value);
    match norm.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        _ => norm,
    }
}

fn is_binary_like(distinct: &BTreeSet<String>) -> bool {
    !distinct.is_empty()
        && BINARY_PAIRS
            .iter()
            .any(|pair| distinct.iter().all(|v| pair.contains(&v.as_str())))
}

fn is_service_phrase(value: &str) -> bool {
    value.starts_with("no ") && value.ends_with(" service")
}

/// Profile every column of `df` except `exclude` and rank the candidates.
pub fn discover_candidates(
    df: &DataFrame,
    exclude: &[String],
    thresholds: &CandidateThresholds,
) -> Result<CandidateReport> {
    let rows = df.height();
    let mut analyzed = 0;
    let mut found = Vec::new();

    for column in df.get_columns() {
        let name = column.name().to_string();
        if exclude.contains(&name) {
            continue;
        }
        analyzed += 1;

        let series = column.as_materialized_series();
        let distinct = distinct_in_order(series)?;
        let distinct_count = distinct.len();
        let ratio = if rows == 0 {
            0.0
        } else {
            distinct_count as f64 / rows as f64
        };

        let mut signals = Vec::new();
        if is_text_dtype(series.dtype()) {
            signals.push(CandidateSignal::Textual);
        } else if thresholds.include_numeric_small
            && is_numeric_dtype(series.dtype())
            && distinct_count <= thresholds.max_unique_count
            && ratio <= thresholds.max_unique_ratio
        {
            signals.push(CandidateSignal::LowCardinalityNumeric);
        } else {
            continue;
        }

        let forms: BTreeSet<String> = distinct.iter().map(|v| signal_form(v)).collect();
        if is_binary_like(&forms) {
            signals.push(CandidateSignal::BinaryLike);
        }
        if forms.iter().any(|v| is_service_phrase(v)) {
            signals.push(CandidateSignal::ServicePhraseLike);
        }
        if ratio > thresholds.max_unique_ratio || distinct_count > thresholds.max_unique_count {
            signals.push(CandidateSignal::HighCardinality);
        }

        found.push(CategoricalCandidate {
            column: name,
            dtype: series.dtype().to_string(),
            distinct_count,
            distinct_pct: round_to(ratio, 4),
            null_count: series.null_count(),
            samples: distinct.into_iter().take(thresholds.sample_values).collect(),
            signals,
        });
    }

    found.sort_by(|a, b| {
        let service = CandidateSignal::ServicePhraseLike;
        let binary = CandidateSignal::BinaryLike;
        b.has(service)
            .cmp(&a.has(service))
            .then_with(|| b.has(binary).cmp(&a.has(binary)))
            .then_with(|| a.distinct_count.cmp(&b.distinct_count))
            .then_with(|| a.distinct_pct.total_cmp(&b.distinct_pct))
            .then_with(|| a.column.cmp(&b.column))
    });

    let tagged = |signal: CandidateSignal| -> Vec<String> {
        found
            .iter()
            .filter(|c| c.has(signal))
            .map(|c| c.column.clone())
            .collect()
    };
    let binary_like = tagged(CandidateSignal::BinaryLike);
    let service_phrase_like = tagged(CandidateSignal::ServicePhraseLike);
    found.truncate(thresholds.top_n);

    let mut excluded_columns = exclude.to_vec();
    excluded_columns.sort();

    Ok(CandidateReport {
        thresholds: thresholds.clone(),
        analyzed_columns: analyzed,
        excluded_columns,
        candidates: found,
        binary_like,
        service_phrase_like,
    })
}
