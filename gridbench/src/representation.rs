//! Derived views over recorded statistics.
//!
//! Accumulators keep compact, mergeable raw data; everything a report wants to
//! show (averages, percentiles, throughput, histograms) is computed on demand
//! through [`RepresentationKind`] and returned as a [`Representation`].
//! An accumulator that cannot produce a kind answers `None`.

use serde::{Deserialize, Serialize};

/// Which view to derive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RepresentationKind {
    DefaultOutcome,
    MeanAndDev,
    BoxAndWhiskers,
    Throughput,
    /// Response time at the given percentile, `0.0..=100.0`.
    Percentile(f64),
    /// Full histogram when `buckets` is `None`, otherwise roughly `buckets`
    /// geometrically growing buckets up to the `percentile`.
    Histogram {
        buckets: Option<usize>,
        percentile: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Representation {
    DefaultOutcome(DefaultOutcome),
    MeanAndDev(MeanAndDev),
    BoxAndWhiskers(BoxAndWhiskers),
    Throughput(OperationThroughput),
    Percentile(Percentile),
    Histogram(Histogram),
    /// One entry per period of a periodic statistics, `None` where the
    /// period cannot produce the requested kind.
    Series {
        begin: Option<u64>,
        period: u64,
        data: Vec<Option<Representation>>,
    },
}

/// Response times are in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultOutcome {
    pub requests: u64,
    pub errors: u64,
    pub response_time_mean: f64,
    pub response_time_max: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanAndDev {
    pub mean: f64,
    pub dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxAndWhiskers {
    pub max_regular: f64,
    pub upper_quartile: f64,
    pub mean: f64,
    pub lower_quartile: f64,
    pub min_regular: f64,
}

/// Requests per second over the statistics window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationThroughput {
    pub gross: f64,
    pub net: f64,
}

impl OperationThroughput {
    /// `duration_ms` is the length of the window the requests were recorded in.
    pub fn compute(requests: u64, errors: u64, duration_ms: u64) -> Self {
        if duration_ms == 0 {
            return Self {
                gross: 0.0,
                net: 0.0,
            };
        }
        let seconds = duration_ms as f64 / 1000.0;
        Self {
            gross: requests as f64 / seconds,
            net: requests.saturating_sub(errors) as f64 / seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentile {
    pub response_time: u64,
}

/// `ranges[i]` is the upper bound of bucket `i`, holding `counts[i]` requests.
/// A full histogram carries one extra leading range: the minimum value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub ranges: Vec<u64>,
    pub counts: Vec<u64>,
}
