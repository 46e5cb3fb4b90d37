use hdrhistogram::Histogram as HdrHistogram;
use serde::{Deserialize, Serialize};

use crate::{
    error::StatsError,
    macros::aggregate,
    metric::Request,
    representation::{
        DefaultOutcome, Histogram, MeanAndDev, OperationThroughput, Percentile, Representation,
        RepresentationKind,
    },
};

use super::Aggregate;

/// One hour in nanoseconds.
pub const DEFAULT_MAX_VALUE: u64 = 3_600_000_000_000;
pub const DEFAULT_DIGITS: u8 = 2;

/// Keeps every recorded response time in an HdrHistogram, so percentiles and
/// histograms can be derived after merging. Successful and failed requests
/// land in the same histogram; failures are additionally counted.
///
/// On the wire the histogram travels in compacted form: only the non-empty
/// `(value, count)` pairs.
#[aggregate(Request)]
#[serde(into = "CompactedHistogram", try_from = "CompactedHistogram")]
pub struct HistogramOperationStats {
    max_value: u64,
    digits: u8,
    errors: u64,
    histogram: HdrHistogram<u64>,
}

#[derive(Serialize, Deserialize)]
struct CompactedHistogram {
    max_value: u64,
    digits: u8,
    errors: u64,
    values: Vec<(u64, u64)>,
}

impl HistogramOperationStats {
    /// Values above `max_value` are recorded as `max_value`.
    pub fn with_bounds(max_value: u64, digits: u8) -> Result<Self, StatsError> {
        let histogram = HdrHistogram::new_with_max(max_value, digits)
            .map_err(|e| StatsError::Histogram(format!("{e:?}")))?;
        Ok(Self {
            max_value,
            digits,
            errors: 0,
            histogram,
        })
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    pub fn requests(&self) -> u64 {
        self.histogram.len()
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn value_at_percentile(&self, percentile: f64) -> u64 {
        self.histogram.value_at_percentile(percentile)
    }

    pub fn representation(
        &self,
        kind: RepresentationKind,
        window_ms: u64,
    ) -> Option<Representation> {
        let h = &self.histogram;
        match kind {
            RepresentationKind::DefaultOutcome => {
                Some(Representation::DefaultOutcome(DefaultOutcome {
                    requests: h.len(),
                    errors: self.errors,
                    response_time_mean: h.mean(),
                    response_time_max: h.max(),
                }))
            }
            RepresentationKind::MeanAndDev => Some(Representation::MeanAndDev(MeanAndDev {
                mean: h.mean(),
                dev: h.stdev(),
            })),
            RepresentationKind::Throughput => Some(Representation::Throughput(
                OperationThroughput::compute(h.len(), self.errors, window_ms),
            )),
            RepresentationKind::Percentile(p) => Some(Representation::Percentile(Percentile {
                response_time: h.value_at_percentile(p),
            })),
            RepresentationKind::Histogram {
                buckets: None,
                percentile: _,
            } => Some(Representation::Histogram(self.full_histogram())),
            RepresentationKind::Histogram {
                buckets: Some(buckets),
                percentile,
            } => Some(Representation::Histogram(
                self.reformatted_histogram(buckets, percentile),
            )),
            RepresentationKind::BoxAndWhiskers => None,
        }
    }

    /// Every bucket up to the maximum, empty ones included. The leading range
    /// is the minimum recorded value.
    fn full_histogram(&self) -> Histogram {
        let mut ranges = vec![self.histogram.min()];
        let mut counts = Vec::new();
        if self.histogram.is_empty() {
            return Histogram { ranges, counts };
        }
        for value in self.histogram.iter_all() {
            ranges.push(value.value_iterated_to());
            counts.push(value.count_since_last_iteration());
        }
        Histogram { ranges, counts }
    }

    /// Re-buckets into roughly `buckets` geometrically growing ranges between
    /// the minimum and the value at `percentile`.
    fn reformatted_histogram(&self, buckets: usize, percentile: f64) -> Histogram {
        let h = &self.histogram;
        let mut ranges = Vec::new();
        let mut counts = Vec::new();
        let min = h.min().max(1);
        let mut max = h.value_at_percentile(percentile).max(1);
        if max < min {
            max = h.max().max(min + 1);
        }
        let exponent = (max as f64 / min as f64).powf(1.0 / buckets.max(1) as f64);
        let mut current = min as f64 * exponent;
        let (mut acc_count, mut last_count) = (0u64, 0u64);
        if !h.is_empty() {
            for value in h.iter_all() {
                acc_count += value.count_since_last_iteration();
                let upper = value.value_iterated_to();
                if upper as f64 >= current {
                    ranges.push(upper);
                    counts.push(acc_count - last_count);
                    last_count = acc_count;
                    current *= exponent;
                }
                if upper >= max {
                    break;
                }
            }
        }
        if acc_count > 0 {
            ranges.push(max);
            counts.push(acc_count - last_count);
        }
        Histogram { ranges, counts }
    }
}

impl Aggregate for HistogramOperationStats {
    type Metric = Request;

    fn new() -> Self {
        Self::with_bounds(DEFAULT_MAX_VALUE, DEFAULT_DIGITS)
            .expect("default histogram bounds are valid")
    }

    fn new_instance(&self) -> Self {
        let mut histogram = self.histogram.clone();
        histogram.reset();
        Self {
            max_value: self.max_value,
            digits: self.digits,
            errors: 0,
            histogram,
        }
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.histogram.saturating_record(metric.latency_nanos());
        if !metric.success {
            self.errors += 1;
        }
    }

    /// Both sides must share `max_value` and `digits`;
    /// [`crate::OperationStats::merge`] rejects anything else up front.
    fn merge(&mut self, other: Self) {
        if let Err(e) = self.histogram.add(&other.histogram) {
            tracing::warn!("Dropping histogram data that does not fit: {e:?}");
            return;
        }
        self.errors += other.errors;
    }

    fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }
}

impl From<HistogramOperationStats> for CompactedHistogram {
    fn from(stats: HistogramOperationStats) -> Self {
        let values = stats
            .histogram
            .iter_recorded()
            .map(|v| (v.value_iterated_to(), v.count_at_value()))
            .collect();
        Self {
            max_value: stats.max_value,
            digits: stats.digits,
            errors: stats.errors,
            values,
        }
    }
}

impl TryFrom<CompactedHistogram> for HistogramOperationStats {
    type Error = StatsError;

    fn try_from(compacted: CompactedHistogram) -> Result<Self, Self::Error> {
        let mut stats = Self::with_bounds(compacted.max_value, compacted.digits)?;
        stats.errors = compacted.errors;
        for (value, count) in compacted.values {
            stats
                .histogram
                .record_n(value, count)
                .map_err(|e| StatsError::Histogram(format!("{e:?}")))?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(nanos: u64, success: bool) -> Request {
        Request {
            latency: Duration::from_nanos(nanos),
            success,
        }
    }

    fn filled(values: impl IntoIterator<Item = u64>) -> HistogramOperationStats {
        let mut stats = HistogramOperationStats::new();
        for v in values {
            stats.consume(&request(v, true));
        }
        stats
    }

    #[test]
    fn percentiles() {
        let stats = filled(1..=100);
        let Some(Representation::Percentile(p)) =
            stats.representation(RepresentationKind::Percentile(50.0), 1000)
        else {
            panic!("histogram answers percentiles");
        };
        assert_eq!(p.response_time, 50);
        assert_eq!(stats.value_at_percentile(100.0), 100);
    }

    #[test]
    fn errors_are_recorded_too() {
        let mut stats = HistogramOperationStats::new();
        stats.consume(&request(10, true));
        stats.consume(&request(20, false));
        assert_eq!(stats.requests(), 2);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn merge_adds_counts_and_errors() {
        let mut left = filled([5, 6, 7]);
        let mut right = filled([100]);
        right.consume(&request(200, false));
        left.merge(right);
        assert_eq!(left.requests(), 5);
        assert_eq!(left.errors(), 1);
        assert_eq!(left.value_at_percentile(100.0), 200);
    }

    #[test]
    fn default_uses_the_default_bounds() {
        let mut stats = HistogramOperationStats::default();
        assert_eq!((stats.max_value(), stats.digits()), (DEFAULT_MAX_VALUE, DEFAULT_DIGITS));
        stats.extend(&[request(10, true), request(20, false)]);
        assert_eq!(stats.requests(), 2);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(HistogramOperationStats::with_bounds(1000, 9).is_err());
    }

    #[test]
    fn new_instance_keeps_bounds() {
        let stats = HistogramOperationStats::with_bounds(10_000, 3).unwrap();
        let mut stats = stats.new_instance();
        stats.consume(&request(5, true));
        let fresh = stats.new_instance();
        assert!(fresh.is_empty());
        assert_eq!((fresh.max_value(), fresh.digits()), (10_000, 3));
    }

    #[test]
    fn compacted_form_on_the_wire() {
        let mut stats = filled([3, 3, 3, 900]);
        stats.consume(&request(900, false));
        let json = serde_json::to_value(&stats).unwrap();
        let values = json["values"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], serde_json::json!([3, 3]));
        assert_eq!(values[1][1], 2);
        let back: HistogramOperationStats = serde_json::from_value(json).unwrap();
        assert_eq!(back.requests(), 5);
        assert_eq!(back.errors(), 1);
        assert_eq!(back.value_at_percentile(100.0), stats.value_at_percentile(100.0));
    }

    #[test]
    fn reformatted_histogram_keeps_counts() {
        let stats = filled((1..=1000).map(|v| v * 10));
        let Some(Representation::Histogram(hist)) = stats.representation(
            RepresentationKind::Histogram {
                buckets: Some(10),
                percentile: 100.0,
            },
            1000,
        ) else {
            panic!("histogram answers histograms");
        };
        assert_eq!(hist.ranges.len(), hist.counts.len());
        assert_eq!(hist.counts.iter().sum::<u64>(), 1000);
        assert!(hist.ranges.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn full_histogram_starts_at_min() {
        let stats = filled([4, 8]);
        let Some(Representation::Histogram(hist)) = stats.representation(
            RepresentationKind::Histogram {
                buckets: None,
                percentile: 100.0,
            },
            1000,
        ) else {
            panic!("histogram answers histograms");
        };
        assert_eq!(hist.ranges[0], 4);
        assert_eq!(hist.ranges.len(), hist.counts.len() + 1);
        assert_eq!(hist.counts.iter().sum::<u64>(), 2);
    }
}
