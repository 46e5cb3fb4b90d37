use crate::{
    macros::aggregate,
    metric::Request,
    representation::{
        BoxAndWhiskers, DefaultOutcome, MeanAndDev, OperationThroughput, Representation,
        RepresentationKind,
    },
};

use super::Aggregate;

const INVERSE_NORMAL_95: f64 = 1.96;
const INVERSE_NORMAL_50: f64 = 0.67448;

/// Per-operation accumulator with a fixed memory footprint.
///
/// Tracks request and error counts, maximum and total response time, and the
/// running mean and second moment of the response time (Welford's online
/// algorithm), which merge exactly across threads. Response times are kept in
/// nanoseconds.
#[aggregate(Request)]
#[derive(PartialEq)]
pub struct BasicOperationStats {
    pub requests: u64,
    pub errors: u64,
    pub response_time_max: u64,
    pub response_time_sum: u64,
    response_time_mean: f64,
    // var = m2 / (n - 1)
    response_time_m2: f64,
}

impl BasicOperationStats {
    pub fn mean_and_dev(&self) -> MeanAndDev {
        if self.requests < 2 {
            return MeanAndDev {
                mean: self.response_time_mean,
                dev: 0.0,
            };
        }
        MeanAndDev {
            mean: self.response_time_mean,
            dev: self.std_dev(),
        }
    }

    /// Box plot under the normal approximation of the response time.
    pub fn box_and_whiskers(&self) -> BoxAndWhiskers {
        let mean = self.response_time_mean;
        if self.requests < 2 {
            return BoxAndWhiskers {
                max_regular: mean,
                upper_quartile: mean,
                mean,
                lower_quartile: mean,
                min_regular: mean,
            };
        }
        let dev = self.std_dev();
        BoxAndWhiskers {
            max_regular: mean + INVERSE_NORMAL_95 * dev,
            upper_quartile: mean + INVERSE_NORMAL_50 * dev,
            mean,
            lower_quartile: mean - INVERSE_NORMAL_50 * dev,
            min_regular: mean - INVERSE_NORMAL_95 * dev,
        }
    }

    pub fn representation(
        &self,
        kind: RepresentationKind,
        window_ms: u64,
    ) -> Option<Representation> {
        match kind {
            RepresentationKind::DefaultOutcome => {
                Some(Representation::DefaultOutcome(DefaultOutcome {
                    requests: self.requests,
                    errors: self.errors,
                    response_time_mean: self.response_time_mean,
                    response_time_max: self.response_time_max,
                }))
            }
            RepresentationKind::MeanAndDev => Some(Representation::MeanAndDev(self.mean_and_dev())),
            RepresentationKind::BoxAndWhiskers => {
                Some(Representation::BoxAndWhiskers(self.box_and_whiskers()))
            }
            RepresentationKind::Throughput => Some(Representation::Throughput(
                OperationThroughput::compute(self.requests, self.errors, window_ms),
            )),
            RepresentationKind::Percentile(_) | RepresentationKind::Histogram { .. } => None,
        }
    }

    fn std_dev(&self) -> f64 {
        (self.response_time_m2 / (self.requests - 1) as f64).sqrt()
    }

    fn record_duration(&mut self, duration: u64) {
        self.requests += 1;
        self.response_time_max = self.response_time_max.max(duration);
        self.response_time_sum = self.response_time_sum.saturating_add(duration);
        let delta = duration as f64 - self.response_time_mean;
        self.response_time_mean += delta / self.requests as f64;
        self.response_time_m2 += delta * (duration as f64 - self.response_time_mean);
    }
}

fn merge_mean(my_mean: f64, my_n: f64, other_mean: f64, other_n: f64) -> f64 {
    if my_n + other_n == 0.0 {
        return 0.0;
    }
    (my_mean * my_n + other_mean * other_n) / (my_n + other_n)
}

fn merge_m2(my_mean: f64, my_m2: f64, my_n: f64, other_mean: f64, other_m2: f64, other_n: f64) -> f64 {
    if my_n + other_n == 0.0 {
        return 0.0;
    }
    let delta = my_mean - other_mean;
    my_m2 + other_m2 + delta * delta * other_n * my_n / (other_n + my_n)
}

impl Aggregate for BasicOperationStats {
    type Metric = Request;

    fn new() -> Self {
        Self {
            requests: 0,
            errors: 0,
            response_time_max: 0,
            response_time_sum: 0,
            response_time_mean: 0.0,
            response_time_m2: 0.0,
        }
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.record_duration(metric.latency_nanos());
        if !metric.success {
            self.errors += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        let (my_n, other_n) = (self.requests as f64, other.requests as f64);
        self.response_time_m2 = merge_m2(
            self.response_time_mean,
            self.response_time_m2,
            my_n,
            other.response_time_mean,
            other.response_time_m2,
            other_n,
        );
        self.response_time_mean =
            merge_mean(self.response_time_mean, my_n, other.response_time_mean, other_n);
        self.requests += other.requests;
        self.errors += other.errors;
        self.response_time_max = self.response_time_max.max(other.response_time_max);
        self.response_time_sum = self.response_time_sum.saturating_add(other.response_time_sum);
    }

    fn is_empty(&self) -> bool {
        self.requests == 0
    }
}
