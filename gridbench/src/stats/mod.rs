//! Statistics sinks the stressors record into.
//!
//! An [`OperationStats`] accumulates the samples of one operation. A
//! [`Statistics`] owns one of them per operation name together with the time
//! window it was recording in and the operation groups reported together.
//! Both merge, so per-thread statistics can be combined into a per-worker
//! result and per-worker results into the cluster-wide one.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    Aggregate,
    aggregate::{BasicOperationStats, HistogramOperationStats},
    error::StatsError,
    metric::Request,
    operation::Operation,
    representation::{Representation, RepresentationKind},
};

mod basic;
mod periodic;
mod shared;

pub use basic::BasicStatistics;
pub use periodic::PeriodicStatistics;
pub use shared::SharedStatistics;

/// Accumulator for the samples of a single operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OperationStats {
    Basic(BasicOperationStats),
    Histogram(HistogramOperationStats),
    /// Records into every child; answers a representation from the first
    /// child able to produce it.
    Multi(Vec<OperationStats>),
}

impl Default for OperationStats {
    fn default() -> Self {
        Self::basic()
    }
}

impl OperationStats {
    pub fn basic() -> Self {
        Self::Basic(BasicOperationStats::new())
    }

    pub fn histogram(max_value: u64, digits: u8) -> Result<Self, StatsError> {
        HistogramOperationStats::with_bounds(max_value, digits).map(Self::Histogram)
    }

    pub fn multi(children: Vec<OperationStats>) -> Self {
        Self::Multi(children)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::Histogram(_) => "histogram",
            Self::Multi(_) => "multi",
        }
    }

    /// Empty accumulator with the same configuration.
    pub fn new_instance(&self) -> Self {
        match self {
            Self::Basic(s) => Self::Basic(s.new_instance()),
            Self::Histogram(s) => Self::Histogram(s.new_instance()),
            Self::Multi(children) => Self::Multi(children.iter().map(Self::new_instance).collect()),
        }
    }

    pub fn record(&mut self, request: &Request) {
        match self {
            Self::Basic(s) => s.consume(request),
            Self::Histogram(s) => s.consume(request),
            Self::Multi(children) => children.iter_mut().for_each(|c| c.record(request)),
        }
    }

    /// Fails without touching `self` when `other` has a different shape.
    pub fn merge(&mut self, other: &OperationStats) -> Result<(), StatsError> {
        self.check_mergeable(other)?;
        self.merge_unchecked(other);
        Ok(())
    }

    pub(crate) fn check_mergeable(&self, other: &OperationStats) -> Result<(), StatsError> {
        match (self, other) {
            (Self::Basic(_), Self::Basic(_)) => Ok(()),
            (Self::Histogram(mine), Self::Histogram(theirs)) => {
                if (mine.max_value(), mine.digits()) != (theirs.max_value(), theirs.digits()) {
                    return Err(StatsError::MismatchedHistogramBounds {
                        this_max_value: mine.max_value(),
                        this_digits: mine.digits(),
                        other_max_value: theirs.max_value(),
                        other_digits: theirs.digits(),
                    });
                }
                Ok(())
            }
            (Self::Multi(mine), Self::Multi(theirs)) => {
                if mine.len() != theirs.len() {
                    return Err(StatsError::MismatchedChildren {
                        this: mine.len(),
                        other: theirs.len(),
                    });
                }
                mine.iter()
                    .zip(theirs)
                    .try_for_each(|(m, t)| m.check_mergeable(t))
            }
            _ => Err(StatsError::MismatchedMerge {
                this: self.kind_name(),
                other: other.kind_name(),
            }),
        }
    }

    fn merge_unchecked(&mut self, other: &OperationStats) {
        match (self, other) {
            (Self::Basic(mine), Self::Basic(theirs)) => mine.merge(theirs.clone()),
            (Self::Histogram(mine), Self::Histogram(theirs)) => mine.merge(theirs.clone()),
            (Self::Multi(mine), Self::Multi(theirs)) => mine
                .iter_mut()
                .zip(theirs)
                .for_each(|(m, t)| m.merge_unchecked(t)),
            _ => unreachable!("shapes checked before merging"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Basic(s) => s.is_empty(),
            Self::Histogram(s) => s.is_empty(),
            Self::Multi(children) => children.iter().all(Self::is_empty),
        }
    }

    /// `window_ms` is the length of the owning statistics' window, used for
    /// throughput.
    pub fn representation(
        &self,
        kind: RepresentationKind,
        window_ms: u64,
    ) -> Option<Representation> {
        match self {
            Self::Basic(s) => s.representation(kind, window_ms),
            Self::Histogram(s) => s.representation(kind, window_ms),
            Self::Multi(children) => children
                .iter()
                .find_map(|c| c.representation(kind, window_ms)),
        }
    }
}

/// Recording window in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub begin: Option<u64>,
    pub end: Option<u64>,
}

impl Interval {
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if begin <= end => Some(end - begin),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.duration_ms().is_some()
    }

    /// Earliest begin, latest end.
    pub fn merge(&mut self, other: &Interval) {
        self.begin = min_some(self.begin, other.begin);
        self.end = self.end.max(other.end);
    }
}

fn min_some(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Everything one stressor (or, once merged, one worker or the whole
/// cluster) recorded during a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statistics {
    Basic(BasicStatistics),
    Periodic(PeriodicStatistics),
}

impl Default for Statistics {
    fn default() -> Self {
        Self::Basic(BasicStatistics::default())
    }
}

impl From<BasicStatistics> for Statistics {
    fn from(stats: BasicStatistics) -> Self {
        Self::Basic(stats)
    }
}

impl From<PeriodicStatistics> for Statistics {
    fn from(stats: PeriodicStatistics) -> Self {
        Self::Periodic(stats)
    }
}

impl Statistics {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::Periodic(_) => "periodic",
        }
    }

    pub fn begin(&mut self) {
        match self {
            Self::Basic(s) => s.begin(),
            Self::Periodic(s) => s.begin(),
        }
    }

    pub fn end(&mut self) {
        match self {
            Self::Basic(s) => s.end(),
            Self::Periodic(s) => s.end(),
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            Self::Basic(s) => s.interval(),
            Self::Periodic(s) => s.interval(),
        }
    }

    pub fn record(&mut self, operation: &Operation, request: &Request) {
        match self {
            Self::Basic(s) => s.record(operation, request),
            Self::Periodic(s) => s.record(operation, request),
        }
    }

    /// Same configuration and operation groups, no data.
    pub fn new_instance(&self) -> Self {
        match self {
            Self::Basic(s) => Self::Basic(s.new_instance()),
            Self::Periodic(s) => Self::Periodic(s.new_instance()),
        }
    }

    pub fn merge(&mut self, other: &Statistics) -> Result<(), StatsError> {
        match (self, other) {
            (Self::Basic(mine), Self::Basic(theirs)) => mine.merge(theirs),
            (Self::Periodic(mine), Self::Periodic(theirs)) => mine.merge(theirs),
            (mine, theirs) => Err(StatsError::MismatchedMerge {
                this: mine.kind_name(),
                other: theirs.kind_name(),
            }),
        }
    }

    /// Folds every statistics into one; `None` for an empty iterator.
    pub fn merge_all<'a>(
        statistics: impl IntoIterator<Item = &'a Statistics>,
    ) -> Result<Option<Statistics>, StatsError> {
        let mut merged: Option<Statistics> = None;
        for stats in statistics {
            match merged.as_mut() {
                Some(m) => m.merge(stats)?,
                None => merged = Some(stats.clone()),
            }
        }
        Ok(merged)
    }

    /// Reports `operations` together under `name`. Registering the same group
    /// again with the same members is a no-op.
    pub fn register_operations_group(
        &mut self,
        name: &str,
        operations: &[Operation],
    ) -> Result<(), StatsError> {
        match self {
            Self::Basic(s) => s.register_operations_group(name, operations),
            Self::Periodic(s) => s.register_operations_group(name, operations),
        }
    }

    pub fn operations_group(&self, operation: &Operation) -> Option<&str> {
        match self {
            Self::Basic(s) => s.operations_group(operation.name()),
            Self::Periodic(s) => s.operations_group(operation.name()),
        }
    }

    pub fn group_operations(&self) -> &BTreeMap<String, BTreeSet<String>> {
        match self {
            Self::Basic(s) => s.group_operations(),
            Self::Periodic(s) => s.group_operations(),
        }
    }

    /// One merged accumulator per registered group. Operations outside any
    /// group are not part of this view.
    pub fn operation_stats_for_groups(&self) -> Result<BTreeMap<String, OperationStats>, StatsError> {
        match self {
            Self::Basic(s) => s.operation_stats_for_groups(),
            Self::Periodic(s) => s.operation_stats_for_groups(),
        }
    }

    pub fn operations(&self) -> BTreeSet<String> {
        match self {
            Self::Basic(s) => s.operations().cloned().collect(),
            Self::Periodic(s) => s.operations(),
        }
    }

    /// `operation` may also name a group. Periodic statistics answer a
    /// [`Representation::Series`] with one entry per period.
    pub fn representation(
        &self,
        operation: &str,
        kind: RepresentationKind,
    ) -> Option<Representation> {
        match self {
            Self::Basic(s) => s.representation(operation, kind),
            Self::Periodic(s) => Some(s.representation(operation, kind)),
        }
    }

    /// Total number of requests recorded across all operations.
    pub fn request_count(&self) -> u64 {
        self.operations()
            .iter()
            .filter_map(|op| self.representation(op, RepresentationKind::DefaultOutcome))
            .map(|r| outcome_requests(&r))
            .sum()
    }
}

fn outcome_requests(representation: &Representation) -> u64 {
    match representation {
        Representation::DefaultOutcome(outcome) => outcome.requests,
        Representation::Series { data, .. } => data.iter().flatten().map(outcome_requests).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRegistry;
    use std::time::Duration;

    fn request(millis: u64, success: bool) -> Request {
        Request {
            latency: Duration::from_millis(millis),
            success,
        }
    }

    #[test]
    fn multi_records_into_every_child() {
        let mut stats = OperationStats::multi(vec![
            OperationStats::basic(),
            OperationStats::histogram(1_000_000_000, 2).unwrap(),
        ]);
        stats.record(&request(1, true));
        stats.record(&request(2, false));
        let OperationStats::Multi(children) = &stats else {
            unreachable!()
        };
        assert!(children.iter().all(|c| !c.is_empty()));
        assert!(matches!(
            stats.representation(RepresentationKind::BoxAndWhiskers, 1000),
            Some(Representation::BoxAndWhiskers(_))
        ));
        assert!(matches!(
            stats.representation(RepresentationKind::Percentile(99.0), 1000),
            Some(Representation::Percentile(_))
        ));
    }

    #[test]
    fn mismatched_merge_is_rejected() {
        let mut basic = OperationStats::basic();
        basic.record(&request(1, true));
        let histogram = OperationStats::histogram(1_000_000, 2).unwrap();
        assert!(matches!(
            basic.merge(&histogram),
            Err(StatsError::MismatchedMerge { .. })
        ));
        let mut multi = OperationStats::multi(vec![OperationStats::basic()]);
        let other = OperationStats::multi(vec![OperationStats::basic(), OperationStats::basic()]);
        assert!(matches!(
            multi.merge(&other),
            Err(StatsError::MismatchedChildren { this: 1, other: 2 })
        ));
    }

    #[test]
    fn histograms_with_other_bounds_are_rejected() {
        let mut narrow = OperationStats::histogram(1_000_000, 2).unwrap();
        let mut wide = OperationStats::histogram(10_000_000_000, 2).unwrap();
        wide.record(&request(1, false));
        wide.record(&request(2, true));
        assert!(matches!(
            narrow.merge(&wide),
            Err(StatsError::MismatchedHistogramBounds {
                this_max_value: 1_000_000,
                other_max_value: 10_000_000_000,
                ..
            })
        ));
        assert!(narrow.is_empty());

        let finer = OperationStats::histogram(1_000_000, 3).unwrap();
        assert!(narrow.merge(&finer).is_err());

        let mut same = OperationStats::histogram(10_000_000_000, 2).unwrap();
        same.merge(&wide).unwrap();
        let Some(Representation::DefaultOutcome(outcome)) =
            same.representation(RepresentationKind::DefaultOutcome, 1000)
        else {
            panic!("histogram has a default outcome");
        };
        assert_eq!((outcome.requests, outcome.errors), (2, 1));
    }

    #[test]
    fn interval_merge_takes_the_outer_bounds() {
        let mut a = Interval {
            begin: Some(100),
            end: Some(200),
        };
        a.merge(&Interval {
            begin: Some(50),
            end: Some(150),
        });
        assert_eq!(a.duration_ms(), Some(150));
        a.merge(&Interval::default());
        assert_eq!((a.begin, a.end), (Some(50), Some(200)));
    }

    #[test]
    fn merge_all_folds_statistics() {
        let registry = OperationRegistry::new();
        let put = registry.register("PUT");
        let parts: Vec<Statistics> = (0..3)
            .map(|_| {
                let mut stats = Statistics::default();
                stats.begin();
                stats.record(&put, &request(1, true));
                stats.end();
                stats
            })
            .collect();
        let merged = Statistics::merge_all(&parts).unwrap().unwrap();
        assert_eq!(merged.request_count(), 3);
        assert!(Statistics::merge_all(&Vec::new()).unwrap().is_none());
    }

    #[test]
    fn basic_and_periodic_do_not_merge() {
        let mut basic = Statistics::default();
        let periodic = Statistics::from(PeriodicStatistics::new(BasicStatistics::default(), 1000));
        assert!(basic.merge(&periodic).is_err());
    }

    #[test]
    fn statistics_travel_as_json() {
        let registry = OperationRegistry::new();
        let get = registry.register("GET");
        let mut stats = Statistics::from(BasicStatistics::new(OperationStats::multi(vec![
            OperationStats::basic(),
            OperationStats::histogram(1_000_000_000, 2).unwrap(),
        ])));
        stats.register_operations_group("reads", &[get.clone()]).unwrap();
        stats.begin();
        stats.record(&get, &request(3, true));
        stats.end();
        let json = serde_json::to_string(&stats).unwrap();
        let back: Statistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_count(), 1);
        assert_eq!(back.operations_group(&get), Some("reads"));
        assert_eq!(back.interval(), stats.interval());
    }
}
