use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::StatsError,
    metric::Request,
    operation::Operation,
    representation::{Representation, RepresentationKind},
};

use super::{BasicStatistics, Interval, OperationStats, now_millis};

/// Splits the recording window into `period`-long buckets, each a
/// [`BasicStatistics`], so changes of the response time over the test become
/// visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicStatistics {
    prototype: BasicStatistics,
    period_ms: u64,
    buckets: Vec<BasicStatistics>,
    interval: Interval,
    #[serde(skip)]
    begin_instant: Option<Instant>,
}

impl PeriodicStatistics {
    /// A zero period is treated as one millisecond.
    pub fn new(prototype: BasicStatistics, period_ms: u64) -> Self {
        Self {
            prototype: prototype.new_instance(),
            period_ms: period_ms.max(1),
            buckets: Vec::new(),
            interval: Interval::default(),
            begin_instant: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn buckets(&self) -> &[BasicStatistics] {
        &self.buckets
    }

    pub fn begin(&mut self) {
        self.interval.begin = Some(now_millis());
        self.begin_instant = Some(Instant::now());
    }

    /// Drops the trailing bucket when it covers less than 5 % of a period;
    /// such leftovers only skew the series.
    pub fn end(&mut self) {
        let end = now_millis();
        self.interval.end = Some(end);
        let threshold = self.period_ms / 20;
        let leftover = self
            .buckets
            .last()
            .and_then(|b| b.interval().begin)
            .is_some_and(|bucket_begin| end.saturating_sub(bucket_begin) < threshold);
        if leftover {
            self.buckets.pop();
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The request is accounted to the period it started in.
    pub fn record(&mut self, operation: &Operation, request: &Request) {
        let now = Instant::now();
        let started = now.checked_sub(request.latency).unwrap_or(now);
        let elapsed = self
            .begin_instant
            .map(|begin| started.saturating_duration_since(begin).as_millis() as u64)
            .unwrap_or(0);
        self.record_at(elapsed, operation, request);
    }

    pub(crate) fn record_at(&mut self, elapsed_ms: u64, operation: &Operation, request: &Request) {
        let index = (elapsed_ms / self.period_ms) as usize;
        self.bucket(index).record(operation, request);
    }

    fn bucket(&mut self, index: usize) -> &mut BasicStatistics {
        while self.buckets.len() <= index {
            let bucket = self.bucket_instance(self.buckets.len());
            self.buckets.push(bucket);
        }
        &mut self.buckets[index]
    }

    fn bucket_instance(&self, index: usize) -> BasicStatistics {
        let mut bucket = self.prototype.new_instance();
        if let Some(begin) = self.interval.begin {
            let start = begin + index as u64 * self.period_ms;
            bucket.set_interval(Interval {
                begin: Some(start),
                end: Some(start + self.period_ms),
            });
        }
        bucket
    }

    pub fn new_instance(&self) -> Self {
        Self::new(self.prototype.clone(), self.period_ms)
    }

    /// Aligns the buckets of both statistics by the distance of their begin
    /// timestamps, rounded to whole periods.
    pub fn merge(&mut self, other: &PeriodicStatistics) -> Result<(), StatsError> {
        if self.period_ms != other.period_ms {
            return Err(StatsError::DifferentPeriods {
                this: self.period_ms,
                other: other.period_ms,
            });
        }
        self.prototype.check_mergeable(&other.prototype)?;
        let (Some(begin), Some(other_begin)) = (self.interval.begin, other.interval.begin) else {
            return Err(StatsError::UnsetWindow);
        };
        if !self.interval.is_set() || !other.interval.is_set() {
            return Err(StatsError::UnsetWindow);
        }
        let distance = begin.abs_diff(other_begin);
        let mut offset = (distance / self.period_ms) as usize;
        if 2 * (distance - offset as u64 * self.period_ms) > self.period_ms {
            offset += 1;
        }
        let (own_shift, other_shift) = if other_begin < begin {
            (offset, 0)
        } else {
            (0, offset)
        };

        for (i, theirs) in other.buckets.iter().enumerate() {
            let index = i + other_shift;
            if let Some(mine) = index
                .checked_sub(own_shift)
                .and_then(|own| self.buckets.get(own))
            {
                mine.check_mergeable(theirs)?;
            }
        }

        if own_shift > 0 {
            let padding: Vec<BasicStatistics> = (0..own_shift)
                .map(|_| self.prototype.new_instance())
                .collect();
            self.buckets.splice(0..0, padding);
        }
        for (i, theirs) in other.buckets.iter().enumerate() {
            let index = i + other_shift;
            while self.buckets.len() <= index {
                self.buckets.push(self.prototype.new_instance());
            }
            self.buckets[index].merge(theirs)?;
        }
        self.prototype.merge_groups(&other.prototype);
        self.interval.merge(&other.interval);
        Ok(())
    }

    pub fn register_operations_group(
        &mut self,
        name: &str,
        operations: &[Operation],
    ) -> Result<(), StatsError> {
        self.prototype.register_operations_group(name, operations)?;
        for bucket in &mut self.buckets {
            bucket.register_operations_group(name, operations)?;
        }
        Ok(())
    }

    pub fn operations_group(&self, operation: &str) -> Option<&str> {
        self.prototype.operations_group(operation)
    }

    pub fn group_operations(&self) -> &BTreeMap<String, BTreeSet<String>> {
        self.prototype.group_operations()
    }

    /// Group totals over the whole window.
    pub fn operation_stats_for_groups(
        &self,
    ) -> Result<BTreeMap<String, OperationStats>, StatsError> {
        let mut merged = self.prototype.operation_stats_for_groups()?;
        for bucket in &self.buckets {
            for (name, stats) in bucket.operation_stats_for_groups()? {
                match merged.get_mut(&name) {
                    Some(total) => total.merge(&stats)?,
                    None => {
                        merged.insert(name, stats);
                    }
                }
            }
        }
        Ok(merged)
    }

    pub fn operations(&self) -> BTreeSet<String> {
        self.buckets
            .iter()
            .flat_map(|b| b.operations().cloned())
            .collect()
    }

    pub fn representation(&self, operation: &str, kind: RepresentationKind) -> Representation {
        Representation::Series {
            begin: self.interval.begin,
            period: self.period_ms,
            data: self
                .buckets
                .iter()
                .map(|b| b.representation(operation, kind))
                .collect(),
        }
    }
}
