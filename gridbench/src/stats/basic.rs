use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    error::StatsError,
    metric::Request,
    operation::Operation,
    representation::{Representation, RepresentationKind},
};

use super::{Interval, OperationStats, now_millis};

/// Statistics with one accumulator per operation, stamped out of `prototype`
/// on first use. Operations are keyed by name so the statistics stay
/// meaningful in another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicStatistics {
    prototype: OperationStats,
    operations: BTreeMap<String, OperationStats>,
    groups: BTreeMap<String, BTreeSet<String>>,
    operation_groups: BTreeMap<String, String>,
    interval: Interval,
}

impl Default for BasicStatistics {
    fn default() -> Self {
        Self::new(OperationStats::basic())
    }
}

impl BasicStatistics {
    pub fn new(prototype: OperationStats) -> Self {
        Self {
            prototype,
            operations: BTreeMap::new(),
            groups: BTreeMap::new(),
            operation_groups: BTreeMap::new(),
            interval: Interval::default(),
        }
    }

    pub fn prototype(&self) -> &OperationStats {
        &self.prototype
    }

    pub fn begin(&mut self) {
        self.interval.begin = Some(now_millis());
    }

    pub fn end(&mut self) {
        self.interval.end = Some(now_millis());
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub(crate) fn set_interval(&mut self, interval: Interval) {
        self.interval = interval;
    }

    pub fn record(&mut self, operation: &Operation, request: &Request) {
        match self.operations.get_mut(operation.name()) {
            Some(stats) => stats.record(request),
            None => {
                let mut stats = self.prototype.new_instance();
                stats.record(request);
                self.operations.insert(operation.name().to_owned(), stats);
            }
        }
    }

    pub fn new_instance(&self) -> Self {
        Self {
            prototype: self.prototype.clone(),
            operations: BTreeMap::new(),
            groups: self.groups.clone(),
            operation_groups: self.operation_groups.clone(),
            interval: Interval::default(),
        }
    }

    pub(crate) fn check_mergeable(&self, other: &BasicStatistics) -> Result<(), StatsError> {
        self.prototype.check_mergeable(&other.prototype)?;
        for (name, theirs) in &other.operations {
            if let Some(mine) = self.operations.get(name) {
                mine.check_mergeable(theirs)?;
            }
        }
        Ok(())
    }

    /// Leaves `self` untouched when any operation fails to merge.
    pub fn merge(&mut self, other: &BasicStatistics) -> Result<(), StatsError> {
        self.check_mergeable(other)?;
        for (name, theirs) in &other.operations {
            match self.operations.get_mut(name) {
                Some(mine) => mine.merge(theirs)?,
                None => {
                    self.operations.insert(name.clone(), theirs.clone());
                }
            }
        }
        self.interval.merge(&other.interval);
        self.merge_groups(other);
        Ok(())
    }

    pub(crate) fn merge_groups(&mut self, other: &BasicStatistics) {
        for (name, members) in &other.groups {
            if let Err(e) = self.check_group(name, members) {
                tracing::warn!("Not merging operations group {name}: {e}");
                continue;
            }
            self.insert_group(name, members);
        }
    }

    pub fn register_operations_group(
        &mut self,
        name: &str,
        operations: &[Operation],
    ) -> Result<(), StatsError> {
        let members: BTreeSet<String> = operations.iter().map(|o| o.name().to_owned()).collect();
        self.check_group(name, &members)?;
        self.insert_group(name, &members);
        Ok(())
    }

    fn check_group(&self, name: &str, members: &BTreeSet<String>) -> Result<(), StatsError> {
        if let Some(existing) = self.groups.get(name) {
            return if existing == members {
                Ok(())
            } else {
                Err(StatsError::GroupConflict(name.to_owned()))
            };
        }
        for operation in members {
            if let Some(group) = self.operation_groups.get(operation) {
                return Err(StatsError::OperationInOtherGroup {
                    operation: operation.clone(),
                    group: group.clone(),
                });
            }
        }
        Ok(())
    }

    fn insert_group(&mut self, name: &str, members: &BTreeSet<String>) {
        for operation in members {
            self.operation_groups
                .insert(operation.clone(), name.to_owned());
        }
        self.groups.insert(name.to_owned(), members.clone());
    }

    pub fn operations_group(&self, operation: &str) -> Option<&str> {
        self.operation_groups.get(operation).map(String::as_str)
    }

    pub fn group_operations(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.groups
    }

    pub fn operation_stats_for_groups(
        &self,
    ) -> Result<BTreeMap<String, OperationStats>, StatsError> {
        self.groups
            .iter()
            .map(|(name, members)| Ok((name.clone(), self.group_stats(members)?)))
            .collect()
    }

    fn group_stats(&self, members: &BTreeSet<String>) -> Result<OperationStats, StatsError> {
        let mut merged = self.prototype.new_instance();
        for stats in members.iter().filter_map(|m| self.operations.get(m)) {
            merged.merge(stats)?;
        }
        Ok(merged)
    }

    pub fn operations(&self) -> impl Iterator<Item = &String> {
        self.operations.keys()
    }

    pub fn operation_stats(&self, operation: &str) -> Option<&OperationStats> {
        self.operations.get(operation)
    }

    /// Looks `operation` up as an operation, then as a group. Unknown names
    /// are answered by an empty accumulator.
    pub fn representation(
        &self,
        operation: &str,
        kind: RepresentationKind,
    ) -> Option<Representation> {
        let window_ms = self.interval.duration_ms().unwrap_or(0);
        if let Some(stats) = self.operations.get(operation) {
            return stats.representation(kind, window_ms);
        }
        if let Some(members) = self.groups.get(operation) {
            return match self.group_stats(members) {
                Ok(stats) => stats.representation(kind, window_ms),
                Err(e) => {
                    tracing::warn!("Cannot merge operations of group {operation}: {e}");
                    None
                }
            };
        }
        self.prototype.new_instance().representation(kind, window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{operation::OperationRegistry, representation::DefaultOutcome};
    use std::time::Duration;

    fn request(millis: u64, success: bool) -> Request {
        Request {
            latency: Duration::from_millis(millis),
            success,
        }
    }

    fn outcome(stats: &BasicStatistics, name: &str) -> DefaultOutcome {
        match stats.representation(name, RepresentationKind::DefaultOutcome) {
            Some(Representation::DefaultOutcome(outcome)) => outcome,
            other => panic!("unexpected representation {other:?}"),
        }
    }

    #[test]
    fn records_per_operation() {
        let registry = OperationRegistry::new();
        let (get, put) = (registry.register("GET"), registry.register("PUT"));
        let mut stats = BasicStatistics::default();
        stats.record(&get, &request(1, true));
        stats.record(&get, &request(3, false));
        stats.record(&put, &request(2, true));
        assert_eq!(outcome(&stats, "GET").requests, 2);
        assert_eq!(outcome(&stats, "GET").errors, 1);
        assert_eq!(outcome(&stats, "PUT").requests, 1);
        assert_eq!(outcome(&stats, "REMOVE").requests, 0);
        assert_eq!(stats.operations().count(), 2);
    }

    #[test]
    fn group_registration_is_idempotent() {
        let registry = OperationRegistry::new();
        let (get, put) = (registry.register("GET"), registry.register("PUT"));
        let mut stats = BasicStatistics::default();
        stats
            .register_operations_group("all", &[get.clone(), put.clone()])
            .unwrap();
        stats
            .register_operations_group("all", &[put.clone(), get.clone()])
            .unwrap();
        assert!(matches!(
            stats.register_operations_group("all", &[get.clone()]),
            Err(StatsError::GroupConflict(_))
        ));
        assert!(matches!(
            stats.register_operations_group("reads", &[get.clone()]),
            Err(StatsError::OperationInOtherGroup { .. })
        ));
        assert_eq!(stats.operations_group("PUT"), Some("all"));
        assert_eq!(stats.group_operations().len(), 1);
    }

    #[test]
    fn stats_for_groups_merge_members() {
        let registry = OperationRegistry::new();
        let (get, put, remove) = (
            registry.register("GET"),
            registry.register("PUT"),
            registry.register("REMOVE"),
        );
        let mut stats = BasicStatistics::default();
        stats
            .register_operations_group("reads", &[get.clone()])
            .unwrap();
        stats
            .register_operations_group("writes", &[put.clone(), remove.clone()])
            .unwrap();
        stats.record(&put, &request(1, true));
        stats.record(&remove, &request(1, true));
        let groups = stats.operation_stats_for_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups["reads"].is_empty());
        assert_eq!(outcome(&stats, "writes").requests, 2);
    }

    #[test]
    fn merge_combines_operations_and_windows() {
        let registry = OperationRegistry::new();
        let get = registry.register("GET");
        let mut left = BasicStatistics::default();
        left.set_interval(Interval {
            begin: Some(1000),
            end: Some(2000),
        });
        left.record(&get, &request(1, true));
        let mut right = left.new_instance();
        right.set_interval(Interval {
            begin: Some(900),
            end: Some(2500),
        });
        right.record(&get, &request(5, true));
        left.merge(&right).unwrap();
        assert_eq!(outcome(&left, "GET").requests, 2);
        assert_eq!(left.interval().duration_ms(), Some(1600));
    }

    #[test]
    fn conflicting_groups_are_skipped_on_merge() {
        let registry = OperationRegistry::new();
        let (get, put) = (registry.register("GET"), registry.register("PUT"));
        let mut left = BasicStatistics::default();
        left.register_operations_group("g", &[get.clone()]).unwrap();
        let mut right = BasicStatistics::default();
        right.register_operations_group("g", &[put.clone()]).unwrap();
        right.register_operations_group("h", &[get.clone()]).unwrap();
        left.merge(&right).unwrap();
        assert_eq!(left.operations_group("GET"), Some("g"));
        assert_eq!(left.operations_group("PUT"), None);
    }

    #[test]
    fn new_instance_keeps_groups_only() {
        let registry = OperationRegistry::new();
        let get = registry.register("GET");
        let mut stats = BasicStatistics::default();
        stats.register_operations_group("g", &[get.clone()]).unwrap();
        stats.begin();
        stats.record(&get, &request(1, true));
        let fresh = stats.new_instance();
        assert_eq!(fresh.operations().count(), 0);
        assert_eq!(fresh.operations_group("GET"), Some("g"));
        assert_eq!(fresh.interval(), Interval::default());
    }

    #[test]
    fn failed_merge_leaves_statistics_untouched() {
        let registry = OperationRegistry::new();
        let (get, put) = (registry.register("GET"), registry.register("PUT"));
        let mut left = BasicStatistics::default();
        left.record(&get, &request(1, true));
        let mut right = BasicStatistics::new(OperationStats::histogram(1_000_000_000, 2).unwrap());
        right.record(&put, &request(1, true));
        right.record(&get, &request(1, true));
        assert!(left.merge(&right).is_err());
        assert_eq!(left.operations().count(), 1);
        assert_eq!(outcome(&left, "GET").requests, 1);
    }

    #[test]
    fn different_prototypes_do_not_merge_even_without_shared_operations() {
        let registry = OperationRegistry::new();
        let (get, put) = (registry.register("GET"), registry.register("PUT"));
        let mut histograms = BasicStatistics::new(OperationStats::histogram(1_000_000_000, 2).unwrap());
        histograms.record(&get, &request(1, true));
        let mut basic = BasicStatistics::default();
        basic.record(&put, &request(1, true));
        assert!(matches!(
            histograms.merge(&basic),
            Err(StatsError::MismatchedMerge {
                this: "histogram",
                other: "basic"
            })
        ));
        assert_eq!(histograms.operations().count(), 1);
        assert!(histograms.operation_stats_for_groups().is_ok());
    }
}
