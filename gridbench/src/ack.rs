//! What a worker sends back to the master after a test stage, and how the
//! master folds the answers of all nodes together.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{error::StatsError, stats::Statistics};

/// Merged statistics of one worker plus the operation groups registered
/// on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsAck {
    pub worker_index: usize,
    pub statistics: Statistics,
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl StatisticsAck {
    pub fn new(worker_index: usize, statistics: Statistics) -> Self {
        let groups = statistics.group_operations().clone();
        Self {
            worker_index,
            statistics,
            groups,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerAck {
    Statistics(StatisticsAck),
    Error { worker_index: usize, message: String },
}

impl WorkerAck {
    pub fn error(worker_index: usize, error: impl std::fmt::Display) -> Self {
        Self::Error {
            worker_index,
            message: error.to_string(),
        }
    }

    pub fn worker_index(&self) -> usize {
        match self {
            Self::Statistics(ack) => ack.worker_index,
            Self::Error { worker_index, .. } => *worker_index,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl From<StatisticsAck> for WorkerAck {
    fn from(ack: StatisticsAck) -> Self {
        Self::Statistics(ack)
    }
}

/// Stage result across the cluster.
#[derive(Debug, Clone, Default)]
pub struct MergedAcks {
    /// `None` when no worker delivered statistics.
    pub statistics: Option<Statistics>,
    pub groups: BTreeMap<String, BTreeSet<String>>,
    /// Worker index and message of every failed worker.
    pub failures: Vec<(usize, String)>,
}

impl MergedAcks {
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && self.statistics.is_some()
    }
}

/// Merges the statistics of all successful workers in worker order.
///
/// Failed workers don't prevent the merge; they are listed in
/// [`MergedAcks::failures`]. Statistics that cannot be merged with each
/// other are an error.
pub fn merge_acks<'a>(acks: impl IntoIterator<Item = &'a WorkerAck>) -> Result<MergedAcks, StatsError> {
    let mut acks: Vec<&WorkerAck> = acks.into_iter().collect();
    acks.sort_by_key(|ack| ack.worker_index());

    let mut merged = MergedAcks::default();
    let mut statistics = Vec::with_capacity(acks.len());
    for ack in acks {
        match ack {
            WorkerAck::Statistics(ack) => {
                for (group, operations) in &ack.groups {
                    merged
                        .groups
                        .entry(group.clone())
                        .or_default()
                        .extend(operations.iter().cloned());
                }
                statistics.push(&ack.statistics);
            }
            WorkerAck::Error {
                worker_index,
                message,
            } => {
                tracing::warn!("Worker {worker_index} failed: {message}");
                merged.failures.push((*worker_index, message.clone()));
            }
        }
    }
    merged.statistics = Statistics::merge_all(statistics)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        metric::Request,
        operation::OperationRegistry,
        stats::{BasicStatistics, OperationStats, PeriodicStatistics},
    };

    fn worker_stats(registry: &OperationRegistry, requests: usize) -> Statistics {
        let get = registry.register("GET");
        let put = registry.register("PUT");
        let mut stats = Statistics::default();
        stats.register_operations_group("reads", &[get.clone()]).unwrap();
        stats.begin();
        for _ in 0..requests {
            stats.record(&get, &Request::succeeded(Duration::from_micros(50)));
        }
        stats.record(&put, &Request::failed(Duration::from_micros(80)));
        stats.end();
        stats
    }

    #[test]
    fn ack_survives_json() {
        let registry = OperationRegistry::new();
        let ack: WorkerAck = StatisticsAck::new(3, worker_stats(&registry, 4)).into();
        let json = ack.to_json().unwrap();
        let back = WorkerAck::from_json(&json).unwrap();

        let WorkerAck::Statistics(back) = back else {
            panic!("expected statistics in {json}");
        };
        assert_eq!(back.worker_index, 3);
        assert_eq!(back.statistics.request_count(), 5);
        assert_eq!(back.groups["reads"], BTreeSet::from(["GET".to_string()]));
        assert_eq!(back.statistics.operations_group(&registry.register("GET")), Some("reads"));
    }

    #[test]
    fn merges_successful_workers_and_lists_failures() {
        let registry = OperationRegistry::new();
        let acks = vec![
            WorkerAck::error(1, "service missing"),
            StatisticsAck::new(2, worker_stats(&registry, 10)).into(),
            StatisticsAck::new(0, worker_stats(&registry, 2)).into(),
        ];
        let merged = merge_acks(&acks).unwrap();
        assert!(!merged.is_successful());
        assert_eq!(merged.failures, vec![(1, "service missing".to_string())]);
        assert_eq!(merged.statistics.unwrap().request_count(), 14);
        assert_eq!(merged.groups.len(), 1);
    }

    #[test]
    fn no_statistics_without_successful_workers() {
        let merged = merge_acks(&[WorkerAck::error(0, "boom")]).unwrap();
        assert!(merged.statistics.is_none());
        assert!(!merged.is_successful());
    }

    #[test]
    fn mixed_statistics_kinds_do_not_merge() {
        let periodic: Statistics =
            PeriodicStatistics::new(BasicStatistics::new(OperationStats::basic()), 1000).into();
        let acks = [
            WorkerAck::Statistics(StatisticsAck::new(0, Statistics::default())),
            WorkerAck::Statistics(StatisticsAck::new(1, periodic)),
        ];
        assert!(merge_acks(&acks).is_err());
    }
}
