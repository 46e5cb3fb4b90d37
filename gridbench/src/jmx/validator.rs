use std::{collections::BTreeSet, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Connector, Endpoint, JmxPoller, NodePoller, NodeResult};

/// Membership as reported by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Textual view id; nodes in the same cluster report the same one.
    pub view: String,
    pub num_members: usize,
    pub join_complete: bool,
    pub state_transfer_in_progress: bool,
}

/// One poll cycle over the whole cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub available_nodes: usize,
    /// `None` when no node answered or answering nodes disagree.
    pub num_members: Option<usize>,
    pub views: BTreeSet<String>,
    pub incomplete_join: BTreeSet<String>,
    pub incomplete_state_transfer: BTreeSet<String>,
}

impl ClusterStatus {
    /// `results` must be in `endpoints` order.
    pub fn from_results(endpoints: &[Endpoint], results: &[NodeResult<NodeStatus>]) -> Self {
        let mut status = Self::default();
        let mut members = BTreeSet::new();
        for (endpoint, result) in endpoints.iter().zip(results) {
            let node = match result {
                NodeResult::Value(node) => node,
                NodeResult::ConnectFailed(e) | NodeResult::PollFailed(e) => {
                    tracing::trace!("No status from {endpoint}: {e}");
                    continue;
                }
                NodeResult::Unavailable => continue,
            };
            status.available_nodes += 1;
            status.views.insert(node.view.clone());
            members.insert(node.num_members);
            if !node.join_complete {
                status.incomplete_join.insert(endpoint.to_string());
            }
            if node.state_transfer_in_progress {
                status.incomplete_state_transfer.insert(endpoint.to_string());
            }
        }
        if members.len() == 1 {
            status.num_members = members.pop_first();
        }
        status
    }

    /// Every node answered, all see `expected` members in a single view,
    /// and none is still joining or transferring state.
    pub fn is_formed(&self, expected: usize) -> bool {
        self.available_nodes == expected
            && self.num_members == Some(expected)
            && self.views.len() == 1
            && self.incomplete_join.is_empty()
            && self.incomplete_state_transfer.is_empty()
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "available nodes: {}, views: {:?}", self.available_nodes, self.views)?;
        if !self.incomplete_join.is_empty() {
            write!(f, ", incomplete join: {:?}", self.incomplete_join)?;
        }
        if !self.incomplete_state_transfer.is_empty() {
            write!(f, ", state transfer in progress: {:?}", self.incomplete_state_transfer)?;
        }
        Ok(())
    }
}

/// Waits for the system under test to form a cluster out of all of its
/// endpoints.
pub struct ClusterValidator<C: Connector, P> {
    poller: JmxPoller<C, P>,
    poll_interval: Duration,
}

impl<C, P> ClusterValidator<C, P>
where
    C: Connector,
    P: NodePoller<C::Connection, Value = NodeStatus>,
{
    pub fn new(poller: JmxPoller<C, P>) -> Self {
        Self {
            poller,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn check_status(&self) -> ClusterStatus {
        let results = self.poller.poll().await;
        tracing::trace!("Number of results of polling: {}", results.len());
        ClusterStatus::from_results(self.poller.endpoints(), &results)
    }

    /// Polls until the cluster is formed or `timeout` passes. `None` skips
    /// the check entirely and counts as formed.
    pub async fn wait_until_formed(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            tracing::info!("Skipping waiting for cluster");
            return true;
        };
        let expected = self.poller.endpoints().len();
        let give_up = Instant::now() + timeout;
        let mut status = self.check_status().await;
        let formed = loop {
            if status.is_formed(expected) {
                break true;
            }
            if Instant::now() >= give_up {
                break false;
            }
            tracing::debug!("Cluster incomplete: {status}");
            tokio::time::sleep(self.poll_interval).await;
            status = self.check_status().await;
        };
        if formed {
            tracing::info!("Cluster formed: {status}");
        } else {
            tracing::error!("Cluster failed to form, last status: {status}");
        }
        if let Err(e) = self.poller.close_connections() {
            tracing::warn!("Cannot close connections: {e}");
        }
        formed
    }
}
