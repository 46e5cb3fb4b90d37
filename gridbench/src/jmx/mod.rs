//! Cluster formation checks over management endpoints.
//!
//! Before a stage starts, the master asks every node of the system under
//! test for its view of the cluster and waits until all of them agree. The
//! management protocol itself stays behind [`Connector`]; what lives here is
//! the thread-per-node polling with a shared deadline, connection caching and
//! the verdict.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PollError;

mod poller;
mod validator;

pub use poller::JmxPoller;
pub use validator::{ClusterStatus, ClusterValidator, NodeStatus};

pub const DEFAULT_SERVICE_URL_TEMPLATE: &str = "service:jmx:rmi:///jndi/rmi://%s:%d/jmxrmi";

/// Management endpoint of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Fills `%s` with the host and `%d` with the port of `endpoint`.
pub fn service_url(template: &str, endpoint: &Endpoint) -> String {
    template
        .replacen("%s", &endpoint.host, 1)
        .replacen("%d", &endpoint.port.to_string(), 1)
}

/// Opens and closes connections to management endpoints.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    fn connect(&self, service_url: &str) -> Result<Self::Connection, PollError>;

    fn close(&self, _connection: &Self::Connection) -> Result<(), PollError> {
        Ok(())
    }
}

/// Reads whatever the caller is interested in from one node.
pub trait NodePoller<C>: Send + Sync + 'static {
    type Value: Send + 'static;

    /// `node` is the endpoint as `host:port`, `index` its position in the
    /// poller's endpoint list.
    fn poll_node(&self, connection: &C, node: &str, index: usize) -> Result<Self::Value, PollError>;
}

/// Outcome of polling one node in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult<V> {
    Value(V),
    ConnectFailed(PollError),
    PollFailed(PollError),
    /// No answer before the deadline.
    Unavailable,
}

impl<V> NodeResult<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_url_template() {
        let endpoint = Endpoint::new("node1", 9999);
        assert_eq!(
            service_url(DEFAULT_SERVICE_URL_TEMPLATE, &endpoint),
            "service:jmx:rmi:///jndi/rmi://node1:9999/jmxrmi"
        );
        assert_eq!(service_url("remote://%s:%d", &endpoint), "remote://node1:9999");
        assert_eq!(endpoint.to_string(), "node1:9999");
    }
}
