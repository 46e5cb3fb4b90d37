use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use tokio::{sync::Mutex, time::Instant};

use super::{Connector, DEFAULT_SERVICE_URL_TEMPLATE, Endpoint, NodePoller, NodeResult, service_url};
use crate::{
    error::PollError,
    interrupt::{InterruptFlag, spawn_interruptible},
};

/// Polls a fixed set of endpoints, one thread per endpoint and cycle.
///
/// Connections are cached per endpoint and reused while they work; one that
/// fails is dropped and recreated on the next cycle.
pub struct JmxPoller<C: Connector, P> {
    endpoints: Vec<Endpoint>,
    query_timeout: Duration,
    service_url_template: String,
    shared: Arc<Shared<C, P>>,
    poll_lock: Mutex<()>,
}

struct Shared<C: Connector, P> {
    connector: C,
    poller: P,
    connections: DashMap<Endpoint, Arc<C::Connection>>,
}

impl<C, P> JmxPoller<C, P>
where
    C: Connector,
    P: NodePoller<C::Connection>,
{
    pub fn new(endpoints: Vec<Endpoint>, query_timeout: Duration, connector: C, poller: P) -> Self {
        Self {
            endpoints,
            query_timeout,
            service_url_template: DEFAULT_SERVICE_URL_TEMPLATE.to_string(),
            shared: Arc::new(Shared {
                connector,
                poller,
                connections: DashMap::new(),
            }),
            poll_lock: Mutex::new(()),
        }
    }

    pub fn with_service_url_template(mut self, template: impl Into<String>) -> Self {
        self.service_url_template = template.into();
        self
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn cached_connections(&self) -> usize {
        self.shared.connections.len()
    }

    /// Polls every endpoint once and returns one result per endpoint, in
    /// endpoint order.
    ///
    /// All nodes share a single `query_timeout` deadline. Nodes that haven't
    /// answered by then are interrupted and reported as
    /// [`NodeResult::Unavailable`]; whatever the others returned is kept.
    /// Concurrent calls are serialized.
    pub async fn poll(&self) -> Vec<NodeResult<P::Value>> {
        let _guard = self.poll_lock.lock().await;
        let mut threads: Vec<_> = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                let shared = Arc::clone(&self.shared);
                let url = service_url(&self.service_url_template, endpoint);
                let node = endpoint.clone();
                spawn_interruptible(format!("tryPoll-{endpoint}"), move |flag| {
                    shared.try_poll(&node, &url, index, &flag)
                })
                .inspect_err(|e| tracing::warn!("Cannot start polling {endpoint}: {e}"))
                .ok()
            })
            .collect();

        let deadline = Instant::now() + self.query_timeout;
        let joined = join_all(threads.iter_mut().map(|thread| async move {
            match thread {
                Some(thread) => thread.join_until(deadline).await,
                None => None,
            }
        }))
        .await;

        self.endpoints
            .iter()
            .zip(threads)
            .zip(joined)
            .map(|((endpoint, thread), result)| match result {
                Some(Ok(result)) => result,
                Some(Err(_)) => {
                    tracing::error!("Polling {endpoint} panicked");
                    NodeResult::Unavailable
                }
                None => {
                    if let Some(thread) = thread {
                        thread.interrupt();
                    }
                    tracing::debug!("No answer from {endpoint} within {:?}", self.query_timeout);
                    NodeResult::Unavailable
                }
            })
            .collect()
    }

    /// Forgets the cached connection of `endpoint` without closing it, e.g.
    /// after the connector noticed the peer closed it.
    pub fn connection_closed(&self, endpoint: &Endpoint) {
        if self.shared.connections.remove(endpoint).is_some() {
            tracing::trace!("Connection to {endpoint} closed");
        }
    }

    /// Empties the cache and closes the connections on a detached thread.
    pub fn close_connections(&self) -> io::Result<JoinHandle<()>> {
        let endpoints: Vec<Endpoint> = self
            .shared
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let connections: Vec<_> = endpoints
            .into_iter()
            .filter_map(|endpoint| self.shared.connections.remove(&endpoint))
            .collect();
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("JmxPoller.closeConnections".to_string())
            .spawn(move || {
                for (endpoint, connection) in connections {
                    shared.close(&endpoint, &connection);
                }
            })
    }
}

impl<C, P> Shared<C, P>
where
    C: Connector,
    P: NodePoller<C::Connection>,
{
    fn try_poll(&self, endpoint: &Endpoint, url: &str, index: usize, flag: &InterruptFlag) -> NodeResult<P::Value> {
        let connection = match self.connect(endpoint, url) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::trace!("Cannot connect to {endpoint}: {e}");
                return NodeResult::ConnectFailed(e);
            }
        };
        if flag.is_interrupted() {
            return NodeResult::PollFailed(PollError::Interrupted);
        }
        match self.poller.poll_node(&connection, &endpoint.to_string(), index) {
            Ok(value) => NodeResult::Value(value),
            Err(e) => {
                tracing::trace!("Discarding connection to {endpoint} because of an error: {e}");
                self.discard(endpoint, &connection);
                NodeResult::PollFailed(e)
            }
        }
    }

    fn connect(&self, endpoint: &Endpoint, url: &str) -> Result<Arc<C::Connection>, PollError> {
        if let Some(cached) = self.connections.get(endpoint) {
            return Ok(Arc::clone(cached.value()));
        }
        let fresh = Arc::new(self.connector.connect(url)?);
        let raced = match self.connections.entry(endpoint.clone()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&fresh));
                None
            }
        };
        match raced {
            Some(cached) => {
                self.close(endpoint, &fresh);
                Ok(cached)
            }
            None => {
                tracing::trace!("Created new connection to {endpoint}");
                Ok(fresh)
            }
        }
    }

    fn discard(&self, endpoint: &Endpoint, connection: &Arc<C::Connection>) {
        self.connections
            .remove_if(endpoint, |_, cached| Arc::ptr_eq(cached, connection));
        self.close(endpoint, connection);
    }

    fn close(&self, endpoint: &Endpoint, connection: &C::Connection) {
        if let Err(e) = self.connector.close(connection) {
            tracing::trace!("Error while closing connection to {endpoint}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct FakeConnector {
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    struct FakeConnection {
        url: String,
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        fn connect(&self, service_url: &str) -> Result<FakeConnection, PollError> {
            if service_url.contains("down") {
                return Err(PollError::Connect {
                    url: service_url.to_string(),
                    message: "connection refused".into(),
                });
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection {
                url: service_url.to_string(),
            })
        }

        fn close(&self, _connection: &FakeConnection) -> Result<(), PollError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Answers with the node index; `broken*` nodes fail and `slow*` nodes
    /// take a second.
    struct FakePoller;

    impl NodePoller<FakeConnection> for FakePoller {
        type Value = usize;

        fn poll_node(&self, connection: &FakeConnection, node: &str, index: usize) -> Result<usize, PollError> {
            assert!(connection.url.contains(node));
            if node.starts_with("broken") {
                return Err(PollError::Query {
                    node: node.to_string(),
                    message: "no such attribute".into(),
                });
            }
            if node.starts_with("slow") {
                thread::sleep(Duration::from_secs(1));
            }
            Ok(index)
        }
    }

    fn poller(hosts: &[&str], connector: &FakeConnector) -> JmxPoller<FakeConnector, FakePoller> {
        let endpoints = hosts.iter().map(|host| Endpoint::new(*host, 9999)).collect();
        JmxPoller::new(endpoints, Duration::from_millis(200), connector.clone(), FakePoller)
            .with_service_url_template("fake://%s:%d")
    }

    #[tokio::test]
    async fn reuses_cached_connections() {
        let connector = FakeConnector::default();
        let poller = poller(&["a", "b"], &connector);
        assert_eq!(poller.poll().await, [NodeResult::Value(0), NodeResult::Value(1)]);
        assert_eq!(poller.poll().await, [NodeResult::Value(0), NodeResult::Value(1)]);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(poller.cached_connections(), 2);
    }

    #[tokio::test]
    async fn failed_poll_discards_the_connection() {
        let connector = FakeConnector::default();
        let poller = poller(&["ok", "broken"], &connector);
        let results = poller.poll().await;
        assert_eq!(results[0], NodeResult::Value(0));
        assert!(matches!(results[1], NodeResult::PollFailed(PollError::Query { .. })));
        assert_eq!(poller.cached_connections(), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        poller.poll().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn refused_connection_is_reported_per_node() {
        let connector = FakeConnector::default();
        let poller = poller(&["up", "down"], &connector);
        let results = poller.poll().await;
        assert_eq!(results[0].value(), Some(&0));
        assert!(matches!(results[1], NodeResult::ConnectFailed(PollError::Connect { .. })));
        assert_eq!(poller.cached_connections(), 1);
    }

    #[tokio::test]
    async fn slow_node_does_not_hold_up_the_cycle() {
        let connector = FakeConnector::default();
        let poller = poller(&["fast", "slow"], &connector);
        let started = std::time::Instant::now();
        let results = poller.poll().await;
        assert!(started.elapsed() < Duration::from_millis(800));
        assert_eq!(results, [NodeResult::Value(0), NodeResult::Unavailable]);
    }

    #[tokio::test]
    async fn closes_connections_in_the_background() {
        let connector = FakeConnector::default();
        let poller = poller(&["a", "b", "c"], &connector);
        poller.poll().await;
        poller.close_connections().unwrap().join().unwrap();
        assert_eq!(poller.cached_connections(), 0);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 3);

        poller.connection_closed(&Endpoint::new("a", 9999));
        poller.poll().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 6);
    }
}
