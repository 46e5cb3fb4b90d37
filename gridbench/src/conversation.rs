#[cfg(feature = "builtins")]
use std::{fmt, sync::Arc};

#[cfg(feature = "builtins")]
use rand::Rng;

use crate::stats::SharedStatistics;
#[cfg(feature = "builtins")]
use crate::{metric::Request, operation::Operation, range::Range, service::BasicOperations};

/// Unit of work a stressor hands to the service under test.
///
/// `start` must return quickly. It may complete the work right away or
/// dispatch it asynchronously; either way the outcome ends up recorded in
/// `statistics`, which may be written to from any thread.
///
/// Any `Fn(&SharedStatistics)` closure is a conversation.
pub trait Conversation: Send + Sync {
    fn start(&self, statistics: &SharedStatistics);
}

impl<F> Conversation for F
where
    F: Fn(&SharedStatistics) + Send + Sync,
{
    fn start(&self, statistics: &SharedStatistics) {
        self(statistics)
    }
}

#[cfg(feature = "builtins")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicOperationKind {
    Get,
    Put,
    Remove,
    ContainsKey,
}

#[cfg(feature = "builtins")]
impl BasicOperationKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Remove => "REMOVE",
            Self::ContainsKey => "CONTAINS_KEY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GET" => Some(Self::Get),
            "PUT" => Some(Self::Put),
            "REMOVE" => Some(Self::Remove),
            "CONTAINS_KEY" => Some(Self::ContainsKey),
            _ => None,
        }
    }
}

/// One call against [`BasicOperations`] on a random key of `keys`.
/// A failed call is recorded as an error sample and otherwise swallowed.
#[cfg(feature = "builtins")]
pub struct BasicOperationConversation {
    kind: BasicOperationKind,
    operation: Operation,
    service: Arc<dyn BasicOperations>,
    keys: Range,
    value_size: usize,
}

#[cfg(feature = "builtins")]
impl BasicOperationConversation {
    pub const DEFAULT_VALUE_SIZE: usize = 1000;

    pub fn new(
        kind: BasicOperationKind,
        operation: Operation,
        service: Arc<dyn BasicOperations>,
        keys: Range,
    ) -> Self {
        Self {
            kind,
            operation,
            service,
            keys,
            value_size: Self::DEFAULT_VALUE_SIZE,
        }
    }

    pub fn with_value_size(mut self, value_size: usize) -> Self {
        self.value_size = value_size;
        self
    }

    /// Factory for [`crate::config::StressTestConfig::build_selector`]: maps
    /// `GET`, `PUT`, `REMOVE` and `CONTAINS_KEY` to conversations against
    /// `service`; any other operation is unsupported.
    pub fn factory(
        service: Arc<dyn BasicOperations>,
        keys: Range,
    ) -> impl Fn(&Operation) -> Option<Arc<dyn Conversation>> {
        move |operation: &Operation| {
            let kind = BasicOperationKind::from_name(operation.name())?;
            let conversation =
                BasicOperationConversation::new(kind, operation.clone(), Arc::clone(&service), keys);
            Some(Arc::new(conversation) as Arc<dyn Conversation>)
        }
    }

    fn random_key(&self) -> i64 {
        if self.keys.is_empty() {
            return self.keys.start();
        }
        rand::thread_rng().gen_range(self.keys.start()..self.keys.end())
    }
}

#[cfg(feature = "builtins")]
impl Conversation for BasicOperationConversation {
    fn start(&self, statistics: &SharedStatistics) {
        let key = self.random_key();
        let timer = Request::start();
        let outcome = match self.kind {
            BasicOperationKind::Get => self.service.get(key).map(drop),
            BasicOperationKind::Put => self.service.put(key, vec![key as u8; self.value_size]),
            BasicOperationKind::Remove => self.service.remove(key).map(drop),
            BasicOperationKind::ContainsKey => self.service.contains_key(key).map(drop),
        };
        let request = timer.finish(&outcome);
        if let Err(e) = &outcome {
            tracing::trace!("{} on key {key} failed: {e}", self.operation);
        }
        statistics.record(&self.operation, &request);
    }
}

#[cfg(feature = "builtins")]
impl fmt::Debug for BasicOperationConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicOperationConversation")
            .field("operation", &self.operation)
            .field("keys", &self.keys)
            .field("value_size", &self.value_size)
            .finish()
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::{
        operation::OperationRegistry,
        representation::{Representation, RepresentationKind},
        service::InMemoryCache,
    };

    fn outcome(stats: &SharedStatistics, operation: &str) -> (u64, u64) {
        match stats
            .snapshot()
            .representation(operation, RepresentationKind::DefaultOutcome)
        {
            Some(Representation::DefaultOutcome(o)) => (o.requests, o.errors),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn records_one_request_per_start() {
        let registry = OperationRegistry::new();
        let cache = Arc::new(InMemoryCache::new());
        let put = BasicOperationConversation::new(
            BasicOperationKind::Put,
            registry.register("PUT"),
            cache.clone(),
            Range::new(0, 10),
        )
        .with_value_size(4);
        let stats = SharedStatistics::default();
        for _ in 0..20 {
            put.start(&stats);
        }
        assert_eq!(outcome(&stats, "PUT"), (20, 0));
        assert!(!cache.is_empty() && cache.len() <= 10);
    }

    #[test]
    fn failures_become_error_samples() {
        let registry = OperationRegistry::new();
        let cache = Arc::new(InMemoryCache::new());
        cache.set_available(false);
        let get = BasicOperationConversation::new(
            BasicOperationKind::Get,
            registry.register("GET"),
            cache,
            Range::new(0, 10),
        );
        let stats = SharedStatistics::default();
        get.start(&stats);
        get.start(&stats);
        assert_eq!(outcome(&stats, "GET"), (2, 2));
    }

    #[test]
    fn factory_knows_basic_operations_only() {
        let registry = OperationRegistry::new();
        let factory = BasicOperationConversation::factory(Arc::new(InMemoryCache::new()), Range::new(0, 1));
        assert!(factory(&registry.register("REMOVE")).is_some());
        assert!(factory(&registry.register("QUERY")).is_none());
    }

    #[test]
    fn closures_are_conversations() {
        let registry = OperationRegistry::new();
        let noop = registry.register("NOOP");
        let conversation = move |stats: &SharedStatistics| {
            stats.record(&noop, &Request::succeeded(std::time::Duration::ZERO))
        };
        let stats = SharedStatistics::default();
        Conversation::start(&conversation, &stats);
        assert_eq!(outcome(&stats, "NOOP"), (1, 0));
    }
}
