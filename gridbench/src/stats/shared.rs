use std::sync::Arc;

use parking_lot::Mutex;

use crate::{error::StatsError, metric::Request, operation::Operation};

use super::Statistics;

/// Handle to a [`Statistics`] that any thread may record into, e.g. the
/// completion of an asynchronous request. Clones share the same statistics.
#[derive(Debug, Clone, Default)]
pub struct SharedStatistics(Arc<Mutex<Statistics>>);

impl SharedStatistics {
    pub fn new(statistics: Statistics) -> Self {
        Self(Arc::new(Mutex::new(statistics)))
    }

    pub fn record(&self, operation: &Operation, request: &Request) {
        self.0.lock().record(operation, request);
    }

    pub fn begin(&self) {
        self.0.lock().begin();
    }

    pub fn end(&self) {
        self.0.lock().end();
    }

    pub fn register_operations_group(
        &self,
        name: &str,
        operations: &[Operation],
    ) -> Result<(), StatsError> {
        self.0.lock().register_operations_group(name, operations)
    }

    /// Copy of what has been recorded so far.
    pub fn snapshot(&self) -> Statistics {
        self.0.lock().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Statistics) -> R) -> R {
        f(&self.0.lock())
    }
}

impl From<Statistics> for SharedStatistics {
    fn from(statistics: Statistics) -> Self {
        Self::new(statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRegistry;
    use std::{thread, time::Duration};

    #[test]
    fn records_from_many_threads() {
        let registry = OperationRegistry::new();
        let put = registry.register("PUT");
        let shared = SharedStatistics::default();
        shared.begin();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let put = put.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        shared.record(&put, &Request::succeeded(Duration::from_micros(5)));
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());
        shared.end();
        assert_eq!(shared.snapshot().request_count(), 400);
        assert!(shared.with(|s| s.interval().is_set()));
    }
}
