use std::time::{Duration, Instant};

use crate::macros::metric;

/// A `Metric` represents a single observed measurement produced by the service under test.
///
/// Metrics are the most granular level of performance data. They are recorded into an
/// [`crate::Aggregate`] owned by the statistics of a stressor thread, and later merged
/// across threads and nodes.
///
/// ## Design principles
/// - **Simple:** a metric is a plain value; all the accumulation logic lives in the
///   aggregate that consumes it.
/// - **Thread-safe and clonable:** metrics must be `Send`, `Sync`, and `Clone`, as an
///   asynchronous completion may record them from any thread.
///
/// ## Example
/// ```rust
/// use gridbench::{Metric, macros::metric};
/// use std::time::Duration;
///
/// #[metric]
/// struct TransferMetric {
///     latency: Duration,
///     bytes: usize,
/// }
/// ```
pub trait Metric
where
    Self: Send + Sync + Clone,
{
}

/// One invocation against the service under test: how long it took and
/// whether it succeeded.
#[metric]
#[derive(Copy)]
pub struct Request {
    pub latency: Duration,
    pub success: bool,
}

impl Request {
    /// Starts timing a request. Finish with [`RequestTimer::succeeded`] or
    /// [`RequestTimer::failed`].
    pub fn start() -> RequestTimer {
        RequestTimer {
            started: Instant::now(),
        }
    }

    pub fn succeeded(latency: Duration) -> Self {
        Self {
            latency,
            success: true,
        }
    }

    pub fn failed(latency: Duration) -> Self {
        Self {
            latency,
            success: false,
        }
    }

    pub(crate) fn latency_nanos(&self) -> u64 {
        u64::try_from(self.latency.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestTimer {
    started: Instant,
}

impl RequestTimer {
    pub fn succeeded(self) -> Request {
        Request::succeeded(self.started.elapsed())
    }

    pub fn failed(self) -> Request {
        Request::failed(self.started.elapsed())
    }

    /// Finishes the request according to the outcome of the call.
    pub fn finish<T, E>(self, outcome: &Result<T, E>) -> Request {
        match outcome {
            Ok(_) => self.succeeded(),
            Err(_) => self.failed(),
        }
    }
}
