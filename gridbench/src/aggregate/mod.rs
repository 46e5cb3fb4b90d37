use crate::Metric;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

pub mod basic;
pub mod histogram;

pub use basic::BasicOperationStats;
pub use histogram::HistogramOperationStats;

/// The `Aggregate` trait defines how raw [`Metric`] values recorded for one operation
/// are collected and combined into an intermediate, mergeable representation.
///
/// **Important:** `Aggregate` implementations should **not** store final statistics
/// such as averages over a window or percentiles. Those belong in a
/// [`crate::representation::Representation`], derived on demand. Aggregates keep compact,
/// mergeable raw data (counts, sums, moments, histograms, error counters) so that any
/// representation can be computed later without losing information.
///
/// # Role
///
/// - Collect individual [`Metric`] samples recorded by stressor threads.
/// - Be cheaply mergeable so per-thread aggregates can be combined into a per-worker
///   view, and per-worker views into a cluster-wide one.
/// - Be serializable, as merged aggregates travel from workers to the master.
///
/// # Implementor notes
/// - Ensure `merge` is **associative** and **commutative**; per-thread aggregates are
///   merged in arbitrary order.
/// - `new_instance` must produce an empty aggregate with the same settings (bounds,
///   precision) as `self`, so a configured prototype can be stamped out per thread.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance with default settings.
    fn new() -> Self;

    /// Create a new, empty instance with the settings of `self`.
    fn new_instance(&self) -> Self {
        Self::new()
    }

    /// Aggregate multiple metrics into the current instance.
    ///
    /// This default implementation calls [`Aggregate::consume`] for each metric.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);

    /// Whether nothing has been recorded yet.
    fn is_empty(&self) -> bool;
}
