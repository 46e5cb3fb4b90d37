//! Gridbench: load generation and coordination engine for benchmarking
//! distributed caches and data grids.
//!
//! Every worker node of a benchmark runs a pool of stressor threads that fire
//! operations (`GET`, `PUT`, ...) at the store under test at configured rates,
//! records every request into mergeable statistics and ships them back to the
//! master, which merges the results of all nodes into one report.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: ties a [`SchedulingSelector`] of conversations, a statistics
//!   prototype and an [`Executor`] together.
//! - [`SchedulingSelector`]: hands out the next conversation to run while
//!   keeping every operation within its `invocations` per `interval` budget.
//!   Stressors block in it (not spin) when nothing has budget left.
//! - [`Conversation`]: one unit of work against the service under test. The
//!   built-in [`conversation::BasicOperationConversation`] calls a
//!   [`service::BasicOperations`] store on a random key.
//! - [`Executor`]: runs the scenario. The bundled
//!   [`executor::StressorPoolExecutor`] drives a fixed pool of OS threads
//!   through ramp-up and steady state.
//! - [`Metric`] / [`Aggregate`]: a single request sample and the per-operation
//!   accumulators folding samples into constant-size state.
//! - [`Statistics`]: per-operation accumulators of one test window, plain or
//!   bucketed by period, mergeable across threads and nodes and queried
//!   through [`representation::Representation`]s.
//! - [`ack`]: the per-worker result sent to the master and its merge.
//! - [`jmx`]: waits for the cluster under test to form before a stage starts.
//!
//! Consistency checking helpers (key [`range`]s per node, per-thread
//! [`record::StressorRecord`]s and [`log_value::PrivateLogValue`]s) live
//! next to these.
//!
//! # Example
//!
//! A put/get benchmark against the in-memory store:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gridbench::{
//!     config::StressTestConfig, conversation::BasicOperationConversation,
//!     operation::OperationRegistry, representation::RepresentationKind, service::InMemoryCache,
//!     Scenario,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StressTestConfig::from_json(
//!         r#"{
//!             "ramp_up_ms": 1000,
//!             "duration_ms": 10000,
//!             "num_keys": 1000,
//!             "operations": {
//!                 "GET": { "invocations": 8 },
//!                 "PUT": { "invocations": 2 }
//!             }
//!         }"#,
//!     )?;
//!     let registry = OperationRegistry::new();
//!     let cache = Arc::new(InMemoryCache::new());
//!     let keys = config.key_range(0, 1)?;
//!     let statistics = Scenario::builder()
//!         .name("put/get")
//!         .selector(config.build_selector(&registry, BasicOperationConversation::factory(cache, keys))?)
//!         .statistics(config.prototype()?)
//!         .executor(config.executor())
//!         .build()
//!         .run()
//!         .await?;
//!
//!     for operation in statistics.operations() {
//!         println!(
//!             "{operation}: {:?}",
//!             statistics.representation(&operation, RepresentationKind::DefaultOutcome)
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `builtins`: the in-memory [`service::InMemoryCache`] and the built-in
//!   put/get/remove conversation. (Enabled by default)
//! - `internals`: exposes the stressor pool's execution context and worker
//!   loop for custom executors.
//!
//! # Where to start
//!
//! - Read the docs for [`Scenario`], [`executor`] and [`config`].
//! - See `examples/put_get.rs` for a runnable benchmark.

/// Per-worker results and their merge on the master
pub mod ack;
/// Per-operation accumulators
pub mod aggregate;
/// Stress-test configuration document
pub mod config;
/// Units of work against the service under test
pub mod conversation;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
pub mod interrupt;
pub mod jmx;
pub mod log_value;
/// Single request samples
pub mod metric;
pub mod operation;
pub mod range;
pub mod record;
pub mod representation;
/// Main module of the framework that glues everything together
pub mod scenario;
pub mod selector;
pub mod service;
pub mod stats;

pub use aggregate::Aggregate;
pub use conversation::Conversation;
pub use executor::{Executor, StressorPoolExecutor};
pub use metric::Metric;
pub use operation::{Operation, OperationRegistry};
pub use scenario::Scenario;
pub use selector::SchedulingSelector;
pub use stats::{OperationStats, SharedStatistics, Statistics};

/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use gridbench_macros::*;
}
