//! Executors: how a [`Scenario`] actually runs.
//!
//! The `Executor` trait is the runtime hook that executes a scenario and
//! hands back the merged [`Statistics`]. The bundled [`StressorPoolExecutor`]
//! drives a fixed pool of OS threads, the stressors, each repeatedly asking
//! the scenario's [`crate::SchedulingSelector`] for the next conversation and
//! starting it.
//!
//! # Phases
//! 1. **Ramp-up.** Stressors start and record into throwaway statistics, so
//!    caches, connections and JIT-like warm-up effects stay out of the results.
//! 2. **Steady state.** Every stressor's real statistics are begun at once and
//!    the recording flag flips; from now on samples count.
//! 3. **End.** After `duration` the real statistics are ended and the stressors
//!    are told to stop. They get a grace period to finish the conversation in
//!    hand, then blocked ones are interrupted.
//! 4. **Join & merge.** The executor waits for the stressors up to a shared
//!    deadline and merges all per-thread statistics. Stressors missing the
//!    deadline are reported but what they recorded is still merged.
//!
//! # Tuning knobs
//! - `num_threads`: number of stressors. Conversations that block on the
//!   service need more threads to reach a rate; asynchronous ones need few.
//! - `ramp_up`, `duration`: length of the phases above.
//! - `grace_period`, `thread_join_timeout`: how patient shutdown is.
//!
//! # Notes about correctness
//! - Per-thread statistics are merged in arbitrary order; merge is
//!   associative and commutative.
//! - A panicking conversation kills only its stressor; the panic is logged
//!   and the rest of the run carries on.
pub mod stressor;
pub use stressor::StressorPoolExecutor;

use crate::{scenario::Scenario, stats::Statistics};

pub trait Executor
where
    Self: Send + Sync + Sized,
{
    type Error;

    /// Execute the scenario and return the merged statistics.
    fn exec(
        &self,
        scenario: &Scenario<Self>,
    ) -> impl Future<Output = Result<Statistics, Self::Error>> + Send;
}
