use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use typed_builder::TypedBuilder;

use super::Executor;
use crate::{
    conversation::Conversation,
    error::{ConfigError, StageError},
    interrupt::{InterruptFlag, InterruptibleThread, Interrupter, spawn_interruptible},
    scenario::Scenario,
    selector::SchedulingSelector,
    stats::{SharedStatistics, Statistics},
};
use internals::*;

/// Executor running a fixed pool of stressor threads through ramp-up and
/// steady state.
///
/// - Each stressor loops on [`SchedulingSelector::next`], so the pool as a
///   whole never exceeds the configured operation rates.
/// - Each stressor owns two statistics: the ramp-up one, discarded, and the
///   real one, merged into the result.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StressorPoolExecutor {
    #[builder(default = 8)]
    pub num_threads: usize,
    #[builder(default = Duration::from_secs(5))]
    pub ramp_up: Duration,
    /// Length of the steady state.
    pub duration: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub thread_join_timeout: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub grace_period: Duration,
}

impl Executor for StressorPoolExecutor {
    type Error = StageError;

    async fn exec(&self, scenario: &Scenario<Self>) -> Result<Statistics, StageError> {
        if self.num_threads == 0 {
            return Err(ConfigError::NoThreads.into());
        }
        let ctx = ExecutionContext::new();
        tracing::info!(
            "Starting {} stressors for scenario {} with {} operations",
            self.num_threads,
            scenario.name,
            scenario.selector.len()
        );
        let mut stressors = spawn_stressors(
            &ctx,
            &scenario.selector,
            &scenario.statistics,
            self.num_threads,
        )
        .inspect_err(|_| ctx.running.store(false, Ordering::Release))?;
        // stops the pool if this future is dropped before the run ends
        let _stop = StopOnDrop::new(&ctx, &stressors);

        if !self.ramp_up.is_zero() {
            tracing::info!("Ramping up for {:?}", self.ramp_up);
            tokio::time::sleep(self.ramp_up).await;
        }
        stressors.iter().for_each(|s| s.statistics.begin());
        ctx.recording.store(true, Ordering::Release);
        let warm_up: u64 = stressors
            .iter()
            .map(|s| {
                s.ramp_up.end();
                s.ramp_up.with(Statistics::request_count)
            })
            .sum();
        tracing::debug!("Ramp-up issued {warm_up} requests");
        tracing::info!("Recording for {:?}", self.duration);
        tokio::time::sleep(self.duration).await;

        ctx.recording.store(false, Ordering::Release);
        stressors.iter().for_each(|s| s.statistics.end());
        ctx.running.store(false, Ordering::Release);
        tracing::info!("Test finished, waiting {:?} for stressors to stop", self.grace_period);
        tokio::time::sleep(self.grace_period).await;

        stressors.iter().for_each(|s| s.thread.interrupt());
        let deadline = tokio::time::Instant::now() + self.thread_join_timeout;
        join_all(stressors.iter_mut().map(|s| s.join(deadline))).await;

        tracing::info!("Merging statistics of {} stressors", stressors.len());
        let snapshots: Vec<Statistics> = stressors.iter().map(|s| s.statistics.snapshot()).collect();
        let merged = Statistics::merge_all(&snapshots)?
            .unwrap_or_else(|| scenario.statistics.new_instance());
        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(merged)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

mod internals {
    use super::*;

    /// Flags shared by the driver and all stressors of one run.
    #[derive(Debug, Clone)]
    pub struct ExecutionContext {
        /// Samples go to the real statistics rather than the ramp-up ones.
        pub recording: Arc<AtomicBool>,
        /// Cleared when stressors should stop after their current conversation.
        pub running: Arc<AtomicBool>,
    }

    impl ExecutionContext {
        pub fn new() -> Self {
            Self {
                recording: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    impl Default for ExecutionContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Clears both flags and interrupts every stressor when dropped.
    pub struct StopOnDrop {
        ctx: ExecutionContext,
        interrupters: Vec<Interrupter>,
    }

    impl StopOnDrop {
        pub fn new(ctx: &ExecutionContext, stressors: &[Stressor]) -> Self {
            Self {
                ctx: ctx.clone(),
                interrupters: stressors.iter().map(|s| s.thread.interrupter()).collect(),
            }
        }
    }

    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.ctx.recording.store(false, Ordering::Release);
            if self.ctx.running.swap(false, Ordering::AcqRel) {
                tracing::warn!("Run cancelled, stopping {} stressors", self.interrupters.len());
            }
            self.interrupters.iter().for_each(Interrupter::interrupt);
        }
    }

    pub struct Stressor {
        pub index: usize,
        pub thread: InterruptibleThread<u64>,
        pub ramp_up: SharedStatistics,
        pub statistics: SharedStatistics,
    }

    impl Stressor {
        /// Waits for the thread until `deadline`; whatever it recorded stays
        /// available either way.
        pub async fn join(&mut self, deadline: tokio::time::Instant) {
            match self.thread.join_until(deadline).await {
                Some(Ok(conversations)) => {
                    tracing::debug!("Stressor {} finished after {conversations} conversations", self.index)
                }
                Some(Err(_)) => tracing::error!("Stressor {} panicked", self.index),
                None => tracing::warn!(
                    "Stressor {} did not stop in time, keeping its partial results",
                    self.index
                ),
            }
        }
    }

    /// Spawns `num_threads` stressors with fresh instances of `prototype`.
    /// Their ramp-up statistics are begun right away.
    pub fn spawn_stressors(
        ctx: &ExecutionContext,
        selector: &Arc<SchedulingSelector<Arc<dyn Conversation>>>,
        prototype: &Statistics,
        num_threads: usize,
    ) -> std::io::Result<Vec<Stressor>> {
        (0..num_threads)
            .map(|index| {
                let ramp_up = SharedStatistics::new(prototype.new_instance());
                let statistics = SharedStatistics::new(prototype.new_instance());
                ramp_up.begin();
                let thread = {
                    let ctx = ctx.clone();
                    let selector = Arc::clone(selector);
                    let (ramp_up, statistics) = (ramp_up.clone(), statistics.clone());
                    spawn_interruptible(format!("stressor-{index}"), move |flag| {
                        stressor_loop(&ctx, &selector, &ramp_up, &statistics, &flag)
                    })?
                };
                Ok(Stressor {
                    index,
                    thread,
                    ramp_up,
                    statistics,
                })
            })
            .collect()
    }

    /// Body of one stressor. Returns the number of conversations started.
    pub fn stressor_loop(
        ctx: &ExecutionContext,
        selector: &SchedulingSelector<Arc<dyn Conversation>>,
        ramp_up: &SharedStatistics,
        statistics: &SharedStatistics,
        flag: &InterruptFlag,
    ) -> u64 {
        let mut started = 0;
        while ctx.running.load(Ordering::Acquire) {
            let Ok(conversation) = selector.next(flag) else {
                tracing::debug!("Stressor interrupted");
                break;
            };
            if ctx.recording.load(Ordering::Acquire) {
                conversation.start(statistics);
            } else {
                conversation.start(ramp_up);
            }
            started += 1;
        }
        started
    }
}
