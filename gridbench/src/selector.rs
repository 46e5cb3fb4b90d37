use std::{
    fmt,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{ConfigError, Interrupted},
    interrupt::InterruptFlag,
};

const LOW_WORD: u64 = 0xFFFF_FFFF;
const NANOS_PER_MILLI: u64 = 1_000_000;

struct Slot<T> {
    operation: T,
    invocations: u32,
    interval_nanos: u64,
    // high word: interval number (truncated), low word: invocations issued in it
    counter: AtomicU64,
}

/// Rate limiter handing out operations according to their budgets.
///
/// Every operation may be issued at most `invocations` times per `interval`.
/// [`SchedulingSelector::next`] returns an operation with budget left in its
/// current interval, or parks the calling thread until the closest interval
/// rolls over. The selector never takes a lock: each operation keeps its
/// interval number and issued count in one atomic word, updated by CAS.
///
/// Which operation is checked first rotates between calls so that threads
/// waking up together don't all pick the same one. The rotation is a hint;
/// there is no fairness guarantee beyond the budgets.
pub struct SchedulingSelector<T> {
    slots: Box<[Slot<T>]>,
    offset: AtomicUsize,
    origin: Instant,
}

impl<T> SchedulingSelector<T> {
    pub fn builder() -> SchedulingSelectorBuilder<T> {
        SchedulingSelectorBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.operation)
    }

    /// Blocks until some operation has budget left. Fails only when `flag`
    /// is raised, which callers treat as a request to shut down.
    pub fn next(&self, flag: &InterruptFlag) -> Result<&T, Interrupted> {
        loop {
            flag.check()?;
            match self.try_select(self.now_nanos()) {
                Ok(operation) => return Ok(operation),
                Err(sleep) => thread::park_timeout(sleep),
            }
        }
    }

    /// One pass over all operations at time `now_nanos` (relative to the
    /// selector's creation). On failure returns how long until the closest
    /// interval rolls over.
    pub(crate) fn try_select(&self, now_nanos: u64) -> Result<&T, Duration> {
        let n = self.slots.len();
        let my_offset = self.offset.load(Ordering::Relaxed);
        self.offset
            .store(my_offset.wrapping_add(1), Ordering::Relaxed);

        let mut sleep = u64::MAX;
        'slots: for i in 0..n {
            let slot = &self.slots[(my_offset % n + i) % n];
            let current = (now_nanos / slot.interval_nanos) & LOW_WORD;
            let mut count = slot.counter.load(Ordering::Acquire);
            loop {
                let next = if count >> 32 == current {
                    if count & LOW_WORD < u64::from(slot.invocations) {
                        count + 1
                    } else {
                        sleep = sleep.min(slot.interval_nanos - now_nanos % slot.interval_nanos);
                        continue 'slots;
                    }
                } else {
                    (current << 32) + 1
                };
                match slot.counter.compare_exchange_weak(
                    count,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(&slot.operation),
                    Err(actual) => count = actual,
                }
            }
        }
        Err(Duration::from_nanos(sleep))
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl<T: fmt::Debug> fmt::Debug for SchedulingSelector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for slot in self.slots.iter() {
            list.entry(&format_args!(
                "{:?}: {}/{}ms",
                slot.operation,
                slot.invocations,
                slot.interval_nanos / NANOS_PER_MILLI
            ));
        }
        list.finish()
    }
}

pub struct SchedulingSelectorBuilder<T> {
    entries: Vec<(T, u32, u64)>,
    added: usize,
}

impl<T> Default for SchedulingSelectorBuilder<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            added: 0,
        }
    }
}

impl<T> SchedulingSelectorBuilder<T> {
    /// Operations with no invocations are skipped; a non-positive interval is
    /// an error.
    pub fn add(mut self, operation: T, invocations: i64, interval_ms: i64) -> Result<Self, ConfigError> {
        let index = self.added;
        self.added += 1;
        if invocations <= 0 {
            tracing::debug!("Skipping operation #{index} with {invocations} invocations");
            return Ok(self);
        }
        if interval_ms <= 0 {
            return Err(ConfigError::InvalidInterval {
                index,
                interval: interval_ms,
            });
        }
        let invocations = u32::try_from(invocations)
            .map_err(|_| ConfigError::InvocationsOutOfRange { index, invocations })?;
        let interval_nanos = (interval_ms as u64).saturating_mul(NANOS_PER_MILLI);
        self.entries.push((operation, invocations, interval_nanos));
        Ok(self)
    }

    pub fn build(self) -> Result<SchedulingSelector<T>, ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::NoOperations);
        }
        let slots = self
            .entries
            .into_iter()
            .map(|(operation, invocations, interval_nanos)| Slot {
                operation,
                invocations,
                interval_nanos,
                counter: AtomicU64::new(0),
            })
            .collect();
        Ok(SchedulingSelector {
            slots,
            offset: AtomicUsize::new(0),
            origin: Instant::now(),
        })
    }
}
