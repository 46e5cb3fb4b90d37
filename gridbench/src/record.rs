use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{range::Range, stats::now_millis};

/// Acknowledgement that operation `operation_id` completed at `timestamp`
/// (epoch millis). Ordered by operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StressorConfirmation {
    pub operation_id: i64,
    pub timestamp: i64,
}

#[derive(Debug)]
struct Notifications {
    notified: HashSet<i64>,
    require_notify: i64,
}

/// Progress of one stressor over its key range.
///
/// The stressor walks a pseudo-random sequence of keys, one operation id per
/// key ([`StressorRecord::next`]). Asynchronous acknowledgements arrive from
/// other threads in any order and possibly more than once
/// ([`StressorRecord::add_confirmation`]); only the first one per operation id
/// counts. A checker resuming from this record asks for
/// [`StressorRecord::current_confirmation_timestamp`] to learn up to when it
/// may trust what it reads.
#[derive(Debug)]
pub struct StressorRecord {
    thread_id: u32,
    key_range: Range,
    rng: Mutex<StdRng>,
    current_key_id: AtomicI64,
    current_op: AtomicI64,
    confirmations: Mutex<BTreeMap<i64, i64>>,
    notifications: Mutex<Notifications>,
    last_successful_check: AtomicI64,
    last_unsuccessful_check: AtomicI64,
}

impl StressorRecord {
    /// Starts at operation 0 with the key sequence seeded by the thread id.
    pub fn new(thread_id: u32, key_range: Range) -> Self {
        Self::with_state(thread_id, key_range, -1, u64::from(thread_id))
    }

    /// Continues after `operation_id` with a freshly seeded key sequence, e.g.
    /// when a checker picks up where a restarted stressor left off.
    pub fn resume(record: &StressorRecord, operation_id: i64, seed: u64) -> Self {
        Self::with_state(record.thread_id, record.key_range, operation_id, seed)
    }

    fn with_state(thread_id: u32, key_range: Range, operation_id: i64, seed: u64) -> Self {
        tracing::trace!("Initializing record random of thread {thread_id} with {seed}");
        let record = Self {
            thread_id,
            key_range,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            current_key_id: AtomicI64::new(key_range.start()),
            current_op: AtomicI64::new(operation_id),
            confirmations: Mutex::new(BTreeMap::new()),
            notifications: Mutex::new(Notifications {
                notified: HashSet::new(),
                require_notify: i64::MAX,
            }),
            last_successful_check: AtomicI64::new(now_millis() as i64),
            last_unsuccessful_check: AtomicI64::new(i64::MIN),
        };
        record.next();
        record
    }

    /// Moves to the next key and operation id, retiring everything up to the
    /// operation just finished.
    pub fn next(&self) {
        let size = self.key_range.size().max(1);
        let random = self.rng.lock().r#gen::<i64>() & i64::MAX;
        self.current_key_id
            .store(self.key_range.start() + random % size, Ordering::Release);
        let finished = self.current_op.fetch_add(1, Ordering::AcqRel);
        self.check_finished(finished);
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn key_range(&self) -> Range {
        self.key_range
    }

    pub fn key_id(&self) -> i64 {
        self.current_key_id.load(Ordering::Acquire)
    }

    pub fn operation_id(&self) -> i64 {
        self.current_op.load(Ordering::Acquire)
    }

    /// Records that `operation_id` completed at `timestamp`. A repeated
    /// confirmation of the same id is ignored.
    pub fn add_confirmation(&self, operation_id: i64, timestamp: i64) {
        let mut confirmations = self.confirmations.lock();
        confirmations.entry(operation_id).or_insert(timestamp);
        tracing::trace!(
            "Confirmations for thread {} are {:?}",
            self.thread_id,
            *confirmations
        );
    }

    /// Timestamp of the highest pending confirmation when it is ahead of the
    /// current operation, `-1` otherwise.
    pub fn current_confirmation_timestamp(&self) -> i64 {
        let current_op = self.operation_id();
        self.confirmations
            .lock()
            .last_key_value()
            .filter(|(id, _)| **id > current_op)
            .map_or(-1, |(_, timestamp)| *timestamp)
    }

    /// Retires every confirmation up to and including `operation_id`.
    pub fn check_finished(&self, operation_id: i64) {
        self.confirmations
            .lock()
            .retain(|id, _| *id > operation_id);
        self.notifications.lock().notified.remove(&operation_id);
    }

    pub fn confirmations(&self) -> Vec<StressorConfirmation> {
        self.confirmations
            .lock()
            .iter()
            .map(|(&operation_id, &timestamp)| StressorConfirmation {
                operation_id,
                timestamp,
            })
            .collect()
    }

    pub fn last_confirmed_operation_id(&self) -> i64 {
        self.confirmations
            .lock()
            .last_key_value()
            .map_or(-1, |(id, _)| *id)
    }

    /// A checker saw the effect of `operation_id` on `key`. Seeing an
    /// operation twice, or one already behind us, is suspicious.
    pub fn notify(&self, operation_id: i64, key: impl fmt::Display) {
        let behind = operation_id < self.operation_id();
        let fresh = self.notifications.lock().notified.insert(operation_id);
        if behind || !fresh {
            tracing::warn!("Duplicit notification for operation {operation_id} on key {key}");
        }
    }

    /// From `operation_id` on, operations count as seen only once notified.
    pub fn require_notify(&self, operation_id: i64) {
        let mut notifications = self.notifications.lock();
        notifications.require_notify = notifications.require_notify.min(operation_id);
    }

    pub fn has_notification(&self, operation_id: i64) -> bool {
        let notifications = self.notifications.lock();
        operation_id < notifications.require_notify || notifications.notified.contains(&operation_id)
    }

    pub fn last_successful_check_timestamp(&self) -> i64 {
        self.last_successful_check.load(Ordering::Relaxed)
    }

    pub fn set_last_successful_check_timestamp(&self, timestamp: i64) {
        self.last_successful_check.store(timestamp, Ordering::Relaxed);
    }

    pub fn last_unsuccessful_check_timestamp(&self) -> i64 {
        self.last_unsuccessful_check.load(Ordering::Relaxed)
    }

    pub fn set_last_unsuccessful_check_timestamp(&self, timestamp: i64) {
        self.last_unsuccessful_check.store(timestamp, Ordering::Relaxed);
    }

    pub fn status(&self) -> String {
        let (mut notified, require_notify) = {
            let n = self.notifications.lock();
            (n.notified.iter().copied().collect::<Vec<_>>(), n.require_notify)
        };
        notified.sort_unstable();
        format!(
            "thread={}, lastStressorOperation={}, currentOp={}, currentKeyId={:08X}, notifiedOps={:?}, \
             requireNotify={}, lastSuccessfulCheckTimestamp={}, lastUnsuccessfulCheckTimestamp={}.",
            self.thread_id,
            self.last_confirmed_operation_id(),
            self.operation_id(),
            self.key_id(),
            notified,
            require_notify,
            self.last_successful_check_timestamp(),
            self.last_unsuccessful_check_timestamp(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_confirmations() {
        let record = StressorRecord::new(0, Range::new(0, 100));
        assert_eq!(record.operation_id(), 0);
        record.add_confirmation(0, 1);
        assert_eq!(record.current_confirmation_timestamp(), -1);
        record.add_confirmation(1, 1);
        assert_eq!(record.current_confirmation_timestamp(), 1);
    }

    #[test]
    fn out_of_order_confirmations() {
        let initial = StressorRecord::new(0, Range::new(0, 100));
        let record = StressorRecord::resume(&initial, 9, 42);
        assert_eq!(record.operation_id(), 10);
        for (id, timestamp) in [(8, 8), (10, 10), (12, 12), (9, 9), (11, 11)] {
            record.add_confirmation(id, timestamp);
        }
        assert_eq!(record.current_confirmation_timestamp(), 12);
        assert_eq!(record.confirmations().len(), 5);
        assert!(
            record
                .confirmations()
                .windows(2)
                .all(|w| w[0].operation_id < w[1].operation_id)
        );
        record.check_finished(12);
        assert!(record.confirmations().is_empty());
        assert_eq!(record.last_confirmed_operation_id(), -1);
    }

    #[test]
    fn duplicate_confirmations_keep_the_first() {
        let record = StressorRecord::new(3, Range::new(0, 10));
        record.add_confirmation(10, 10);
        record.add_confirmation(10, 11);
        record.add_confirmation(10, 12);
        assert_eq!(
            record.confirmations(),
            vec![StressorConfirmation {
                operation_id: 10,
                timestamp: 10
            }]
        );
    }

    #[test]
    fn next_retires_finished_operations() {
        let record = StressorRecord::new(1, Range::new(0, 10));
        record.add_confirmation(0, 5);
        record.add_confirmation(1, 6);
        record.next();
        assert_eq!(record.operation_id(), 1);
        assert_eq!(record.last_confirmed_operation_id(), 1);
        assert_eq!(record.confirmations().len(), 1);
    }

    #[test]
    fn keys_stay_in_range_and_are_reproducible() {
        let a = StressorRecord::new(7, Range::new(1000, 1010));
        let b = StressorRecord::new(7, Range::new(1000, 1010));
        for _ in 0..100 {
            assert!(Range::new(1000, 1010).contains(a.key_id()));
            assert_eq!(a.key_id(), b.key_id());
            a.next();
            b.next();
        }
        let empty = StressorRecord::new(0, Range::new(5, 5));
        assert_eq!(empty.key_id(), 5);
    }

    #[test]
    fn notifications() {
        let record = StressorRecord::new(0, Range::new(0, 10));
        assert!(record.has_notification(100));
        record.require_notify(50);
        assert!(record.has_notification(49));
        assert!(!record.has_notification(50));
        record.notify(50, "key");
        assert!(record.has_notification(50));
        record.check_finished(50);
        assert!(!record.has_notification(50));
        assert!(record.status().contains("requireNotify=50"));
    }
}
