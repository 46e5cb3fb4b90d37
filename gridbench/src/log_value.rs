use std::fmt;

use serde::{Deserialize, Serialize};

/// Value stored under a key owned by a single stressor thread: the ids of
/// the last operations that wrote it. A checker reading the key compares the
/// log against the operations it expects, which uncovers lost or duplicated
/// writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrivateLogValue {
    thread_id: u32,
    operation_ids: Vec<i64>,
}

impl PrivateLogValue {
    pub fn new(thread_id: u32, operation_id: i64) -> Self {
        Self {
            thread_id,
            operation_ids: vec![operation_id],
        }
    }

    pub fn with_operations(thread_id: u32, operation_ids: Vec<i64>) -> Self {
        Self {
            thread_id,
            operation_ids,
        }
    }

    /// Appends `operation_id`, dropping the oldest entries so that at most
    /// `max_size` remain.
    pub fn with(&self, operation_id: i64, max_size: usize) -> Self {
        let keep = max_size.saturating_sub(1).min(self.operation_ids.len());
        let mut operation_ids = Vec::with_capacity(keep + 1);
        operation_ids.extend_from_slice(&self.operation_ids[self.operation_ids.len() - keep..]);
        operation_ids.push(operation_id);
        Self {
            thread_id: self.thread_id,
            operation_ids,
        }
    }

    /// Forgets operations up to `checked_operation` (the checker confirmed
    /// them) and appends `operation_id`.
    pub fn shift(&self, checked_operation: i64, operation_id: i64) -> Self {
        let mut operation_ids: Vec<i64> = self
            .operation_ids
            .iter()
            .copied()
            .filter(|id| *id > checked_operation)
            .collect();
        operation_ids.push(operation_id);
        Self {
            thread_id: self.thread_id,
            operation_ids,
        }
    }

    pub fn contains(&self, operation_id: i64) -> bool {
        self.operation_ids.contains(&operation_id)
    }

    pub fn size(&self) -> usize {
        self.operation_ids.len()
    }

    pub fn operation_id(&self, index: usize) -> Option<i64> {
        self.operation_ids.get(index).copied()
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn last_operation_id(&self) -> Option<i64> {
        self.operation_ids.last().copied()
    }
}

impl fmt::Display for PrivateLogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateLogValue{{thread={}, ops={:?}}}", self.thread_id, self.operation_ids)
    }
}
