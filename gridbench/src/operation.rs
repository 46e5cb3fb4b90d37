use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use parking_lot::RwLock;

/// Interned identifier of a kind of request (`GET`, `PUT`, ...), used as the
/// key under which statistics are recorded.
///
/// Obtained from an [`OperationRegistry`]; two operations are equal when they
/// carry the same name.
#[derive(Clone)]
pub struct Operation {
    id: u32,
    name: Arc<str>,
}

impl Operation {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Default)]
struct Interned {
    by_name: HashMap<Arc<str>, Operation>,
    by_id: Vec<Operation>,
}

/// Process-wide table of [`Operation`]s.
///
/// Constructed once when the harness starts and passed by reference to
/// whatever registers operations; tests simply build their own.
/// Registration and lookup are safe to call from any thread.
#[derive(Default)]
pub struct OperationRegistry {
    interned: RwLock<Interned>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operation called `name`, creating it on first use.
    pub fn register(&self, name: &str) -> Operation {
        if let Some(operation) = self.interned.read().by_name.get(name) {
            return operation.clone();
        }
        let mut interned = self.interned.write();
        // somebody may have won the race for the write lock
        if let Some(operation) = interned.by_name.get(name) {
            return operation.clone();
        }
        let operation = Operation {
            id: interned.by_id.len() as u32,
            name: Arc::from(name),
        };
        interned.by_id.push(operation.clone());
        interned
            .by_name
            .insert(operation.name.clone(), operation.clone());
        tracing::trace!("Registered operation {operation:?}");
        operation
    }

    pub fn get_by_name(&self, name: &str) -> Option<Operation> {
        self.interned.read().by_name.get(name).cloned()
    }

    pub fn get_by_id(&self, id: u32) -> Option<Operation> {
        self.interned.read().by_id.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.interned.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every registered operation. Meant for resetting state between
    /// independent test runs, not for use while a test is running.
    pub fn clear(&self) {
        let mut interned = self.interned.write();
        interned.by_name.clear();
        interned.by_id.clear();
    }
}
