use std::collections::HashMap;

/// Number of records the ledger is sized for when a measurement begins.
pub const INITIAL_CAPACITY: usize = 1024;

/// Live allocations keyed by the address the provider returned.
///
/// Keys are raw addresses, not objects: a key can only collide when the
/// provider hands the same address out again, and that is exactly when an
/// overwrite is correct.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    records: HashMap<usize, usize>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: HashMap::with_capacity(capacity),
        }
    }

    /// Inserts or overwrites the size recorded for `identity`.
    #[inline]
    pub fn record(&mut self, identity: usize, size: usize) {
        self.records.insert(identity, size);
    }

    #[inline]
    pub fn lookup(&self, identity: usize) -> Option<usize> {
        self.records.get(&identity).copied()
    }

    /// Removes the record for `identity`, returning its size if it was tracked.
    #[inline]
    pub fn remove(&mut self, identity: usize) -> Option<usize> {
        self.records.remove(&identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the sizes of every live record.
    pub fn live_bytes(&self) -> u64 {
        self.records.values().map(|&size| size as u64).sum()
    }
}
