//! Accounting side of the allocate/reallocate/deallocate events.
//!
//! The functions here run after the real provider has answered and only see
//! what it returned: an identity of `0` is the null pointer.

use crate::ledger::{AllocationLedger, INITIAL_CAPACITY};
use crate::stats::{MemStats, StatsRegister};

/// Ledger and counters updated together, one event at a time.
#[derive(Debug, Default)]
pub struct Bookkeeper {
    ledger: Option<AllocationLedger>,
    stats: StatsRegister,
}

impl Bookkeeper {
    pub const fn new() -> Self {
        Self {
            ledger: None,
            stats: StatsRegister::new(),
        }
    }

    /// Replaces the ledger with an empty one sized for a new measurement.
    pub fn open_ledger(&mut self) -> Option<AllocationLedger> {
        self.ledger
            .replace(AllocationLedger::with_capacity(INITIAL_CAPACITY))
    }

    /// Detaches the ledger so the caller decides where its storage is released.
    pub fn close_ledger(&mut self) -> Option<AllocationLedger> {
        self.ledger.take()
    }

    pub fn ledger(&self) -> Option<&AllocationLedger> {
        self.ledger.as_ref()
    }

    fn ledger_mut(&mut self) -> &mut AllocationLedger {
        self.ledger
            .get_or_insert_with(|| AllocationLedger::with_capacity(INITIAL_CAPACITY))
    }

    pub fn snapshot(&self) -> MemStats {
        self.stats.snapshot()
    }

    pub fn reset(&mut self) {
        self.stats.reset();
    }

    /// A null `identity` is a failed allocation and leaves no trace.
    pub fn on_allocate(&mut self, identity: usize, size: usize) {
        if identity == 0 {
            return;
        }
        self.ledger_mut().record(identity, size);
        self.stats.count_malloc(size);
    }

    pub fn on_reallocate(&mut self, identity: usize, new_identity: usize, new_size: usize) {
        // null result for a non-empty request: the old block is untouched
        if new_identity == 0 && new_size > 0 {
            return;
        }

        // realloc(NULL, n) behaves as an allocation of n bytes
        if identity == 0 {
            if new_identity != 0 {
                self.ledger_mut().record(new_identity, new_size);
            }
            self.stats.count_realloc(0, new_size);
            return;
        }

        let ledger = self.ledger_mut();
        match ledger.remove(identity) {
            Some(old_size) => {
                // size 0 with a null result released the block
                if new_identity != 0 {
                    ledger.record(new_identity, new_size);
                }
                self.stats.count_realloc(old_size, new_size);
            }
            None => self.stats.count_unknown_realloc(),
        }
    }

    pub fn on_deallocate(&mut self, identity: usize) {
        if identity == 0 {
            return;
        }
        match self.ledger_mut().remove(identity) {
            Some(size) => self.stats.count_free(size),
            None => self.stats.count_unknown_free(),
        }
    }
}
