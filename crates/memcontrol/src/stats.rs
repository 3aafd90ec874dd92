use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Number of counters carried by a [`MemStats`], and the length of its reduction buffer.
pub const COUNTERS: usize = 7;

/// Immutable copy of the per-process counters for one measurement window.
///
/// Field order is also the order used in reduction buffers and report columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemStats {
    pub malloc_calls: u64,
    pub realloc_calls: u64,
    pub free_calls: u64,
    pub unknown_realloc_calls: u64,
    pub unknown_free_calls: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
}

impl MemStats {
    pub const fn zero() -> Self {
        Self {
            malloc_calls: 0,
            realloc_calls: 0,
            free_calls: 0,
            unknown_realloc_calls: 0,
            unknown_free_calls: 0,
            bytes_allocated: 0,
            bytes_freed: 0,
        }
    }

    pub fn to_array(&self) -> [u64; COUNTERS] {
        [
            self.malloc_calls,
            self.realloc_calls,
            self.free_calls,
            self.unknown_realloc_calls,
            self.unknown_free_calls,
            self.bytes_allocated,
            self.bytes_freed,
        ]
    }

    /// Rebuilds stats from a reduction buffer. Missing trailing values read as zero.
    pub fn from_slice(values: &[u64]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        Self {
            malloc_calls: at(0),
            realloc_calls: at(1),
            free_calls: at(2),
            unknown_realloc_calls: at(3),
            unknown_free_calls: at(4),
            bytes_allocated: at(5),
            bytes_freed: at(6),
        }
    }

    /// Divides every counter by `procs`, truncating (7 calls over 3 processes reads 2).
    pub fn averaged(&self, procs: usize) -> Self {
        let procs = procs.max(1) as u64;
        let mut out = [0u64; COUNTERS];
        for (slot, value) in out.iter_mut().zip(self.to_array()) {
            *slot = value / procs;
        }
        Self::from_slice(&out)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

impl AddAssign for MemStats {
    fn add_assign(&mut self, other: Self) {
        self.malloc_calls += other.malloc_calls;
        self.realloc_calls += other.realloc_calls;
        self.free_calls += other.free_calls;
        self.unknown_realloc_calls += other.unknown_realloc_calls;
        self.unknown_free_calls += other.unknown_free_calls;
        self.bytes_allocated += other.bytes_allocated;
        self.bytes_freed += other.bytes_freed;
    }
}

impl Add for MemStats {
    type Output = MemStats;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl std::iter::Sum for MemStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

/// Per-process counters mutated by the allocation event handler.
///
/// Holds no lock of its own; the owner serializes access.
#[derive(Debug, Default)]
pub struct StatsRegister {
    current: MemStats,
}

impl StatsRegister {
    pub const fn new() -> Self {
        Self {
            current: MemStats::zero(),
        }
    }

    pub fn reset(&mut self) {
        self.current = MemStats::zero();
    }

    pub fn snapshot(&self) -> MemStats {
        self.current
    }

    #[inline]
    pub fn count_malloc(&mut self, size: usize) {
        self.current.malloc_calls += 1;
        self.current.bytes_allocated += size as u64;
    }

    /// Counts a reallocation of a tracked identity by its net size change.
    #[inline]
    pub fn count_realloc(&mut self, old_size: usize, new_size: usize) {
        self.current.realloc_calls += 1;
        if new_size > old_size {
            self.current.bytes_allocated += (new_size - old_size) as u64;
        } else {
            self.current.bytes_freed += (old_size - new_size) as u64;
        }
    }

    #[inline]
    pub fn count_free(&mut self, size: usize) {
        self.current.free_calls += 1;
        self.current.bytes_freed += size as u64;
    }

    #[inline]
    pub fn count_unknown_realloc(&mut self) {
        self.current.unknown_realloc_calls += 1;
    }

    #[inline]
    pub fn count_unknown_free(&mut self) {
        self.current.unknown_free_calls += 1;
    }
}
