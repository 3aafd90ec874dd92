//! Process-wide routing between the real provider and the instrumented handlers.
//!
//! Rust registers one global allocator for the lifetime of a binary, so the
//! provider itself is never swapped. Instead [`MemControlAllocator`] consults an
//! [`Interception`] on every call: while it is installed, and the calling
//! thread is not suspended, the call becomes a bookkeeping transaction.
//!
//! [`MemControlAllocator`]: crate::MemControlAllocator

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::InstallError;
use crate::handler::Bookkeeper;
use crate::stats::MemStats;

thread_local! {
    // const-initialized and without Drop: touching it never allocates
    static SUSPENDED: Cell<bool> = const { Cell::new(false) };
}

static GLOBAL: Interception = Interception::new();

/// The interception state shared by the registered global allocator.
pub fn global() -> &'static Interception {
    &GLOBAL
}

/// Whether the current thread bypasses the instrumentation.
///
/// A thread whose thread-local storage is already gone is treated as suspended.
#[inline]
pub fn is_suspended() -> bool {
    SUSPENDED.try_with(Cell::get).unwrap_or(true)
}

/// Bypasses the instrumentation on the current thread until dropped.
///
/// Guards nest: dropping one restores whatever state was active when it was created.
pub struct SuspendGuard {
    previous: Option<bool>,
}

impl SuspendGuard {
    #[inline]
    pub fn new() -> Self {
        let previous = SUSPENDED.try_with(|flag| flag.replace(true)).ok();
        Self { previous }
    }
}

impl Default for SuspendGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SuspendGuard {
    #[inline]
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            let _ = SUSPENDED.try_with(|flag| flag.set(previous));
        }
    }
}

/// Runs `work` against the original provider: allocations it performs on this
/// thread are neither counted nor recorded, even if it panics halfway.
#[inline]
pub fn with_original_provider<R>(work: impl FnOnce() -> R) -> R {
    let _suspended = SuspendGuard::new();
    work()
}

/// Routing flag plus the ledger and counters behind one lock.
pub struct Interception {
    installed: AtomicBool,
    book: Mutex<Bookkeeper>,
}

impl Default for Interception {
    fn default() -> Self {
        Self::new()
    }
}

impl Interception {
    pub const fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
            book: Mutex::new(Bookkeeper::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bookkeeper> {
        // counters stay meaningful even if a holder panicked
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts routing allocations through the handlers with an empty ledger and
    /// zeroed counters.
    pub fn install(&self) -> Result<(), InstallError> {
        with_original_provider(|| {
            let mut book = self.lock();
            if self.installed.load(Ordering::Acquire) {
                return Err(InstallError::AlreadyInstalled);
            }

            let stale = book.open_ledger();
            book.reset();
            self.installed.store(true, Ordering::Release);
            drop(book);
            drop(stale);

            tracing::debug!("allocation interception installed");
            Ok(())
        })
    }

    /// Routes allocations straight to the provider again and releases the
    /// ledger. Returns `false` when nothing was installed.
    pub fn restore(&self) -> bool {
        with_original_provider(|| {
            let mut book = self.lock();
            if !self.installed.swap(false, Ordering::AcqRel) {
                return false;
            }
            let ledger = book.close_ledger();
            drop(book);

            let live = ledger.as_ref().map_or(0, |l| l.len());
            drop(ledger);

            tracing::debug!(live_records = live, "allocation interception restored");
            true
        })
    }

    #[inline]
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// True when a call made on this thread right now would be instrumented.
    #[inline]
    pub fn is_routing(&self) -> bool {
        self.installed.load(Ordering::Relaxed) && !is_suspended()
    }

    /// Copy of the counters, consistent with every completed transaction.
    pub fn snapshot(&self) -> MemStats {
        with_original_provider(|| self.lock().snapshot())
    }

    pub fn reset(&self) {
        with_original_provider(|| self.lock().reset());
    }

    /// Number of live records in the ledger, or `None` when not installed.
    pub fn live_records(&self) -> Option<usize> {
        with_original_provider(|| self.lock().ledger().map(|ledger| ledger.len()))
    }

    /// Runs one provider call plus its bookkeeping as a single step: the
    /// calling thread is suspended and the bookkeeping lock is held throughout,
    /// so allocations made by the provider or the ledger go untracked.
    ///
    /// `record` is skipped when the interception was restored between the
    /// caller's routing check and taking the lock; `call` always runs.
    #[inline]
    pub fn transaction<R>(
        &self,
        call: impl FnOnce() -> R,
        record: impl FnOnce(&mut Bookkeeper, &R),
    ) -> R {
        let _suspended = SuspendGuard::new();
        let mut book = self.lock();
        let result = call();
        // install and restore flip the flag under this lock
        if self.installed.load(Ordering::Relaxed) {
            record(&mut book, &result);
        }
        result
    }
}
