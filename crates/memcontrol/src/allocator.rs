use std::alloc::{GlobalAlloc, Layout, System};

use crate::controller::{self, Interception};

/// Global allocator that forwards every request to `A` and, while the
/// interception is installed, records it in the ledger and counters.
///
/// ```rust,ignore
/// #[global_allocator]
/// static GLOBAL: memcontrol::MemControlAllocator = memcontrol::MemControlAllocator::system();
/// ```
pub struct MemControlAllocator<A = System> {
    inner: A,
    interception: Option<&'static Interception>,
}

impl MemControlAllocator<System> {
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A> MemControlAllocator<A> {
    /// Wraps `inner`, reporting to the process-wide [`controller::global`] state.
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            interception: None,
        }
    }

    /// Wraps `inner`, reporting to a caller-owned interception state.
    pub const fn with_interception(inner: A, interception: &'static Interception) -> Self {
        Self {
            inner,
            interception: Some(interception),
        }
    }

    #[inline]
    fn interception(&self) -> &Interception {
        self.interception.unwrap_or_else(controller::global)
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for MemControlAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let interception = self.interception();
        if !interception.is_routing() {
            return unsafe { self.inner.alloc(layout) };
        }

        interception.transaction(
            || unsafe { self.inner.alloc(layout) },
            |book, &ptr| book.on_allocate(ptr as usize, layout.size()),
        )
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let interception = self.interception();
        if !interception.is_routing() {
            return unsafe { self.inner.alloc_zeroed(layout) };
        }

        interception.transaction(
            || unsafe { self.inner.alloc_zeroed(layout) },
            |book, &ptr| book.on_allocate(ptr as usize, layout.size()),
        )
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let interception = self.interception();
        if !interception.is_routing() {
            return unsafe { self.inner.dealloc(ptr, layout) };
        }

        interception.transaction(
            || unsafe { self.inner.dealloc(ptr, layout) },
            |book, _| book.on_deallocate(ptr as usize),
        )
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let interception = self.interception();
        if !interception.is_routing() {
            return unsafe { self.inner.realloc(ptr, layout, new_size) };
        }

        interception.transaction(
            || unsafe { self.inner.realloc(ptr, layout, new_size) },
            |book, &new_ptr| book.on_reallocate(ptr as usize, new_ptr as usize, new_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that counts calls and refuses requests above `limit` bytes.
    struct Provider {
        limit: usize,
        calls: AtomicUsize,
    }

    impl Provider {
        const fn new(limit: usize) -> Self {
            Self {
                limit,
                calls: AtomicUsize::new(0),
            }
        }
    }

    unsafe impl GlobalAlloc for Provider {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if layout.size() > self.limit {
                return std::ptr::null_mut();
            }
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.calls.fetch_add(1, Ordering::Relaxed);
            unsafe { System.dealloc(ptr, layout) }
        }

        unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if new_size > self.limit {
                return std::ptr::null_mut();
            }
            unsafe { System.realloc(ptr, layout, new_size) }
        }
    }

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 8).unwrap()
    }

    #[test]
    fn test_not_installed_passes_through() {
        static STATE: Interception = Interception::new();
        let allocator = MemControlAllocator::with_interception(Provider::new(1024), &STATE);

        unsafe {
            let ptr = allocator.alloc(layout(64));
            assert!(!ptr.is_null());
            allocator.dealloc(ptr, layout(64));
        }

        assert_eq!(allocator.inner().calls.load(Ordering::Relaxed), 2);
        assert!(STATE.snapshot().is_zero());
    }

    #[test]
    fn test_window_scenario_through_provider() {
        static STATE: Interception = Interception::new();
        let allocator = MemControlAllocator::with_interception(Provider::new(1024), &STATE);
        STATE.install().unwrap();

        unsafe {
            let ptr = allocator.alloc(layout(64));
            let ptr = allocator.realloc(ptr, layout(64), 32);
            allocator.dealloc(ptr, layout(32));
        }

        let stats = STATE.snapshot();
        assert_eq!(stats.malloc_calls, 1);
        assert_eq!(stats.realloc_calls, 1);
        assert_eq!(stats.free_calls, 1);
        assert_eq!(stats.unknown_free_calls, 0);
        assert_eq!(stats.unknown_realloc_calls, 0);
        assert_eq!(stats.bytes_allocated, 64);
        assert_eq!(stats.bytes_freed, 64);
        assert_eq!(STATE.live_records(), Some(0));
        STATE.restore();
    }

    #[test]
    fn test_provider_failure_is_propagated_without_bookkeeping() {
        static STATE: Interception = Interception::new();
        let allocator = MemControlAllocator::with_interception(Provider::new(128), &STATE);
        STATE.install().unwrap();

        unsafe {
            assert!(allocator.alloc(layout(4096)).is_null());

            let ptr = allocator.alloc(layout(100));
            assert!(allocator.realloc(ptr, layout(100), 4096).is_null());
            allocator.dealloc(ptr, layout(100));
        }

        let stats = STATE.snapshot();
        assert_eq!(stats.malloc_calls, 1);
        assert_eq!(stats.realloc_calls, 0);
        assert_eq!(stats.free_calls, 1);
        assert_eq!(stats.bytes_allocated, 100);
        assert_eq!(stats.bytes_freed, 100);
        STATE.restore();
    }

    #[test]
    fn test_free_of_block_from_before_install_is_unknown() {
        static STATE: Interception = Interception::new();
        let allocator = MemControlAllocator::with_interception(Provider::new(1024), &STATE);

        unsafe {
            let early = allocator.alloc(layout(48));
            STATE.install().unwrap();
            let early = allocator.realloc(early, layout(48), 96);
            allocator.dealloc(early, layout(96));
        }

        let stats = STATE.snapshot();
        assert_eq!(stats.unknown_realloc_calls, 1);
        assert_eq!(stats.unknown_free_calls, 1);
        assert_eq!(stats.bytes_allocated, 0);
        assert_eq!(stats.bytes_freed, 0);
        STATE.restore();
    }

    #[test]
    fn test_suspended_thread_is_not_counted() {
        static STATE: Interception = Interception::new();
        let allocator = MemControlAllocator::with_interception(Provider::new(1024), &STATE);
        STATE.install().unwrap();

        controller::with_original_provider(|| unsafe {
            let ptr = allocator.alloc_zeroed(layout(16));
            allocator.dealloc(ptr, layout(16));
        });

        assert!(STATE.snapshot().is_zero());
        STATE.restore();
    }
}
