//! Interior mutability bound to the dispatch thread.
//!
//! Run-loop state and per-entity state are shared through `Arc`s that other
//! threads hold, but only the dispatch thread ever reads or writes them. A
//! [`DispatchCell`] records that thread and refuses access from any other, which
//! is what lets the hot path stay lock-free.

use std::cell::RefCell;
use std::thread::{self, ThreadId};

pub(crate) struct DispatchCell<T> {
    owner: ThreadId,
    value: RefCell<T>,
}

// Every access goes through `with`, which checks that the caller is the owning
// thread, so the `RefCell` is never touched concurrently.
unsafe impl<T: Send> Sync for DispatchCell<T> {}

impl<T> DispatchCell<T> {
    pub(crate) fn new(owner: ThreadId, value: T) -> Self {
        Self {
            owner,
            value: RefCell::new(value),
        }
    }

    /// Runs `function` with exclusive access to the value.
    ///
    /// # Panics
    /// Panics when called from a thread other than the owner, or when
    /// re-entered while a previous borrow is still live.
    pub(crate) fn with<R>(&self, function: impl FnOnce(&mut T) -> R) -> R {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "dispatcher state accessed off the dispatch thread"
        );

        function(&mut self.value.borrow_mut())
    }
}
