//! Two-role ownership for watched entities.
//!
//! Every entity lives in an `Arc`. The dispatcher's active sets keep plain
//! clones of that `Arc` while the entity is enabled. Everything handed to
//! users goes through an [`Owned`] handle instead; clones of the handle share a
//! single guard, and when the last one is dropped the entity is told it has
//! been disowned. The entity must then pull itself out of the dispatcher
//! before the drop returns, so no event reaches an object its owner has let go.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Implemented by entities that need to react to losing their last owner.
pub(crate) trait Ownable: Send + Sync + 'static {
    /// Called exactly once, on the thread that dropped the last handle.
    fn disowned(self: &Arc<Self>);
}

struct OwnerGuard<T: Ownable> {
    entity: Arc<T>,
    released: AtomicBool,
}

impl<T: Ownable> Drop for OwnerGuard<T> {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.entity.disowned();
        }
    }
}

/// External-owner handle to an entity.
pub(crate) struct Owned<T: Ownable> {
    guard: Arc<OwnerGuard<T>>,
}

impl<T: Ownable> Owned<T> {
    pub(crate) fn new(entity: Arc<T>) -> Self {
        Self {
            guard: Arc::new(OwnerGuard {
                entity,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// The entity itself, as the dispatcher's active sets hold it.
    pub(crate) fn entity(&self) -> &Arc<T> {
        &self.guard.entity
    }

    /// Number of live external handles.
    #[cfg(test)]
    pub(crate) fn owner_count(&self) -> usize {
        Arc::strong_count(&self.guard)
    }
}

impl<T: Ownable> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
        }
    }
}

impl<T: Ownable> Deref for Owned<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        self.entity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        disowned: AtomicUsize,
    }

    impl Ownable for Probe {
        fn disowned(self: &Arc<Self>) {
            self.disowned.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn disowned_fires_once_after_last_handle() {
        let probe = Arc::new(Probe {
            disowned: AtomicUsize::new(0),
        });

        let first = Owned::new(probe.clone());
        let second = first.clone();
        assert_eq!(first.owner_count(), 2);

        drop(first);
        assert_eq!(probe.disowned.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(probe.disowned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn internal_references_do_not_count_as_owners() {
        let probe = Arc::new(Probe {
            disowned: AtomicUsize::new(0),
        });
        let owned = Owned::new(probe.clone());
        let internal = owned.entity().clone();

        drop(owned);
        assert_eq!(internal.disowned.load(Ordering::SeqCst), 1);
        assert!(Arc::strong_count(&internal) >= 2);
    }
}
