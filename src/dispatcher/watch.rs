//! State shared by every watched entity type.

use crate::dispatcher::cell::DispatchCell;
use crate::dispatcher::core::Shared;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A watched entity: an enabled flag plus type-specific state that only the
/// dispatch thread may touch.
///
/// The enabled flag is written only by the dispatch thread; it is atomic so
/// other threads can observe it through `is_enabled`.
pub(crate) struct Watch<S> {
    dispatcher: Weak<Shared>,
    enabled: AtomicBool,
    state: DispatchCell<S>,
}

impl<S> Watch<S> {
    pub(crate) fn new(shared: &Arc<Shared>, state: S) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::downgrade(shared),
            enabled: AtomicBool::new(false),
            state: DispatchCell::new(shared.owner, state),
        })
    }

    /// The owning dispatcher, unless it has already been dropped.
    pub(crate) fn dispatcher(&self) -> Option<Arc<Shared>> {
        self.dispatcher.upgrade()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn with<R>(&self, function: impl FnOnce(&mut S) -> R) -> R {
        self.state.with(function)
    }
}
