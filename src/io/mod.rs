//! Readiness-based I/O watchers.
//!
//! An [`IoWatcher`] ties a file descriptor and an [`EventMask`] of interest to
//! a handler. While enabled, the watcher occupies one slot of the dispatcher's
//! `poll(2)` request array; its handler runs on the dispatch thread whenever
//! `poll` reports one of the interesting events, or one of the problem
//! conditions (error, hang-up, invalid descriptor) that are always reported.
//!
//! # Example
//! ```no_run
//! use runloop::{Dispatcher, EventMask};
//!
//! # fn watch(dispatcher: &Dispatcher, fd: i32) -> runloop::Result<()> {
//! let watcher = dispatcher.create_io_watcher(fd, EventMask::READ, |event| {
//!     if event.events.contains(EventMask::READ) {
//!         println!("fd {} is readable", event.fd);
//!     }
//! });
//! watcher.enable()?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod active;

use crate::dispatcher::Dispatcher;
use crate::dispatcher::command::{Command, Completion};
use crate::dispatcher::core::Shared;
use crate::dispatcher::watch::Watch;
use crate::error::Result;
use crate::owner::{Ownable, Owned};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};
use log::{debug, warn};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Set of I/O conditions, as `poll(2)` understands them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(i16);

impl EventMask {
    pub const NONE: Self = Self(0);
    /// Data can be read without blocking.
    pub const READ: Self = Self(POLLIN);
    /// Data can be written without blocking.
    pub const WRITE: Self = Self(POLLOUT);
    /// Urgent or out-of-band data is pending.
    pub const EXCEPTION: Self = Self(POLLPRI);
    /// An error condition; always reported.
    pub const ERROR: Self = Self(POLLERR);
    /// The peer hung up; always reported.
    pub const HANG_UP: Self = Self(POLLHUP);
    /// The descriptor is not open; always reported.
    pub const INVALID: Self = Self(POLLNVAL);

    /// Conditions delivered whether or not they were asked for.
    pub const PROBLEMS: Self = Self(POLLERR | POLLHUP | POLLNVAL);

    const INTEREST: Self = Self(POLLIN | POLLOUT | POLLPRI);

    pub const fn bits(self) -> i16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every condition in `other` is also in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// The subset that can be requested from `poll(2)`.
    pub(crate) const fn interest(self) -> i16 {
        self.0 & Self::INTEREST.0
    }

    pub(crate) const fn from_revents(revents: i16) -> Self {
        Self(revents)
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventMask, &str); 6] = [
            (EventMask::READ, "READ"),
            (EventMask::WRITE, "WRITE"),
            (EventMask::EXCEPTION, "EXCEPTION"),
            (EventMask::ERROR, "ERROR"),
            (EventMask::HANG_UP, "HANG_UP"),
            (EventMask::INVALID, "INVALID"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// What a watcher's handler receives.
#[derive(Clone, Copy, Debug)]
pub struct IoEvent {
    pub fd: RawFd,
    /// Reported conditions, limited to the watcher's interest plus
    /// [`EventMask::PROBLEMS`].
    pub events: EventMask,
}

pub type IoHandler = Arc<dyn Fn(&IoEvent) + Send + Sync>;

pub(crate) struct IoState {
    pub(crate) fd: RawFd,
    pub(crate) mask: EventMask,
    /// Index in the active set while enabled.
    pub(crate) position: Option<usize>,
    pub(crate) handler: Option<IoHandler>,
}

pub(crate) type IoWatcherEntity = Watch<IoState>;

pub(crate) enum IoOp {
    SetMask(EventMask),
    SetFd(RawFd),
    Enable,
    Disable(Option<Completion>),
    SetHandler(IoHandler),
}

impl IoOp {
    pub(crate) fn apply(self, shared: &Shared, watcher: &Arc<IoWatcherEntity>) {
        match self {
            IoOp::SetMask(mask) => set_mask(shared, watcher, mask),
            IoOp::SetFd(fd) => set_fd(shared, watcher, fd),
            IoOp::Enable => enable(shared, watcher),
            IoOp::Disable(completion) => {
                disable(shared, watcher);
                if let Some(completion) = completion {
                    completion.complete();
                }
            }
            IoOp::SetHandler(handler) => watcher.with(|watch| watch.handler = Some(handler)),
        }
    }
}

fn enable(shared: &Shared, watcher: &Arc<IoWatcherEntity>) {
    if watcher.is_enabled() {
        return;
    }

    let position = shared.state.with(|state| state.io.insert(watcher.clone()));
    watcher.set_enabled(true);

    debug!("{}: io watcher enabled at slot {}", shared.name, position);
}

fn disable(shared: &Shared, watcher: &Arc<IoWatcherEntity>) {
    if !watcher.is_enabled() {
        return;
    }

    if let Some(position) = watcher.with(|watch| watch.position) {
        shared.state.with(|state| state.io.remove(position));
    }
    watcher.set_enabled(false);

    debug!("{}: io watcher disabled", shared.name);
}

fn set_mask(shared: &Shared, watcher: &Arc<IoWatcherEntity>, mask: EventMask) {
    let (fd, position) = watcher.with(|watch| {
        watch.mask = mask;
        (watch.fd, watch.position)
    });

    if let Some(position) = position {
        shared
            .state
            .with(|state| state.io.update_request(position, fd, mask));
    }
}

fn set_fd(shared: &Shared, watcher: &Arc<IoWatcherEntity>, fd: RawFd) {
    let (mask, position) = watcher.with(|watch| {
        watch.fd = fd;
        (watch.mask, watch.position)
    });

    if let Some(position) = position {
        shared
            .state
            .with(|state| state.io.update_request(position, fd, mask));
    }
}

impl Ownable for IoWatcherEntity {
    fn disowned(self: &Arc<Self>) {
        let Some(shared) = self.dispatcher() else {
            return;
        };

        let result = shared.route_and_wait(
            |shared| disable(shared, self),
            |done| Command::Io(self.clone(), IoOp::Disable(Some(done))),
        );

        if let Err(error) = result {
            warn!("{}: failed to disable disowned io watcher: {}", shared.name, error);
        }
    }
}

/// Handle to a descriptor watched by a [`Dispatcher`].
///
/// Clones share ownership. Dropping the last clone disables the watcher and,
/// when called from another thread, waits until the dispatch thread has done
/// so. The descriptor itself is never closed by the watcher.
#[derive(Clone)]
pub struct IoWatcher {
    owned: Owned<IoWatcherEntity>,
}

impl IoWatcher {
    fn route(
        &self,
        direct: impl FnOnce(&Shared, &Arc<IoWatcherEntity>),
        op: impl FnOnce() -> IoOp,
    ) -> Result<()> {
        let watcher = self.owned.entity();
        let Some(shared) = watcher.dispatcher() else {
            return Ok(());
        };

        shared.route(
            |shared| direct(shared, watcher),
            || Command::Io(watcher.clone(), op()),
        )
    }

    /// Adds the watcher to the dispatcher's poll set.
    pub fn enable(&self) -> Result<()> {
        self.route(enable, || IoOp::Enable)
    }

    /// Removes the watcher from the poll set without waiting.
    ///
    /// From another thread the watcher may still fire once before the
    /// dispatch thread processes the request; use
    /// [`disable_and_wait`](IoWatcher::disable_and_wait) when that matters.
    pub fn disable(&self) -> Result<()> {
        self.route(disable, || IoOp::Disable(None))
    }

    /// Removes the watcher and returns only once no further event can be
    /// delivered to it.
    pub fn disable_and_wait(&self) -> Result<()> {
        let watcher = self.owned.entity();
        let Some(shared) = watcher.dispatcher() else {
            return Ok(());
        };

        shared.route_and_wait(
            |shared| disable(shared, watcher),
            |done| Command::Io(watcher.clone(), IoOp::Disable(Some(done))),
        )
    }

    /// Changes the conditions of interest. Problem conditions are always
    /// reported regardless of the mask.
    pub fn set_event_mask(&self, mask: EventMask) -> Result<()> {
        self.route(
            move |shared, watcher| set_mask(shared, watcher, mask),
            move || IoOp::SetMask(mask),
        )
    }

    /// Points the watcher at another descriptor, keeping its slot if enabled.
    pub fn set_fd(&self, fd: RawFd) -> Result<()> {
        self.route(
            move |shared, watcher| set_fd(shared, watcher, fd),
            move || IoOp::SetFd(fd),
        )
    }

    /// Replaces the handler.
    pub fn set_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&IoEvent) + Send + Sync + 'static,
    {
        let handler: IoHandler = Arc::new(handler);
        let direct = handler.clone();

        self.route(
            move |_, watcher| watcher.with(|watch| watch.handler = Some(direct)),
            move || IoOp::SetHandler(handler),
        )
    }

    /// Whether the watcher is in the poll set.
    pub fn is_enabled(&self) -> bool {
        self.owned.is_enabled()
    }
}

impl Dispatcher {
    /// Creates a disabled watcher for `fd`.
    pub fn create_io_watcher<F>(&self, fd: RawFd, mask: EventMask, handler: F) -> IoWatcher
    where
        F: Fn(&IoEvent) + Send + Sync + 'static,
    {
        let state = IoState {
            fd,
            mask,
            position: None,
            handler: Some(Arc::new(handler)),
        };

        IoWatcher {
            owned: Owned::new(Watch::new(&self.shared, state)),
        }
    }
}
