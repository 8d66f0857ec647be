//! The dispatcher and its run loop.
//!
//! A [`Dispatcher`] is a cheap, cloneable handle that any thread may hold. All
//! mutable loop state sits behind a [`DispatchCell`] owned by the thread that
//! built the dispatcher; that thread is the only one allowed to run the loop.
//!
//! One iteration, in order:
//! 1. sample the clock and fire every timer that elapsed before the sample;
//! 2. block in `poll(2)` for the computed timeout;
//! 3. walk the poll slots: slot 0 drains the self-pipe (signals, then queued
//!    commands), the remaining slots deliver I/O readiness;
//! 4. run every enabled process function.

use crate::builder::Config;
use crate::dispatcher::cell::DispatchCell;
use crate::dispatcher::command::{Command, Completion, completion};
use crate::dispatcher::pipe::{SelfPipe, WAKE_RECORD};
use crate::error::{Error, Result};
use crate::io::active::IoActiveSet;
use crate::process::{self, ProcessList};
use crate::signal;
use crate::time::heap::TimerHeap;
use crate::time::{self, TimerEntity};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, trace};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// How long the next `poll(2)` call may block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitTimeout {
    /// No timer is pending and nothing spins: block until a descriptor is ready.
    Indefinite,
    /// Block at most this long. `Duration::ZERO` means poll without blocking.
    Bounded(Duration),
}

impl WaitTimeout {
    /// Milliseconds as `poll(2)` expects them, rounded up so a timer is never
    /// woken before its deadline.
    pub(crate) fn as_poll_millis(self) -> libc::c_int {
        match self {
            WaitTimeout::Indefinite => -1,
            WaitTimeout::Bounded(duration) => {
                let millis = duration.as_nanos().div_ceil(1_000_000);
                millis.min(libc::c_int::MAX as u128) as libc::c_int
            }
        }
    }
}

/// Dispatch-thread-only state.
pub(crate) struct LoopState {
    receiver: Option<Receiver<Command>>,
    pub(crate) io: IoActiveSet,
    pub(crate) timers: TimerHeap<Arc<TimerEntity>>,
    pub(crate) processes: ProcessList,
    /// Number of enabled process functions that asked for non-blocking polls.
    pub(crate) spinning: usize,
    /// Time sampled at the start of the current iteration.
    pub(crate) now: Instant,
    pub(crate) iteration: u64,
    last_wait: Option<WaitTimeout>,
    read_buffer: Vec<u8>,
}

impl LoopState {
    fn wait_timeout(&self, now: Instant) -> WaitTimeout {
        if self.spinning > 0 {
            return WaitTimeout::Bounded(Duration::ZERO);
        }

        match self.timers.peek_timeout() {
            Some(timeout) => WaitTimeout::Bounded(timeout.saturating_duration_since(now)),
            None => WaitTimeout::Indefinite,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) owner: ThreadId,
    pub(crate) name: String,
    pub(crate) pipe: SelfPipe,
    commands: Sender<Command>,
    stop_requested: AtomicBool,
    pub(crate) state: DispatchCell<LoopState>,
}

impl Shared {
    pub(crate) fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Queues a command for the dispatch thread and wakes it up.
    ///
    /// Once the dispatcher has shut down the channel is disconnected and the
    /// command is dropped without error.
    pub(crate) fn post(&self, command: Command) -> Result<()> {
        if self.commands.send(command).is_err() {
            debug!("{}: dispatcher shut down, command dropped", self.name);
            return Ok(());
        }

        self.pipe.notify(WAKE_RECORD)
    }

    /// Runs `direct` when already on the dispatch thread, otherwise posts the
    /// command built by `command`.
    pub(crate) fn route(
        &self,
        direct: impl FnOnce(&Shared),
        command: impl FnOnce() -> Command,
    ) -> Result<()> {
        if self.is_dispatch_thread() {
            direct(self);
            return Ok(());
        }

        self.post(command())
    }

    /// Like [`Shared::route`], but from another thread blocks until the
    /// dispatch thread has applied the command.
    pub(crate) fn route_and_wait(
        &self,
        direct: impl FnOnce(&Shared),
        command: impl FnOnce(Completion) -> Command,
    ) -> Result<()> {
        if self.is_dispatch_thread() {
            direct(self);
            return Ok(());
        }

        let (token, waiter) = completion();
        self.post(command(token))?;
        waiter.wait();

        Ok(())
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_dispatch_thread(&self, operation: &'static str) -> Result<()> {
        if self.is_dispatch_thread() {
            Ok(())
        } else {
            Err(Error::NotDispatchThread { operation })
        }
    }

    fn iterate(&self) -> Result<()> {
        let now = Instant::now();
        self.state.with(|state| {
            state.now = now;
            state.iteration += 1;
        });

        time::fire_elapsed(self, now);

        let (timeout, ready) = self.state.with(|state| {
            let timeout = state.wait_timeout(Instant::now());
            state.last_wait = Some(timeout);
            state.io.wait(timeout).map(|ready| (timeout, ready))
        })?;

        trace!(
            "{}: poll({:?}) returned {} ready descriptors",
            self.name, timeout, ready
        );

        if ready > 0 {
            if self.state.with(|state| state.io.take_control_ready()) {
                self.handle_control()?;
            }
            self.dispatch_io();
        }

        process::run_enabled(self);

        Ok(())
    }

    /// Reads one batch of self-pipe records, delivers the signals among them,
    /// then applies every queued command.
    fn handle_control(&self) -> Result<()> {
        let mut buffer = self.state.with(|state| mem::take(&mut state.read_buffer));
        let drained = self.pipe.drain(&mut buffer).map(|count| {
            for &record in &buffer[..count] {
                if record != WAKE_RECORD {
                    signal::deliver(self, record as i32);
                }
            }
        });

        self.state.with(|state| state.read_buffer = buffer);
        drained?;

        self.drain_commands();

        Ok(())
    }

    fn drain_commands(&self) {
        while let Some(command) = self
            .state
            .with(|state| state.receiver.as_ref().and_then(|rx| rx.try_recv().ok()))
        {
            command.apply(self);
        }
    }

    fn dispatch_io(&self) {
        self.state.with(|state| state.io.begin_dispatch());

        while let Some((watcher, event)) = self.state.with(|state| state.io.next_ready()) {
            let handler = watcher.with(|watch| watch.handler.clone());
            if let Some(handler) = handler {
                handler(&event);
            }
        }

        self.state.with(|state| state.io.end_dispatch());
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Signal slots point at our pipe; they must be gone before it closes.
        signal::table::release_dispatcher(self.id);
    }
}

/// Single-threaded event dispatcher.
///
/// The thread that builds a dispatcher becomes its dispatch thread: only that
/// thread may call [`run`](Dispatcher::run),
/// [`dispatch_next_event`](Dispatcher::dispatch_next_event) or
/// [`shutdown`](Dispatcher::shutdown). Every other operation, on the
/// dispatcher or on any entity it created, may be called from any thread.
///
/// # Example
/// ```no_run
/// use runloop::Dispatcher;
/// use std::time::Duration;
///
/// let dispatcher = Dispatcher::new()?;
/// let stopper = dispatcher.clone();
/// let timer = dispatcher.create_timer_after(Duration::from_millis(10), Duration::ZERO, move |_| {
///     stopper.stop().ok();
/// });
/// timer.enable()?;
/// dispatcher.run()?;
/// # Ok::<(), runloop::Error>(())
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) shared: Arc<Shared>,
}

impl Dispatcher {
    /// Creates a dispatcher with default settings, bound to the calling thread.
    pub fn new() -> Result<Self> {
        crate::DispatcherBuilder::new().build()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let pipe = SelfPipe::new()?;
        let (commands, receiver) = crossbeam_channel::unbounded();
        let owner = thread::current().id();

        let state = LoopState {
            receiver: Some(receiver),
            io: IoActiveSet::new(pipe.read_fd(), config.capacity),
            timers: TimerHeap::with_capacity(config.capacity),
            processes: ProcessList::with_capacity(config.capacity),
            spinning: 0,
            now: Instant::now(),
            iteration: 0,
            last_wait: None,
            read_buffer: vec![0; config.read_batch],
        };

        let shared = Arc::new(Shared {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            owner,
            name: config.name,
            pipe,
            commands,
            stop_requested: AtomicBool::new(false),
            state: DispatchCell::new(owner, state),
        });

        debug!("{}: dispatcher {} created", shared.name, shared.id);

        Ok(Self { shared })
    }

    /// The name used to prefix this dispatcher's log lines.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the caller is running on this dispatcher's dispatch thread.
    pub fn is_dispatch_thread(&self) -> bool {
        self.shared.is_dispatch_thread()
    }

    /// Runs dispatch iterations until a stop is requested.
    ///
    /// The stop flag is consumed on return, so `run` may be called again.
    pub fn run(&self) -> Result<()> {
        self.shared.ensure_dispatch_thread("run")?;
        info!("{}: dispatcher running", self.shared.name);

        while !self.shared.stop_requested.load(Ordering::Acquire) {
            self.shared.iterate()?;
        }

        self.shared.stop_requested.store(false, Ordering::Release);
        info!("{}: dispatcher stopped", self.shared.name);

        Ok(())
    }

    /// Runs exactly one dispatch iteration, blocking in `poll(2)` at most as
    /// long as the earliest timer allows.
    pub fn dispatch_next_event(&self) -> Result<()> {
        self.shared.ensure_dispatch_thread("dispatch_next_event")?;
        self.shared.iterate()
    }

    /// Asks [`run`](Dispatcher::run) to return after the current iteration.
    ///
    /// From the dispatch thread this sets a flag; from any other thread it is
    /// sent as a command, which also wakes a blocked poll.
    pub fn stop(&self) -> Result<()> {
        self.shared.route(|shared| shared.request_stop(), || Command::Stop)
    }

    /// Whether a stop has been requested and not yet consumed by `run`.
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Forces a blocked `poll(2)` on the dispatch thread to return.
    pub fn wake(&self) -> Result<()> {
        self.shared.pipe.notify(WAKE_RECORD)
    }

    /// Shuts the control path down.
    ///
    /// Queued commands are applied, the command channel is disconnected and
    /// the self-pipe's poll slot is disabled. Signals captured by this
    /// dispatcher are released. Afterwards, operations issued from other
    /// threads are silently dropped.
    pub fn shutdown(&self) -> Result<()> {
        let shared = &*self.shared;
        shared.ensure_dispatch_thread("shutdown")?;

        let Some(receiver) = shared.state.with(|state| state.receiver.take()) else {
            return Ok(());
        };

        let mut applied = 0usize;
        while let Ok(command) = receiver.try_recv() {
            command.apply(shared);
            applied += 1;
        }
        drop(receiver);

        shared.state.with(|state| state.io.disable_control());
        signal::table::release_dispatcher(shared.id);

        if applied > 0 {
            debug!(
                "{}: applied {} commands queued during shutdown",
                shared.name, applied
            );
        }
        info!("{}: dispatcher shut down", shared.name);

        Ok(())
    }

    /// Time sampled at the start of the latest iteration.
    pub fn sampled_now(&self) -> Result<Instant> {
        self.shared.ensure_dispatch_thread("sampled_now")?;
        Ok(self.shared.state.with(|state| state.now))
    }

    /// Number of iterations run so far.
    pub fn iteration(&self) -> Result<u64> {
        self.shared.ensure_dispatch_thread("iteration")?;
        Ok(self.shared.state.with(|state| state.iteration))
    }

    /// Timeout the next `poll(2)` would use if it started now.
    pub fn next_wait_timeout(&self) -> Result<WaitTimeout> {
        self.shared.ensure_dispatch_thread("next_wait_timeout")?;
        Ok(self
            .shared
            .state
            .with(|state| state.wait_timeout(Instant::now())))
    }

    /// Timeout passed to the most recent `poll(2)`, if any iteration ran.
    pub fn last_wait_timeout(&self) -> Result<Option<WaitTimeout>> {
        self.shared.ensure_dispatch_thread("last_wait_timeout")?;
        Ok(self.shared.state.with(|state| state.last_wait))
    }

    /// Number of I/O watchers currently in the active set.
    pub fn active_io_watchers(&self) -> Result<usize> {
        self.shared.ensure_dispatch_thread("active_io_watchers")?;
        Ok(self.shared.state.with(|state| state.io.len()))
    }

    /// Number of timers currently scheduled.
    pub fn active_timers(&self) -> Result<usize> {
        self.shared.ensure_dispatch_thread("active_timers")?;
        Ok(self.shared.state.with(|state| state.timers.len()))
    }
}
