//! One-shot and repeating timers.
//!
//! Enabled timers live in the dispatcher's [`TimerHeap`](heap::TimerHeap). At
//! the start of every iteration the dispatcher samples the clock once and
//! fires, earliest first, every timer whose timeout is strictly earlier than
//! that sample:
//!
//! - a one-shot timer (zero interval) is removed and disabled before its
//!   handler runs;
//! - a repeating timer is moved to `timeout + interval`, or to the sample
//!   itself when the loop fell behind, so a stall produces one catch-up firing
//!   rather than a burst. A repeat whose next timeout would overflow the
//!   clock is retired like a one-shot timer.
//!
//! # Example
//! ```no_run
//! use runloop::Dispatcher;
//! use std::time::Duration;
//!
//! # fn tick(dispatcher: &Dispatcher) -> runloop::Result<()> {
//! let timer = dispatcher.create_timer_after(
//!     Duration::from_millis(100),
//!     Duration::from_millis(100),
//!     |event| println!("tick scheduled for {:?}", event.scheduled),
//! );
//! timer.enable()?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod heap;

use crate::dispatcher::Dispatcher;
use crate::dispatcher::command::{Command, Completion};
use crate::dispatcher::core::{LoopState, Shared};
use crate::dispatcher::watch::Watch;
use crate::error::Result;
use crate::owner::{Ownable, Owned};
use heap::HeapSlot;

use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a timer's handler receives.
#[derive(Clone, Copy, Debug)]
pub struct TimerEvent {
    /// The timeout that elapsed.
    pub scheduled: Instant,
    /// The dispatcher's time sample for this iteration; always later than
    /// `scheduled`.
    pub now: Instant,
}

pub type TimerHandler = Arc<dyn Fn(&TimerEvent) + Send + Sync>;

pub(crate) struct TimerState {
    pub(crate) timeout: Instant,
    /// `Duration::ZERO` for one-shot timers.
    pub(crate) interval: Duration,
    pub(crate) position: Option<usize>,
    pub(crate) handler: Option<TimerHandler>,
}

pub(crate) type TimerEntity = Watch<TimerState>;

impl HeapSlot for Arc<TimerEntity> {
    fn set_heap_slot(&self, slot: Option<usize>) {
        self.with(|timer| timer.position = slot);
    }
}

pub(crate) enum TimerOp {
    SetTimeout(Instant),
    SetInterval(Duration),
    Enable,
    Disable(Option<Completion>),
    SetHandler(TimerHandler),
}

impl TimerOp {
    pub(crate) fn apply(self, shared: &Shared, timer: &Arc<TimerEntity>) {
        match self {
            TimerOp::SetTimeout(timeout) => set_timeout(shared, timer, timeout),
            TimerOp::SetInterval(interval) => timer.with(|state| state.interval = interval),
            TimerOp::Enable => enable(shared, timer),
            TimerOp::Disable(completion) => {
                disable(shared, timer);
                if let Some(completion) = completion {
                    completion.complete();
                }
            }
            TimerOp::SetHandler(handler) => timer.with(|state| state.handler = Some(handler)),
        }
    }
}

fn enable(shared: &Shared, timer: &Arc<TimerEntity>) {
    if timer.is_enabled() {
        return;
    }

    shared.state.with(|state| {
        let timeout = timer.with(|timer| {
            timer.timeout = timer.timeout.max(state.now);
            timer.timeout
        });
        state.timers.push(timer.clone(), timeout);
    });
    timer.set_enabled(true);

    debug!("{}: timer enabled", shared.name);
}

fn disable(shared: &Shared, timer: &Arc<TimerEntity>) {
    if !timer.is_enabled() {
        return;
    }

    if let Some(position) = timer.with(|timer| timer.position) {
        shared.state.with(|state| state.timers.remove(position));
    }
    timer.set_enabled(false);

    debug!("{}: timer disabled", shared.name);
}

fn set_timeout(shared: &Shared, timer: &Arc<TimerEntity>, timeout: Instant) {
    shared.state.with(|state| {
        let (timeout, position) = timer.with(|timer| {
            timer.timeout = match timer.position {
                Some(_) => timeout.max(state.now),
                None => timeout,
            };
            (timer.timeout, timer.position)
        });

        if let Some(position) = position {
            state.timers.update(position, timeout);
        }
    });
}

/// Pops the earliest timer if it elapsed before `now`, rescheduling or
/// retiring it first.
fn take_due(state: &mut LoopState, now: Instant) -> Option<(Arc<TimerEntity>, Instant)> {
    let (timer, scheduled) = state
        .timers
        .peek()
        .map(|(timer, timeout)| (timer.clone(), timeout))?;

    if scheduled >= now {
        return None;
    }

    let interval = timer.with(|timer| timer.interval);
    // A repeat deadline past the clock's range can never be reached.
    let next = if interval.is_zero() {
        None
    } else {
        scheduled.checked_add(interval)
    };

    match next {
        Some(next) => {
            let next = next.max(now);
            timer.with(|timer| timer.timeout = next);
            state.timers.reschedule_root(next);
        }
        None => {
            state.timers.pop_root();
            timer.set_enabled(false);
        }
    }

    Some((timer, scheduled))
}

/// Fires every timer that elapsed before `now`, in timeout order.
pub(crate) fn fire_elapsed(shared: &Shared, now: Instant) {
    while let Some((timer, scheduled)) = shared.state.with(|state| take_due(state, now)) {
        let handler = timer.with(|timer| timer.handler.clone());
        if let Some(handler) = handler {
            handler(&TimerEvent { scheduled, now });
        }
    }
}

impl Ownable for TimerEntity {
    fn disowned(self: &Arc<Self>) {
        let Some(shared) = self.dispatcher() else {
            return;
        };

        let result = shared.route_and_wait(
            |shared| disable(shared, self),
            |done| Command::Timer(self.clone(), TimerOp::Disable(Some(done))),
        );

        if let Err(error) = result {
            warn!("{}: failed to disable disowned timer: {}", shared.name, error);
        }
    }
}

/// Handle to a timer owned by a [`Dispatcher`].
///
/// Dropping the last clone disables the timer; from another thread the drop
/// waits until the timer has left the dispatcher's heap.
#[derive(Clone)]
pub struct Timer {
    owned: Owned<TimerEntity>,
}

impl Timer {
    fn route(
        &self,
        direct: impl FnOnce(&Shared, &Arc<TimerEntity>),
        op: impl FnOnce() -> TimerOp,
    ) -> Result<()> {
        let timer = self.owned.entity();
        let Some(shared) = timer.dispatcher() else {
            return Ok(());
        };

        shared.route(
            |shared| direct(shared, timer),
            || Command::Timer(timer.clone(), op()),
        )
    }

    /// Schedules the timer. A timeout already in the past fires on the next
    /// iteration.
    pub fn enable(&self) -> Result<()> {
        self.route(enable, || TimerOp::Enable)
    }

    /// Unschedules the timer without waiting for the dispatch thread.
    pub fn disable(&self) -> Result<()> {
        self.route(disable, || TimerOp::Disable(None))
    }

    /// Unschedules the timer and returns once it can no longer fire.
    pub fn disable_and_wait(&self) -> Result<()> {
        let timer = self.owned.entity();
        let Some(shared) = timer.dispatcher() else {
            return Ok(());
        };

        shared.route_and_wait(
            |shared| disable(shared, timer),
            |done| Command::Timer(timer.clone(), TimerOp::Disable(Some(done))),
        )
    }

    /// Moves the timer to a new absolute timeout, in place when enabled.
    pub fn set_timeout(&self, timeout: Instant) -> Result<()> {
        self.route(
            move |shared, timer| set_timeout(shared, timer, timeout),
            move || TimerOp::SetTimeout(timeout),
        )
    }

    /// Changes the repeat interval used after the next firing.
    /// `Duration::ZERO` makes the timer one-shot.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        self.route(
            move |_, timer| timer.with(|state| state.interval = interval),
            move || TimerOp::SetInterval(interval),
        )
    }

    /// Replaces the handler.
    pub fn set_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        let handler: TimerHandler = Arc::new(handler);
        let direct = handler.clone();

        self.route(
            move |_, timer| timer.with(|state| state.handler = Some(direct)),
            move || TimerOp::SetHandler(handler),
        )
    }

    /// Whether the timer is scheduled. One-shot timers turn disabled when
    /// they fire.
    pub fn is_enabled(&self) -> bool {
        self.owned.is_enabled()
    }
}

impl Dispatcher {
    /// Creates a disabled timer expiring at `timeout`, repeating every
    /// `interval` unless the interval is zero.
    pub fn create_timer<F>(&self, timeout: Instant, interval: Duration, handler: F) -> Timer
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        let state = TimerState {
            timeout,
            interval,
            position: None,
            handler: Some(Arc::new(handler)),
        };

        Timer {
            owned: Owned::new(Watch::new(&self.shared, state)),
        }
    }

    /// Creates a disabled timer expiring `delay` from now. A delay beyond
    /// the clock's range saturates to the farthest representable deadline.
    pub fn create_timer_after<F>(&self, delay: Duration, interval: Duration, handler: F) -> Timer
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        self.create_timer(deadline_after(Instant::now(), delay), interval, handler)
    }
}

/// `now + delay`, saturated to the latest instant the clock can represent.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    let mut delay = delay;
    loop {
        match now.checked_add(delay) {
            Some(deadline) => return deadline,
            None => delay /= 2,
        }
    }
}
