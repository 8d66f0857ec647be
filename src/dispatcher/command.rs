//! Cross-thread control messages.
//!
//! A [`Command`] names one operation on one entity and owns an `Arc` to that
//! entity, so the entity stays alive until the dispatch thread has applied the
//! operation. Commands travel over an unbounded channel; the self-pipe only
//! carries the wake-up.

use crate::dispatcher::core::Shared;
use crate::io::{IoOp, IoWatcherEntity};
use crate::process::{ProcessEntity, ProcessOp};
use crate::signal::user::{UserSignalEntity, UserSignalOp};
use crate::signal::{SignalHandlerEntity, SignalOp};
use crate::time::{TimerEntity, TimerOp};

use std::sync::{Arc, Condvar, Mutex, PoisonError};

pub(crate) enum Command {
    Stop,
    Io(Arc<IoWatcherEntity>, IoOp),
    Timer(Arc<TimerEntity>, TimerOp),
    Signal(Arc<SignalHandlerEntity>, SignalOp),
    UserSignal(Arc<UserSignalEntity>, UserSignalOp),
    Process(Arc<ProcessEntity>, ProcessOp),
}

impl Command {
    /// Applies the command on the dispatch thread.
    pub(crate) fn apply(self, shared: &Shared) {
        match self {
            Command::Stop => shared.request_stop(),
            Command::Io(watcher, op) => op.apply(shared, &watcher),
            Command::Timer(timer, op) => op.apply(shared, &timer),
            Command::Signal(handler, op) => op.apply(shared, &handler),
            Command::UserSignal(user_signal, op) => op.apply(&user_signal),
            Command::Process(function, op) => op.apply(shared, &function),
        }
    }
}

struct Rendezvous {
    done: Mutex<bool>,
    condvar: Condvar,
}

/// Dispatch-side half of a synchronous command.
///
/// Completing the token, or dropping it, releases the waiting caller. Dropping
/// matters during shutdown: a command discarded with a disconnected channel
/// still wakes whoever is blocked on it.
pub(crate) struct Completion {
    rendezvous: Arc<Rendezvous>,
}

impl Completion {
    pub(crate) fn complete(self) {
        drop(self);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let mut done = self
            .rendezvous
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.rendezvous.condvar.notify_all();
    }
}

/// Caller-side half of a synchronous command.
pub(crate) struct CompletionWaiter {
    rendezvous: Arc<Rendezvous>,
}

impl CompletionWaiter {
    /// Blocks until the matching [`Completion`] is completed or dropped.
    pub(crate) fn wait(self) {
        let mut done = self
            .rendezvous
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !*done {
            done = self
                .rendezvous
                .condvar
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub(crate) fn completion() -> (Completion, CompletionWaiter) {
    let rendezvous = Arc::new(Rendezvous {
        done: Mutex::new(false),
        condvar: Condvar::new(),
    });

    (
        Completion {
            rendezvous: rendezvous.clone(),
        },
        CompletionWaiter { rendezvous },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn waiter_returns_after_completion() {
        let (token, waiter) = completion();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            token.complete();
        });

        waiter.wait();
        handle.join().unwrap();
    }

    #[test]
    fn dropped_token_releases_waiter() {
        let (token, waiter) = completion();
        drop(token);
        waiter.wait();
    }
}
