//! In-process user signals.
//!
//! A [`UserSignal`] is a named callback that can be fired from any thread.
//! Firing on the dispatch thread calls the handler immediately; firing from
//! any other thread hands the payload to the dispatch thread, which calls the
//! handler and drops the payload once the handler returns.

use crate::dispatcher::Dispatcher;
use crate::dispatcher::command::{Command, Completion};
use crate::dispatcher::core::Shared;
use crate::dispatcher::watch::Watch;
use crate::error::Result;
use crate::owner::{Ownable, Owned};

use log::warn;
use std::any::Any;
use std::sync::Arc;

/// Shared payload attached to a firing.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// What a user signal's handler receives.
#[derive(Clone)]
pub struct UserSignalEvent {
    pub payload: Option<Payload>,
}

impl UserSignalEvent {
    /// The payload, if there is one and it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|payload| payload.downcast_ref())
    }
}

pub type UserSignalHandler = Arc<dyn Fn(&UserSignalEvent) + Send + Sync>;

pub(crate) struct UserSignalState {
    handler: Option<UserSignalHandler>,
}

pub(crate) type UserSignalEntity = Watch<UserSignalState>;

pub(crate) enum UserSignalOp {
    Enable,
    Disable(Option<Completion>),
    SetHandler(UserSignalHandler),
    Fire(Option<Payload>),
}

impl UserSignalOp {
    pub(crate) fn apply(self, user_signal: &Arc<UserSignalEntity>) {
        match self {
            UserSignalOp::Enable => user_signal.set_enabled(true),
            UserSignalOp::Disable(completion) => {
                user_signal.set_enabled(false);
                if let Some(completion) = completion {
                    completion.complete();
                }
            }
            UserSignalOp::SetHandler(handler) => {
                user_signal.with(|state| state.handler = Some(handler))
            }
            UserSignalOp::Fire(payload) => fire(user_signal, payload),
        }
    }
}

fn fire(user_signal: &Arc<UserSignalEntity>, payload: Option<Payload>) {
    if !user_signal.is_enabled() {
        return;
    }

    if let Some(handler) = user_signal.with(|state| state.handler.clone()) {
        handler(&UserSignalEvent { payload });
    }
}

impl Ownable for UserSignalEntity {
    fn disowned(self: &Arc<Self>) {
        let Some(shared) = self.dispatcher() else {
            return;
        };

        let result = shared.route_and_wait(
            |_| self.set_enabled(false),
            |done| Command::UserSignal(self.clone(), UserSignalOp::Disable(Some(done))),
        );

        if let Err(error) = result {
            warn!("{}: failed to disable disowned user signal: {}", shared.name, error);
        }
    }
}

/// Handle to a user signal.
#[derive(Clone)]
pub struct UserSignal {
    owned: Owned<UserSignalEntity>,
}

impl UserSignal {
    fn route(
        &self,
        direct: impl FnOnce(&Arc<UserSignalEntity>),
        op: impl FnOnce() -> UserSignalOp,
    ) -> Result<()> {
        let user_signal = self.owned.entity();
        let Some(shared) = user_signal.dispatcher() else {
            return Ok(());
        };

        shared.route(
            |_: &Shared| direct(user_signal),
            || Command::UserSignal(user_signal.clone(), op()),
        )
    }

    /// Lets firings reach the handler.
    pub fn enable(&self) -> Result<()> {
        self.route(|user_signal| user_signal.set_enabled(true), || UserSignalOp::Enable)
    }

    /// Disables the signal without waiting. Firings already queued by other
    /// threads are dropped when they reach the dispatch thread.
    pub fn disable(&self) -> Result<()> {
        self.route(
            |user_signal| user_signal.set_enabled(false),
            || UserSignalOp::Disable(None),
        )
    }

    /// Disables the signal and returns once its handler can no longer run.
    pub fn disable_and_wait(&self) -> Result<()> {
        let user_signal = self.owned.entity();
        let Some(shared) = user_signal.dispatcher() else {
            return Ok(());
        };

        shared.route_and_wait(
            |_| user_signal.set_enabled(false),
            |done| Command::UserSignal(user_signal.clone(), UserSignalOp::Disable(Some(done))),
        )
    }

    /// Replaces the handler.
    pub fn set_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&UserSignalEvent) + Send + Sync + 'static,
    {
        let handler: UserSignalHandler = Arc::new(handler);
        let direct = handler.clone();

        self.route(
            move |user_signal| user_signal.with(|state| state.handler = Some(direct)),
            move || UserSignalOp::SetHandler(handler),
        )
    }

    /// Fires without a payload.
    pub fn fire(&self) -> Result<()> {
        self.fire_payload(None)
    }

    /// Fires with `payload`, which the handler can read back through
    /// [`UserSignalEvent::payload`].
    pub fn fire_with<T: Any + Send + Sync>(&self, payload: T) -> Result<()> {
        self.fire_payload(Some(Arc::new(payload)))
    }

    fn fire_payload(&self, payload: Option<Payload>) -> Result<()> {
        let user_signal = self.owned.entity();
        let Some(shared) = user_signal.dispatcher() else {
            return Ok(());
        };

        if shared.is_dispatch_thread() {
            fire(user_signal, payload);
            return Ok(());
        }

        shared.post(Command::UserSignal(
            user_signal.clone(),
            UserSignalOp::Fire(payload),
        ))
    }

    /// Whether firings currently reach the handler.
    pub fn is_enabled(&self) -> bool {
        self.owned.is_enabled()
    }
}

impl Dispatcher {
    /// Creates a disabled user signal.
    pub fn create_user_signal<F>(&self, handler: F) -> UserSignal
    where
        F: Fn(&UserSignalEvent) + Send + Sync + 'static,
    {
        let state = UserSignalState {
            handler: Some(Arc::new(handler)),
        };

        UserSignal {
            owned: Owned::new(Watch::new(&self.shared, state)),
        }
    }
}
