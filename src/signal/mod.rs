//! OS signals and in-process user signals.
//!
//! A [`SignalHandler`] captures one OS signal number for the whole process.
//! The signal is turned into a one-byte record on the owning dispatcher's
//! self-pipe and handled on the dispatch thread like any other event, so the
//! handler runs in ordinary code, not in signal context.
//!
//! A handler created through [`Dispatcher::stop_on_signal`] has no callback:
//! catching the signal stops the dispatcher instead.
//!
//! [`UserSignal`](user::UserSignal)s carry no OS resource; see [`user`].

pub(crate) mod table;
pub mod user;

use crate::dispatcher::Dispatcher;
use crate::dispatcher::command::{Command, Completion};
use crate::dispatcher::core::Shared;
use crate::dispatcher::watch::Watch;
use crate::error::Result;
use crate::owner::{Ownable, Owned};

use log::{debug, info, warn};
use std::sync::Arc;

pub use table::{MAX_SIGNAL, is_captured};

/// What a signal handler receives.
#[derive(Clone, Copy, Debug)]
pub struct SignalEvent {
    pub signal: i32,
}

pub type SignalCallback = Arc<dyn Fn(&SignalEvent) + Send + Sync>;

pub(crate) struct SignalState {
    signal: i32,
    /// `None` stops the dispatcher when the signal arrives.
    handler: Option<SignalCallback>,
}

impl Drop for SignalState {
    fn drop(&mut self) {
        table::release_orphaned(self.signal);
    }
}

pub(crate) type SignalHandlerEntity = Watch<SignalState>;

pub(crate) enum SignalOp {
    Enable,
    Disable {
        completion: Option<Completion>,
        release: bool,
    },
    SetHandler(SignalCallback),
}

impl SignalOp {
    pub(crate) fn apply(self, shared: &Shared, handler: &Arc<SignalHandlerEntity>) {
        match self {
            SignalOp::Enable => handler.set_enabled(true),
            SignalOp::Disable {
                completion,
                release,
            } => {
                disable(shared, handler, release);
                if let Some(completion) = completion {
                    completion.complete();
                }
            }
            SignalOp::SetHandler(callback) => handler.with(|state| state.handler = Some(callback)),
        }
    }
}

fn disable(shared: &Shared, handler: &Arc<SignalHandlerEntity>, release: bool) {
    handler.set_enabled(false);

    if release {
        table::release_handler(handler);
    }

    debug!("{}: signal handler disabled", shared.name);
}

/// Handles one signal record read from the self-pipe.
///
/// Ownership is checked again under the table mutex: the handler may have
/// been released between delivery and now.
pub(crate) fn deliver(shared: &Shared, signal: i32) {
    let Some(handler) = table::owner(signal, shared.id) else {
        warn!(
            "{}: discarding signal {} no longer owned by this dispatcher",
            shared.name, signal
        );
        return;
    };

    if !handler.is_enabled() {
        debug!("{}: signal {} ignored, handler disabled", shared.name, signal);
        return;
    }

    match handler.with(|state| state.handler.clone()) {
        Some(callback) => callback(&SignalEvent { signal }),
        None => {
            info!("{}: stopping on signal {}", shared.name, signal);
            shared.request_stop();
        }
    }
}

impl Ownable for SignalHandlerEntity {
    fn disowned(self: &Arc<Self>) {
        if let Some(shared) = self.dispatcher() {
            let result = shared.route_and_wait(
                |shared| disable(shared, self, true),
                |done| {
                    Command::Signal(
                        self.clone(),
                        SignalOp::Disable {
                            completion: Some(done),
                            release: true,
                        },
                    )
                },
            );

            if let Err(error) = result {
                warn!("{}: failed to disable disowned signal handler: {}", shared.name, error);
            }
        }

        // The dispatcher may have shut down without applying the command.
        table::release_handler(self);
    }
}

/// Handle to a captured OS signal.
///
/// While the handle lives, the signal number stays claimed for the whole
/// process, even when the handler is disabled; a disabled handler drops the
/// signals it receives. Dropping the last clone releases the claim and
/// restores the previous disposition.
#[derive(Clone)]
pub struct SignalHandler {
    owned: Owned<SignalHandlerEntity>,
    signal: i32,
}

impl SignalHandler {
    fn route(
        &self,
        direct: impl FnOnce(&Shared, &Arc<SignalHandlerEntity>),
        op: impl FnOnce() -> SignalOp,
    ) -> Result<()> {
        let handler = self.owned.entity();
        let Some(shared) = handler.dispatcher() else {
            return Ok(());
        };

        shared.route(
            |shared| direct(shared, handler),
            || Command::Signal(handler.clone(), op()),
        )
    }

    /// The captured signal number.
    pub fn signal(&self) -> i32 {
        self.signal
    }

    /// Starts delivering the signal to the callback.
    pub fn enable(&self) -> Result<()> {
        self.route(|_, handler| handler.set_enabled(true), || SignalOp::Enable)
    }

    /// Stops delivering the signal, keeping the claim.
    pub fn disable(&self) -> Result<()> {
        self.route(
            |shared, handler| disable(shared, handler, false),
            || SignalOp::Disable {
                completion: None,
                release: false,
            },
        )
    }

    /// Stops delivering the signal and returns once no further delivery can
    /// happen.
    pub fn disable_and_wait(&self) -> Result<()> {
        let handler = self.owned.entity();
        let Some(shared) = handler.dispatcher() else {
            return Ok(());
        };

        shared.route_and_wait(
            |shared| disable(shared, handler, false),
            |done| {
                Command::Signal(
                    handler.clone(),
                    SignalOp::Disable {
                        completion: Some(done),
                        release: false,
                    },
                )
            },
        )
    }

    /// Replaces the callback. A stop-on-signal handler becomes an ordinary one.
    pub fn set_handler<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        let callback: SignalCallback = Arc::new(callback);
        let direct = callback.clone();

        self.route(
            move |_, handler| handler.with(|state| state.handler = Some(direct)),
            move || SignalOp::SetHandler(callback),
        )
    }

    /// Whether deliveries currently reach the callback.
    pub fn is_enabled(&self) -> bool {
        self.owned.is_enabled()
    }
}

impl Dispatcher {
    /// Captures `signal` for this dispatcher. The handler starts disabled.
    ///
    /// # Errors
    /// [`Error::SignalClaimed`](crate::Error::SignalClaimed) if any handler in
    /// the process already captures the signal, and
    /// [`Error::SignalInstall`](crate::Error::SignalInstall) if the OS refuses
    /// the new disposition (for example `SIGKILL`).
    pub fn create_signal_handler<F>(&self, signal: i32, callback: F) -> Result<SignalHandler>
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        self.capture_signal(signal, Some(Arc::new(callback)))
    }

    /// Captures `signal` so that receiving it stops the dispatcher. The
    /// returned handler is already enabled; keep it alive for as long as the
    /// signal should be captured.
    pub fn stop_on_signal(&self, signal: i32) -> Result<SignalHandler> {
        let handler = self.capture_signal(signal, None)?;
        handler.enable()?;
        Ok(handler)
    }

    fn capture_signal(
        &self,
        signal: i32,
        callback: Option<SignalCallback>,
    ) -> Result<SignalHandler> {
        let state = SignalState {
            signal,
            handler: callback,
        };
        let entity = Watch::new(&self.shared, state);

        table::claim(
            signal,
            self.shared.id,
            self.shared.pipe.write_fd(),
            Arc::downgrade(&entity),
        )?;

        Ok(SignalHandler {
            owned: Owned::new(entity),
            signal,
        })
    }
}
