//! Single-threaded event dispatcher.
//!
//! One thread runs the loop; every other thread talks to it through a command
//! channel and a self-pipe, so the dispatch thread never locks anything on its
//! hot path.
//!
//! # Architecture
//!
//! - **Dispatcher**: owns the active sets and the self-pipe, runs iterations
//! - **IoWatcher**: readiness callbacks for a file descriptor, via `poll(2)`
//! - **Timer**: one-shot or repeating callbacks from a binary min-heap
//! - **SignalHandler**: OS signals turned into ordinary dispatch-thread events
//! - **UserSignal**: in-process callbacks fired from any thread with a payload
//! - **ProcessFunction**: callbacks run at the end of every iteration
//! - **DispatcherBuilder**: fluent builder for dispatcher instantiation
//!
//! Every entity is created disabled. Dropping the last handle to an entity
//! disables it synchronously, so no event is ever delivered after the drop
//! returns.

mod builder;
mod dispatcher;
mod error;
mod io;
mod owner;
mod process;
mod signal;
mod time;
mod utils;

pub use builder::DispatcherBuilder;
pub use dispatcher::{Dispatcher, WaitTimeout};
pub use error::{Error, Result};
pub use io::{EventMask, IoEvent, IoHandler, IoWatcher};
pub use process::{ProcessEvent, ProcessFunction, ProcessHandler};
pub use signal::user::{Payload, UserSignal, UserSignalEvent, UserSignalHandler};
pub use signal::{MAX_SIGNAL, SignalCallback, SignalEvent, SignalHandler, is_captured};
pub use time::{TimerEvent, TimerHandler, Timer};
