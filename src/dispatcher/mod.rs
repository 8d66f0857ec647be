//! The run loop and its cross-thread control path.
//!
//! - [`core`]: the [`Dispatcher`](core::Dispatcher) handle and one dispatch iteration
//! - [`command`]: control messages and synchronous completion
//! - [`pipe`]: the self-pipe that wakes `poll(2)`
//! - [`cell`]: dispatch-thread-bound interior mutability
//! - [`watch`]: state common to every watched entity

pub(crate) mod cell;
pub(crate) mod command;
pub(crate) mod core;
pub(crate) mod pipe;
pub(crate) mod watch;

pub use self::core::{Dispatcher, WaitTimeout};
