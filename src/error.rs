//! Error type shared by every dispatcher operation.
//!
//! Each variant names the operation that failed and, where the failure comes
//! from the operating system, carries the underlying [`io::Error`] so its errno
//! stays visible to the caller.

use std::io;

use thiserror::Error;

/// Errors raised by the dispatcher and its watched entities.
#[derive(Debug, Error)]
pub enum Error {
    /// The self-pipe could not be created or configured.
    #[error("failed to create the dispatcher self-pipe: {0}")]
    SelfPipe(#[source] io::Error),

    /// Writing a wake-up record into the self-pipe failed.
    #[error("failed to wake the dispatch thread: {0}")]
    Wake(#[source] io::Error),

    /// Reading pending records out of the self-pipe failed.
    #[error("failed to read the dispatcher control pipe: {0}")]
    ControlRead(#[source] io::Error),

    /// The `poll(2)` wait itself failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// A pipe write transferred fewer bytes than the record size.
    #[error("short write during {operation}")]
    ShortWrite { operation: &'static str },

    /// The signal number does not fit the process-wide signal table.
    #[error("signal {signal} is outside the supported range")]
    SignalOutOfRange { signal: i32 },

    /// Another handler, possibly on another dispatcher, already owns the signal.
    #[error("signal {signal} is already captured by another handler")]
    SignalClaimed { signal: i32 },

    /// `sigaction(2)` refused to install the trampoline.
    #[error("failed to install handler for signal {signal}: {source}")]
    SignalInstall {
        signal: i32,
        #[source]
        source: io::Error,
    },

    /// A loop-owning operation was called away from the dispatch thread.
    #[error("{operation} must be called on the dispatch thread")]
    NotDispatchThread { operation: &'static str },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
