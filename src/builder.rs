//! Fluent builder for Dispatcher construction.

use crate::dispatcher::Dispatcher;
use crate::dispatcher::pipe::PIPE_BATCH;
use crate::error::Result;

/// Settings a [`Dispatcher`] is created with.
pub(crate) struct Config {
    pub(crate) name: String,
    pub(crate) capacity: usize,
    pub(crate) read_batch: usize,
}

/// Builder for constructing [`Dispatcher`] instances with a fluent API.
///
/// The dispatcher is bound to the thread that calls
/// [`build`](DispatcherBuilder::build).
///
/// # Example
/// ```no_run
/// use runloop::DispatcherBuilder;
///
/// let dispatcher = DispatcherBuilder::new()
///     .name("input")
///     .capacity(64)
///     .build()?;
/// # Ok::<(), runloop::Error>(())
/// ```
pub struct DispatcherBuilder {
    config: Config,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Creates a builder with the default settings: name `"runloop"`, room
    /// for 16 entities of each kind, and self-pipe reads of up to
    /// `PIPE_BUF` records.
    pub fn new() -> Self {
        Self {
            config: Config {
                name: "runloop".to_owned(),
                capacity: 16,
                read_batch: PIPE_BATCH,
            },
        }
    }

    /// Sets the name that prefixes the dispatcher's log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Pre-allocates room for `capacity` enabled entities per active set.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Sets how many self-pipe records one iteration reads at most.
    ///
    /// # Arguments
    /// * `records` - Clamped to `1..=PIPE_BUF`
    pub fn read_batch(mut self, records: usize) -> Self {
        self.config.read_batch = records.clamp(1, PIPE_BATCH);
        self
    }

    /// Builds the dispatcher on the calling thread.
    ///
    /// # Errors
    /// [`Error::SelfPipe`](crate::Error::SelfPipe) if the self-pipe cannot be
    /// created.
    pub fn build(self) -> Result<Dispatcher> {
        Dispatcher::with_config(self.config)
    }
}
