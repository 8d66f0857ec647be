//! Per-iteration callbacks.
//!
//! Every enabled [`ProcessFunction`] runs once at the end of each dispatch
//! iteration, after timers and I/O, in the order of the active list. A
//! spinning function keeps the dispatcher from blocking in `poll(2)` for as
//! long as it is enabled.

use crate::dispatcher::Dispatcher;
use crate::dispatcher::command::{Command, Completion};
use crate::dispatcher::core::Shared;
use crate::dispatcher::watch::Watch;
use crate::error::Result;
use crate::owner::{Ownable, Owned};
use crate::utils::active::{Slots, remove_at};

use log::{debug, warn};
use std::mem;
use std::sync::Arc;

/// What a process function receives.
#[derive(Clone, Copy, Debug)]
pub struct ProcessEvent {
    /// Number of the iteration that is ending; starts at 1.
    pub iteration: u64,
}

pub type ProcessHandler = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

pub(crate) struct ProcessState {
    position: Option<usize>,
    spinning: bool,
    handler: Option<ProcessHandler>,
}

pub(crate) type ProcessEntity = Watch<ProcessState>;

/// The enabled process functions, walked once per iteration.
pub(crate) struct ProcessList {
    functions: Vec<Arc<ProcessEntity>>,
    next: Option<usize>,
}

impl ProcessList {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            functions: Vec::with_capacity(capacity),
            next: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.functions.len()
    }

    fn insert(&mut self, function: Arc<ProcessEntity>) {
        let position = self.functions.len();
        function.with(|state| state.position = Some(position));
        self.functions.push(function);
    }

    fn remove(&mut self, position: usize) -> Option<Arc<ProcessEntity>> {
        let mut next = self.next;
        let removed = remove_at(self, position, &mut next);
        self.next = next;
        removed
    }

    fn begin_dispatch(&mut self) {
        self.next = Some(0);
    }

    fn next(&mut self) -> Option<Arc<ProcessEntity>> {
        let cursor = self.next?;
        let function = self.functions.get(cursor)?.clone();
        self.next = Some(cursor + 1);
        Some(function)
    }

    fn end_dispatch(&mut self) {
        self.next = None;
    }
}

impl Slots for ProcessList {
    type Item = Arc<ProcessEntity>;

    fn slot_count(&self) -> usize {
        self.functions.len()
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.functions.swap(a, b);
        self.functions[a].with(|state| state.position = Some(a));
        self.functions[b].with(|state| state.position = Some(b));
    }

    fn pop_slot(&mut self) -> Option<Self::Item> {
        let function = self.functions.pop()?;
        function.with(|state| state.position = None);
        Some(function)
    }
}

pub(crate) enum ProcessOp {
    Enable,
    Disable(Option<Completion>),
    SetHandler(ProcessHandler),
    SetSpinning(bool),
}

impl ProcessOp {
    pub(crate) fn apply(self, shared: &Shared, function: &Arc<ProcessEntity>) {
        match self {
            ProcessOp::Enable => enable(shared, function),
            ProcessOp::Disable(completion) => {
                disable(shared, function);
                if let Some(completion) = completion {
                    completion.complete();
                }
            }
            ProcessOp::SetHandler(handler) => function.with(|state| state.handler = Some(handler)),
            ProcessOp::SetSpinning(spinning) => set_spinning(shared, function, spinning),
        }
    }
}

fn enable(shared: &Shared, function: &Arc<ProcessEntity>) {
    if function.is_enabled() {
        return;
    }

    let spinning = function.with(|state| state.spinning);
    shared.state.with(|state| {
        state.processes.insert(function.clone());
        if spinning {
            state.spinning += 1;
        }
    });
    function.set_enabled(true);

    debug!("{}: process function enabled", shared.name);
}

fn disable(shared: &Shared, function: &Arc<ProcessEntity>) {
    if !function.is_enabled() {
        return;
    }

    let (position, spinning) = function.with(|state| (state.position, state.spinning));
    shared.state.with(|state| {
        if let Some(position) = position {
            state.processes.remove(position);
        }
        if spinning {
            state.spinning -= 1;
        }
    });
    function.set_enabled(false);

    debug!("{}: process function disabled", shared.name);
}

fn set_spinning(shared: &Shared, function: &Arc<ProcessEntity>, spinning: bool) {
    let was = function.with(|state| mem::replace(&mut state.spinning, spinning));
    if was == spinning || !function.is_enabled() {
        return;
    }

    shared.state.with(|state| {
        if spinning {
            state.spinning += 1;
        } else {
            state.spinning -= 1;
        }
    });
}

/// Calls every enabled process function once.
pub(crate) fn run_enabled(shared: &Shared) {
    let iteration = shared.state.with(|state| {
        state.processes.begin_dispatch();
        state.iteration
    });

    while let Some(function) = shared.state.with(|state| state.processes.next()) {
        if let Some(handler) = function.with(|state| state.handler.clone()) {
            handler(&ProcessEvent { iteration });
        }
    }

    shared.state.with(|state| state.processes.end_dispatch());
}

impl Ownable for ProcessEntity {
    fn disowned(self: &Arc<Self>) {
        let Some(shared) = self.dispatcher() else {
            return;
        };

        let result = shared.route_and_wait(
            |shared| disable(shared, self),
            |done| Command::Process(self.clone(), ProcessOp::Disable(Some(done))),
        );

        if let Err(error) = result {
            warn!("{}: failed to disable disowned process function: {}", shared.name, error);
        }
    }
}

/// Handle to a process function.
#[derive(Clone)]
pub struct ProcessFunction {
    owned: Owned<ProcessEntity>,
}

impl ProcessFunction {
    fn route(
        &self,
        direct: impl FnOnce(&Shared, &Arc<ProcessEntity>),
        op: impl FnOnce() -> ProcessOp,
    ) -> Result<()> {
        let function = self.owned.entity();
        let Some(shared) = function.dispatcher() else {
            return Ok(());
        };

        shared.route(
            |shared| direct(shared, function),
            || Command::Process(function.clone(), op()),
        )
    }

    /// Starts running the function once per iteration.
    pub fn enable(&self) -> Result<()> {
        self.route(enable, || ProcessOp::Enable)
    }

    /// Stops running the function without waiting for the dispatch thread.
    pub fn disable(&self) -> Result<()> {
        self.route(disable, || ProcessOp::Disable(None))
    }

    /// Disables the function and returns once it can no longer run.
    pub fn disable_and_wait(&self) -> Result<()> {
        let function = self.owned.entity();
        let Some(shared) = function.dispatcher() else {
            return Ok(());
        };

        shared.route_and_wait(
            |shared| disable(shared, function),
            |done| Command::Process(function.clone(), ProcessOp::Disable(Some(done))),
        )
    }

    pub fn set_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        let handler: ProcessHandler = Arc::new(handler);
        let direct = handler.clone();

        self.route(
            move |_, function| function.with(|state| state.handler = Some(direct)),
            move || ProcessOp::SetHandler(handler),
        )
    }

    /// While enabled and spinning, the dispatcher polls without blocking.
    pub fn set_spinning(&self, spinning: bool) -> Result<()> {
        self.route(
            move |shared, function| set_spinning(shared, function, spinning),
            move || ProcessOp::SetSpinning(spinning),
        )
    }

    /// Whether the function runs on each iteration.
    pub fn is_enabled(&self) -> bool {
        self.owned.is_enabled()
    }
}

impl Dispatcher {
    /// Creates a disabled, non-spinning process function.
    pub fn create_process_function<F>(&self, handler: F) -> ProcessFunction
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        let state = ProcessState {
            position: None,
            spinning: false,
            handler: Some(Arc::new(handler)),
        };

        ProcessFunction {
            owned: Owned::new(Watch::new(&self.shared, state)),
        }
    }

    /// Number of process functions currently enabled.
    pub fn active_process_functions(&self) -> Result<usize> {
        self.shared.ensure_dispatch_thread("active_process_functions")?;
        Ok(self.shared.state.with(|state| state.processes.len()))
    }
}
