//! The enabled I/O watchers and their `poll(2)` requests.
//!
//! Two parallel arrays: `watchers[i]` owns `requests[i + 1]`. Request slot 0
//! belongs to the self-pipe for the dispatcher's whole life, so the request
//! array can be handed to `poll` as is.

use crate::dispatcher::WaitTimeout;
use crate::error::{Error, Result};
use crate::io::{EventMask, IoEvent, IoWatcherEntity};
use crate::utils::active::{Slots, remove_at};

use libc::{EINTR, POLLIN, nfds_t, poll, pollfd};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

pub(crate) struct IoActiveSet {
    watchers: Vec<Arc<IoWatcherEntity>>,
    requests: Vec<pollfd>,
    /// Next watcher to visit while dispatching.
    next: Option<usize>,
}

impl IoActiveSet {
    pub(crate) fn new(control_fd: RawFd, capacity: usize) -> Self {
        let mut requests = Vec::with_capacity(capacity + 1);
        requests.push(pollfd {
            fd: control_fd,
            events: POLLIN,
            revents: 0,
        });

        Self {
            watchers: Vec::with_capacity(capacity),
            requests,
            next: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Appends a watcher and returns its position.
    pub(crate) fn insert(&mut self, watcher: Arc<IoWatcherEntity>) -> usize {
        let position = self.watchers.len();
        let (fd, mask) = watcher.with(|watch| {
            watch.position = Some(position);
            (watch.fd, watch.mask)
        });

        self.watchers.push(watcher);
        self.requests.push(pollfd {
            fd,
            events: mask.interest(),
            revents: 0,
        });

        position
    }

    pub(crate) fn remove(&mut self, position: usize) -> Option<Arc<IoWatcherEntity>> {
        let mut next = self.next;
        let removed = remove_at(self, position, &mut next);
        self.next = next;
        removed
    }

    pub(crate) fn update_request(&mut self, position: usize, fd: RawFd, mask: EventMask) {
        if let Some(request) = self.requests.get_mut(position + 1) {
            request.fd = fd;
            request.events = mask.interest();
        }
    }

    /// Blocks in `poll(2)` and returns the number of ready slots.
    ///
    /// An interrupted wait counts as a wait with nothing ready; the signal
    /// that caused it is already sitting in the self-pipe.
    pub(crate) fn wait(&mut self, timeout: WaitTimeout) -> Result<usize> {
        let ready = unsafe {
            poll(
                self.requests.as_mut_ptr(),
                self.requests.len() as nfds_t,
                timeout.as_poll_millis(),
            )
        };

        if ready >= 0 {
            return Ok(ready as usize);
        }

        let error = io::Error::last_os_error();
        for request in &mut self.requests {
            request.revents = 0;
        }

        if error.raw_os_error() == Some(EINTR) {
            return Ok(0);
        }

        Err(Error::Poll(error))
    }

    /// Reports and clears readability of the self-pipe slot.
    pub(crate) fn take_control_ready(&mut self) -> bool {
        let control = &mut self.requests[0];
        let ready = control.revents != 0;
        control.revents = 0;
        ready
    }

    /// Stops polling the self-pipe; `poll(2)` skips negative descriptors.
    pub(crate) fn disable_control(&mut self) {
        self.requests[0].fd = -1;
        self.requests[0].revents = 0;
    }

    pub(crate) fn begin_dispatch(&mut self) {
        self.next = Some(0);
    }

    pub(crate) fn end_dispatch(&mut self) {
        self.next = None;
    }

    /// Advances the dispatch cursor to the next watcher with pending events.
    pub(crate) fn next_ready(&mut self) -> Option<(Arc<IoWatcherEntity>, IoEvent)> {
        let mut cursor = self.next?;

        while cursor < self.watchers.len() {
            let position = cursor;
            cursor += 1;

            let request = &mut self.requests[position + 1];
            let revents = request.revents;
            request.revents = 0;

            if revents == 0 {
                continue;
            }

            let watcher = &self.watchers[position];
            let mask = watcher.with(|watch| watch.mask);
            let events = EventMask::from_revents(revents) & (mask | EventMask::PROBLEMS);

            if events.is_empty() {
                continue;
            }

            self.next = Some(cursor);
            let event = IoEvent {
                fd: request.fd,
                events,
            };
            return Some((watcher.clone(), event));
        }

        self.next = Some(cursor);
        None
    }
}

impl Slots for IoActiveSet {
    type Item = Arc<IoWatcherEntity>;

    fn slot_count(&self) -> usize {
        self.watchers.len()
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.watchers.swap(a, b);
        self.requests.swap(a + 1, b + 1);
        self.watchers[a].with(|watch| watch.position = Some(a));
        self.watchers[b].with(|watch| watch.position = Some(b));
    }

    fn pop_slot(&mut self) -> Option<Self::Item> {
        let watcher = self.watchers.pop()?;
        self.requests.pop();
        watcher.with(|watch| watch.position = None);
        Some(watcher)
    }
}
