//! The process-wide signal table.
//!
//! Signal dispositions belong to the process, not to a dispatcher, so there is
//! exactly one table: one slot per signal number, guarded by one mutex. A
//! populated slot always means the OS disposition for that number points at
//! [`trampoline`], and that [`PIPES`] holds the owning dispatcher's self-pipe.
//!
//! The trampoline runs in signal context and cannot take the mutex; it only
//! reads [`PIPES`], an array of atomics, and writes one byte.

use crate::error::{Error, Result};
use crate::signal::SignalHandlerEntity;
use crate::utils::errno::{errno, set_errno};

use libc::{SA_RESTART, c_int, sigaction, sigemptyset};
use log::debug;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

/// Highest signal number the table can hold.
pub const MAX_SIGNAL: i32 = 64;

const SLOTS: usize = MAX_SIGNAL as usize + 1;

/// Write end of the owning dispatcher's self-pipe, per signal; -1 when free.
static PIPES: [AtomicI32; SLOTS] = [const { AtomicI32::new(-1) }; SLOTS];

static TABLE: OnceLock<Mutex<Vec<Option<Slot>>>> = OnceLock::new();

struct Slot {
    dispatcher: u64,
    handler: Weak<SignalHandlerEntity>,
    previous: sigaction,
}

fn table() -> MutexGuard<'static, Vec<Option<Slot>>> {
    TABLE
        .get_or_init(|| Mutex::new((0..SLOTS).map(|_| None).collect()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn index(signal: i32) -> Result<usize> {
    if (0..=MAX_SIGNAL).contains(&signal) {
        Ok(signal as usize)
    } else {
        Err(Error::SignalOutOfRange { signal })
    }
}

extern "C" fn trampoline(signal: c_int) {
    let saved = errno();

    if let Some(pipe) = PIPES.get(signal as usize) {
        let fd = pipe.load(Ordering::Acquire);
        if fd >= 0 {
            let record = signal as u8;
            // Nothing can be done about a failure from here.
            unsafe {
                libc::write(fd, &record as *const u8 as *const _, 1);
            }
        }
    }

    set_errno(saved);
}

/// Claims `signal` for `handler` and redirects its disposition.
///
/// Fails without touching anything if any dispatcher already owns the signal.
pub(crate) fn claim(
    signal: i32,
    dispatcher: u64,
    pipe: RawFd,
    handler: Weak<SignalHandlerEntity>,
) -> Result<()> {
    let index = index(signal)?;
    let mut slots = table();

    if slots[index].is_some() {
        return Err(Error::SignalClaimed { signal });
    }

    PIPES[index].store(pipe, Ordering::Release);

    let mut action: sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = trampoline as extern "C" fn(c_int) as libc::sighandler_t;
    action.sa_flags = SA_RESTART;
    unsafe {
        sigemptyset(&mut action.sa_mask);
    }

    let mut previous: sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signal, &action, &mut previous) } != 0 {
        let source = io::Error::last_os_error();
        PIPES[index].store(-1, Ordering::Release);
        return Err(Error::SignalInstall { signal, source });
    }

    slots[index] = Some(Slot {
        dispatcher,
        handler,
        previous,
    });
    debug!("signal {} claimed by dispatcher {}", signal, dispatcher);

    Ok(())
}

fn release_slot(index: usize, slot: Slot) {
    PIPES[index].store(-1, Ordering::Release);
    unsafe {
        libc::sigaction(index as c_int, &slot.previous, std::ptr::null_mut());
    }
    debug!("signal {} released by dispatcher {}", index, slot.dispatcher);
}

/// Releases every slot held by `handler`.
pub(crate) fn release_handler(handler: &Arc<SignalHandlerEntity>) {
    let target = Arc::downgrade(handler);
    release_where(|slot| slot.handler.ptr_eq(&target));
}

/// Releases `signal` if the handler that claimed it no longer exists.
pub(crate) fn release_orphaned(signal: i32) {
    if let Ok(index) = index(signal) {
        let mut slots = table();
        if slots[index]
            .as_ref()
            .is_some_and(|slot| slot.handler.strong_count() == 0)
            && let Some(slot) = slots[index].take()
        {
            release_slot(index, slot);
        }
    }
}

/// Releases every slot owned by the given dispatcher.
pub(crate) fn release_dispatcher(dispatcher: u64) {
    release_where(|slot| slot.dispatcher == dispatcher);
}

fn release_where(matches: impl Fn(&Slot) -> bool) {
    let mut slots = table();
    for (index, entry) in slots.iter_mut().enumerate() {
        if entry.as_ref().is_some_and(&matches)
            && let Some(slot) = entry.take()
        {
            release_slot(index, slot);
        }
    }
}

/// The handler registered for `signal`, provided `dispatcher` still owns it.
pub(crate) fn owner(signal: i32, dispatcher: u64) -> Option<Arc<SignalHandlerEntity>> {
    let index = index(signal).ok()?;
    let slots = table();

    slots[index]
        .as_ref()
        .filter(|slot| slot.dispatcher == dispatcher)
        .and_then(|slot| slot.handler.upgrade())
}

/// Whether any dispatcher in the process currently captures `signal`.
pub fn is_captured(signal: i32) -> bool {
    match index(signal) {
        Ok(index) => table()[index].is_some(),
        Err(_) => false,
    }
}
