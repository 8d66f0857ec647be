//! The dispatcher's self-pipe.
//!
//! The read end occupies poll request slot 0 for the dispatcher's whole life.
//! Writers put single-byte records into the write end: [`WAKE_RECORD`] when a
//! command was queued, or a signal number when the trampoline caught one. A
//! one-byte write is always atomic, so concurrent writers never interleave.

use crate::error::{Error, Result};

use libc::{EAGAIN, EINTR, EPIPE, EWOULDBLOCK, F_GETFD, F_GETFL, F_SETFD, F_SETFL};
use libc::{FD_CLOEXEC, O_NONBLOCK, close, fcntl, pipe, read, write};
use std::io;
use std::os::unix::io::RawFd;

/// Record meaning "commands are waiting in the channel".
pub(crate) const WAKE_RECORD: u8 = 0;

/// Largest read the dispatcher performs per wake-up.
pub(crate) const PIPE_BATCH: usize = libc::PIPE_BUF;

pub(crate) struct SelfPipe {
    read: RawFd,
    write: RawFd,
}

impl SelfPipe {
    pub(crate) fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::SelfPipe(io::Error::last_os_error()));
        }

        let this = Self {
            read: fds[0],
            write: fds[1],
        };

        for fd in fds {
            configure(fd).map_err(Error::SelfPipe)?;
        }

        Ok(this)
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read
    }

    pub(crate) fn write_fd(&self) -> RawFd {
        self.write
    }

    /// Writes one record.
    ///
    /// A full pipe (`EAGAIN`) is not an error: the read end is already
    /// readable, so the dispatch thread will wake regardless. A closed read end
    /// (`EPIPE`) means the dispatcher is going away and is ignored as well.
    pub(crate) fn notify(&self, record: u8) -> Result<()> {
        loop {
            let written = unsafe { write(self.write, &record as *const u8 as *const _, 1) };

            if written == 1 {
                return Ok(());
            }

            if written == 0 {
                return Err(Error::ShortWrite {
                    operation: "self-pipe notify",
                });
            }

            let error = io::Error::last_os_error();
            match error.raw_os_error() {
                Some(EINTR) => continue,
                Some(code) if code == EAGAIN || code == EWOULDBLOCK || code == EPIPE => {
                    return Ok(());
                }
                _ => return Err(Error::Wake(error)),
            }
        }
    }

    /// Reads up to `buffer.len()` pending records, returning how many arrived.
    pub(crate) fn drain(&self, buffer: &mut [u8]) -> Result<usize> {
        loop {
            let count = unsafe { read(self.read, buffer.as_mut_ptr() as *mut _, buffer.len()) };

            if count >= 0 {
                return Ok(count as usize);
            }

            let error = io::Error::last_os_error();
            match error.raw_os_error() {
                Some(EINTR) => continue,
                Some(code) if code == EAGAIN || code == EWOULDBLOCK => return Ok(0),
                _ => return Err(Error::ControlRead(error)),
            }
        }
    }
}

impl Drop for SelfPipe {
    fn drop(&mut self) {
        unsafe {
            close(self.read);
            close(self.write);
        }
    }
}

fn configure(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 || unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 || unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_come_back_in_order() {
        let pipe = SelfPipe::new().unwrap();
        pipe.notify(WAKE_RECORD).unwrap();
        pipe.notify(10).unwrap();

        let mut buffer = [0xffu8; 8];
        assert_eq!(pipe.drain(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[WAKE_RECORD, 10]);
    }

    #[test]
    fn empty_pipe_drains_nothing() {
        let pipe = SelfPipe::new().unwrap();
        let mut buffer = [0u8; 8];
        assert_eq!(pipe.drain(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn full_pipe_is_not_an_error() {
        let pipe = SelfPipe::new().unwrap();
        for _ in 0..(1 << 17) {
            pipe.notify(WAKE_RECORD).unwrap();
        }
    }
}
