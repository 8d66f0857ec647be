//! Raw errno access.
//!
//! The signal trampoline has to preserve errno around its `write(2)` call, so
//! it needs the thread-local location directly rather than going through
//! [`std::io::Error::last_os_error`].

use libc::c_int;

#[cfg(target_os = "linux")]
fn location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn location() -> *mut c_int {
    unsafe { libc::__error() }
}

/// Returns the calling thread's current errno value.
pub(crate) fn errno() -> c_int {
    unsafe { *location() }
}

/// Overwrites the calling thread's errno value.
pub(crate) fn set_errno(value: c_int) {
    unsafe {
        *location() = value;
    }
}
