//! C ABI for node-locked licensing.
//!
//! Mirrors the classic `auth.h` surface:
//!
//! ```c
//! int init_auth(int mode);
//! int issue_license(const char *ip, char *out, size_t out_size);
//! int reissue_license(const char *old_ip, const char *new_ip,
//!                     const char *old_serial, char *out, size_t out_size);
//! int bind_license(const char *ip, const char *serial);
//! int verify_license(const char *ip, const char *serial);
//! int nodelock_last_error(char *out, size_t out_size);
//! ```
//!
//! Every function returns one of the `AUTH_*` codes. The process holds one
//! [`LicenseManager`] created by `init_auth`; the storage root and REMOTE
//! settings come from the `NODELOCK_*` environment variables.
//!
//! # Output buffers
//!
//! `out_size` must be at least `MIN_SERIAL_BUFFER` (32) bytes, but that only
//! admits the buffer: a serial is never shorter than 116 characters (an IPv4
//! host) and grows with IPv6 and host-name identities. Size serial buffers to
//! `MAX_SERIAL_LEN + 1` (513) bytes so every serial and its terminator fit.
//! A buffer that is too small returns `AUTH_ERR_INVALID_PARAMS` and is left
//! untouched.

mod license;

pub use license::*;

use nodelock_license::{LicenseError, LicenseManager, LicenseResult, AUTH_OK};
use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

static HANDLE: Mutex<Option<Arc<LicenseManager>>> = Mutex::new(None);
static LOGGING: Once = Once::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn lock_handle() -> MutexGuard<'static, Option<Arc<LicenseManager>>> {
    HANDLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the initialized manager.
pub(crate) fn manager() -> LicenseResult<Arc<LicenseManager>> {
    lock_handle().clone().ok_or(LicenseError::NotInitialized)
}

pub(crate) fn init_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // The host application may already own the global subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Runs `f`, recording its error for `nodelock_last_error` and converting it
/// to a status code. Panics are caught and reported as invalid parameters.
pub(crate) fn run(op: &str, f: impl FnOnce() -> LicenseResult<()>) -> c_int {
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        Err(LicenseError::InvalidParams(format!("{op} panicked")))
    });

    match result {
        Ok(()) => {
            set_last_error(None);
            AUTH_OK
        }
        Err(e) => {
            tracing::debug!(op, code = e.code(), error = %e, "FFI call failed");
            let code = e.code();
            set_last_error(Some(e.to_string()));
            code
        }
    }
}

fn set_last_error(message: Option<String>) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

pub(crate) fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Reads a NUL-terminated UTF-8 argument.
///
/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> LicenseResult<&'a str> {
    if ptr.is_null() {
        return Err(LicenseError::InvalidParams(format!("{name} is null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| LicenseError::InvalidParams(format!("{name} is not valid UTF-8")))
}

/// Checks an output buffer before any work is done.
pub(crate) fn check_out(out: *mut c_char, out_size: libc::size_t, min: usize) -> LicenseResult<()> {
    if out.is_null() {
        return Err(LicenseError::InvalidParams("output buffer is null".into()));
    }
    if out_size < min {
        return Err(LicenseError::InvalidParams(format!(
            "output buffer must hold at least {min} bytes, got {out_size}"
        )));
    }
    Ok(())
}

/// Copies `value` plus a NUL terminator into `out`.
///
/// # Safety
/// `out` must be valid for writes of `out_size` bytes.
pub(crate) unsafe fn write_out(value: &str, out: *mut c_char, out_size: libc::size_t) -> LicenseResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= out_size {
        return Err(LicenseError::InvalidParams(format!(
            "output buffer of {out_size} bytes cannot hold {} bytes plus terminator",
            bytes.len()
        )));
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.cast::<u8>(), bytes.len());
        *out.add(bytes.len()) = 0;
    }
    Ok(())
}
