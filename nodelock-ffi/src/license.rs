//! License operations exported over the C ABI.

use crate::{check_out, init_logging, last_error, lock_handle, manager, run, str_arg, write_out};
use nodelock_license::{AuthConfig, AuthMode, LicenseManager, MIN_SERIAL_BUFFER};
use std::ffi::{c_char, c_int};
use std::sync::Arc;

/// Initializes the process-wide license manager.
///
/// `mode` is `0` for LOCAL and `1` for REMOTE. Calling again replaces the
/// previous manager. A failed call leaves the library uninitialized, so
/// later operations return `AUTH_ERR_INVALID_PARAMS` until `init_auth`
/// succeeds. The storage root is `NODELOCK_HOME` or the platform data
/// directory.
#[unsafe(no_mangle)]
pub extern "C" fn init_auth(mode: c_int) -> c_int {
    init_logging();
    run("init_auth", || {
        let installed = AuthMode::from_raw(mode)
            .and_then(AuthConfig::from_env)
            .and_then(LicenseManager::init);

        let mut handle = lock_handle();
        match installed {
            Ok(manager) => {
                *handle = Some(Arc::new(manager));
                Ok(())
            }
            Err(e) => {
                if handle.take().is_some() {
                    tracing::warn!(error = %e, "Re-initialization failed; previous manager dropped");
                }
                Err(e)
            }
        }
    })
}

/// Issues a serial for `ip` into `out`.
///
/// # Safety
/// `ip` must be a valid NUL-terminated string and `out` must be valid for
/// writes of `out_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn issue_license(ip: *const c_char, out: *mut c_char, out_size: libc::size_t) -> c_int {
    run("issue_license", || {
        let manager = manager()?;
        let ip = unsafe { str_arg(ip, "ip") }?;
        check_out(out, out_size, MIN_SERIAL_BUFFER)?;

        let serial = manager.issue(ip)?;
        unsafe { write_out(serial.as_str(), out, out_size) }
    })
}

/// Issues a serial for `new_ip` in exchange for `old_serial`, issued to
/// `old_ip`. Does not rebind.
///
/// # Safety
/// String arguments must be valid NUL-terminated strings and `out` must be
/// valid for writes of `out_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reissue_license(
    old_ip: *const c_char,
    new_ip: *const c_char,
    old_serial: *const c_char,
    out: *mut c_char,
    out_size: libc::size_t,
) -> c_int {
    run("reissue_license", || {
        let manager = manager()?;
        let old_ip = unsafe { str_arg(old_ip, "old_ip") }?;
        let new_ip = unsafe { str_arg(new_ip, "new_ip") }?;
        let old_serial = unsafe { str_arg(old_serial, "old_serial") }?;
        check_out(out, out_size, MIN_SERIAL_BUFFER)?;

        let serial = manager.reissue(old_ip, new_ip, old_serial)?;
        unsafe { write_out(serial.as_str(), out, out_size) }
    })
}

/// Binds `serial` to this installation for `ip`.
///
/// # Safety
/// `ip` and `serial` must be valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bind_license(ip: *const c_char, serial: *const c_char) -> c_int {
    run("bind_license", || {
        let manager = manager()?;
        let ip = unsafe { str_arg(ip, "ip") }?;
        let serial = unsafe { str_arg(serial, "serial") }?;
        manager.bind(ip, serial).map(|_| ())
    })
}

/// Verifies the installation's binding for `ip` and `serial`.
///
/// # Safety
/// `ip` and `serial` must be valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn verify_license(ip: *const c_char, serial: *const c_char) -> c_int {
    run("verify_license", || {
        let manager = manager()?;
        let ip = unsafe { str_arg(ip, "ip") }?;
        let serial = unsafe { str_arg(serial, "serial") }?;
        manager.verify(ip, serial)
    })
}

/// Copies the calling thread's last error message into `out`.
///
/// Writes an empty string if the last call succeeded. Returns `-1` if `out`
/// is null or too small for the message.
///
/// # Safety
/// `out` must be valid for writes of `out_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nodelock_last_error(out: *mut c_char, out_size: libc::size_t) -> c_int {
    let message = last_error().unwrap_or_default();
    let result = check_out(out, out_size, 1).and_then(|()| unsafe { write_out(&message, out, out_size) });
    match result {
        Ok(()) => nodelock_license::AUTH_OK,
        Err(e) => e.code(),
    }
}
