//! C-ABI completion handlers handed to the native runtime.
//!
//! A trampoline may run on any thread. It reclaims the ticket, captures the
//! status and queues it. It never touches host state.

use super::baton::Ticket;
use crate::native::{RawHandle, Status};
use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Event callback: `(event, exec_status, user_data)`.
///
/// # Safety
///
/// `user_data` must be a ticket pointer produced by the bridge that has not
/// been reclaimed yet.
pub(crate) unsafe extern "C" fn event_trampoline(
    _event: *mut c_void,
    exec_status: i32,
    user_data: *mut c_void,
) {
    complete(Status::from_code(exec_status), user_data);
}

/// Program build notification: `(program, user_data)`.
///
/// The per-device build statuses are OR-combined, so any failing device
/// makes the delivered status non-zero.
///
/// # Safety
///
/// Same contract as [`event_trampoline`].
pub(crate) unsafe extern "C" fn program_trampoline(program: *mut c_void, user_data: *mut c_void) {
    let Some(ticket) = reclaim(user_data) else {
        return;
    };

    guarded(move || {
        let status = match RawHandle::from_ptr(program) {
            Some(program) => Status::combine(ticket.native.program_build_status(program)),
            None => Status::INVALID_PROGRAM,
        };
        ticket.fire(status);
    });
}

/// Context error notification: `(errinfo, private_info, cb, user_data)`.
///
/// The error string and the private bytes belong to the driver and are only
/// valid during this call, so both are copied before queueing. A
/// notification with an error string is delivered as `INVALID_OPERATION`
/// with the text as the message.
///
/// # Safety
///
/// Same contract as [`event_trampoline`]. `errinfo`, if non-null, must be a
/// NUL-terminated string and `private_info`, if non-null, must point to `cb`
/// readable bytes.
pub(crate) unsafe extern "C" fn context_trampoline(
    errinfo: *const c_char,
    private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
) {
    let Some(ticket) = reclaim(user_data) else {
        return;
    };

    let message = match errinfo.is_null() {
        true => None,
        false => Some(CStr::from_ptr(errinfo).to_string_lossy().into_owned()),
    };
    let private_info = match private_info.is_null() || cb == 0 {
        true => None,
        false => Some(std::slice::from_raw_parts(private_info.cast::<u8>(), cb).to_vec()),
    };
    let status = match message {
        Some(_) => Status::INVALID_OPERATION,
        None => Status::SUCCESS,
    };

    guarded(move || {
        ticket.fire_with(status, message, private_info);
    });
}

/// Finish a ticket with `status` from Rust code, e.g. a wait worker.
///
/// # Safety
///
/// Same contract as [`event_trampoline`].
pub(crate) unsafe fn complete(status: Status, user_data: *mut c_void) {
    if let Some(ticket) = reclaim(user_data) {
        guarded(move || {
            ticket.fire(status);
        });
    }
}

unsafe fn reclaim(user_data: *mut c_void) -> Option<Box<Ticket>> {
    if user_data.is_null() {
        tracing::warn!("completion handler called without user data");
        return None;
    }
    // SAFETY: the caller guarantees `user_data` came from `Box::into_raw` in
    // `CompletionBridge::submit_async` and is reclaimed here only once.
    Some(Box::from_raw(user_data.cast::<Ticket>()))
}

// Unwinding out of an `extern "C"` frame aborts the process.
fn guarded<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("panic inside completion trampoline, completion lost");
    }
}
