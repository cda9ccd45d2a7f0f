//! Off-thread wait for the async variant of `wait_for_events`.

use super::trampoline;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::{NativeRuntime, RawHandle};
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

static WAIT_WORKER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Run the blocking native wait on a fresh named thread and finish the
/// ticket behind `user_data` with its status.
///
/// The worker is detached; it owns the event list and a reference to the
/// native runtime until the wait returns.
///
/// # Safety
///
/// `user_data` must be an unreclaimed ticket pointer. On `Ok` ownership has
/// moved to the worker; on `Err` it stays with the caller.
pub(crate) unsafe fn spawn_wait(
    config: &Config,
    native: Arc<dyn NativeRuntime>,
    events: Vec<RawHandle>,
    user_data: *mut c_void,
) -> Result<()> {
    let id = WAIT_WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", config.wait_thread_prefix, id);

    let mut builder = thread::Builder::new().name(name);
    if let Some(stack_size) = config.wait_stack_size {
        builder = builder.stack_size(stack_size);
    }

    // Raw pointers are not Send; the address crosses as an integer.
    let ticket_addr = user_data as usize;

    builder
        .spawn(move || {
            let status = native.wait_for_events(&events);
            tracing::trace!(count = events.len(), %status, "async wait finished");
            // SAFETY: the spawning caller handed the ticket over to this
            // thread, and this is the only place that completes it.
            unsafe { trampoline::complete(status, ticket_addr as *mut c_void) };
        })
        .map(drop)
        .map_err(|e| Error::bridge(format!("wait worker spawn failed: {}", e)))
}
