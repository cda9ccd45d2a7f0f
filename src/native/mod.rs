//! The seam to the vendor compute runtime.
//!
//! Everything the crate asks of the native library goes through
//! [`NativeRuntime`]. A production embedder implements it over the real
//! driver entry points; [`RecordingRuntime`] is an in-process implementation
//! used by the test suite and for dry runs.

pub mod handle;
pub mod recording;
pub mod status;

pub use handle::RawHandle;
pub use recording::{Call, Op, PendingNotify, RecordingRuntime};
pub use status::Status;

use crate::registry::ObjectKind;
use std::ffi::{c_char, c_void, CStr};

/// Completion handler for event callbacks: `(event, exec_status, user_data)`.
pub type EventNotifyFn =
    unsafe extern "C" fn(event: *mut c_void, exec_status: i32, user_data: *mut c_void);

/// Completion handler for program builds: `(program, user_data)`.
pub type ProgramNotifyFn = unsafe extern "C" fn(program: *mut c_void, user_data: *mut c_void);

/// Context error notification: `(errinfo, private_info, cb, user_data)`.
pub type ContextNotifyFn = unsafe extern "C" fn(
    errinfo: *const c_char,
    private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
);

/// Entry points of the native compute runtime.
///
/// Synchronous calls return a [`Status`]. The asynchronous calls take a C-ABI
/// completion handler and an opaque `user_data` pointer.
///
/// # Safety
///
/// The completion bridge reclaims `user_data` inside the handler, so an
/// implementation must invoke the handler it was given exactly once, from
/// any thread, whenever the registering call returns `SUCCESS`, and never
/// when it returns an error. Context notifications are the exception: the
/// handler given to `create_context` is invoked at most once and may never
/// be invoked at all.
pub unsafe trait NativeRuntime: Send + Sync {
    fn retain(&self, kind: ObjectKind, handle: RawHandle) -> Status;

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Status;

    fn flush(&self, queue: RawHandle) -> Status;

    fn finish(&self, queue: RawHandle) -> Status;

    /// Blocks the calling thread until every event has completed.
    fn wait_for_events(&self, events: &[RawHandle]) -> Status;

    fn set_user_event_status(&self, event: RawHandle, status: Status) -> Status;

    /// # Safety
    ///
    /// `notify` must be sound to call once with `user_data`.
    unsafe fn set_event_callback(
        &self,
        event: RawHandle,
        callback_type: Status,
        notify: EventNotifyFn,
        user_data: *mut c_void,
    ) -> Status;

    /// Create a context over `devices`. The returned handle carries one
    /// reference.
    ///
    /// # Safety
    ///
    /// If `notify` is given it must be sound to call once with `user_data`.
    unsafe fn create_context(
        &self,
        devices: &[RawHandle],
        notify: Option<ContextNotifyFn>,
        user_data: *mut c_void,
    ) -> std::result::Result<RawHandle, Status>;

    /// Without `notify` the build completes before returning.
    ///
    /// # Safety
    ///
    /// If `notify` is given it must be sound to call once with `user_data`.
    unsafe fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: Option<&CStr>,
        notify: Option<ProgramNotifyFn>,
        user_data: *mut c_void,
    ) -> Status;

    /// Per-device build status of `program`.
    fn program_build_status(&self, program: RawHandle) -> Vec<Status>;
}
