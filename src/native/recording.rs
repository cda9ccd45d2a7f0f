//! In-process native runtime that records every call.
//!
//! Completion handlers are parked instead of being fired, so a test decides
//! when, and on which thread, each one runs.

use super::{ContextNotifyFn, EventNotifyFn, NativeRuntime, ProgramNotifyFn, RawHandle, Status};
use crate::registry::ObjectKind;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Retain { kind: ObjectKind, handle: RawHandle },
    Release { kind: ObjectKind, handle: RawHandle },
    Flush(RawHandle),
    Finish(RawHandle),
    WaitForEvents(Vec<RawHandle>),
    SetUserEventStatus { event: RawHandle, status: Status },
    SetEventCallback { event: RawHandle, callback_type: Status },
    CreateContext { devices: Vec<RawHandle>, with_notify: bool },
    BuildProgram {
        program: RawHandle,
        devices: Vec<RawHandle>,
        options: Option<String>,
        with_notify: bool,
    },
}

/// Entry point selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Retain,
    Release,
    Flush,
    Finish,
    WaitForEvents,
    SetUserEventStatus,
    SetEventCallback,
    BuildProgram,
    CreateContext,
}

#[derive(Clone, Copy)]
enum Notify {
    Event(EventNotifyFn),
    Program(ProgramNotifyFn),
    Context(ContextNotifyFn),
}

/// A completion handler the runtime has accepted but not yet fired.
///
/// It can be moved to another thread and fired there.
pub struct PendingNotify {
    notify: Notify,
    target: RawHandle,
    user_data: usize,
}

impl PendingNotify {
    pub fn target(&self) -> RawHandle {
        self.target
    }

    pub fn is_program(&self) -> bool {
        matches!(self.notify, Notify::Program(_))
    }

    pub fn is_context(&self) -> bool {
        matches!(self.notify, Notify::Context(_))
    }

    /// Invoke the handler. `status` is the execution status for event
    /// handlers; program handlers query the build status themselves.
    /// Context handlers get the status name as `errinfo` unless it is
    /// `SUCCESS`.
    pub fn fire(self, status: Status) {
        let user_data = self.user_data as *mut c_void;
        // SAFETY: the handler and user data were handed over through
        // `set_event_callback` / `build_program`, whose callers promised a
        // single call is sound. `self` is consumed so this is that call.
        match self.notify {
            Notify::Event(f) => unsafe { f(self.target.as_ptr(), status.code(), user_data) },
            Notify::Program(f) => unsafe { f(self.target.as_ptr(), user_data) },
            Notify::Context(_) => {
                let errinfo = match status.is_success() {
                    true => None,
                    false => Some(status.to_string()),
                };
                self.fire_context(errinfo.as_deref(), &[]);
            }
        }
    }

    /// Invoke a context handler with an error string and private bytes.
    /// Other handlers ignore the arguments and fire with `SUCCESS`.
    pub fn fire_context(self, errinfo: Option<&str>, private_info: &[u8]) {
        let Notify::Context(f) = self.notify else {
            return self.fire(Status::SUCCESS);
        };

        let errinfo = errinfo.map(|e| CString::new(e.replace('\0', " ")).unwrap_or_default());
        let errinfo_ptr = errinfo.as_ref().map_or(std::ptr::null(), |e| e.as_ptr());
        let private_ptr = match private_info.is_empty() {
            true => std::ptr::null(),
            false => private_info.as_ptr().cast::<c_void>(),
        };

        // SAFETY: as in `fire`. The buffers outlive the call.
        unsafe {
            f(
                errinfo_ptr,
                private_ptr,
                private_info.len(),
                self.user_data as *mut c_void,
            )
        }
    }
}

impl fmt::Debug for PendingNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingNotify")
            .field("target", &self.target)
            .field("program", &self.is_program())
            .finish()
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: HashMap<Op, Status>,
    refcounts: HashMap<RawHandle, (ObjectKind, i64)>,
    destroyed: HashSet<RawHandle>,
    build_status: HashMap<RawHandle, Vec<Status>>,
    pending: VecDeque<PendingNotify>,
    next_handle: usize,
    wait_delay: Duration,
}

/// Recording implementation of [`NativeRuntime`].
///
/// Handles minted by [`create`](Self::create) are reference counted and a
/// release past zero reports the kind's invalid-handle status. Handles the
/// runtime never minted are accepted as foreign and only recorded.
#[derive(Default)]
pub struct RecordingRuntime {
    state: Mutex<State>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh object with a reference count of one.
    pub fn create(&self, kind: ObjectKind) -> RawHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let addr = 0x1000 + state.next_handle * 0x10;
        let handle = RawHandle::new(addr).expect("minted handles are non-zero");
        state.refcounts.insert(handle, (kind, 1));
        handle
    }

    pub fn refcount(&self, handle: RawHandle) -> Option<i64> {
        self.state.lock().refcounts.get(&handle).map(|(_, count)| *count)
    }

    pub fn is_destroyed(&self, handle: RawHandle) -> bool {
        self.state.lock().destroyed.contains(&handle)
    }

    /// Make every later call to `op` fail with `status`.
    pub fn fail_on(&self, op: Op, status: Status) {
        self.state.lock().failures.insert(op, status);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn set_build_status(&self, program: RawHandle, per_device: Vec<Status>) {
        self.state.lock().build_status.insert(program, per_device);
    }

    /// Simulated duration of `wait_for_events`.
    pub fn set_wait_delay(&self, delay: Duration) {
        self.state.lock().wait_delay = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn pending_notifies(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Detach every parked handler, oldest first.
    pub fn take_pending(&self) -> Vec<PendingNotify> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Fire the oldest parked handler on the calling thread.
    pub fn fire_next(&self, status: Status) -> bool {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some(pending) => {
                pending.fire(status);
                true
            }
            None => false,
        }
    }

    pub fn fire_all(&self, status: Status) -> usize {
        let pending = self.take_pending();
        let count = pending.len();
        for notify in pending {
            notify.fire(status);
        }
        count
    }

    fn record(&self, op: Op, call: Call) -> Status {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.failures.get(&op).copied().unwrap_or(Status::SUCCESS)
    }
}

impl fmt::Debug for RecordingRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecordingRuntime")
            .field("calls", &state.calls.len())
            .field("live_objects", &state.refcounts.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

// SAFETY: parked handlers are fired at most once, because `PendingNotify`
// is consumed by `fire`, and only for registrations that returned SUCCESS.
unsafe impl NativeRuntime for RecordingRuntime {
    fn retain(&self, kind: ObjectKind, handle: RawHandle) -> Status {
        let status = self.record(Op::Retain, Call::Retain { kind, handle });
        if !status.is_success() {
            return status;
        }

        let mut state = self.state.lock();
        if state.destroyed.contains(&handle) {
            return kind.invalid_status();
        }
        if let Some((_, count)) = state.refcounts.get_mut(&handle) {
            *count += 1;
        }
        Status::SUCCESS
    }

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Status {
        let status = self.record(Op::Release, Call::Release { kind, handle });
        if !status.is_success() {
            return status;
        }

        let mut state = self.state.lock();
        if state.destroyed.contains(&handle) {
            return kind.invalid_status();
        }
        let remaining = state.refcounts.get_mut(&handle).map(|(_, count)| {
            *count -= 1;
            *count
        });
        if remaining == Some(0) {
            state.refcounts.remove(&handle);
            state.destroyed.insert(handle);
        }
        Status::SUCCESS
    }

    fn flush(&self, queue: RawHandle) -> Status {
        self.record(Op::Flush, Call::Flush(queue))
    }

    fn finish(&self, queue: RawHandle) -> Status {
        self.record(Op::Finish, Call::Finish(queue))
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Status {
        let status = self.record(Op::WaitForEvents, Call::WaitForEvents(events.to_vec()));
        if events.is_empty() {
            return Status::INVALID_VALUE;
        }

        let delay = self.state.lock().wait_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        status
    }

    fn set_user_event_status(&self, event: RawHandle, status: Status) -> Status {
        self.record(
            Op::SetUserEventStatus,
            Call::SetUserEventStatus { event, status },
        )
    }

    unsafe fn set_event_callback(
        &self,
        event: RawHandle,
        callback_type: Status,
        notify: EventNotifyFn,
        user_data: *mut c_void,
    ) -> Status {
        let status = self.record(
            Op::SetEventCallback,
            Call::SetEventCallback {
                event,
                callback_type,
            },
        );
        if status.is_success() {
            self.state.lock().pending.push_back(PendingNotify {
                notify: Notify::Event(notify),
                target: event,
                user_data: user_data as usize,
            });
        }
        status
    }

    unsafe fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: Option<&CStr>,
        notify: Option<ProgramNotifyFn>,
        user_data: *mut c_void,
    ) -> Status {
        let status = self.record(
            Op::BuildProgram,
            Call::BuildProgram {
                program,
                devices: devices.to_vec(),
                options: options.map(|o| o.to_string_lossy().into_owned()),
                with_notify: notify.is_some(),
            },
        );
        if status.is_success() {
            if let Some(notify) = notify {
                self.state.lock().pending.push_back(PendingNotify {
                    notify: Notify::Program(notify),
                    target: program,
                    user_data: user_data as usize,
                });
            }
        }
        status
    }

    unsafe fn create_context(
        &self,
        devices: &[RawHandle],
        notify: Option<ContextNotifyFn>,
        user_data: *mut c_void,
    ) -> Result<RawHandle, Status> {
        let status = self.record(
            Op::CreateContext,
            Call::CreateContext {
                devices: devices.to_vec(),
                with_notify: notify.is_some(),
            },
        );
        if !status.is_success() {
            return Err(status);
        }
        if devices.is_empty() {
            return Err(Status::INVALID_VALUE);
        }

        let context = self.create(ObjectKind::Context);
        if let Some(notify) = notify {
            self.state.lock().pending.push_back(PendingNotify {
                notify: Notify::Context(notify),
                target: context,
                user_data: user_data as usize,
            });
        }
        Ok(context)
    }

    fn program_build_status(&self, program: RawHandle) -> Vec<Status> {
        self.state
            .lock()
            .build_status
            .get(&program)
            .cloned()
            .unwrap_or_else(|| vec![Status::SUCCESS])
    }
}
