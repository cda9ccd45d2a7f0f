//! Host-side proxy for one native object.

use super::kind::ObjectKind;
use crate::error::{Error, Result};
use crate::native::{NativeRuntime, RawHandle, Status};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

static WRAPPER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(u64);

impl WrapperId {
    fn next() -> Self {
        WrapperId(WRAPPER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a wrapper: `Constructed -> Registered -> Released | Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    Constructed,
    Registered,
    /// Released explicitly by host code.
    Released,
    /// Destroyed by process teardown.
    Destroyed,
}

impl WrapperState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WrapperState::Released | WrapperState::Destroyed)
    }
}

struct Slot {
    handle: Option<RawHandle>,
    state: WrapperState,
}

/// A wrapper owns exactly one native reference for as long as it holds a
/// handle. Once the handle is taken it is never handed out again.
pub struct Wrapper {
    id: WrapperId,
    kind: ObjectKind,
    slot: Mutex<Slot>,
    status: AtomicI32,
}

impl Wrapper {
    pub fn new(kind: ObjectKind, handle: RawHandle) -> Arc<Self> {
        Arc::new(Self {
            id: WrapperId::next(),
            kind,
            slot: Mutex::new(Slot {
                handle: Some(handle),
                state: WrapperState::Constructed,
            }),
            status: AtomicI32::new(Status::QUEUED.code()),
        })
    }

    pub fn id(&self) -> WrapperId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Native handle, or `None` once released or destroyed.
    pub fn handle(&self) -> Option<RawHandle> {
        self.slot.lock().handle
    }

    pub fn require_handle(&self) -> Result<RawHandle> {
        self.handle().ok_or(Error::Released)
    }

    pub fn require_kind(&self, expected: ObjectKind) -> Result<RawHandle> {
        if self.kind != expected {
            return Err(Error::KindMismatch {
                expected,
                found: self.kind,
            });
        }
        self.require_handle()
    }

    pub fn state(&self) -> WrapperState {
        self.slot.lock().state
    }

    pub fn is_released(&self) -> bool {
        self.state().is_terminal()
    }

    /// Last execution status delivered for this object (events only).
    pub fn status(&self) -> Status {
        Status::from_code(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status.code(), Ordering::Release);
    }

    pub(crate) fn mark_registered(&self) {
        let mut slot = self.slot.lock();
        if slot.state == WrapperState::Constructed {
            slot.state = WrapperState::Registered;
        }
    }

    /// Give back the native reference and move to `terminal`.
    ///
    /// Returns `None` if the handle was already taken.
    pub(crate) fn release_native(
        &self,
        native: &dyn NativeRuntime,
        terminal: WrapperState,
    ) -> Option<Status> {
        debug_assert!(terminal.is_terminal());

        let handle = {
            let mut slot = self.slot.lock();
            let handle = slot.handle.take()?;
            slot.state = terminal;
            handle
        };

        if !self.kind.is_ref_counted() {
            return Some(Status::SUCCESS);
        }

        tracing::trace!(kind = %self.kind, %handle, ?terminal, "releasing native object");
        Some(native.release(self.kind, handle))
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Wrapper")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("handle", &slot.handle)
            .field("state", &slot.state)
            .finish()
    }
}
