//! Process-scoped table of live wrappers.
//!
//! The registry dedupes wrapper creation per native handle and drives
//! ordered teardown. All mutation goes through one mutex and no lock is held
//! while native code runs, so destructors may re-enter the registry.

pub mod kind;
pub mod teardown;
pub mod wrapper;

pub use kind::{ObjectKind, TeardownPhase};
pub use teardown::TeardownReport;
pub use wrapper::{Wrapper, WrapperId, WrapperState};

use crate::error::{Error, Result};
use crate::native::RawHandle;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<IndexMap<RawHandle, Arc<Wrapper>>>,
    torn_down: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a wrapper keyed by its handle.
    ///
    /// Registering the same wrapper twice is a no-op. A different wrapper for
    /// an already registered handle is a logic error.
    pub fn register(&self, wrapper: &Arc<Wrapper>) -> Result<()> {
        if self.is_torn_down() {
            return Err(Error::TornDown);
        }

        let handle = wrapper.require_handle()?;
        let mut entries = self.entries.lock();
        // Teardown flips the flag under this lock; an entry added after that
        // would never be destroyed.
        if self.is_torn_down() {
            return Err(Error::TornDown);
        }

        if let Some(existing) = entries.get(&handle) {
            if Arc::ptr_eq(existing, wrapper) {
                return Ok(());
            }
            tracing::warn!(
                %handle,
                existing = %existing.kind(),
                requested = %wrapper.kind(),
                "duplicate registration"
            );
            return Err(Error::DuplicateHandle {
                handle,
                existing: existing.kind(),
                requested: wrapper.kind(),
            });
        }

        entries.insert(handle, Arc::clone(wrapper));
        drop(entries);

        wrapper.mark_registered();
        tracing::debug!(kind = %wrapper.kind(), %handle, "registered wrapper");
        Ok(())
    }

    pub fn find(&self, handle: RawHandle) -> Option<Arc<Wrapper>> {
        self.entries.lock().get(&handle).cloned()
    }

    /// Remove `wrapper`. Absent wrappers and calls after teardown are no-ops.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, wrapper: &Wrapper) -> bool {
        if self.is_torn_down() {
            return false;
        }

        let Some(handle) = wrapper.handle() else {
            return false;
        };

        let mut entries = self.entries.lock();
        if self.is_torn_down() {
            return false;
        }
        let owned = matches!(
            entries.get(&handle),
            Some(existing) if std::ptr::eq(Arc::as_ptr(existing), wrapper)
        );
        if !owned {
            return false;
        }

        entries.shift_remove(&handle);
        tracing::debug!(kind = %wrapper.kind(), %handle, "unregistered wrapper");
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Copy of the live wrappers in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Wrapper>> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn count_kind(&self, kind: ObjectKind) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|w| w.kind() == kind)
            .count()
    }

    /// Flip the teardown flag. Returns false if teardown already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        let _entries = self.entries.lock();
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Remove and return every entry matching `pred`, in registration order.
    pub(crate) fn take_where<P>(&self, pred: P) -> Vec<Arc<Wrapper>>
    where
        P: Fn(&Wrapper) -> bool,
    {
        let mut entries = self.entries.lock();
        let mut taken = Vec::new();
        entries.retain(|_, w| {
            if pred(&**w) {
                taken.push(Arc::clone(w));
                false
            } else {
                true
            }
        });
        taken
    }
}
