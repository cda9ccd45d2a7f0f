use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;

/// Opaque, non-null native object handle.
///
/// The runtime owns the object; a `RawHandle` is only an alias. Equality is
/// address equality, which is what the registry keys on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    pub fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(RawHandle)
    }

    pub fn from_ptr<T>(ptr: *mut T) -> Option<Self> {
        Self::new(ptr as usize)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
