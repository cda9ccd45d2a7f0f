use crate::native::{RawHandle, Status};
use crate::registry::ObjectKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{op} failed: {status}")]
    Native { op: &'static str, status: Status },

    #[error("handle {handle} already registered as {existing}, refusing {requested}")]
    DuplicateHandle {
        handle: RawHandle,
        existing: ObjectKind,
        requested: ObjectKind,
    },

    #[error("expected a {expected} wrapper, found {found}")]
    KindMismatch {
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("wrapper has already been released")]
    Released,

    #[error("runtime has been torn down")]
    TornDown,

    #[error("config error: {0}")]
    Config(String),

    #[error("bridge error: {0}")]
    Bridge(String),
}

impl Error {
    pub fn native(op: &'static str, status: Status) -> Self {
        Error::Native { op, status }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn bridge<S: Into<String>>(msg: S) -> Self {
        Error::Bridge(msg.into())
    }

    /// Native status carried by this error, if it came from the runtime.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Native { status, .. } => Some(*status),
            _ => None,
        }
    }
}
