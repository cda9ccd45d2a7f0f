use std::any::Any;
use std::fmt;

/// A host callback panicked during delivery.
///
/// The bridge logs it and keeps draining; the baton is gone either way.
#[derive(Debug, Clone)]
pub struct CallbackPanic {
    pub message: String,
}

impl CallbackPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self { message }
    }
}

impl fmt::Display for CallbackPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback panicked: {}", self.message)
    }
}
