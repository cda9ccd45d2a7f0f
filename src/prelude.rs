pub use crate::bridge::{Baton, BatonId, Delivery, OpKind, Payload};
pub use crate::config::{Config, ConfigBuilder, Wakeup};
pub use crate::error::{Error, Result};
pub use crate::native::{NativeRuntime, RawHandle, RecordingRuntime, Status};
pub use crate::registry::{ObjectKind, Registry, TeardownReport, Wrapper, WrapperState};
pub use crate::runtime::Runtime;

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
