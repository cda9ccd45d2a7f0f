//! clbridge - host-side core of an OpenCL-style compute binding
//!
//! Everything that touches the device is delegated to a [`NativeRuntime`].
//! This crate provides the parts a binding layer needs around it:
//!
//! - **Status mapping**: native `i32` codes become [`Status`] and [`Error`]
//! - **Lifetime tracking**: a [`Registry`] of live wrappers, one per native
//!   handle, with ordered teardown at exit
//! - **Completion bridge**: native completion handlers fire on any thread;
//!   their callbacks run on the host thread, exactly once, in firing order
//!
//! # Quick Start
//!
//! ```
//! use clbridge::prelude::*;
//! use std::sync::Arc;
//!
//! let native = Arc::new(RecordingRuntime::new());
//! let runtime = Runtime::new(native.clone());
//!
//! let event = runtime
//!     .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
//!     .unwrap();
//!
//! runtime
//!     .set_event_callback(
//!         &event,
//!         Status::COMPLETE,
//!         Baton::new(|d| println!("event done: {}", d.status)),
//!     )
//!     .unwrap();
//!
//! // A driver thread fires the handler...
//! native.fire_all(Status::COMPLETE);
//!
//! // ...and the host loop delivers it.
//! assert_eq!(runtime.poll(), 1);
//! ```
//!
//! # Features
//!
//! - **telemetry** (default): completion counters and delivery latency
//!   histogram, see [`Runtime::metrics`]

#![warn(missing_debug_implementations)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod native;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod telemetry;

pub use bridge::{Baton, BatonId, CompletionBridge, Delivery, OpKind};
pub use config::{Config, ConfigBuilder, Wakeup};
pub use error::{Error, Result};
pub use native::{NativeRuntime, RawHandle, RecordingRuntime, Status};
pub use registry::{ObjectKind, Registry, TeardownReport, Wrapper, WrapperState};
pub use runtime::Runtime;
