//! Transfer context between an async native call and its host callback.

use super::panic::CallbackPanic;
use crate::config::Wakeup;
use crate::native::{NativeRuntime, Status};
use crate::registry::Wrapper;
use crate::telemetry::Metrics;
use crossbeam_channel::{SendTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Opaque host value carried alongside a callback.
pub type Payload = Box<dyn Any>;

type Callback = Box<dyn FnOnce(Delivery)>;

/// Key of a pending baton. The generation stops a stale completion from
/// reaching a baton that reused the same slab slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatonId {
    pub(crate) key: usize,
    pub(crate) generation: u64,
}

/// Which native entry point a baton was submitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    EventCallback,
    ProgramBuild,
    WaitForEvents,
    /// Context error notification. May never fire.
    ContextNotify,
}

impl OpKind {
    pub fn native_name(self) -> &'static str {
        match self {
            OpKind::EventCallback => "clSetEventCallback",
            OpKind::ProgramBuild => "clBuildProgram",
            OpKind::WaitForEvents => "clWaitForEvents",
            OpKind::ContextNotify => "clCreateContext",
        }
    }

    /// Whether the native runtime always fires a completion for this op.
    pub fn always_completes(self) -> bool {
        !matches!(self, OpKind::ContextNotify)
    }
}

/// What a callback receives on the host thread.
pub struct Delivery {
    pub status: Status,
    /// Error text reported by the native runtime, if any.
    pub message: Option<String>,
    /// Opaque bytes the runtime attached to a context notification.
    pub private_info: Option<Vec<u8>>,
    /// Wrapper the operation was issued on, if any.
    pub parent: Option<Arc<Wrapper>>,
    pub payload: Option<Payload>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }

    /// Take the payload if it is a `T`. A payload of another type stays put.
    pub fn take_payload<T: Any>(&mut self) -> Option<T> {
        match self.payload.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.payload = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("parent", &self.parent.as_ref().map(|w| w.id()))
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Host half of a baton: the callback and everything it owns.
///
/// Lives on the host thread from submission until delivery and is never
/// seen by native code.
pub struct Baton {
    callback: Callback,
    payload: Option<Payload>,
    parent: Option<Arc<Wrapper>>,
}

impl Baton {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Delivery) + 'static,
    {
        Self {
            callback: Box::new(callback),
            payload: None,
            parent: None,
        }
    }

    pub fn with_payload<T: Any>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    pub fn with_parent(mut self, parent: Arc<Wrapper>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn parent(&self) -> Option<&Arc<Wrapper>> {
        self.parent.as_ref()
    }

    /// Record the status on the parent and run the callback, consuming the
    /// baton.
    pub(crate) fn complete(self, completion: Completion) -> std::result::Result<(), CallbackPanic> {
        if let Some(parent) = &self.parent {
            parent.set_status(completion.status);
        }

        let delivery = Delivery {
            status: completion.status,
            message: completion.message,
            private_info: completion.private_info,
            parent: self.parent,
            payload: self.payload,
        };
        let callback = self.callback;

        catch_unwind(AssertUnwindSafe(move || callback(delivery))).map_err(CallbackPanic::from_payload)
    }
}

impl fmt::Debug for Baton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Baton")
            .field("parent", &self.parent.as_ref().map(|w| w.id()))
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// A native completion captured by a trampoline.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: BatonId,
    pub op: OpKind,
    pub status: Status,
    pub message: Option<String>,
    pub private_info: Option<Vec<u8>>,
    pub fired_at: Instant,
}

impl Completion {
    pub(crate) fn new(id: BatonId, op: OpKind, status: Status) -> Self {
        Self {
            id,
            op,
            status,
            message: None,
            private_info: None,
            fired_at: Instant::now(),
        }
    }
}

const FULL_QUEUE_RETRY: Duration = Duration::from_millis(10);

/// Producer side of the completion queue, shared with native threads.
///
/// Driver threads block while the queue is full. The host thread never
/// does: completions it fires inline go to an overflow list that the
/// drain picks up after the channel.
#[derive(Clone)]
pub(crate) struct Ingress {
    sender: Sender<Completion>,
    host: ThreadId,
    overflow: Arc<Mutex<VecDeque<Completion>>>,
    closed: Arc<AtomicBool>,
    wakeup: Arc<RwLock<Option<Wakeup>>>,
    metrics: Option<Arc<Metrics>>,
}

impl Ingress {
    /// The calling thread becomes the host thread.
    pub(crate) fn new(
        sender: Sender<Completion>,
        wakeup: Option<Wakeup>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            sender,
            host: thread::current().id(),
            overflow: Arc::new(Mutex::new(VecDeque::new())),
            closed: Arc::new(AtomicBool::new(false)),
            wakeup: Arc::new(RwLock::new(wakeup)),
            metrics,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_wakeup(&self, wakeup: Option<Wakeup>) {
        *self.wakeup.write() = wakeup;
    }

    pub(crate) fn overflow_len(&self) -> usize {
        self.overflow.lock().len()
    }

    pub(crate) fn pop_overflow(&self) -> Option<Completion> {
        self.overflow.lock().pop_front()
    }

    pub(crate) fn clear_overflow(&self) -> usize {
        let mut overflow = self.overflow.lock();
        let count = overflow.len();
        overflow.clear();
        count
    }

    /// Bypasses the closed check, as a push that raced `close` would.
    #[cfg(test)]
    pub(crate) fn sender(&self) -> &Sender<Completion> {
        &self.sender
    }

    /// Queue `completion` and poke the wakeup hook.
    ///
    /// Off the host thread this blocks while the queue is full. Returns
    /// false if the completion was dropped because the bridge is closed.
    pub(crate) fn push(&self, completion: Completion) -> bool {
        if self.is_closed() {
            self.dropped(&completion);
            return false;
        }

        let queued = if thread::current().id() == self.host {
            self.push_inline(completion)
        } else {
            self.push_blocking(completion)
        };
        if !queued {
            return false;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_enqueued();
        }
        if let Some(wakeup) = self.wakeup.read().as_ref() {
            wakeup.wake();
        }
        true
    }

    fn push_inline(&self, completion: Completion) -> bool {
        let mut overflow = self.overflow.lock();
        // Once anything spilled, later host completions follow it in order.
        if !overflow.is_empty() {
            overflow.push_back(completion);
            return true;
        }

        match self.sender.try_send(completion) {
            Ok(()) => true,
            Err(TrySendError::Full(c)) => {
                tracing::trace!(op = c.op.native_name(), "queue full on host thread, spilling");
                overflow.push_back(c);
                true
            }
            Err(TrySendError::Disconnected(c)) => {
                drop(overflow);
                self.dropped(&c);
                false
            }
        }
    }

    fn push_blocking(&self, completion: Completion) -> bool {
        let mut pending = match self.sender.try_send(completion) {
            Ok(()) => None,
            Err(TrySendError::Full(c)) => Some(c),
            Err(TrySendError::Disconnected(c)) => {
                self.dropped(&c);
                return false;
            }
        };

        while let Some(c) = pending.take() {
            match self.sender.send_timeout(c, FULL_QUEUE_RETRY) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(c)) if !self.is_closed() => pending = Some(c),
                Err(SendTimeoutError::Timeout(c)) | Err(SendTimeoutError::Disconnected(c)) => {
                    self.dropped(&c);
                    return false;
                }
            }
        }
        true
    }

    fn dropped(&self, completion: &Completion) {
        tracing::debug!(
            op = completion.op.native_name(),
            status = %completion.status,
            "completion arrived after close, dropping"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_dropped(1);
        }
    }
}

/// Native half of a baton, handed to the runtime as `user_data`.
///
/// It is boxed on submission and reclaimed by exactly one trampoline call.
pub(crate) struct Ticket {
    pub(crate) id: BatonId,
    pub(crate) op: OpKind,
    pub(crate) ingress: Ingress,
    pub(crate) native: Arc<dyn NativeRuntime>,
}

impl Ticket {
    pub(crate) fn fire(self: Box<Self>, status: Status) -> bool {
        self.ingress.push(Completion::new(self.id, self.op, status))
    }

    /// Fire with a native error string and opaque bytes already copied off
    /// the driver's buffers.
    pub(crate) fn fire_with(
        self: Box<Self>,
        status: Status,
        message: Option<String>,
        private_info: Option<Vec<u8>>,
    ) -> bool {
        let mut completion = Completion::new(self.id, self.op, status);
        completion.message = message;
        completion.private_info = private_info;
        self.ingress.push(completion)
    }
}
