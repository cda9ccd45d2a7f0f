//! Completion bridge: native completions in, host callbacks out.
//!
//! A submission parks the host half of a [`Baton`] in a slab and hands the
//! native runtime a boxed ticket as `user_data`. When the runtime fires its
//! handler, on whatever thread, a trampoline reclaims the ticket and queues a
//! [`Completion`]. The host thread drains the queue and runs each callback
//! exactly once, in the order the trampolines fired.

pub mod baton;
pub mod panic;
pub(crate) mod trampoline;
pub(crate) mod wait;

pub use baton::{Baton, BatonId, Completion, Delivery, OpKind, Payload};
pub use panic::CallbackPanic;

use crate::config::{Config, Wakeup};
use crate::error::{Error, Result};
use crate::native::NativeRuntime;
use crate::telemetry::{Metrics, MetricsSnapshot};
use baton::{Ingress, Ticket};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PendingBaton {
    generation: u64,
    op: OpKind,
    baton: Baton,
}

pub struct CompletionBridge {
    native: Arc<dyn NativeRuntime>,
    ingress: Ingress,
    receiver: Receiver<Completion>,
    batons: RefCell<Slab<PendingBaton>>,
    // Parked batons whose native handler may never fire.
    standing: Cell<usize>,
    next_generation: Cell<u64>,
    metrics: Option<Arc<Metrics>>,
}

impl CompletionBridge {
    /// The calling thread becomes the host thread: completions fired inline
    /// on it are never blocked on a full queue.
    pub fn new(config: &Config, native: Arc<dyn NativeRuntime>) -> Self {
        let (sender, receiver) = match config.ingress_capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        let metrics = metrics_for(config);

        Self {
            native,
            ingress: Ingress::new(sender, config.wakeup.clone(), metrics.clone()),
            receiver,
            batons: RefCell::new(Slab::new()),
            standing: Cell::new(0),
            next_generation: Cell::new(1),
            metrics,
        }
    }

    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }

    /// Park `baton` and let `register` start the native operation.
    ///
    /// `register` receives the ticket pointer to pass as `user_data`. If it
    /// fails the ticket is reclaimed here, the baton is dropped without
    /// running, and nothing is ever queued.
    pub fn submit_async<F>(&self, op: OpKind, baton: Baton, register: F) -> Result<BatonId>
    where
        F: FnOnce(*mut c_void) -> Result<()>,
    {
        if self.ingress.is_closed() {
            return Err(Error::TornDown);
        }

        let generation = self.next_generation.get();
        self.next_generation.set(generation.wrapping_add(1));

        let key = self.batons.borrow_mut().insert(PendingBaton {
            generation,
            op,
            baton,
        });
        let id = BatonId { key, generation };
        self.track(op, true);

        let ticket = Box::new(Ticket {
            id,
            op,
            ingress: self.ingress.clone(),
            native: Arc::clone(&self.native),
        });
        let user_data = Box::into_raw(ticket).cast::<c_void>();

        if let Err(err) = register(user_data) {
            // SAFETY: a failed registration never invokes the handler, so
            // the ticket is still ours.
            drop(unsafe { Box::from_raw(user_data.cast::<Ticket>()) });
            let pending = self.batons.borrow_mut().remove(key);
            self.track(op, false);
            drop(pending);

            if let Some(metrics) = &self.metrics {
                metrics.record_sync_failure();
            }
            tracing::debug!(op = op.native_name(), error = %err, "async submission rejected");
            return Err(err);
        }

        tracing::trace!(op = op.native_name(), key, generation, "baton submitted");
        Ok(id)
    }

    /// Run the callback for `completion`. Returns false if no pending baton
    /// matches it, or if the bridge is already closed.
    pub fn deliver(&self, completion: Completion) -> bool {
        if self.ingress.is_closed() {
            // Raced past the close drain; its baton is already gone.
            tracing::debug!(
                op = completion.op.native_name(),
                status = %completion.status,
                "completion drained after close, dropping"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_dropped(1);
            }
            return false;
        }

        let pending = {
            let mut batons = self.batons.borrow_mut();
            let current = matches!(
                batons.get(completion.id.key),
                Some(p) if p.generation == completion.id.generation
            );
            if !current {
                drop(batons);
                tracing::warn!(
                    op = completion.op.native_name(),
                    key = completion.id.key,
                    "completion for unknown baton"
                );
                return false;
            }
            batons.remove(completion.id.key)
        };
        self.track(pending.op, false);

        if let Some(metrics) = &self.metrics {
            metrics.record_delivered(completion.fired_at.elapsed());
        }
        tracing::trace!(
            op = pending.op.native_name(),
            status = %completion.status,
            "delivering completion"
        );

        if let Err(panic) = pending.baton.complete(completion) {
            tracing::error!(op = pending.op.native_name(), %panic, "completion callback panicked");
            if let Some(metrics) = &self.metrics {
                metrics.record_callback_panic();
            }
        }
        true
    }

    /// Deliver everything queued right now without blocking.
    ///
    /// The channel goes first, then whatever the host thread spilled while
    /// it was full. Completions queued by the callbacks themselves wait for
    /// the next call.
    pub fn poll(&self) -> usize {
        let budget = self.receiver.len();
        let spilled = self.ingress.overflow_len();
        let mut delivered = 0;

        for _ in 0..budget {
            match self.receiver.try_recv() {
                Ok(completion) => {
                    if self.deliver(completion) {
                        delivered += 1;
                    }
                }
                Err(_) => break,
            }
        }

        for _ in 0..spilled {
            match self.ingress.pop_overflow() {
                Some(completion) => {
                    if self.deliver(completion) {
                        delivered += 1;
                    }
                }
                None => break,
            }
        }

        delivered
    }

    /// Block up to `timeout` for the first completion, then drain the rest.
    pub fn poll_timeout(&self, timeout: Duration) -> usize {
        if self.ingress.is_closed() || self.pending() == 0 || self.ingress.overflow_len() > 0 {
            return self.poll();
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => usize::from(self.deliver(completion)) + self.poll(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Deliver until nothing is pending or `timeout` has passed.
    pub fn run_until_idle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut delivered = self.poll();

        while self.pending() > 0 && !self.ingress.is_closed() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            delivered += self.poll_timeout(remaining);
        }

        delivered
    }

    /// Batons submitted but not yet delivered.
    ///
    /// Context notifiers are left out: the driver may never call them, so
    /// nothing should wait on them.
    pub fn pending(&self) -> usize {
        self.batons.borrow().len() - self.standing.get()
    }

    /// Context notifiers still parked.
    pub fn standing(&self) -> usize {
        self.standing.get()
    }

    pub fn queued(&self) -> usize {
        self.receiver.len() + self.ingress.overflow_len()
    }

    pub fn is_closed(&self) -> bool {
        self.ingress.is_closed()
    }

    /// Stop accepting completions and drop every pending baton unrun.
    ///
    /// Returns the number of batons abandoned. Later completions are dropped
    /// by the trampolines, or by `deliver` if one slips into the queue after
    /// this drain. Only the first call does anything.
    pub fn close(&self) -> usize {
        if !self.ingress.close() {
            return 0;
        }

        let discarded = self.receiver.try_iter().count() + self.ingress.clear_overflow();
        let abandoned = std::mem::take(&mut *self.batons.borrow_mut());
        let count = abandoned.len();
        self.standing.set(0);

        if let Some(metrics) = &self.metrics {
            metrics.record_dropped(discarded as u64);
        }
        tracing::debug!(abandoned = count, discarded, "completion bridge closed");

        // Payload destructors may call back into the bridge.
        drop(abandoned);
        count
    }

    pub fn set_wakeup(&self, wakeup: Option<Wakeup>) {
        self.ingress.set_wakeup(wakeup);
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|m| m.snapshot())
    }

    fn track(&self, op: OpKind, parked: bool) {
        if op.always_completes() {
            return;
        }
        let standing = self.standing.get();
        self.standing.set(match parked {
            true => standing + 1,
            false => standing.saturating_sub(1),
        });
    }
}

impl fmt::Debug for CompletionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBridge")
            .field("pending", &self.pending())
            .field("standing", &self.standing())
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(feature = "telemetry")]
fn metrics_for(config: &Config) -> Option<Arc<Metrics>> {
    config.enable_telemetry.then(|| Arc::new(Metrics::new()))
}

#[cfg(not(feature = "telemetry"))]
fn metrics_for(_config: &Config) -> Option<Arc<Metrics>> {
    None
}
