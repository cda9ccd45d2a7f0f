//! Ordered destruction of every registered wrapper at process exit.

use super::kind::{ObjectKind, TeardownPhase};
use super::wrapper::WrapperState;
use super::Registry;
use crate::native::{NativeRuntime, RawHandle, Status};

/// What happened during one teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub flushed: usize,
    pub destroyed: usize,
    /// Native calls that failed; teardown carries on past them.
    pub failures: Vec<TeardownFailure>,
    /// Completions that were still in flight and will never be delivered.
    pub abandoned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub kind: ObjectKind,
    pub handle: RawHandle,
    pub op: &'static str,
    pub status: Status,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Registry {
    /// Destroy every registered wrapper in dependency order.
    ///
    /// Queues are flushed first, then events, then kernels, then the rest in
    /// registration order. Runs at most once; later calls return an empty
    /// report. Native failures are logged and skipped.
    pub fn teardown_all(&self, native: &dyn NativeRuntime) -> TeardownReport {
        let mut report = TeardownReport::default();

        if !self.begin_teardown() {
            return report;
        }

        tracing::debug!(objects = self.len(), "tearing down registry");

        for queue in self.snapshot() {
            if queue.kind() != ObjectKind::CommandQueue {
                continue;
            }
            let Some(handle) = queue.handle() else {
                continue;
            };

            let status = native.flush(handle);
            if status.is_success() {
                report.flushed += 1;
            } else {
                tracing::warn!(%handle, %status, "flush failed during teardown");
                report.failures.push(TeardownFailure {
                    kind: ObjectKind::CommandQueue,
                    handle,
                    op: "clFlush",
                    status,
                });
            }
        }

        for phase in TeardownPhase::ORDER {
            let batch = self.take_where(|w| w.kind().teardown_phase() == phase);
            tracing::trace!(?phase, count = batch.len(), "destroying batch");

            for wrapper in batch {
                let handle = wrapper.handle();
                match wrapper.release_native(native, WrapperState::Destroyed) {
                    Some(status) if status.is_success() => report.destroyed += 1,
                    Some(status) => {
                        let kind = wrapper.kind();
                        tracing::warn!(%kind, %status, "release failed during teardown");
                        if let Some(handle) = handle {
                            report.failures.push(TeardownFailure {
                                kind,
                                handle,
                                op: kind.release_op(),
                                status,
                            });
                        }
                    }
                    // Released by host code after the snapshot was taken.
                    None => {}
                }
            }
        }

        debug_assert!(self.is_empty());
        tracing::debug!(
            flushed = report.flushed,
            destroyed = report.destroyed,
            failures = report.failures.len(),
            "registry torn down"
        );

        report
    }
}
