use crate::bridge::{trampoline, wait, Baton, BatonId, CompletionBridge, OpKind};
use crate::config::{Config, Wakeup};
use crate::error::{Error, Result};
use crate::native::{NativeRuntime, RawHandle, Status};
use crate::registry::{ObjectKind, Registry, TeardownReport, Wrapper, WrapperState};
use crate::telemetry::MetricsSnapshot;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Process-scoped binding context.
///
/// Owns the native runtime, the wrapper registry and the completion bridge.
/// Host callbacks are not required to be `Send`, so a `Runtime` stays on the
/// thread that created it. Dropping it tears everything down.
pub struct Runtime {
    native: Arc<dyn NativeRuntime>,
    registry: Arc<Registry>,
    bridge: CompletionBridge,
    config: Config,
}

impl Runtime {
    pub fn new(native: Arc<dyn NativeRuntime>) -> Self {
        let config = Config::default();
        let bridge = CompletionBridge::new(&config, Arc::clone(&native));

        Self {
            native,
            registry: Arc::new(Registry::new()),
            bridge,
            config,
        }
    }

    pub fn with_config(native: Arc<dyn NativeRuntime>, config: Config) -> Result<Self> {
        config.validate()?;

        let bridge = CompletionBridge::new(&config, Arc::clone(&native));

        Ok(Self {
            native,
            registry: Arc::new(Registry::new()),
            bridge,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn bridge(&self) -> &CompletionBridge {
        &self.bridge
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.bridge.metrics()
    }

    pub fn is_torn_down(&self) -> bool {
        self.registry.is_torn_down()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(Error::TornDown)
        } else {
            Ok(())
        }
    }

    // ---- wrapper lifetime ------------------------------------------------

    pub fn find(&self, handle: RawHandle) -> Option<Arc<Wrapper>> {
        self.registry.find(handle)
    }

    /// Wrap a native object the caller just created.
    ///
    /// The creation call already returned one reference, which the wrapper
    /// takes over. If the handle is wrapped already that extra reference is
    /// released and the existing wrapper is returned.
    pub fn adopt(&self, kind: ObjectKind, handle: RawHandle) -> Result<Arc<Wrapper>> {
        self.ensure_live()?;

        if let Some(existing) = self.registry.find(handle) {
            if kind.is_ref_counted() {
                self.native.release(kind, handle).check(kind.release_op())?;
            }
            if existing.kind() != kind {
                return Err(Error::DuplicateHandle {
                    handle,
                    existing: existing.kind(),
                    requested: kind,
                });
            }
            return Ok(existing);
        }

        let wrapper = Wrapper::new(kind, handle);
        self.registry.register(&wrapper)?;
        Ok(wrapper)
    }

    /// Wrap a handle returned by a native query, which carries no reference.
    ///
    /// An existing wrapper is returned as is; otherwise one reference is
    /// retained for the new wrapper.
    pub fn lookup_or_retain(&self, kind: ObjectKind, handle: RawHandle) -> Result<Arc<Wrapper>> {
        self.ensure_live()?;

        if let Some(existing) = self.registry.find(handle) {
            if existing.kind() != kind {
                return Err(Error::KindMismatch {
                    expected: kind,
                    found: existing.kind(),
                });
            }
            return Ok(existing);
        }

        if kind.is_ref_counted() {
            self.native.retain(kind, handle).check(kind.retain_op())?;
        }

        let wrapper = Wrapper::new(kind, handle);
        if let Err(err) = self.registry.register(&wrapper) {
            if kind.is_ref_counted() {
                let status = self.native.release(kind, handle);
                if !status.is_success() {
                    tracing::warn!(
                        %kind,
                        %handle,
                        %status,
                        "could not drop reference after failed registration"
                    );
                }
            }
            return Err(err);
        }
        Ok(wrapper)
    }

    /// Release the wrapper's native reference. Calling it again is a no-op.
    pub fn release(&self, wrapper: &Wrapper) -> Result<()> {
        self.registry.unregister(wrapper);

        match wrapper.release_native(&*self.native, WrapperState::Released) {
            Some(status) => status.check(wrapper.kind().release_op()),
            None => Ok(()),
        }
    }

    // ---- synchronous operations -----------------------------------------

    pub fn flush(&self, queue: &Wrapper) -> Result<()> {
        self.ensure_live()?;
        let handle = queue.require_kind(ObjectKind::CommandQueue)?;
        self.native.flush(handle).check("clFlush")
    }

    pub fn finish(&self, queue: &Wrapper) -> Result<()> {
        self.ensure_live()?;
        let handle = queue.require_kind(ObjectKind::CommandQueue)?;
        self.native.finish(handle).check("clFinish")
    }

    /// Block the calling thread until every event has completed.
    pub fn wait_for_events(&self, events: &[Arc<Wrapper>]) -> Result<()> {
        self.ensure_live()?;
        let handles = event_handles(events)?;
        self.native.wait_for_events(&handles).check("clWaitForEvents")
    }

    pub fn set_user_event_status(&self, event: &Wrapper, status: Status) -> Result<()> {
        self.ensure_live()?;
        if event.kind() != ObjectKind::UserEvent {
            return Err(Error::native("clSetUserEventStatus", Status::INVALID_EVENT));
        }
        let handle = event.require_handle()?;

        self.native
            .set_user_event_status(handle, status)
            .check("clSetUserEventStatus")?;
        event.set_status(status);
        Ok(())
    }

    /// Build `program` and block until the build has finished.
    pub fn build_program(
        &self,
        program: &Wrapper,
        devices: &[Arc<Wrapper>],
        options: Option<&str>,
    ) -> Result<()> {
        self.ensure_live()?;
        let handle = program.require_kind(ObjectKind::Program)?;
        let devices = device_handles(devices)?;
        let options = build_options(options)?;

        // SAFETY: no completion handler is passed.
        let status = unsafe {
            self.native.build_program(
                handle,
                &devices,
                options.as_deref(),
                None,
                std::ptr::null_mut(),
            )
        };
        status.check(OpKind::ProgramBuild.native_name())
    }

    /// Create a context over `devices` and wrap it.
    ///
    /// With a baton, the driver's error notification for the context is
    /// routed to it as an `INVALID_OPERATION` delivery carrying the error
    /// text and the driver's private bytes. The driver may never report, so
    /// the baton is not counted by [`Runtime::pending`] and is dropped unrun
    /// at teardown.
    pub fn create_context(
        &self,
        devices: &[Arc<Wrapper>],
        baton: Option<Baton>,
    ) -> Result<Arc<Wrapper>> {
        self.ensure_live()?;
        let devices = device_handles(devices)?;
        let op = OpKind::ContextNotify.native_name();

        let handle = match baton {
            None => {
                // SAFETY: no notification handler is passed.
                unsafe { self.native.create_context(&devices, None, std::ptr::null_mut()) }
                    .map_err(|status| Error::native(op, status))?
            }
            Some(baton) => {
                let mut created = None;
                self.bridge
                    .submit_async(OpKind::ContextNotify, baton, |user_data| {
                        // SAFETY: as for `set_event_callback`, except the
                        // handler may never run and leave the ticket behind.
                        let handle = unsafe {
                            self.native.create_context(
                                &devices,
                                Some(trampoline::context_trampoline),
                                user_data,
                            )
                        }
                        .map_err(|status| Error::native(op, status))?;
                        created = Some(handle);
                        Ok(())
                    })?;
                created.ok_or_else(|| Error::bridge("context registration returned no handle"))?
            }
        };

        self.adopt(ObjectKind::Context, handle)
    }

    // ---- asynchronous operations ----------------------------------------

    /// Run `baton` once `event` reaches `exec_type`.
    ///
    /// The event wrapper becomes the delivery's parent and its status is
    /// updated before the callback runs.
    pub fn set_event_callback(
        &self,
        event: &Arc<Wrapper>,
        exec_type: Status,
        baton: Baton,
    ) -> Result<BatonId> {
        self.ensure_live()?;
        let handle = event_handle(event)?;
        let baton = baton.with_parent(Arc::clone(event));

        self.bridge
            .submit_async(OpKind::EventCallback, baton, |user_data| {
                // SAFETY: `user_data` is a fresh ticket and the trampoline
                // reclaims it exactly once.
                let status = unsafe {
                    self.native.set_event_callback(
                        handle,
                        exec_type,
                        trampoline::event_trampoline,
                        user_data,
                    )
                };
                status.check(OpKind::EventCallback.native_name())
            })
    }

    /// Start building `program` and deliver the combined build status to
    /// `baton` when every device has finished.
    pub fn build_program_async(
        &self,
        program: &Arc<Wrapper>,
        devices: &[Arc<Wrapper>],
        options: Option<&str>,
        baton: Baton,
    ) -> Result<BatonId> {
        self.ensure_live()?;
        let handle = program.require_kind(ObjectKind::Program)?;
        let devices = device_handles(devices)?;
        let options = build_options(options)?;
        let baton = baton.with_parent(Arc::clone(program));

        self.bridge
            .submit_async(OpKind::ProgramBuild, baton, |user_data| {
                // SAFETY: as for `set_event_callback`.
                let status = unsafe {
                    self.native.build_program(
                        handle,
                        &devices,
                        options.as_deref(),
                        Some(trampoline::program_trampoline),
                        user_data,
                    )
                };
                status.check(OpKind::ProgramBuild.native_name())
            })
    }

    /// Wait for `events` on a worker thread and deliver the result to
    /// `baton`. Never blocks the caller.
    pub fn wait_for_events_async(&self, events: &[Arc<Wrapper>], baton: Baton) -> Result<BatonId> {
        self.ensure_live()?;
        let handles = event_handles(events)?;
        let native = Arc::clone(&self.native);

        self.bridge
            .submit_async(OpKind::WaitForEvents, baton, |user_data| {
                // SAFETY: on success the worker owns the ticket, on failure
                // the bridge reclaims it.
                unsafe { wait::spawn_wait(&self.config, native, handles, user_data) }
            })
    }

    // ---- host loop -------------------------------------------------------

    pub fn poll(&self) -> usize {
        self.bridge.poll()
    }

    pub fn poll_timeout(&self, timeout: Duration) -> usize {
        self.bridge.poll_timeout(timeout)
    }

    pub fn run_until_idle(&self, timeout: Duration) -> usize {
        self.bridge.run_until_idle(timeout)
    }

    pub fn pending(&self) -> usize {
        self.bridge.pending()
    }

    pub fn set_wakeup(&self, wakeup: Option<Wakeup>) {
        self.bridge.set_wakeup(wakeup);
    }

    // ---- teardown --------------------------------------------------------

    /// Tear everything down: drain in-flight completions for up to
    /// `Config::teardown_drain`, abandon the rest, then destroy every
    /// registered object in dependency order.
    ///
    /// Runs once; later calls return an empty report.
    pub fn teardown(&self) -> TeardownReport {
        if self.is_torn_down() {
            return TeardownReport::default();
        }

        if !self.config.teardown_drain.is_zero() && self.bridge.pending() > 0 {
            let delivered = self.bridge.run_until_idle(self.config.teardown_drain);
            tracing::debug!(delivered, "drained completions before teardown");
        }

        let abandoned = self.bridge.close();
        let mut report = self.registry.teardown_all(&*self.native);
        report.abandoned = abandoned;

        if abandoned > 0 {
            tracing::warn!(abandoned, "teardown abandoned in-flight completions");
        }
        report
    }

    /// Explicit teardown from host code. Same as dropping the runtime.
    pub fn release_all(&self) -> TeardownReport {
        self.teardown()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("objects", &self.registry.len())
            .field("bridge", &self.bridge)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

fn event_handle(event: &Wrapper) -> Result<RawHandle> {
    if !event.kind().is_event() {
        return Err(Error::KindMismatch {
            expected: ObjectKind::Event,
            found: event.kind(),
        });
    }
    event.require_handle()
}

fn event_handles(events: &[Arc<Wrapper>]) -> Result<Vec<RawHandle>> {
    if events.is_empty() {
        return Err(Error::native("clWaitForEvents", Status::INVALID_VALUE));
    }
    events.iter().map(|e| event_handle(e)).collect()
}

fn device_handles(devices: &[Arc<Wrapper>]) -> Result<Vec<RawHandle>> {
    devices
        .iter()
        .map(|d| d.require_kind(ObjectKind::Device))
        .collect()
}

fn build_options(options: Option<&str>) -> Result<Option<CString>> {
    options
        .map(|o| {
            CString::new(o).map_err(|_| Error::native("clBuildProgram", Status::INVALID_BUILD_OPTIONS))
        })
        .transpose()
}
