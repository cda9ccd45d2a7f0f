use clbridge::native::{Call, Op};
use clbridge::prelude::*;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn handle(addr: usize) -> RawHandle {
    RawHandle::new(addr).unwrap()
}

fn setup() -> (Arc<RecordingRuntime>, Runtime) {
    init_tracing();
    let native = Arc::new(RecordingRuntime::new());
    let runtime = Runtime::new(native.clone());
    (native, runtime)
}

#[test]
fn test_queue_flushed_before_destroy() {
    init_tracing();
    let native = RecordingRuntime::new();
    let registry = Registry::new();

    let a = Wrapper::new(ObjectKind::CommandQueue, handle(0xAAAA));
    registry.register(&a).unwrap();
    assert!(Arc::ptr_eq(&registry.find(handle(0xAAAA)).unwrap(), &a));

    let b = Wrapper::new(ObjectKind::Event, handle(0xBBBB));
    registry.register(&b).unwrap();

    let report = registry.teardown_all(&native);
    assert!(report.is_clean());
    assert_eq!(registry.len(), 0);

    let calls = native.calls();
    let flush = calls
        .iter()
        .position(|c| *c == Call::Flush(handle(0xAAAA)))
        .unwrap();
    let destroy = calls
        .iter()
        .position(|c| {
            *c == Call::Release {
                kind: ObjectKind::CommandQueue,
                handle: handle(0xAAAA),
            }
        })
        .unwrap();
    assert!(flush < destroy);

    assert!(!registry.unregister(&b));
}

#[test]
fn test_event_and_kernel_destroyed_before_context() {
    let (native, runtime) = setup();
    let ctx = runtime
        .adopt(ObjectKind::Context, native.create(ObjectKind::Context))
        .unwrap();
    let kernel = runtime
        .adopt(ObjectKind::Kernel, native.create(ObjectKind::Kernel))
        .unwrap();
    let event = runtime
        .adopt(ObjectKind::UserEvent, native.create(ObjectKind::UserEvent))
        .unwrap();

    let handles = [ctx.handle(), kernel.handle(), event.handle()].map(Option::unwrap);
    runtime.teardown();

    let releases: Vec<RawHandle> = native
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Release { handle, .. } => Some(handle),
            _ => None,
        })
        .collect();
    assert_eq!(releases, vec![handles[2], handles[1], handles[0]]);

    for w in [&ctx, &kernel, &event] {
        assert_eq!(w.state(), WrapperState::Destroyed);
        assert!(w.handle().is_none());
    }
}

#[test]
fn test_exactly_once_delivery() {
    let (native, runtime) = setup();
    let hits = Rc::new(Cell::new(0));

    for _ in 0..10 {
        let event = runtime
            .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
            .unwrap();
        let hits = hits.clone();
        runtime
            .set_event_callback(
                &event,
                Status::COMPLETE,
                Baton::new(move |_| hits.set(hits.get() + 1)),
            )
            .unwrap();
    }

    assert_eq!(native.fire_all(Status::COMPLETE), 10);
    assert_eq!(runtime.poll(), 10);
    assert_eq!(runtime.poll(), 0);
    assert_eq!(hits.get(), 10);
    assert_eq!(runtime.pending(), 0);
}

#[test]
fn test_fifo_within_one_chain() {
    let (native, runtime) = setup();
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    for label in ["first", "second", "third"] {
        let order = order.clone();
        runtime
            .set_event_callback(
                &event,
                Status::COMPLETE,
                Baton::new(move |_| order.borrow_mut().push(label)),
            )
            .unwrap();
    }

    native.fire_all(Status::COMPLETE);
    runtime.poll();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn test_completions_from_many_threads() {
    let (native, runtime) = setup();
    let fired_on = Arc::new(Mutex::new(Vec::new()));
    let delivered = Rc::new(Cell::new(0));

    for _ in 0..32 {
        let event = runtime
            .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
            .unwrap();
        let delivered = delivered.clone();
        runtime
            .set_event_callback(
                &event,
                Status::COMPLETE,
                Baton::new(move |d| {
                    assert!(d.is_success());
                    delivered.set(delivered.get() + 1);
                }),
            )
            .unwrap();
    }

    let mut pending = native.take_pending();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let batch: Vec<_> = pending.drain(..8).collect();
            let fired_on = fired_on.clone();
            thread::spawn(move || {
                for notify in batch {
                    notify.fire(Status::COMPLETE);
                    fired_on.lock().push(thread::current().id());
                }
            })
        })
        .collect();

    runtime.run_until_idle(Duration::from_secs(10));
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(delivered.get(), 32);
    assert_eq!(fired_on.lock().len(), 32);
    assert!(!fired_on.lock().contains(&thread::current().id()));
}

#[test]
fn test_async_wait_delivers_off_thread() {
    let (native, runtime) = setup();
    native.set_wait_delay(Duration::from_millis(20));
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let result = Rc::new(Cell::new(None));
    let result_clone = result.clone();

    runtime
        .wait_for_events_async(
            &[event.clone()],
            Baton::new(move |d| result_clone.set(Some(d.status))),
        )
        .unwrap();
    assert_eq!(runtime.pending(), 1);

    runtime.run_until_idle(Duration::from_secs(10));
    assert_eq!(result.get(), Some(Status::SUCCESS));
    assert!(native
        .calls()
        .contains(&Call::WaitForEvents(vec![event.handle().unwrap()])));
}

#[test]
fn test_async_wait_carries_native_failure() {
    let (native, runtime) = setup();
    native.fail_on(Op::WaitForEvents, Status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let result = Rc::new(Cell::new(None));
    let result_clone = result.clone();

    runtime
        .wait_for_events_async(&[event], Baton::new(move |d| result_clone.set(Some(d.status))))
        .unwrap();

    runtime.run_until_idle(Duration::from_secs(10));
    assert_eq!(
        result.get(),
        Some(Status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    );
}

#[test]
fn test_wait_worker_thread_name() {
    init_tracing();

    struct NamingRuntime {
        inner: RecordingRuntime,
        seen: Mutex<Option<String>>,
    }

    unsafe impl NativeRuntime for NamingRuntime {
        fn retain(&self, kind: ObjectKind, handle: RawHandle) -> Status {
            self.inner.retain(kind, handle)
        }
        fn release(&self, kind: ObjectKind, handle: RawHandle) -> Status {
            self.inner.release(kind, handle)
        }
        fn flush(&self, queue: RawHandle) -> Status {
            self.inner.flush(queue)
        }
        fn finish(&self, queue: RawHandle) -> Status {
            self.inner.finish(queue)
        }
        fn wait_for_events(&self, events: &[RawHandle]) -> Status {
            *self.seen.lock() = thread::current().name().map(str::to_string);
            self.inner.wait_for_events(events)
        }
        fn set_user_event_status(&self, event: RawHandle, status: Status) -> Status {
            self.inner.set_user_event_status(event, status)
        }
        unsafe fn set_event_callback(
            &self,
            event: RawHandle,
            callback_type: Status,
            notify: clbridge::native::EventNotifyFn,
            user_data: *mut std::ffi::c_void,
        ) -> Status {
            self.inner
                .set_event_callback(event, callback_type, notify, user_data)
        }
        unsafe fn build_program(
            &self,
            program: RawHandle,
            devices: &[RawHandle],
            options: Option<&std::ffi::CStr>,
            notify: Option<clbridge::native::ProgramNotifyFn>,
            user_data: *mut std::ffi::c_void,
        ) -> Status {
            self.inner
                .build_program(program, devices, options, notify, user_data)
        }
        unsafe fn create_context(
            &self,
            devices: &[RawHandle],
            notify: Option<clbridge::native::ContextNotifyFn>,
            user_data: *mut std::ffi::c_void,
        ) -> std::result::Result<RawHandle, Status> {
            self.inner.create_context(devices, notify, user_data)
        }
        fn program_build_status(&self, program: RawHandle) -> Vec<Status> {
            self.inner.program_build_status(program)
        }
    }

    let native = Arc::new(NamingRuntime {
        inner: RecordingRuntime::new(),
        seen: Mutex::new(None),
    });
    let config = Config::builder().wait_thread_prefix("host-wait").build().unwrap();
    let runtime = Runtime::with_config(native.clone(), config).unwrap();

    let event = runtime
        .adopt(ObjectKind::Event, native.inner.create(ObjectKind::Event))
        .unwrap();
    runtime
        .wait_for_events_async(&[event], Baton::new(|_| {}))
        .unwrap();
    runtime.run_until_idle(Duration::from_secs(10));

    let name = native.seen.lock().clone().unwrap();
    assert!(name.starts_with("host-wait-"));
}

#[test]
fn test_async_build_combines_device_status() {
    let (native, runtime) = setup();
    let program = runtime
        .adopt(ObjectKind::Program, native.create(ObjectKind::Program))
        .unwrap();
    let devices: Vec<_> = (0..2)
        .map(|_| {
            runtime
                .adopt(ObjectKind::Device, native.create(ObjectKind::Device))
                .unwrap()
        })
        .collect();
    native.set_build_status(
        program.handle().unwrap(),
        vec![Status::SUCCESS, Status::BUILD_PROGRAM_FAILURE],
    );

    let result = Rc::new(Cell::new(None));
    let result_clone = result.clone();
    runtime
        .build_program_async(
            &program,
            &devices,
            None,
            Baton::new(move |d| {
                result_clone.set(Some((d.status, d.parent.map(|p| p.kind()))));
            }),
        )
        .unwrap();

    thread::spawn({
        let pending = native.take_pending();
        move || {
            for notify in pending {
                assert!(notify.is_program());
                notify.fire(Status::SUCCESS);
            }
        }
    })
    .join()
    .unwrap();

    assert_eq!(runtime.poll(), 1);
    assert_eq!(
        result.get(),
        Some((Status::BUILD_PROGRAM_FAILURE, Some(ObjectKind::Program)))
    );
}

#[test]
fn test_sync_registration_failure_is_returned() {
    let (native, runtime) = setup();
    native.fail_on(Op::BuildProgram, Status::INVALID_OPERATION);
    let program = runtime
        .adopt(ObjectKind::Program, native.create(ObjectKind::Program))
        .unwrap();
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();

    let err = runtime
        .build_program_async(&program, &[], None, Baton::new(move |_| ran_clone.set(true)))
        .unwrap_err();

    assert_eq!(err.status(), Some(Status::INVALID_OPERATION));
    assert_eq!(runtime.pending(), 0);
    assert_eq!(runtime.poll(), 0);
    assert!(!ran.get());

    #[cfg(feature = "telemetry")]
    assert_eq!(runtime.metrics().unwrap().sync_failures, 1);
}

#[test]
fn test_callback_reenters_runtime() {
    let (native, runtime) = setup();
    let runtime = Rc::new(runtime);
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let follow_up_ran = Rc::new(Cell::new(false));

    let baton = {
        let runtime = runtime.clone();
        let native = native.clone();
        let follow_up_ran = follow_up_ran.clone();
        Baton::new(move |d| {
            let event = d.parent.unwrap();
            runtime.release(&event).unwrap();

            let next = runtime
                .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
                .unwrap();
            runtime
                .set_event_callback(
                    &next,
                    Status::COMPLETE,
                    Baton::new(move |_| follow_up_ran.set(true)),
                )
                .unwrap();
        })
    };

    runtime
        .set_event_callback(&event, Status::COMPLETE, baton)
        .unwrap();

    native.fire_next(Status::COMPLETE);
    assert_eq!(runtime.poll(), 1);
    assert!(event.is_released());

    native.fire_next(Status::COMPLETE);
    assert_eq!(runtime.poll(), 1);
    assert!(follow_up_ran.get());
}

#[test]
fn test_completions_after_teardown_are_dropped() {
    let (native, runtime) = setup();
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();
    runtime
        .set_event_callback(&event, Status::COMPLETE, Baton::new(move |_| ran_clone.set(true)))
        .unwrap();

    let report = runtime.teardown();
    assert_eq!(report.abandoned, 1);

    native.fire_all(Status::COMPLETE);
    assert_eq!(runtime.poll(), 0);
    assert!(!ran.get());

    #[cfg(feature = "telemetry")]
    assert_eq!(runtime.metrics().unwrap().completions_dropped, 1);
}

#[test]
fn test_teardown_drain_delivers_in_flight() {
    init_tracing();
    let native = Arc::new(RecordingRuntime::new());
    let config = Config::builder()
        .teardown_drain(Duration::from_secs(10))
        .build()
        .unwrap();
    let runtime = Runtime::with_config(native.clone(), config).unwrap();

    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();
    runtime
        .set_event_callback(&event, Status::COMPLETE, Baton::new(move |_| ran_clone.set(true)))
        .unwrap();

    let pending = native.take_pending();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        for notify in pending {
            notify.fire(Status::COMPLETE);
        }
    });

    let report = runtime.teardown();
    worker.join().unwrap();

    assert!(ran.get());
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.destroyed, 1);
}

#[test]
fn test_wakeup_called_per_completion() {
    let (native, runtime) = setup();
    let wakes = Arc::new(AtomicUsize::new(0));
    let wakes_clone = wakes.clone();
    runtime.set_wakeup(Some(Wakeup::new(move || {
        wakes_clone.fetch_add(1, Ordering::Relaxed);
    })));

    for _ in 0..3 {
        let event = runtime
            .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
            .unwrap();
        runtime
            .set_event_callback(&event, Status::COMPLETE, Baton::new(|_| {}))
            .unwrap();
    }

    native.fire_all(Status::COMPLETE);
    assert_eq!(wakes.load(Ordering::Relaxed), 3);
    assert_eq!(runtime.poll(), 3);
}

#[test]
fn test_payload_reaches_callback() {
    let (native, runtime) = setup();
    let event = runtime
        .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
        .unwrap();
    let got = Rc::new(RefCell::new(None));
    let got_clone = got.clone();

    runtime
        .set_event_callback(
            &event,
            Status::COMPLETE,
            Baton::new(move |mut d| {
                *got_clone.borrow_mut() = d.take_payload::<Vec<u8>>();
            })
            .with_payload(vec![1u8, 2, 3]),
        )
        .unwrap();

    native.fire_next(Status::COMPLETE);
    runtime.poll();
    assert_eq!(*got.borrow(), Some(vec![1, 2, 3]));
}

#[test]
fn test_adopt_existing_handle_releases_extra_reference() {
    let (native, runtime) = setup();
    let queue = native.create(ObjectKind::CommandQueue);

    let a = runtime.adopt(ObjectKind::CommandQueue, queue).unwrap();
    native.retain(ObjectKind::CommandQueue, queue);
    let b = runtime.adopt(ObjectKind::CommandQueue, queue).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(native.refcount(queue), Some(1));
    assert_eq!(runtime.registry().len(), 1);
}

#[test]
fn test_inline_completions_into_full_queue() {
    init_tracing();
    let native = Arc::new(RecordingRuntime::new());
    let config = Config::builder().ingress_capacity(1).build().unwrap();
    let runtime = Runtime::with_config(native.clone(), config).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    for label in ["a", "b"] {
        let event = runtime
            .adopt(ObjectKind::Event, native.create(ObjectKind::Event))
            .unwrap();
        let order = order.clone();
        runtime
            .set_event_callback(
                &event,
                Status::COMPLETE,
                Baton::new(move |_| order.borrow_mut().push(label)),
            )
            .unwrap();
    }

    // Driver reports synchronously, on the host thread, with the queue full.
    assert!(native.fire_next(Status::COMPLETE));
    assert!(native.fire_next(Status::COMPLETE));

    assert_eq!(runtime.poll(), 2);
    assert_eq!(*order.borrow(), vec!["a", "b"]);
    assert_eq!(runtime.pending(), 0);
}

#[test]
fn test_context_error_reported_from_driver_thread() {
    let (native, runtime) = setup();
    let device = runtime
        .adopt(ObjectKind::Device, native.create(ObjectKind::Device))
        .unwrap();
    let report = Rc::new(RefCell::new(None));
    let report_clone = report.clone();

    let ctx = runtime
        .create_context(
            &[device],
            Some(Baton::new(move |d| {
                *report_clone.borrow_mut() = Some((d.status, d.message, d.private_info));
            })),
        )
        .unwrap();
    assert_eq!(runtime.pending(), 0);

    thread::spawn({
        let pending = native.take_pending();
        move || {
            for notify in pending {
                assert!(notify.is_context());
                notify.fire_context(Some("page fault at 0x40"), &[1, 2, 3]);
            }
        }
    })
    .join()
    .unwrap();

    assert_eq!(runtime.poll(), 1);
    assert_eq!(
        *report.borrow(),
        Some((
            Status::INVALID_OPERATION,
            Some("page fault at 0x40".to_string()),
            Some(vec![1, 2, 3]),
        ))
    );

    runtime.teardown();
    assert_eq!(ctx.state(), WrapperState::Destroyed);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Registers a rival wrapper for every handle it retains, so the caller's
/// own registration then fails.
struct RivalRuntime {
    inner: RecordingRuntime,
    registry: Mutex<Option<Arc<Registry>>>,
}

unsafe impl NativeRuntime for RivalRuntime {
    fn retain(&self, kind: ObjectKind, handle: RawHandle) -> Status {
        if let Some(registry) = self.registry.lock().as_ref() {
            registry.register(&Wrapper::new(kind, handle)).unwrap();
        }
        self.inner.retain(kind, handle)
    }
    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Status {
        self.inner.release(kind, handle)
    }
    fn flush(&self, queue: RawHandle) -> Status {
        self.inner.flush(queue)
    }
    fn finish(&self, queue: RawHandle) -> Status {
        self.inner.finish(queue)
    }
    fn wait_for_events(&self, events: &[RawHandle]) -> Status {
        self.inner.wait_for_events(events)
    }
    fn set_user_event_status(&self, event: RawHandle, status: Status) -> Status {
        self.inner.set_user_event_status(event, status)
    }
    unsafe fn set_event_callback(
        &self,
        event: RawHandle,
        callback_type: Status,
        notify: clbridge::native::EventNotifyFn,
        user_data: *mut std::ffi::c_void,
    ) -> Status {
        self.inner
            .set_event_callback(event, callback_type, notify, user_data)
    }
    unsafe fn create_context(
        &self,
        devices: &[RawHandle],
        notify: Option<clbridge::native::ContextNotifyFn>,
        user_data: *mut std::ffi::c_void,
    ) -> std::result::Result<RawHandle, Status> {
        self.inner.create_context(devices, notify, user_data)
    }
    unsafe fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: Option<&std::ffi::CStr>,
        notify: Option<clbridge::native::ProgramNotifyFn>,
        user_data: *mut std::ffi::c_void,
    ) -> Status {
        self.inner
            .build_program(program, devices, options, notify, user_data)
    }
    fn program_build_status(&self, program: RawHandle) -> Vec<Status> {
        self.inner.program_build_status(program)
    }
}

#[test]
fn test_failed_rollback_release_is_logged() {
    let native = Arc::new(RivalRuntime {
        inner: RecordingRuntime::new(),
        registry: Mutex::new(None),
    });
    let runtime = Runtime::new(native.clone());
    *native.registry.lock() = Some(runtime.registry().clone());

    let ctx = native.inner.create(ObjectKind::Context);
    native.inner.fail_on(Op::Release, Status::INVALID_CONTEXT);

    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let err = tracing::subscriber::with_default(subscriber, || {
        runtime.lookup_or_retain(ObjectKind::Context, ctx).unwrap_err()
    });
    assert!(matches!(err, Error::DuplicateHandle { .. }));
    assert!(native.inner.calls().contains(&Call::Release {
        kind: ObjectKind::Context,
        handle: ctx,
    }));

    let logs = String::from_utf8(logs.0.lock().clone()).unwrap();
    assert!(logs.contains("could not drop reference after failed registration"));
    assert!(logs.contains("CL_INVALID_CONTEXT"));

    native.inner.clear_failures();
}
