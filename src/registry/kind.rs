use crate::native::Status;
use std::fmt;

/// Closed set of native object types a wrapper can proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Platform,
    Device,
    Context,
    CommandQueue,
    Program,
    Kernel,
    MemoryObject,
    Event,
    UserEvent,
    Sampler,
}

/// Destruction phase during teardown. Lower phases go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TeardownPhase {
    Events = 0,
    Kernels = 1,
    Remaining = 2,
}

impl TeardownPhase {
    pub const ORDER: [TeardownPhase; 3] = [
        TeardownPhase::Events,
        TeardownPhase::Kernels,
        TeardownPhase::Remaining,
    ];
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 10] = [
        ObjectKind::Platform,
        ObjectKind::Device,
        ObjectKind::Context,
        ObjectKind::CommandQueue,
        ObjectKind::Program,
        ObjectKind::Kernel,
        ObjectKind::MemoryObject,
        ObjectKind::Event,
        ObjectKind::UserEvent,
        ObjectKind::Sampler,
    ];

    pub fn teardown_phase(self) -> TeardownPhase {
        match self {
            ObjectKind::Event | ObjectKind::UserEvent => TeardownPhase::Events,
            ObjectKind::Kernel => TeardownPhase::Kernels,
            _ => TeardownPhase::Remaining,
        }
    }

    pub fn is_event(self) -> bool {
        matches!(self, ObjectKind::Event | ObjectKind::UserEvent)
    }

    /// Platforms and devices are not reference counted by the runtime.
    pub fn is_ref_counted(self) -> bool {
        !matches!(self, ObjectKind::Platform | ObjectKind::Device)
    }

    /// Status the runtime reports for a bad handle of this kind.
    pub fn invalid_status(self) -> Status {
        match self {
            ObjectKind::Platform => Status::INVALID_PLATFORM,
            ObjectKind::Device => Status::INVALID_DEVICE,
            ObjectKind::Context => Status::INVALID_CONTEXT,
            ObjectKind::CommandQueue => Status::INVALID_COMMAND_QUEUE,
            ObjectKind::Program => Status::INVALID_PROGRAM,
            ObjectKind::Kernel => Status::INVALID_KERNEL,
            ObjectKind::MemoryObject => Status::INVALID_MEM_OBJECT,
            ObjectKind::Event | ObjectKind::UserEvent => Status::INVALID_EVENT,
            ObjectKind::Sampler => Status::INVALID_SAMPLER,
        }
    }

    pub fn retain_op(self) -> &'static str {
        match self {
            ObjectKind::Platform | ObjectKind::Device => "clRetainDevice",
            ObjectKind::Context => "clRetainContext",
            ObjectKind::CommandQueue => "clRetainCommandQueue",
            ObjectKind::Program => "clRetainProgram",
            ObjectKind::Kernel => "clRetainKernel",
            ObjectKind::MemoryObject => "clRetainMemObject",
            ObjectKind::Event | ObjectKind::UserEvent => "clRetainEvent",
            ObjectKind::Sampler => "clRetainSampler",
        }
    }

    pub fn release_op(self) -> &'static str {
        match self {
            ObjectKind::Platform | ObjectKind::Device => "clReleaseDevice",
            ObjectKind::Context => "clReleaseContext",
            ObjectKind::CommandQueue => "clReleaseCommandQueue",
            ObjectKind::Program => "clReleaseProgram",
            ObjectKind::Kernel => "clReleaseKernel",
            ObjectKind::MemoryObject => "clReleaseMemObject",
            ObjectKind::Event | ObjectKind::UserEvent => "clReleaseEvent",
            ObjectKind::Sampler => "clReleaseSampler",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Platform => "Platform",
            ObjectKind::Device => "Device",
            ObjectKind::Context => "Context",
            ObjectKind::CommandQueue => "CommandQueue",
            ObjectKind::Program => "Program",
            ObjectKind::Kernel => "Kernel",
            ObjectKind::MemoryObject => "MemoryObject",
            ObjectKind::Event => "Event",
            ObjectKind::UserEvent => "UserEvent",
            ObjectKind::Sampler => "Sampler",
        };
        f.write_str(name)
    }
}
