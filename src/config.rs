use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const MAX_INGRESS_CAPACITY: usize = 1 << 20;
const MIN_STACK_SIZE: usize = 16 * 1024;

/// Hook invoked from native threads after a completion is queued.
///
/// Event loops use it to schedule a drain on the host thread. It must be
/// cheap and must not call back into the runtime.
#[derive(Clone)]
pub struct Wakeup(Arc<dyn Fn() + Send + Sync>);

impl Wakeup {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn wake(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Wakeup(..)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the ingress queue between trampolines and the host.
    /// `None` means unbounded.
    pub ingress_capacity: Option<usize>,

    /// How long teardown waits for in-flight completions before dropping them.
    pub teardown_drain: Duration,

    pub wait_thread_prefix: String,
    pub wait_stack_size: Option<usize>,

    pub wakeup: Option<Wakeup>,

    #[cfg(feature = "telemetry")]
    pub enable_telemetry: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingress_capacity: Some(1024),
            teardown_drain: Duration::ZERO,
            wait_thread_prefix: "clbridge-wait".to_string(),
            wait_stack_size: Some(256 * 1024),
            wakeup: None,

            #[cfg(feature = "telemetry")]
            enable_telemetry: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(capacity) = self.ingress_capacity {
            if capacity == 0 {
                return Err(Error::config("ingress_capacity must be > 0"));
            }
            if capacity > MAX_INGRESS_CAPACITY {
                return Err(Error::config(format!(
                    "ingress_capacity too large (max {})",
                    MAX_INGRESS_CAPACITY
                )));
            }
        }

        if self.wait_thread_prefix.is_empty() {
            return Err(Error::config("wait_thread_prefix must not be empty"));
        }

        if let Some(size) = self.wait_stack_size {
            if size < MIN_STACK_SIZE {
                return Err(Error::config(format!(
                    "wait_stack_size must be >= {} bytes",
                    MIN_STACK_SIZE
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn ingress_capacity(mut self, capacity: usize) -> Self {
        self.config.ingress_capacity = Some(capacity);
        self
    }

    pub fn unbounded_ingress(mut self) -> Self {
        self.config.ingress_capacity = None;
        self
    }

    pub fn teardown_drain(mut self, timeout: Duration) -> Self {
        self.config.teardown_drain = timeout;
        self
    }

    pub fn wait_thread_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.wait_thread_prefix = prefix.into();
        self
    }

    pub fn wait_stack_size(mut self, size: usize) -> Self {
        self.config.wait_stack_size = Some(size);
        self
    }

    pub fn wakeup<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.wakeup = Some(Wakeup::new(f));
        self
    }

    #[cfg(feature = "telemetry")]
    pub fn enable_telemetry(mut self, enable: bool) -> Self {
        self.config.enable_telemetry = enable;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
