use std::fmt;
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};

use crate::config::{CoreTopology, PoolConfig};
use crate::Result;

/// The class of cores a thread can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffinityClass {
    /// The high-performance ("big") cores.
    Performance,
    /// The low-power ("little") cores.
    Efficiency,
    /// Every logical CPU available to the process.
    Unconstrained,
}

/// An OS-level strategy for changing the calling thread's CPU mask.
///
/// Implementors must only ever act on the calling thread.
pub trait AffinityBackend: Send + Sync + fmt::Debug {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Restricts the calling thread to the given logical CPUs.
    ///
    /// # Errors
    ///
    /// Returns an error if the mask cannot be built or the OS rejects it.
    fn pin_current_thread(&self, class: AffinityClass, cpus: &[usize]) -> Result<()>;

    /// Lists every logical CPU the machine has, queried at call time.
    ///
    /// The OS drops offline or disallowed CPUs when the mask is applied.
    fn available_cpus(&self) -> Vec<usize>;

    /// Reads back the calling thread's mask, if the backend can.
    fn current_thread_cpus(&self) -> Option<Vec<usize>> {
        None
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod native;
mod noop;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::native::NativeBackend;
pub use self::noop::NoOpBackend;

/// Returns the native backend when this build targets an OS that supports it.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn native_backend() -> Option<Arc<dyn AffinityBackend>> {
    Some(Arc::new(NativeBackend))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn native_backend() -> Option<Arc<dyn AffinityBackend>> {
    None
}

/// Pins the calling thread to a class of cores.
///
/// Affinity is a performance hint: every operation is infallible from the
/// caller's point of view. When the backend fails, a warning is logged and
/// the thread keeps running with whatever mask it had.
///
/// The backend is chosen once, when the controller is built, and cloning the
/// controller shares it.
#[derive(Debug, Clone)]
pub struct AffinityController {
    topology: Arc<CoreTopology>,
    backend: Arc<dyn AffinityBackend>,
}

impl AffinityController {
    /// Selects the native backend if the platform supports it and
    /// `config.pin_workers` is set, otherwise the no-op backend.
    pub fn detect(config: &PoolConfig) -> Self {
        let backend = if config.pin_workers {
            native_backend()
        } else {
            None
        };
        let backend = backend.unwrap_or_else(|| Arc::new(NoOpBackend));
        debug!("Selected {} affinity backend", backend.name());
        Self {
            topology: Arc::new(config.topology.clone()),
            backend,
        }
    }

    /// A controller whose operations all do nothing.
    pub fn noop(topology: CoreTopology) -> Self {
        Self::with_backend(topology, NoOpBackend)
    }

    /// A controller using the given backend.
    pub fn with_backend(topology: CoreTopology, backend: impl AffinityBackend + 'static) -> Self {
        Self {
            topology: Arc::new(topology),
            backend: Arc::new(backend),
        }
    }

    /// Name of the selected backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The configured core layout.
    pub fn topology(&self) -> &CoreTopology {
        &self.topology
    }

    /// Restricts the calling thread to the performance cores.
    pub fn pin_to_performance_cores(&self) {
        self.apply(AffinityClass::Performance);
    }

    /// Restricts the calling thread to the efficiency cores.
    pub fn pin_to_efficiency_cores(&self) {
        self.apply(AffinityClass::Efficiency);
    }

    /// Lets the calling thread run on any CPU again.
    pub fn release_affinity(&self) {
        self.apply(AffinityClass::Unconstrained);
    }

    /// Applies the given class to the calling thread, best effort.
    pub fn apply(&self, class: AffinityClass) {
        let available;
        let cpus: &[usize] = match class {
            AffinityClass::Performance => &self.topology.performance,
            AffinityClass::Efficiency => &self.topology.efficiency,
            AffinityClass::Unconstrained => {
                available = self.backend.available_cpus();
                &available
            }
        };

        let current = thread::current();
        let name = current.name().unwrap_or("<unnamed>");

        if cpus.is_empty() {
            warn!("No CPUs configured for {:?} cores, thread {} left as is", class, name);
            return;
        }

        match self.backend.pin_current_thread(class, cpus) {
            Ok(()) if class == AffinityClass::Performance => {
                info!("Thread {} pinned to performance cores {:?}", name, cpus);
            }
            Ok(()) => debug!("Thread {} set to {:?} cores {:?}", name, class, cpus),
            Err(e) => warn!("Thread {} continues unconstrained: {}", name, e),
        }
    }

    /// The calling thread's current CPU mask, if the backend can read it.
    pub fn current_thread_cpus(&self) -> Option<Vec<usize>> {
        self.backend.current_thread_cpus()
    }
}

impl Default for AffinityController {
    fn default() -> Self {
        Self::detect(&PoolConfig::default())
    }
}
