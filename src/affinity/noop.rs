use super::{AffinityBackend, AffinityClass};
use crate::Result;

/// Backend for platforms or builds without affinity support.
///
/// Every operation succeeds without touching the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBackend;

impl AffinityBackend for NoOpBackend {
    fn name(&self) -> &'static str {
        "no-op"
    }

    fn pin_current_thread(&self, _class: AffinityClass, _cpus: &[usize]) -> Result<()> {
        Ok(())
    }

    fn available_cpus(&self) -> Vec<usize> {
        (0..num_cpus::get()).collect()
    }
}
