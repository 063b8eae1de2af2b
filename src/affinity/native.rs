use std::io;
use std::mem;

use super::{AffinityBackend, AffinityClass};
use crate::{PoolError, Result};

/// Number of CPUs a `cpu_set_t` can describe.
const MASK_BITS: usize = mem::size_of::<libc::cpu_set_t>() * 8;

/// Backend built on `sched_setaffinity`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl AffinityBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn pin_current_thread(&self, class: AffinityClass, cpus: &[usize]) -> Result<()> {
        // SAFETY: cpu_set_t is plain data and all zeroes is the empty set.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        for &cpu in cpus {
            if cpu >= MASK_BITS {
                return Err(PoolError::CpuOutOfRange(cpu));
            }
            // SAFETY: cpu was bounds checked against the mask size above.
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }

        // pid 0 is the calling thread.
        // SAFETY: set is a valid, initialized cpu_set_t of the size we pass.
        let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
        if rc != 0 {
            return Err(PoolError::AffinityRejected {
                class,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn available_cpus(&self) -> Vec<usize> {
        // SAFETY: sysconf has no memory safety preconditions.
        let configured = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        let count = if configured > 0 {
            (configured as usize).min(MASK_BITS)
        } else {
            num_cpus::get()
        };
        (0..count).collect()
    }

    fn current_thread_cpus(&self) -> Option<Vec<usize>> {
        // SAFETY: as above, the empty set is a valid starting value.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: set is writable and exactly the size we pass.
        let rc =
            unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if rc != 0 {
            return None;
        }
        // SAFETY: every index is below the mask size.
        Some((0..MASK_BITS).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) }).collect())
    }
}
