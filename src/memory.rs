//! Cache-friendly memory helpers for task bodies.
//!
//! Nothing in the pool uses these itself. They are stateless and safe to
//! call from any thread.

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use crate::{PoolError, Result};

/// Cache line size assumed for alignment and prefetch stepping.
pub const CACHE_LINE_SIZE: usize = 64;

/// Pads and aligns a value to at least one cache line, so that values
/// written by different workers do not share a line.
///
/// Re-exported from `crossbeam`. The alignment is per target and is never
/// smaller than [`CACHE_LINE_SIZE`] on x86-64 and AArch64.
pub use crossbeam::utils::CachePadded;

/// A zero-initialized heap block with a guaranteed alignment.
///
/// The size is rounded up to a multiple of the alignment. The memory is
/// released when the buffer is dropped.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer uniquely owns its allocation, like a Box<[u8]>.
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out &[u8].
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates at least `size` bytes aligned to `alignment`.
    ///
    /// A zero size still allocates one alignment unit. If the allocator
    /// cannot satisfy the request the process takes the standard
    /// out-of-memory path (`handle_alloc_error`).
    ///
    /// # Errors
    ///
    /// `InvalidAlignment` if `alignment` is not a power of two,
    /// `AllocationTooLarge` if the rounded size does not fit a layout.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(alignment));
        }
        let layout = size
            .max(1)
            .checked_next_multiple_of(alignment)
            .and_then(|rounded| Layout::from_size_align(rounded, alignment).ok())
            .ok_or(PoolError::AllocationTooLarge { size, alignment })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self { ptr, layout })
    }

    /// Size in bytes, after rounding.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false; a buffer holds at least one alignment unit.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Pointer to the first byte.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable pointer to the first byte.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr points to layout.size() initialized (zeroed) bytes we own.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

/// Allocates a cache-line aligned buffer.
pub fn aligned_alloc(size: usize) -> Result<AlignedBuffer> {
    AlignedBuffer::new(size, CACHE_LINE_SIZE)
}

/// Releases a buffer. `None` is accepted and ignored.
pub fn aligned_free(buffer: Option<AlignedBuffer>) {
    drop(buffer);
}

/// Whether the prefetched line is about to be read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchIntent {
    /// The line will be read.
    Read,
    /// The line will be written.
    Write,
}

/// How long the prefetched line should stay in cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Locality {
    /// Used once, do not pollute the cache.
    None,
    /// Outer cache levels only.
    Low,
    /// Second level cache and beyond.
    Moderate,
    /// Keep in every cache level.
    High,
}

/// Hints the CPU to load the cache line holding `ptr`.
///
/// Never dereferences `ptr`, so any address is fine, dangling or not. On
/// targets without a prefetch instruction this does nothing.
#[inline]
pub fn prefetch<T>(ptr: *const T, intent: PrefetchIntent, locality: Locality) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_NTA, _MM_HINT_T0, _MM_HINT_T1, _MM_HINT_T2};

        // x86 has no stable write-intent hint.
        let _ = intent;
        let p = ptr.cast::<i8>();
        // SAFETY: prefetch instructions never fault; SSE is baseline on x86_64.
        unsafe {
            match locality {
                Locality::None => _mm_prefetch::<_MM_HINT_NTA>(p),
                Locality::Low => _mm_prefetch::<_MM_HINT_T2>(p),
                Locality::Moderate => _mm_prefetch::<_MM_HINT_T1>(p),
                Locality::High => _mm_prefetch::<_MM_HINT_T0>(p),
            }
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        use std::arch::asm;

        let ptr = ptr.cast::<u8>();
        // SAFETY: prfm never faults and touches no registers besides the input.
        unsafe {
            match (intent, locality) {
                (PrefetchIntent::Read, Locality::None) => {
                    asm!("prfm pldl1strm, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Read, Locality::Low) => {
                    asm!("prfm pldl3keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Read, Locality::Moderate) => {
                    asm!("prfm pldl2keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Read, Locality::High) => {
                    asm!("prfm pldl1keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Write, Locality::None) => {
                    asm!("prfm pstl1strm, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Write, Locality::Low) => {
                    asm!("prfm pstl3keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Write, Locality::Moderate) => {
                    asm!("prfm pstl2keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
                (PrefetchIntent::Write, Locality::High) => {
                    asm!("prfm pstl1keep, [{0}]", in(reg) ptr, options(nostack, preserves_flags, readonly))
                }
            }
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = (ptr, intent, locality);
    }
}

/// Prefetches one cache line for reading, keeping it in every level.
#[inline]
pub fn prefetch_cache_line<T>(ptr: *const T) {
    prefetch(ptr, PrefetchIntent::Read, Locality::High);
}

/// Prefetches every cache line of `len` bytes starting at `start`.
pub fn prefetch_range<T>(start: *const T, len: usize) {
    let start = start.cast::<u8>();
    for offset in (0..len).step_by(CACHE_LINE_SIZE) {
        prefetch_cache_line(start.wrapping_add(offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_rounded_up_to_alignment() {
        let buf = AlignedBuffer::new(100, 64).unwrap();
        assert_eq!(buf.len(), 128);
        assert_eq!(buf.as_ptr() as usize % 64, 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_size_allocates_one_unit() {
        let buf = AlignedBuffer::new(0, 32).unwrap();
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn non_power_of_two_alignment_is_rejected() {
        assert!(matches!(
            AlignedBuffer::new(8, 48),
            Err(PoolError::InvalidAlignment(48))
        ));
        assert!(matches!(
            AlignedBuffer::new(8, 0),
            Err(PoolError::InvalidAlignment(0))
        ));
    }

    #[test]
    fn overflowing_size_is_rejected() {
        assert!(matches!(
            AlignedBuffer::new(usize::MAX, 4096),
            Err(PoolError::AllocationTooLarge { .. })
        ));
    }

    #[test]
    fn prefetch_never_dereferences() {
        let dangling = {
            let v = vec![1u64; 4];
            v.as_ptr()
        };
        prefetch(dangling, PrefetchIntent::Write, Locality::None);
        prefetch(std::ptr::null::<u8>(), PrefetchIntent::Read, Locality::Low);
        prefetch_range(dangling, 4096);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn cache_padded_values_sit_on_separate_lines() {
        let counters = [CachePadded::new(0u64), CachePadded::new(0u64)];
        assert!(std::mem::align_of::<CachePadded<u64>>() >= CACHE_LINE_SIZE);
        let first = &*counters[0] as *const u64 as usize;
        let second = &*counters[1] as *const u64 as usize;
        assert_eq!(first % CACHE_LINE_SIZE, 0);
        assert!(second - first >= CACHE_LINE_SIZE);
    }
}
