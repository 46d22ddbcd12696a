// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

/// A self-relative pointer stored inside arena memory.
///
/// The stored word is `target_addr - field_addr`; zero encodes null. The
/// control plane writes a graph with [`OffsetPtr::store`] before
/// publishing; workers resolve it with [`OffsetPtr::load`]. Loads are
/// acquire and stores release, which is the entire synchronization the
/// generation hand-off needs.
#[repr(transparent)]
pub struct OffsetPtr<T> {
    off: AtomicI64,
    _marker: PhantomData<*const T>,
}

impl<T> OffsetPtr<T> {
    /// A null offset pointer.
    #[must_use]
    pub fn null() -> Self {
        Self {
            off: AtomicI64::new(0),
            _marker: PhantomData,
        }
    }

    /// Resolve to an absolute address, or `None` when null.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn load(&self) -> Option<NonNull<T>> {
        let off = self.off.load(Ordering::Acquire);
        if off == 0 {
            return None;
        }
        let base = std::ptr::from_ref(self).cast::<u8>() as isize;
        #[allow(clippy::cast_possible_truncation)] // offsets fit isize by construction
        let addr = base.wrapping_add(off as isize);
        NonNull::new(addr as *mut T)
    }

    /// Store the offset to `target`, or null.
    ///
    /// The caller guarantees `target` lives in the same mapping as this
    /// field; otherwise the offset is meaningless after a remap.
    #[allow(clippy::cast_possible_wrap)]
    pub fn store(&self, target: Option<NonNull<T>>) {
        let value = match target {
            None => 0,
            Some(ptr) => {
                let base = std::ptr::from_ref(self).cast::<u8>() as i64;
                ptr.as_ptr() as i64 - base
            }
        };
        self.off.store(value, Ordering::Release);
    }

    /// True when no target is stored.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.off.load(Ordering::Acquire) == 0
    }
}

impl<T> Default for OffsetPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> std::fmt::Debug for OffsetPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OffsetPtr({:+})", self.off.load(Ordering::Relaxed))
    }
}
