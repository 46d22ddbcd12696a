// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::alloc::{FreeBlock, SIZE_CLASS_COUNT};
use crate::offset::OffsetPtr;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;
use tracing::info;

const ARENA_MAGIC: u64 = 0x0059_414e_4554_3241; // "\0YANET2A"

/// Block granularity; headers and allocations are aligned to this.
pub(crate) const BLOCK_ALIGN: usize = 64;

/// Arena setup failure.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// Backing file could not be created, sized or mapped.
    #[error("arena storage i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A half smaller than its own bookkeeping.
    #[error("half size {size} below minimum {min}")]
    HalfTooSmall {
        /// Requested size.
        size: usize,
        /// Smallest workable size.
        min: usize,
    },
    /// Existing file does not carry an arena.
    #[error("bad arena magic {found:#018x}")]
    BadMagic {
        /// Magic found in the mapping.
        found: u64,
    },
    /// Mapped file shorter than the sizes recorded in its headers.
    #[error("mapping of {mapped} bytes shorter than recorded {recorded}")]
    Truncated {
        /// Bytes mapped.
        mapped: usize,
        /// Bytes the headers claim.
        recorded: usize,
    },
}

/// Per-half bookkeeping, resident at the half's base.
///
/// Field order is load-bearing for cross-process reads; never reorder.
#[repr(C)]
pub(crate) struct HalfHeader {
    pub(crate) magic: u64,
    pub(crate) size: u64,
    /// Bump cursor, offset from the half base.
    pub(crate) alloc_top: AtomicU64,
    /// Published configuration generation number.
    pub(crate) r#gen: AtomicU64,
    /// Application root record.
    pub(crate) root: OffsetPtr<u8>,
    pub(crate) free_heads: [OffsetPtr<FreeBlock>; SIZE_CLASS_COUNT],
}

const fn header_reserve() -> usize {
    // header rounded up to block alignment
    (size_of::<HalfHeader>() + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
}

/// Which half of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfKind {
    /// Data-plane half, at offset zero.
    Dp,
    /// Control-plane half, at offset `dp_size`.
    Cp,
}

/// The arena: one mapping, two halves.
#[derive(Debug)]
pub struct Arena {
    // Kept alive for the mapping; all access goes through `base`.
    _map: MmapMut,
    base: NonNull<u8>,
    dp_size: usize,
    cp_size: usize,
}

// SAFETY: the mapping is owned for the arena's lifetime; concurrent access
// to header fields goes through atomics, and block contents follow the
// single-writer contract of the memory contexts handed out.
#[allow(unsafe_code)]
unsafe impl Send for Arena {}
#[allow(unsafe_code)]
unsafe impl Sync for Arena {}

impl Arena {
    /// Minimum size of one half.
    #[must_use]
    pub fn min_half_size() -> usize {
        header_reserve() + BLOCK_ALIGN
    }

    /// Create (or truncate) the backing file and initialize both halves.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError`] on i/o failure or undersized halves.
    pub fn create_file(path: &Path, dp_size: usize, cp_size: usize) -> Result<Self, ArenaError> {
        check_half(dp_size)?;
        check_half(cp_size)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((dp_size + cp_size) as u64)?;
        // SAFETY: freshly created file, exclusively sized above.
        #[allow(unsafe_code)]
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let arena = Self::from_map(map, dp_size, cp_size);
        arena.init_headers();
        info!(
            path = %path.display(),
            dp_size,
            cp_size,
            "created arena storage"
        );
        Ok(arena)
    }

    /// Map an existing arena file and validate its headers.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError`] on i/o failure, bad magic, or a mapping
    /// shorter than the recorded sizes.
    pub fn open_file(path: &Path) -> Result<Self, ArenaError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: mapping an existing file read-write; header validation
        // below rejects foreign content.
        #[allow(unsafe_code)]
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let mapped = map.len();
        if mapped < header_reserve() {
            return Err(ArenaError::Truncated {
                mapped,
                recorded: header_reserve(),
            });
        }
        let base = NonNull::from(&map[0]).cast::<u8>();
        // SAFETY: bounds checked above; header is plain data + atomics.
        #[allow(unsafe_code)]
        let dp_hdr = unsafe { base.cast::<HalfHeader>().as_ref() };
        if dp_hdr.magic != ARENA_MAGIC {
            return Err(ArenaError::BadMagic {
                found: dp_hdr.magic,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let dp_size = dp_hdr.size as usize;
        if mapped < dp_size + header_reserve() {
            return Err(ArenaError::Truncated {
                mapped,
                recorded: dp_size + header_reserve(),
            });
        }
        // SAFETY: cp header lies at dp_size, bounds checked above.
        #[allow(unsafe_code)]
        let cp_hdr = unsafe { base.add(dp_size).cast::<HalfHeader>().as_ref() };
        if cp_hdr.magic != ARENA_MAGIC {
            return Err(ArenaError::BadMagic {
                found: cp_hdr.magic,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let cp_size = cp_hdr.size as usize;
        if mapped < dp_size + cp_size {
            return Err(ArenaError::Truncated {
                mapped,
                recorded: dp_size + cp_size,
            });
        }
        Ok(Self::from_map(map, dp_size, cp_size))
    }

    /// Anonymous arena for tests and virtual topologies.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError`] on mapping failure or undersized halves.
    pub fn anonymous(dp_size: usize, cp_size: usize) -> Result<Self, ArenaError> {
        check_half(dp_size)?;
        check_half(cp_size)?;
        let map = MmapOptions::new().len(dp_size + cp_size).map_anon()?;
        let arena = Self::from_map(map, dp_size, cp_size);
        arena.init_headers();
        Ok(arena)
    }

    fn from_map(mut map: MmapMut, dp_size: usize, cp_size: usize) -> Self {
        let base = NonNull::new(map.as_mut_ptr()).unwrap_or_else(|| unreachable!());
        Self {
            _map: map,
            base,
            dp_size,
            cp_size,
        }
    }

    fn init_headers(&self) {
        for kind in [HalfKind::Dp, HalfKind::Cp] {
            let half = self.half(kind);
            let hdr = half.header();
            hdr.magic = ARENA_MAGIC;
            hdr.size = half.size as u64;
            *hdr.alloc_top.get_mut() = header_reserve() as u64;
            *hdr.r#gen.get_mut() = 0;
            hdr.root = OffsetPtr::null();
            for head in &mut hdr.free_heads {
                *head = OffsetPtr::null();
            }
        }
    }

    /// One half of the arena.
    #[must_use]
    pub fn half(&self, kind: HalfKind) -> Half<'_> {
        let (offset, size) = match kind {
            HalfKind::Dp => (0, self.dp_size),
            HalfKind::Cp => (self.dp_size, self.cp_size),
        };
        // SAFETY: offset stays inside the mapping by construction.
        #[allow(unsafe_code)]
        let base = unsafe { self.base.add(offset) };
        Half {
            base,
            size,
            _arena: std::marker::PhantomData,
        }
    }

    /// The data-plane half.
    #[must_use]
    pub fn dp(&self) -> Half<'_> {
        self.half(HalfKind::Dp)
    }

    /// The control-plane half.
    #[must_use]
    pub fn cp(&self) -> Half<'_> {
        self.half(HalfKind::Cp)
    }
}

fn check_half(size: usize) -> Result<(), ArenaError> {
    let min = Arena::min_half_size();
    if size < min {
        return Err(ArenaError::HalfTooSmall { size, min });
    }
    Ok(())
}

/// A borrowed view of one half.
#[derive(Debug, Clone, Copy)]
pub struct Half<'a> {
    pub(crate) base: NonNull<u8>,
    pub(crate) size: usize,
    _arena: std::marker::PhantomData<&'a Arena>,
}

impl Half<'_> {
    /// Size of this half in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes reserved for the header at the base.
    #[must_use]
    pub fn header_reserve() -> usize {
        header_reserve()
    }

    #[allow(clippy::mut_from_ref)] // header fields are atomics / init-only
    pub(crate) fn header(&self) -> &mut HalfHeader {
        // SAFETY: base points at an initialized (or about-to-be
        // initialized) header inside the mapping.
        #[allow(unsafe_code)]
        unsafe {
            self.base.cast::<HalfHeader>().as_mut()
        }
    }

    /// The published generation counter of this half.
    #[must_use]
    pub fn generation(&self) -> &AtomicU64 {
        &self.header().r#gen
    }

    /// The root offset pointer of this half.
    #[must_use]
    pub fn root(&self) -> &OffsetPtr<u8> {
        &self.header().root
    }

    /// True when `ptr` lies within this half.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr < base + self.size
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn halves_are_disjoint_and_sized() {
        let arena = Arena::anonymous(1 << 16, 1 << 15).unwrap();
        assert_eq!(arena.dp().size(), 1 << 16);
        assert_eq!(arena.cp().size(), 1 << 15);
        let dp_base = arena.dp().base.as_ptr() as usize;
        let cp_base = arena.cp().base.as_ptr() as usize;
        assert_eq!(cp_base - dp_base, 1 << 16);
    }

    #[test]
    fn rejects_undersized_half() {
        let err = Arena::anonymous(16, 1 << 16).unwrap_err();
        assert!(matches!(err, ArenaError::HalfTooSmall { .. }));
    }

    #[test]
    fn file_arena_reopens_with_state() {
        let dir = std::env::temp_dir().join("yanet-arena-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("shm-{}", std::process::id()));

        {
            let arena = Arena::create_file(&path, 1 << 16, 1 << 16).unwrap();
            arena
                .dp()
                .generation()
                .store(41, std::sync::atomic::Ordering::Release);
        }
        {
            let arena = Arena::open_file(&path).unwrap();
            assert_eq!(
                arena
                    .dp()
                    .generation()
                    .load(std::sync::atomic::Ordering::Acquire),
                41
            );
            assert_eq!(arena.cp().size(), 1 << 16);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn open_rejects_foreign_file() {
        let dir = std::env::temp_dir().join("yanet-arena-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("junk-{}", std::process::id()));
        std::fs::write(&path, vec![0xabu8; 4096]).unwrap();
        let err = Arena::open_file(&path).unwrap_err();
        assert!(matches!(err, ArenaError::BadMagic { .. }));
        std::fs::remove_file(&path).unwrap();
    }
}
