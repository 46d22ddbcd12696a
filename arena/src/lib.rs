// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

//! # Shared memory arena
//!
//! A contiguous memory region — huge-page file backed in production,
//! anonymous in tests — split into a data-plane half and a control-plane
//! half. Each half carries a header with a block allocator and a root
//! offset pointer.
//!
//! Every pointer stored *inside* the arena is a self-relative offset
//! ([`OffsetPtr`]): the stored value is `target_addr - field_addr`, zero
//! encodes null. Because field and target move together when a second
//! process maps the same file at a different base, a configuration graph
//! written this way is position independent. [`OffsetPtr::load`] and
//! [`OffsetPtr::store`] are the only places offset arithmetic happens.

mod alloc;
mod context;
mod offset;
mod region;

pub use alloc::SIZE_CLASS_COUNT;
pub use context::MemoryContext;
pub use offset::OffsetPtr;
pub use region::{Arena, ArenaError, Half, HalfKind};
