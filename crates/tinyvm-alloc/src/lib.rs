// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed-pool allocator (component A).
//!
//! Serves every heap request in the workspace from a single caller-supplied
//! contiguous byte buffer — there is no host-level dynamic allocator
//! underneath this one. Every live block is tagged with the id of the VM
//! that owns it, so [`Pool::free_all`] can sweep an entire VM's objects in
//! one pass when it is closed.
//!
//! Grounded on the teacher workspace's watermark-style allocators
//! (`UntypedAllocator::allocate`, `ProcessPool::allocate_process_memory`):
//! same fixed-array-of-descriptors-plus-checked-arithmetic idiom, but
//! generalized from bump-only to a free-list, because the distilled spec
//! requires `free`, which those allocators never implement.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod pool;
#[cfg(test)]
mod pool_proptest;

pub use pool::{Addr, Pool, Stats, RAW_VM_ID};
