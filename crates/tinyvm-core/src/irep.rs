// SPDX-License-Identifier: GPL-3.0-or-later

//! IREP: the immutable per-method bytecode record (component E, §3.3).
//!
//! Stored the same way the teacher stores `HeapCompiledFn`: a fixed
//! header followed by trailing variable-length arrays, all living inside
//! the pool rather than behind a `Vec`. Unlike a [`crate::heap`] cell,
//! an IREP is not a script-visible value and carries no refcount header —
//! it is owned by whichever `Proc` or call frame references it and is
//! reclaimed in bulk by `free_all` at VM teardown (the loader tags every
//! IREP node with the VM it was loaded for).
//!
//! Trailing layout, in order: `code_len` `u32` instructions, `pool_len`
//! [`crate::Value`] literals, `sym_len` `u16` global symbol ids (resolved
//! once at load time from the IREP's local symbol names), `rep_len`
//! child-IREP [`Addr`]s.

use crate::value::Value;
use tinyvm_alloc::{Addr, Pool};

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IrepHeader {
    pub nregs: u8,
    pub nlocals: u8,
    pub _pad: u16,
    pub code_len: u32,
    pub pool_len: u32,
    pub sym_len: u32,
    pub rep_len: u32,
}

impl IrepHeader {
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn alloc_size(code_len: usize, pool_len: usize, sym_len: usize, rep_len: usize) -> usize {
        Self::HEADER_SIZE
            + code_len * core::mem::size_of::<u32>()
            + pool_len * core::mem::size_of::<Value>()
            + sym_len * core::mem::size_of::<u16>()
            + rep_len * core::mem::size_of::<Addr>()
    }

    #[must_use]
    pub const fn code_offset() -> usize {
        Self::HEADER_SIZE
    }

    #[must_use]
    pub const fn pool_offset(code_len: usize) -> usize {
        Self::code_offset() + code_len * core::mem::size_of::<u32>()
    }

    #[must_use]
    pub const fn sym_offset(code_len: usize, pool_len: usize) -> usize {
        Self::pool_offset(code_len) + pool_len * core::mem::size_of::<Value>()
    }

    #[must_use]
    pub const fn rep_offset(code_len: usize, pool_len: usize, sym_len: usize) -> usize {
        Self::sym_offset(code_len, pool_len) + sym_len * core::mem::size_of::<u16>()
    }
}

/// A handle to an IREP node already resident in a [`Pool`]: its base
/// `Addr` plus the fixed header read once at construction. Every other
/// accessor here is a cheap indexed read relative to that base, following
/// the trailing-array layout documented at module level.
#[derive(Clone, Copy)]
pub struct IrepView {
    pub addr: Addr,
    pub header: IrepHeader,
}

impl IrepView {
    #[must_use]
    pub fn load(pool: &Pool, addr: Addr) -> Self {
        Self {
            addr,
            header: pool.read(addr),
        }
    }

    #[must_use]
    pub const fn nregs(&self) -> u8 {
        self.header.nregs
    }

    #[must_use]
    pub const fn code_len(&self) -> usize {
        self.header.code_len as usize
    }

    /// Fetch instruction `pc`. Returns `None` past the end of `code`, the
    /// caller-facing form of the §8 invariant "`pc` is within the bounds
    /// of `pc_irep.code`".
    #[must_use]
    pub fn code(&self, pool: &Pool, pc: usize) -> Option<u32> {
        if pc >= self.code_len() {
            return None;
        }
        let off = IrepHeader::code_offset() + pc * core::mem::size_of::<u32>();
        Some(pool.read(Addr::from_raw(self.addr.offset() + off as u32)))
    }

    #[must_use]
    pub fn literal(&self, pool: &Pool, index: usize) -> Option<Value> {
        if index >= self.header.pool_len as usize {
            return None;
        }
        let off = IrepHeader::pool_offset(self.code_len()) + index * core::mem::size_of::<Value>();
        Some(pool.read(Addr::from_raw(self.addr.offset() + off as u32)))
    }

    /// The global symbol id at local symbol-pool index `index`, resolved
    /// once by the loader at load time (§0 "Ambient concerns").
    #[must_use]
    pub fn symbol(&self, pool: &Pool, index: usize) -> Option<u16> {
        if index >= self.header.sym_len as usize {
            return None;
        }
        let off = IrepHeader::sym_offset(self.code_len(), self.header.pool_len as usize)
            + index * core::mem::size_of::<u16>();
        Some(pool.read(Addr::from_raw(self.addr.offset() + off as u32)))
    }

    #[must_use]
    pub fn child(&self, pool: &Pool, index: usize) -> Option<Addr> {
        if index >= self.header.rep_len as usize {
            return None;
        }
        let off = IrepHeader::rep_offset(
            self.code_len(),
            self.header.pool_len as usize,
            self.header.sym_len as usize,
        ) + index * core::mem::size_of::<Addr>();
        Some(pool.read(Addr::from_raw(self.addr.offset() + off as u32)))
    }
}
