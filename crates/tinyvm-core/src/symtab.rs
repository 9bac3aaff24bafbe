// SPDX-License-Identifier: GPL-3.0-or-later

//! Symbol table (component B, §4.B).
//!
//! `intern(name) -> id` / `name_of(id) -> name`. Capacity-bounded, never
//! reclaims an id, `id = 0` reserved for "no symbol". Name bytes live in
//! the shared pool via `raw_alloc` (untagged by any VM), since symbols
//! outlive any single VM's lifetime and are never swept by `free_all`.
//! Grounded on the linear-scan interning loop in the teacher's
//! `process/value_alloc.rs` (`alloc_symbol`/`find_interned_symbol`),
//! generalized from a per-process fixed array to this workspace's
//! process-wide table.

use tinyvm_abi::config::MAX_SYMBOLS_COUNT;
use tinyvm_alloc::{Addr, Pool};

/// Reserved "no symbol" id.
pub const NO_SYMBOL: u16 = 0;

#[derive(Clone, Copy)]
struct Entry {
    addr: Addr,
    len: u16,
}

pub struct SymbolTable {
    entries: [Entry; MAX_SYMBOLS_COUNT],
    len: u16,
}

impl SymbolTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [Entry {
                addr: Addr::NULL,
                len: 0,
            }; MAX_SYMBOLS_COUNT],
            len: 1, // slot 0 reserved for NO_SYMBOL
        }
    }

    /// Intern `name`, returning its id. Returns the existing id if `name`
    /// was already interned. `None` on table exhaustion, which is a fatal
    /// diagnostic per §4.B.
    pub fn intern(&mut self, pool: &mut Pool, name: &str) -> Option<u16> {
        if let Some(id) = self.lookup(pool, name) {
            return Some(id);
        }
        if (self.len as usize) >= MAX_SYMBOLS_COUNT {
            return None;
        }
        let bytes = name.as_bytes();
        let addr = pool.raw_alloc(bytes.len())?;
        pool.slice_mut(addr, bytes.len()).copy_from_slice(bytes);
        let id = self.len;
        #[expect(
            clippy::cast_possible_truncation,
            reason = "name.len() bounded well under u16::MAX by realistic identifier lengths"
        )]
        let entry = Entry {
            addr,
            len: bytes.len() as u16,
        };
        self.entries[id as usize] = entry;
        self.len += 1;
        Some(id)
    }

    #[must_use]
    pub fn lookup(&self, pool: &Pool, name: &str) -> Option<u16> {
        let bytes = name.as_bytes();
        for id in 1..self.len {
            let e = self.entries[id as usize];
            if e.len as usize == bytes.len() && pool.slice(e.addr, bytes.len()) == bytes {
                return Some(id);
            }
        }
        None
    }

    #[must_use]
    pub fn name_of<'p>(&self, pool: &'p Pool, id: u16) -> Option<&'p str> {
        if id == NO_SYMBOL || id >= self.len {
            return None;
        }
        let e = self.entries[id as usize];
        core::str::from_utf8(pool.slice(e.addr, e.len as usize)).ok()
    }

    #[must_use]
    pub const fn len(&self) -> u16 {
        self.len - 1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
