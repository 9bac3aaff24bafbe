// SPDX-License-Identifier: GPL-3.0-or-later

//! Built-in heap types (component D, §3.2).
//!
//! Every heap cell begins with [`HeapHeader`]: a saturating refcount and
//! the owning VM's id, used by `free_all` at VM teardown. Bodies follow
//! the teacher's `value/heap.rs` header-plus-trailing-data shape
//! (`HeapString`, `HeapTuple`) but every type here additionally carries
//! that shared header, since the teacher's bump-only allocator has no
//! refcounting at all.

use crate::symtab::NO_SYMBOL;
use crate::value::Value;
use tinyvm_alloc::{Addr, Pool};

/// Refcount header shared by every heap cell.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HeapHeader {
    /// Saturates at `u16::MAX` rather than wrapping; a cell this heavily
    /// shared has almost certainly been mis-designed, and saturating
    /// keeps a wraparound-to-zero use-after-free impossible either way.
    pub refcount: u16,
    pub vm_id: u8,
    pub _pad: u8,
}

impl HeapHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn new(vm_id: u8) -> Self {
        Self {
            refcount: 1,
            vm_id,
            _pad: 0,
        }
    }

    pub const fn incref(&mut self) {
        if self.refcount < u16::MAX {
            self.refcount += 1;
        }
    }

    /// Returns `true` when the refcount reached zero and the cell should
    /// be freed by the caller.
    pub const fn decref(&mut self) -> bool {
        if self.refcount == 0 {
            return true;
        }
        self.refcount -= 1;
        self.refcount == 0
    }
}

/// `StringCell`: `HeapHeader` + `len: u32` + `len` raw UTF-8 bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StringCell {
    pub header: HeapHeader,
    pub len: u32,
}

impl StringCell {
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn alloc_size(len: usize) -> usize {
        Self::HEADER_SIZE + len
    }

    #[must_use]
    pub const fn bytes_offset() -> usize {
        Self::HEADER_SIZE
    }
}

/// `ArrayCell`: `HeapHeader` + `len: u32` + `len` [`Value`] slots.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ArrayCell {
    pub header: HeapHeader,
    pub len: u32,
}

impl ArrayCell {
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn alloc_size(len: usize) -> usize {
        Self::HEADER_SIZE + len * core::mem::size_of::<Value>()
    }

    #[must_use]
    pub const fn elements_offset() -> usize {
        Self::HEADER_SIZE
    }

    #[must_use]
    pub const fn element_offset(index: usize) -> usize {
        Self::elements_offset() + index * core::mem::size_of::<Value>()
    }
}

/// `HashCell`: `HeapHeader` + `len: u32` (number of pairs) + `len`
/// interleaved `(key: Value, value: Value)` pairs. A flat association
/// array rather than a hash-bucket table: appropriate at the scale this
/// system targets (tens to low hundreds of entries), and it keeps the
/// cell layout as simple as `ArrayCell`'s.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HashCell {
    pub header: HeapHeader,
    pub len: u32,
}

impl HashCell {
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn alloc_size(len: usize) -> usize {
        Self::HEADER_SIZE + len * 2 * core::mem::size_of::<Value>()
    }

    #[must_use]
    pub const fn pairs_offset() -> usize {
        Self::HEADER_SIZE
    }

    #[must_use]
    pub const fn key_offset(index: usize) -> usize {
        Self::pairs_offset() + index * 2 * core::mem::size_of::<Value>()
    }

    #[must_use]
    pub const fn value_offset(index: usize) -> usize {
        Self::key_offset(index) + core::mem::size_of::<Value>()
    }
}

/// `RangeCell`: `HeapHeader` + `from`, `to`, and an inclusive/exclusive
/// flag (`RANGE`'s `C` operand, §4.C.3).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RangeCell {
    pub header: HeapHeader,
    pub from: Value,
    pub to: Value,
    pub exclusive: bool,
    pub _pad: [u8; 7],
}

impl RangeCell {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// `ObjectCell`: `HeapHeader` + owning class + a flat instance-variable
/// table (`ivar_len` `(symbol: u16, value: Value)` slots, linear-scanned
/// — the per-object analogue of [`HashCell`]). The slot count is the
/// object's *capacity*, fixed at allocation; unused slots carry
/// `NO_SYMBOL` until claimed by `ivar_set`. Objects are addressed by
/// `Addr` from the moment they're created, so growing this table would
/// mean relocating the cell and invalidating every `Value::Object`
/// handle that already points at it — not an option here.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ObjectCell {
    pub header: HeapHeader,
    pub class: Addr,
    pub ivar_len: u32,
}

impl ObjectCell {
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();
    /// Each ivar slot: 2-byte symbol id (padded to 8) + `Value`.
    const SLOT_SIZE: usize = 8 + core::mem::size_of::<Value>();

    #[must_use]
    pub const fn alloc_size(ivar_capacity: usize) -> usize {
        Self::HEADER_SIZE + ivar_capacity * Self::SLOT_SIZE
    }

    #[must_use]
    pub const fn ivar_sym_offset(index: usize) -> usize {
        Self::HEADER_SIZE + index * Self::SLOT_SIZE
    }

    #[must_use]
    pub const fn ivar_value_offset(index: usize) -> usize {
        Self::ivar_sym_offset(index) + 8
    }

    /// Number of ivar slots this cell was allocated with. Fixed at
    /// creation time (§4.F: object ivar storage does not grow), so a
    /// symbol that does not fit in an existing or free slot is a genuine
    /// capacity limit, not a transient allocator failure.
    fn capacity(pool: &Pool, obj: Addr) -> usize {
        let cell: Self = pool.read(obj);
        cell.ivar_len as usize
    }

    /// Linear-scan lookup of an instance variable by symbol id. `None`
    /// when `sym` has never been set on this object.
    #[must_use]
    pub fn ivar_get(pool: &Pool, obj: Addr, sym: u16) -> Option<Value> {
        for i in 0..Self::capacity(pool, obj) {
            let sym_addr = Addr::from_raw(obj.offset() + Self::ivar_sym_offset(i) as u32);
            let slot_sym: u16 = pool.read(sym_addr);
            if slot_sym == sym {
                let value_addr = Addr::from_raw(obj.offset() + Self::ivar_value_offset(i) as u32);
                return Some(pool.read(value_addr));
            }
        }
        None
    }

    /// Write an instance variable, reusing the slot already bound to
    /// `sym` or claiming the first free (`NO_SYMBOL`) slot. Returns the
    /// value that occupied the slot before (for the caller to release),
    /// or `Value::Empty` when a fresh slot was claimed. `Err(())` when
    /// `sym` is new and every slot is already claimed by some other
    /// symbol — the object's fixed ivar capacity is exhausted.
    pub fn ivar_set(pool: &mut Pool, obj: Addr, sym: u16, value: Value) -> Result<Value, ()> {
        let capacity = Self::capacity(pool, obj);
        let mut free_slot = None;
        for i in 0..capacity {
            let sym_addr = Addr::from_raw(obj.offset() + Self::ivar_sym_offset(i) as u32);
            let slot_sym: u16 = pool.read(sym_addr);
            if slot_sym == sym {
                let value_addr = Addr::from_raw(obj.offset() + Self::ivar_value_offset(i) as u32);
                let prior = pool.read(value_addr);
                pool.write(value_addr, value);
                return Ok(prior);
            }
            if free_slot.is_none() && slot_sym == NO_SYMBOL {
                free_slot = Some(i);
            }
        }
        let Some(i) = free_slot else {
            return Err(());
        };
        let sym_addr = Addr::from_raw(obj.offset() + Self::ivar_sym_offset(i) as u32);
        let value_addr = Addr::from_raw(obj.offset() + Self::ivar_value_offset(i) as u32);
        pool.write(sym_addr, sym);
        pool.write(value_addr, value);
        Ok(Value::Empty)
    }
}
