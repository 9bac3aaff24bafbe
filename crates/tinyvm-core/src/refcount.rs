// SPDX-License-Identifier: GPL-3.0-or-later

//! Reference-count bookkeeping over [`Value`] (§3.2).
//!
//! Every heap-tagged `Value` owns one reference to its cell. [`incref`] is
//! called whenever a value is duplicated into a second slot (`MOVE`,
//! `LOADL`, array/hash reads, ...); [`release`] is called whenever a slot
//! is about to be overwritten or discarded. `release` recurses into a
//! cell's contents only once its own count reaches zero, matching §3.2's
//! "triggers the type-specific destructor, which recursively releases
//! contained values". Class/proc method-list links are not `Value`s and
//! are never traversed here — only the `HeapHeader` count on the `Class`/
//! `Proc` cell itself is honoured, per the invariant in §3.2 that a cell's
//! refcount equals the number of *values* that name it.

use crate::heap::{ArrayCell, HashCell, HeapHeader, ObjectCell, RangeCell};
use crate::symtab::NO_SYMBOL;
use crate::value::Value;
use tinyvm_alloc::{Addr, Pool};

/// Bump a heap-tagged value's refcount. A no-op for immediates.
pub fn incref(pool: &mut Pool, v: Value) {
    let Some(addr) = v.heap_addr() else { return };
    let mut header: HeapHeader = pool.read(addr);
    header.incref();
    pool.write(addr, header);
}

/// Drop one reference to `v`. Once the count reaches zero, releases every
/// `Value` the cell owns and returns the block to the allocator. A no-op
/// for immediates (including `EMPTY` and `NIL`).
pub fn release(pool: &mut Pool, v: Value) {
    let Some(addr) = v.heap_addr() else { return };
    let mut header: HeapHeader = pool.read(addr);
    if !header.decref() {
        pool.write(addr, header);
        return;
    }

    match v {
        Value::String(_) => {}
        Value::Array(a) => {
            let cell: ArrayCell = pool.read(a);
            for i in 0..cell.len as usize {
                let elem: Value = pool.read(Addr::from_raw(a.offset() + ArrayCell::element_offset(i) as u32));
                release(pool, elem);
            }
        }
        Value::Hash(a) => {
            let cell: HashCell = pool.read(a);
            for i in 0..cell.len as usize {
                let key: Value = pool.read(Addr::from_raw(a.offset() + HashCell::key_offset(i) as u32));
                let val: Value = pool.read(Addr::from_raw(a.offset() + HashCell::value_offset(i) as u32));
                release(pool, key);
                release(pool, val);
            }
        }
        Value::Range(a) => {
            let cell: RangeCell = pool.read(a);
            release(pool, cell.from);
            release(pool, cell.to);
        }
        Value::Object(a) => {
            let cell: ObjectCell = pool.read(a);
            for i in 0..cell.ivar_len as usize {
                let sym_addr = Addr::from_raw(a.offset() + ObjectCell::ivar_sym_offset(i) as u32);
                let sym: u16 = pool.read(sym_addr);
                if sym != NO_SYMBOL {
                    let value_addr = Addr::from_raw(a.offset() + ObjectCell::ivar_value_offset(i) as u32);
                    let val: Value = pool.read(value_addr);
                    release(pool, val);
                }
            }
        }
        // Proc: `payload` addresses either a native-table index or an
        // IREP node, neither of which is a `Value`. Class: method-list
        // links are not `Value`s either. Nothing further to release.
        Value::Proc(_) | Value::Class(_) => {}
        _ => {}
    }

    pool.free(addr);
}

#[cfg(test)]
mod refcount_test {
    use super::*;
    use crate::heap::HeapHeader as Header;

    #[test]
    fn incref_then_double_release_frees_exactly_once() {
        let mut buf = [0u8; 4096];
        let mut pool = Pool::new(&mut buf);
        let addr = pool
            .alloc(0, crate::heap::StringCell::alloc_size(0))
            .unwrap();
        pool.write(
            addr,
            crate::heap::StringCell {
                header: Header::new(0),
                len: 0,
            },
        );
        let v = Value::String(addr);
        incref(&mut pool, v); // refcount now 2
        release(&mut pool, v); // back to 1, cell still alive
        assert!(pool.statistics().used > 0);
        release(&mut pool, v); // refcount 0, cell freed
        assert_eq!(pool.statistics().used, 0);
    }

    #[test]
    fn releasing_an_array_releases_its_elements() {
        let mut buf = [0u8; 4096];
        let mut pool = Pool::new(&mut buf);
        let inner = pool
            .alloc(0, crate::heap::StringCell::alloc_size(0))
            .unwrap();
        pool.write(
            inner,
            crate::heap::StringCell {
                header: Header::new(0),
                len: 0,
            },
        );
        let arr = pool.alloc(0, ArrayCell::alloc_size(1)).unwrap();
        pool.write(
            arr,
            ArrayCell {
                header: Header::new(0),
                len: 1,
            },
        );
        pool.write(
            Addr::from_raw(arr.offset() + ArrayCell::element_offset(0) as u32),
            Value::String(inner),
        );

        release(&mut pool, Value::Array(arr));
        assert_eq!(pool.statistics().used, 0);
    }

    #[test]
    fn immediates_are_a_no_op() {
        let mut buf = [0u8; 16];
        let mut pool = Pool::new(&mut buf);
        incref(&mut pool, Value::fixnum(1));
        release(&mut pool, Value::nil());
    }
}
