// SPDX-License-Identifier: GPL-3.0-or-later

//! The native-method ABI (§6 "Native-method ABI") and the process-wide
//! native-method table.
//!
//! "A native method receives `(vm, register_base_for_this_call, arg_count)`
//! and sets its return value by writing to `register_base[0]`... Native
//! methods must balance refcounts." [`NativeFn`] is that exact shape,
//! generalized only by threading [`crate::runtime::Runtime`] alongside
//! the `Vm` so a native body can allocate, intern, or walk the class
//! registry. `ProcCell::payload` for a `ProcKind::Native` proc is the
//! `u16` table index, carried in an `Addr` for layout uniformity with the
//! script case (§3.4).

use crate::error::VmError;
use crate::runtime::Runtime;
use crate::vm::Vm;
use tinyvm_abi::config::MAX_NATIVE_METHODS;

/// `base` is the callee's register window: `base[0]` is the receiver (and
/// where the return value must be written, after releasing whatever was
/// there), `base[1..=argc]` are the positional arguments.
pub type NativeFn = fn(&mut Vm, &mut Runtime, base: usize, argc: u8) -> Result<(), VmError>;

pub struct NativeTable {
    fns: [Option<NativeFn>; MAX_NATIVE_METHODS],
    len: u16,
}

impl NativeTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fns: [None; MAX_NATIVE_METHODS],
            len: 0,
        }
    }

    /// Register a native function, returning its table index (stashed as
    /// a `ProcCell::payload` `Addr` by the caller). `None` once
    /// `MAX_NATIVE_METHODS` is exhausted.
    pub fn register(&mut self, f: NativeFn) -> Option<u16> {
        let idx = self.len;
        if idx as usize >= MAX_NATIVE_METHODS {
            return None;
        }
        self.fns[idx as usize] = Some(f);
        self.len += 1;
        Some(idx)
    }

    #[must_use]
    pub fn get(&self, idx: u16) -> Option<NativeFn> {
        self.fns.get(idx as usize).copied().flatten()
    }
}

impl Default for NativeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `Class#new`: allocate a fresh `OBJECT` instance of the receiver class.
/// The one native method the core bootstrap needs to exercise `SEND`
/// end-to-end (§8 scenario 5); the full built-in class library (`Array`,
/// `String`, ... methods) is an external collaborator per §1.
pub fn class_new(vm: &mut Vm, rt: &mut Runtime, base: usize, _argc: u8) -> Result<(), VmError> {
    use tinyvm_abi::config::MAX_OBJECT_IVARS;
    use tinyvm_core::heap::ObjectCell;
    use tinyvm_core::{HeapHeader, Value};

    let tinyvm_core::Value::Class(class_addr) = vm.regs[base] else {
        // Receiver was not actually a class; leave it unchanged, matching
        // §7's "missing method... leaves R(A) unchanged" treatment for a
        // malformed call (this native is only ever installed on the
        // built-in `Class` class, so this branch is defensive).
        return Ok(());
    };

    let addr = rt
        .pool
        .alloc(vm.id, ObjectCell::alloc_size(MAX_OBJECT_IVARS))
        .ok_or(VmError::OutOfMemory)?;
    rt.pool.write(
        addr,
        ObjectCell {
            header: HeapHeader::new(vm.id),
            class: class_addr,
            ivar_len: MAX_OBJECT_IVARS as u32,
        },
    );
    for i in 0..MAX_OBJECT_IVARS {
        let sym_addr =
            tinyvm_alloc::Addr::from_raw(addr.offset() + ObjectCell::ivar_sym_offset(i) as u32);
        rt.pool.write(sym_addr, tinyvm_core::NO_SYMBOL);
    }

    tinyvm_core::release(&mut rt.pool, vm.regs[base]);
    vm.regs[base] = Value::Object(addr);
    Ok(())
}

#[cfg(test)]
mod native_test {
    use super::*;

    #[test]
    fn table_hands_out_increasing_indices() {
        let mut t = NativeTable::new();
        let a = t.register(class_new).unwrap();
        let b = t.register(class_new).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert!(t.get(a).is_some());
        assert!(t.get(99).is_none());
    }
}
