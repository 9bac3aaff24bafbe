// SPDX-License-Identifier: GPL-3.0-or-later

//! Globals and constants (§3.7): two process-wide symbol-keyed value
//! tables. Instance variables are the third mapping named in §3.7, but
//! they live per-object on the `ObjectCell` body (component D) rather
//! than here.
//!
//! Symbol ids are dense and capacity-bounded by [`SymbolTable`]
//! (component B), so a flat `[Value; MAX_SYMBOLS_COUNT]` indexed
//! directly by id is simpler and cheaper than a hash map, and needs no
//! dynamic allocation — in keeping with this workspace's fixed,
//! pre-sized memory budget. `Value::Empty` marks an unset slot;
//! `NO_SYMBOL` (id 0) is never a valid index here since the symbol
//! table never hands it out.

use tinyvm_abi::config::MAX_SYMBOLS_COUNT;
use tinyvm_core::Value;

pub struct NameTable {
    slots: [Value; MAX_SYMBOLS_COUNT],
}

impl NameTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Value::Empty; MAX_SYMBOLS_COUNT],
        }
    }

    /// Fetch the value bound to `sym`, or `Value::Empty` if nothing has
    /// ever been stored under it.
    #[must_use]
    pub fn get(&self, sym: u16) -> Value {
        self.slots
            .get(sym as usize)
            .copied()
            .unwrap_or(Value::Empty)
    }

    #[must_use]
    pub fn is_set(&self, sym: u16) -> bool {
        !self.get(sym).is_empty()
    }

    /// Overwrite the slot for `sym`, returning whatever value it held
    /// before (so the caller can release it before the new reference
    /// obligation replaces it, per the register-slot discipline in §3.2).
    pub fn set(&mut self, sym: u16, value: Value) -> Value {
        let Some(slot) = self.slots.get_mut(sym as usize) else {
            return Value::Empty;
        };
        core::mem::replace(slot, value)
    }

    /// Clear every slot whose value is a heap reference into `vm_id`'s
    /// cells, returning them for the caller to release. Used by
    /// `vm_end` to sweep a closing VM's values out of the process-wide
    /// tables (§6 "`vm_end(vm)` clears per-vm refs from global tables").
    pub fn drain_owned_by<'a>(
        &'a mut self,
        vm_id: u8,
        owns: impl Fn(Value, u8) -> bool + 'a,
    ) -> impl Iterator<Item = Value> + 'a {
        self.slots.iter_mut().filter_map(move |slot| {
            if owns(*slot, vm_id) {
                Some(core::mem::replace(slot, Value::Empty))
            } else {
                None
            }
        })
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}
