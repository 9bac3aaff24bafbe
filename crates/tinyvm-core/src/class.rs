// SPDX-License-Identifier: GPL-3.0-or-later

//! Class and method tables (component F, §3.4).
//!
//! A class has a name symbol, a nullable superclass pointer (null only
//! for the root `Object`), and the head of a singly-linked list of procs.
//! A proc carries the method symbol it is attached under, a
//! native/script discriminant, and the link to the next proc in its
//! class's method list. Procs are themselves first-class `Value`s
//! (`Value::Proc`), so a `LAMBDA` result and an entry in a method list
//! are the same heap cell shape.

use crate::heap::HeapHeader;
use tinyvm_alloc::{Addr, Pool};

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClassCell {
    pub header: HeapHeader,
    pub name_sym: u16,
    pub _pad: u16,
    /// `Addr::NULL` only for the root `Object`.
    pub superclass: Addr,
    /// Head of the singly-linked `ProcCell` method list.
    pub methods: Addr,
}

impl ClassCell {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ProcKind {
    Native = 0,
    Script = 1,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcCell {
    pub header: HeapHeader,
    pub method_sym: u16,
    pub kind: u8,
    pub _pad: u8,
    /// Next proc in the owning class's method list, or `Addr::NULL`.
    pub link: Addr,
    /// `ProcKind::Native`: index into the native-method table.
    /// `ProcKind::Script`: address of the `IrepHeader` this proc runs.
    pub payload: Addr,
}

impl ProcCell {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    #[must_use]
    pub const fn kind(&self) -> ProcKind {
        if self.kind == ProcKind::Native as u8 {
            ProcKind::Native
        } else {
            ProcKind::Script
        }
    }
}

/// Look up `method_sym` on `class_addr`'s class, walking the superclass
/// chain, and also return the address of the class that actually owns
/// the method (the ancestor it was found on, not `class_addr` itself).
/// `SUPER` needs the owner to resume the search one step further up the
/// chain than where the current method was found; `SEND` only needs the
/// proc address and discards the owner.
#[must_use]
pub fn find_method_owner(pool: &Pool, class_addr: Addr, method_sym: u16) -> Option<(Addr, Addr)> {
    let mut cur = class_addr;
    loop {
        if cur.is_null() {
            return None;
        }
        let class: ClassCell = pool.read(cur);
        let mut proc_addr = class.methods;
        while !proc_addr.is_null() {
            let p: ProcCell = pool.read(proc_addr);
            if p.method_sym == method_sym {
                return Some((proc_addr, cur));
            }
            proc_addr = p.link;
        }
        cur = class.superclass;
    }
}

/// Attach `proc_addr` to `class_addr` under `method_sym`. If a method
/// with that symbol already exists on this exact class (not an ancestor),
/// it is unlinked from the list and its address returned so the caller
/// can release it (preventing duplicate definitions from accumulating).
pub fn attach_method(
    pool: &mut Pool,
    class_addr: Addr,
    method_sym: u16,
    proc_addr: Addr,
) -> Option<Addr> {
    let mut class: ClassCell = pool.read(class_addr);

    let mut displaced = None;
    let mut prev: Option<Addr> = None;
    let mut cur = class.methods;
    while !cur.is_null() {
        let p: ProcCell = pool.read(cur);
        if p.method_sym == method_sym {
            displaced = Some(cur);
            match prev {
                Some(prev_addr) => {
                    let mut prev_proc: ProcCell = pool.read(prev_addr);
                    prev_proc.link = p.link;
                    pool.write(prev_addr, prev_proc);
                }
                None => class.methods = p.link,
            }
            break;
        }
        prev = Some(cur);
        cur = p.link;
    }

    let mut new_proc: ProcCell = pool.read(proc_addr);
    new_proc.link = class.methods;
    new_proc.method_sym = method_sym;
    pool.write(proc_addr, new_proc);
    class.methods = proc_addr;
    pool.write(class_addr, class);

    displaced
}
