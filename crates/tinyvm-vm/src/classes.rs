// SPDX-License-Identifier: GPL-3.0-or-later

//! The process-wide class registry (component F, §4.F supplement).
//!
//! The root `Object` class is created once per process, not per-VM,
//! exactly as mrubyc's `static.h`/`class.c` bootstrap `mrbc_class_object`
//! before any VM opens (confirmed in `original_source/.mrubyc/src/vm.c`).
//! Alongside `Object`, [`ClassRegistry::bootstrap`] creates one built-in
//! class per [`Tag`], so `SEND` on an immediate receiver (a `Fixnum`, a
//! `Symbol`, ...) has a class to dispatch against even though immediates
//! carry no class pointer of their own.

use tinyvm_abi::Tag;
use tinyvm_alloc::{Addr, Pool, RAW_VM_ID};
use tinyvm_core::{ClassCell, HeapHeader, SymbolTable};

pub struct ClassRegistry {
    /// One class per `Tag`, indexed by `tag as usize`. `Object` doubles as
    /// `builtins[Tag::Object as usize]` but is also reachable directly via
    /// [`Self::object`], since every user-defined class's superclass
    /// chain bottoms out there.
    builtins: [Addr; Tag::COUNT],
}

impl ClassRegistry {
    /// Intern every built-in class name and wire up the registry. Must be
    /// called exactly once per process, before any VM opens, using a
    /// `raw_alloc`-backed pool/symbol table shared by every VM.
    pub fn bootstrap(pool: &mut Pool, syms: &mut SymbolTable) -> Option<Self> {
        let object = Self::alloc_class(pool, syms, "Object", Addr::NULL)?;
        let mut builtins = [object; Tag::COUNT];

        let named = [
            (Tag::Nil, "NilClass"),
            (Tag::False, "FalseClass"),
            (Tag::True, "TrueClass"),
            (Tag::Fixnum, "Fixnum"),
            (Tag::Float, "Float"),
            (Tag::Symbol, "Symbol"),
            (Tag::Class, "Class"),
            (Tag::Proc, "Proc"),
            (Tag::Array, "Array"),
            (Tag::String, "String"),
            (Tag::Range, "Range"),
            (Tag::Hash, "Hash"),
        ];
        for (tag, name) in named {
            builtins[tag as usize] = Self::alloc_class(pool, syms, name, object)?;
        }
        // `Object` instances (user classes created via `CLASS`) carry
        // their own class pointer, so `builtins[Object]` is never
        // consulted for method lookup, but it is kept populated so
        // `class_of` never has to special-case the slot.
        builtins[Tag::Object as usize] = object;

        Some(Self { builtins })
    }

    fn alloc_class(
        pool: &mut Pool,
        syms: &mut SymbolTable,
        name: &str,
        superclass: Addr,
    ) -> Option<Addr> {
        let name_sym = syms.intern(pool, name)?;
        let addr = pool.raw_alloc(ClassCell::SIZE)?;
        pool.write(
            addr,
            ClassCell {
                header: HeapHeader::new(RAW_VM_ID),
                name_sym,
                _pad: 0,
                superclass,
                methods: Addr::NULL,
            },
        );
        Some(addr)
    }

    #[must_use]
    pub const fn object(&self) -> Addr {
        self.builtins[Tag::Object as usize]
    }

    #[must_use]
    pub fn builtin(&self, tag: Tag) -> Addr {
        self.builtins[tag as usize]
    }

    /// The class a `SEND` receiver dispatches against: the `Object` field
    /// on an `Value::Object` cell, or the shared built-in class for every
    /// other tag.
    #[must_use]
    pub fn class_of(&self, pool: &Pool, value: tinyvm_core::Value) -> Addr {
        if let tinyvm_core::Value::Object(addr) = value {
            let cell: tinyvm_core::heap::ObjectCell = pool.read(addr);
            return cell.class;
        }
        self.builtins[value.tag() as usize]
    }
}

#[cfg(test)]
mod classes_test {
    use super::*;
    use tinyvm_core::Value;

    #[test]
    fn bootstrap_gives_every_tag_a_class() {
        let mut buf = [0u8; 8192];
        let mut pool = Pool::new(&mut buf);
        let mut syms = SymbolTable::new();
        let classes = ClassRegistry::bootstrap(&mut pool, &mut syms).unwrap();

        assert!(!classes.object().is_null());
        assert!(!classes.builtin(Tag::Fixnum).is_null());
        assert_ne!(classes.builtin(Tag::Fixnum), classes.builtin(Tag::String));
    }

    #[test]
    fn class_of_fixnum_is_the_builtin_fixnum_class() {
        let mut buf = [0u8; 8192];
        let mut pool = Pool::new(&mut buf);
        let mut syms = SymbolTable::new();
        let classes = ClassRegistry::bootstrap(&mut pool, &mut syms).unwrap();

        assert_eq!(
            classes.class_of(&pool, Value::fixnum(1)),
            classes.builtin(Tag::Fixnum)
        );
    }
}
