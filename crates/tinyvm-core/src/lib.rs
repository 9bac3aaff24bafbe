// SPDX-License-Identifier: GPL-3.0-or-later

//! The tinyvm data model: tagged values, heap cell layouts (component D),
//! the IREP record (component E), class/method tables (component F), and
//! the value comparator (§4.D).
//!
//! `no_std`, no `alloc`: every variable-length structure here lives inside
//! a caller-supplied [`tinyvm_alloc::Pool`] rather than behind a `Vec` or
//! `Box`, in keeping with the fixed, pre-sized memory budget named in the
//! purpose statement. This mirrors the teacher workspace's own
//! `#[repr(C)]` header-plus-trailing-data idiom (`value/heap.rs`,
//! `value/function.rs`), generalized with a shared reference-count header
//! the teacher's bump-only allocator never needed.

#![no_std]

pub mod class;
pub mod comparator;
pub mod heap;
pub mod irep;
pub mod refcount;
pub mod symtab;
pub mod value;

pub use class::{ClassCell, ProcCell, ProcKind};
pub use comparator::compare;
pub use heap::HeapHeader;
pub use irep::{IrepHeader, IrepView};
pub use refcount::{incref, release};
pub use symtab::{SymbolTable, NO_SYMBOL};
pub use value::Value;
