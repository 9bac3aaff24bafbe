// SPDX-License-Identifier: GPL-3.0-or-later

//! The value tag and its total order.
//!
//! Variants are declared in the exact order the derived `PartialOrd`/`Ord`
//! must honour:
//!
//! `EMPTY < NIL < FALSE < TRUE < FIXNUM < FLOAT < SYMBOL < CLASS < OBJECT
//! < PROC < ARRAY < STRING < RANGE < HASH`
//!
//! Do not reorder these variants; truthiness, the cross-tag comparator
//! fallback, and any persisted bytecode all depend on this exact ordering
//! and on the discriminant values matching array position.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    /// An uninitialised register slot. Must never be observed by script code.
    Empty = 0,
    Nil = 1,
    False = 2,
    True = 3,
    Fixnum = 4,
    Float = 5,
    Symbol = 6,
    Class = 7,
    Object = 8,
    Proc = 9,
    Array = 10,
    String = 11,
    Range = 12,
    Hash = 13,
}

impl Tag {
    pub const COUNT: usize = 14;

    /// `tag > FALSE` is truthy; `NIL` and `FALSE` are falsy.
    #[inline]
    #[must_use]
    pub const fn is_truthy(self) -> bool {
        (self as u8) > (Self::False as u8)
    }

    /// Whether this tag's payload is an owning reference into the heap
    /// (as opposed to an immediate value carried directly in the payload
    /// word).
    #[inline]
    #[must_use]
    pub const fn is_heap(self) -> bool {
        matches!(
            self,
            Self::Class | Self::Object | Self::Proc | Self::Array | Self::String | Self::Range
                | Self::Hash
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Nil => "NilClass",
            Self::False => "FalseClass",
            Self::True => "TrueClass",
            Self::Fixnum => "Fixnum",
            Self::Float => "Float",
            Self::Symbol => "Symbol",
            Self::Class => "Class",
            Self::Object => "Object",
            Self::Proc => "Proc",
            Self::Array => "Array",
            Self::String => "String",
            Self::Range => "Range",
            Self::Hash => "Hash",
        }
    }
}
