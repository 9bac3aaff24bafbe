// SPDX-License-Identifier: GPL-3.0-or-later

//! Constants describing the IREP binary file format (see EXTERNAL
//! INTERFACES). This module only names the layout; parsing lives in
//! `tinyvm_vm::loader` because it needs an allocator to build the IREP
//! tree.
//!
//! Layout, per IREP node:
//! 1. `nregs: u8`, `nlocals: u8`
//! 2. `code_count: u32`, then that many big-endian `u32` instructions
//! 3. `pool_count: u32`, then that many literal records:
//!    `{type: u8, len: u16, bytes: [u8; len]}`
//! 4. `sym_count: u32`, then that many `{len: u16, bytes: [u8; len], NUL}`
//! 5. `rep_count: u32`, then that many child IREP nodes (recursively, same
//!    layout)

/// Literal pool entry holds a fixnum: 8 bytes, big-endian i64.
pub const LIT_FIXNUM: u8 = 0;
/// Literal pool entry holds a float: 8 bytes, big-endian f64 bit pattern.
pub const LIT_FLOAT: u8 = 1;
/// Literal pool entry holds a pre-baked string: `len` raw UTF-8 bytes.
pub const LIT_STRING: u8 = 2;

#[must_use]
pub const fn lit_type_name(t: u8) -> Option<&'static str> {
    Some(match t {
        LIT_FIXNUM => "fixnum",
        LIT_FLOAT => "float",
        LIT_STRING => "string",
        _ => return None,
    })
}
