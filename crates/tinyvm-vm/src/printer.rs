// SPDX-License-Identifier: GPL-3.0-or-later

//! Value-to-string rendering, used by `STRCAT`'s implicit `to_s` (§4.C.3)
//! and available to a host embedder for printing a VM's final result.
//!
//! Grounded on the teacher's `value/printer.rs`: a recursive value walker
//! that writes straight to an output sink rather than building an
//! intermediate `String`. That teacher module writes to a `Uart`; this one
//! writes to `core::fmt::Write` instead, since this workspace already
//! built [`crate::diagnostics::MessageBuf`] as its no-allocator formatting
//! target. Two rendering modes are kept distinct exactly as Ruby's own
//! `to_s`/`inspect` split: the top-level call ([`write_to_s`]) renders a
//! `String` value as its own bytes, but a `String` nested inside an
//! `Array`/`Hash` is quoted and escaped, matching `Array#to_s` delegating
//! to `Array#inspect` for its elements.

use tinyvm_alloc::{Addr, Pool};
use tinyvm_core::heap::{ArrayCell, HashCell, ObjectCell, RangeCell, StringCell};
use tinyvm_core::{ClassCell, SymbolTable, Value};
use core::fmt::{self, Write};

/// Render `value` the way `to_s` would: a bare `String` prints its raw
/// bytes, unquoted.
pub fn write_to_s(pool: &Pool, syms: &SymbolTable, value: Value, out: &mut dyn Write) -> fmt::Result {
    if let Value::String(addr) = value {
        return write_string_raw(pool, addr, out);
    }
    write_inspect(pool, syms, value, out)
}

/// Render `value` the way `inspect` would: a `String` is quoted and
/// escaped, every other tag renders the same as [`write_to_s`].
fn write_inspect(pool: &Pool, syms: &SymbolTable, value: Value, out: &mut dyn Write) -> fmt::Result {
    match value {
        Value::Empty => Ok(()),
        Value::Nil => Ok(()),
        Value::False => out.write_str("false"),
        Value::True => out.write_str("true"),
        Value::Fixnum(n) => write!(out, "{n}"),
        Value::Float(f) => write!(out, "{f}"),
        Value::Symbol(id) => write_symbol_name(syms, pool, id, out),
        Value::Class(addr) => write_class(pool, syms, addr, out),
        Value::Object(addr) => write_object(pool, syms, addr, out),
        Value::Proc(_) => out.write_str("#<Proc>"),
        Value::Array(addr) => write_array(pool, syms, addr, out),
        Value::String(addr) => write_string_quoted(pool, addr, out),
        Value::Range(addr) => write_range(pool, syms, addr, out),
        Value::Hash(addr) => write_hash(pool, syms, addr, out),
    }
}

fn write_symbol_name(syms: &SymbolTable, pool: &Pool, id: u16, out: &mut dyn Write) -> fmt::Result {
    match syms.name_of(pool, id) {
        Some(name) => out.write_str(name),
        None => write!(out, ":sym#{id}"),
    }
}

fn write_class(pool: &Pool, syms: &SymbolTable, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    let cell: ClassCell = pool.read(addr);
    write_symbol_name(syms, pool, cell.name_sym, out)
}

fn write_object(pool: &Pool, syms: &SymbolTable, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    let cell: ObjectCell = pool.read(addr);
    out.write_str("#<")?;
    write_class(pool, syms, cell.class, out)?;
    out.write_char('>')
}

fn write_array(pool: &Pool, syms: &SymbolTable, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    let cell: ArrayCell = pool.read(addr);
    out.write_char('[')?;
    for i in 0..cell.len as usize {
        if i > 0 {
            out.write_str(", ")?;
        }
        let off = Addr::from_raw(addr.offset() + ArrayCell::element_offset(i) as u32);
        let elem: Value = pool.read(off);
        write_inspect(pool, syms, elem, out)?;
    }
    out.write_char(']')
}

fn write_hash(pool: &Pool, syms: &SymbolTable, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    let cell: HashCell = pool.read(addr);
    out.write_char('{')?;
    for i in 0..cell.len as usize {
        if i > 0 {
            out.write_str(", ")?;
        }
        let key_off = Addr::from_raw(addr.offset() + HashCell::key_offset(i) as u32);
        let value_off = Addr::from_raw(addr.offset() + HashCell::value_offset(i) as u32);
        let key: Value = pool.read(key_off);
        let val: Value = pool.read(value_off);
        write_inspect(pool, syms, key, out)?;
        out.write_str(" => ")?;
        write_inspect(pool, syms, val, out)?;
    }
    out.write_char('}')
}

fn write_range(pool: &Pool, syms: &SymbolTable, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    let cell: RangeCell = pool.read(addr);
    write_inspect(pool, syms, cell.from, out)?;
    out.write_str(if cell.exclusive { "..." } else { ".." })?;
    write_inspect(pool, syms, cell.to, out)
}

fn write_string_raw(pool: &Pool, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    out.write_str(string_bytes_as_str(pool, addr))
}

fn write_string_quoted(pool: &Pool, addr: Addr, out: &mut dyn Write) -> fmt::Result {
    out.write_char('"')?;
    for c in string_bytes_as_str(pool, addr).chars() {
        match c {
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            '\\' => out.write_str("\\\\")?,
            '"' => out.write_str("\\\"")?,
            c if c.is_ascii_control() => {
                out.write_str("\\x")?;
                let b = c as u8;
                out.write_char(hex_digit(b >> 4))?;
                out.write_char(hex_digit(b & 0xF))?;
            }
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn string_bytes_as_str(pool: &Pool, addr: Addr) -> &str {
    let cell: StringCell = pool.read(addr);
    let bytes_addr = Addr::from_raw(addr.offset() + StringCell::bytes_offset() as u32);
    core::str::from_utf8(pool.slice(bytes_addr, cell.len as usize)).unwrap_or("")
}

const fn hex_digit(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        _ => (b'a' + (n - 10)) as char,
    }
}

#[cfg(test)]
mod printer_test {
    use super::*;
    use tinyvm_alloc::RAW_VM_ID;
    use tinyvm_core::HeapHeader;

    fn alloc_string(pool: &mut Pool, s: &str) -> Addr {
        let addr = pool.alloc(RAW_VM_ID, StringCell::alloc_size(s.len())).unwrap();
        pool.write(
            addr,
            StringCell {
                header: HeapHeader::new(RAW_VM_ID),
                len: s.len() as u32,
            },
        );
        let bytes_addr = Addr::from_raw(addr.offset() + StringCell::bytes_offset() as u32);
        pool.slice_mut(bytes_addr, s.len()).copy_from_slice(s.as_bytes());
        addr
    }

    #[test]
    fn to_s_renders_fixnum_as_decimal() {
        let mut buf = [0u8; 1024];
        let mut pool = Pool::new(&mut buf);
        let syms = SymbolTable::new();
        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_to_s(&pool, &syms, Value::fixnum(42), &mut out).unwrap();
        assert_eq!(out.as_str(), "42");
    }

    #[test]
    fn to_s_renders_string_unquoted_but_inspect_quotes_it() {
        let mut buf = [0u8; 1024];
        let mut pool = Pool::new(&mut buf);
        let syms = SymbolTable::new();
        let addr = alloc_string(&mut pool, "hi");

        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_to_s(&pool, &syms, Value::String(addr), &mut out).unwrap();
        assert_eq!(out.as_str(), "hi");

        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_inspect(&pool, &syms, Value::String(addr), &mut out).unwrap();
        assert_eq!(out.as_str(), "\"hi\"");
    }

    #[test]
    fn array_of_strings_renders_inspected_elements() {
        let mut buf = [0u8; 1024];
        let mut pool = Pool::new(&mut buf);
        let syms = SymbolTable::new();
        let a = alloc_string(&mut pool, "a");
        let array_addr = pool.alloc(RAW_VM_ID, ArrayCell::alloc_size(1)).unwrap();
        pool.write(
            array_addr,
            ArrayCell {
                header: HeapHeader::new(RAW_VM_ID),
                len: 1,
            },
        );
        let off = Addr::from_raw(array_addr.offset() + ArrayCell::element_offset(0) as u32);
        pool.write(off, Value::String(a));

        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_to_s(&pool, &syms, Value::Array(array_addr), &mut out).unwrap();
        assert_eq!(out.as_str(), "[\"a\"]");
    }

    #[test]
    fn nil_and_false_render_as_mrubyc_to_s_would() {
        let mut buf = [0u8; 1024];
        let pool = Pool::new(&mut buf);
        let syms = SymbolTable::new();

        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_to_s(&pool, &syms, Value::nil(), &mut out).unwrap();
        assert_eq!(out.as_str(), "");

        let mut out: crate::diagnostics::MessageBuf<16> = crate::diagnostics::MessageBuf::new();
        write_to_s(&pool, &syms, Value::bool(false), &mut out).unwrap();
        assert_eq!(out.as_str(), "false");
    }
}
