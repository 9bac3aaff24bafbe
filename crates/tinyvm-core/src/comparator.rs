// SPDX-License-Identifier: GPL-3.0-or-later

//! The value comparator (§4.D).
//!
//! Returns `0` when equal, negative when `a < b`, positive when `a > b`.
//! Cross-type fixnum/float comparison promotes to float. `EMPTY` compares
//! equal to `NIL` — an explicit, documented quirk the distilled spec asks
//! implementations to preserve for test parity, not a bug. Any other pair
//! of unequal tags compares by tag order. Arrays, strings, and ranges
//! delegate to type-specific comparators; `OBJECT`, `PROC`, and `CLASS`
//! (no natural order) compare by handle identity.

use crate::heap::{ArrayCell, HashCell, RangeCell, StringCell};
use crate::value::Value;
use tinyvm_alloc::Pool;

#[must_use]
pub fn compare(pool: &Pool, a: &Value, b: &Value) -> i32 {
    if (a.is_empty() && b.is_nil()) || (a.is_nil() && b.is_empty()) {
        return 0;
    }

    if let (Some(x), Some(y)) = (a.as_numeric(), b.as_numeric()) {
        return partial_cmp_f64(x, y);
    }

    if a.tag() != b.tag() {
        return a.tag() as i32 - b.tag() as i32;
    }

    match (a, b) {
        (Value::Empty, Value::Empty)
        | (Value::Nil, Value::Nil)
        | (Value::False, Value::False)
        | (Value::True, Value::True) => 0,
        (Value::Symbol(x), Value::Symbol(y)) => i32::from(*x) - i32::from(*y),
        (Value::String(x), Value::String(y)) => {
            if x == y {
                return 0;
            }
            let xh: StringCell = pool.read(*x);
            let yh: StringCell = pool.read(*y);
            let xs = pool.slice(
                tinyvm_alloc::Addr::from_raw(x.offset() + StringCell::bytes_offset() as u32),
                xh.len as usize,
            );
            let ys = pool.slice(
                tinyvm_alloc::Addr::from_raw(y.offset() + StringCell::bytes_offset() as u32),
                yh.len as usize,
            );
            lexicographic(xs, ys)
        }
        (Value::Array(x), Value::Array(y)) => {
            if x == y {
                return 0;
            }
            let xh: ArrayCell = pool.read(*x);
            let yh: ArrayCell = pool.read(*y);
            let n = xh.len.min(yh.len) as usize;
            for i in 0..n {
                let xv: Value = pool.read(tinyvm_alloc::Addr::from_raw(
                    x.offset() + ArrayCell::element_offset(i) as u32,
                ));
                let yv: Value = pool.read(tinyvm_alloc::Addr::from_raw(
                    y.offset() + ArrayCell::element_offset(i) as u32,
                ));
                let c = compare(pool, &xv, &yv);
                if c != 0 {
                    return c;
                }
            }
            xh.len as i32 - yh.len as i32
        }
        (Value::Range(x), Value::Range(y)) => {
            if x == y {
                return 0;
            }
            let xh: RangeCell = pool.read(*x);
            let yh: RangeCell = pool.read(*y);
            let c = compare(pool, &xh.from, &yh.from);
            if c != 0 {
                return c;
            }
            let c = compare(pool, &xh.to, &yh.to);
            if c != 0 {
                return c;
            }
            i32::from(xh.exclusive) - i32::from(yh.exclusive)
        }
        (Value::Hash(x), Value::Hash(y)) => {
            if x == y {
                return 0;
            }
            hash_content_differs(pool, *x, *y)
        }
        // OBJECT, PROC, CLASS: no natural order, compare by handle identity.
        _ => {
            let xa = a.heap_addr().map_or(0, |v| v.offset());
            let ya = b.heap_addr().map_or(0, |v| v.offset());
            xa as i32 - ya as i32
        }
    }
}

fn lexicographic(a: &[u8], b: &[u8]) -> i32 {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return i32::from(*x) - i32::from(*y);
        }
    }
    a.len() as i32 - b.len() as i32
}

fn partial_cmp_f64(x: f64, y: f64) -> i32 {
    if x < y {
        -1
    } else if x > y {
        1
    } else {
        0
    }
}

/// Hashes have no meaningful natural order; this returns `0` only when
/// the two cells hold the same set of key/value pairs, and an arbitrary
/// non-zero value otherwise (sign carries no ordering meaning). Sufficient
/// for the `EQ` opcode, which is the only consumer in the current opcode
/// set; documented as an open design choice rather than silently
/// returning identity-only equality.
fn hash_content_differs(pool: &Pool, x: tinyvm_alloc::Addr, y: tinyvm_alloc::Addr) -> i32 {
    let xh: HashCell = pool.read(x);
    let yh: HashCell = pool.read(y);
    if xh.len != yh.len {
        return 1;
    }
    for i in 0..xh.len as usize {
        let xk: Value = pool.read(tinyvm_alloc::Addr::from_raw(
            x.offset() + HashCell::key_offset(i) as u32,
        ));
        let xv: Value = pool.read(tinyvm_alloc::Addr::from_raw(
            x.offset() + HashCell::value_offset(i) as u32,
        ));
        let mut found = false;
        for j in 0..yh.len as usize {
            let yk: Value = pool.read(tinyvm_alloc::Addr::from_raw(
                y.offset() + HashCell::key_offset(j) as u32,
            ));
            if compare(pool, &xk, &yk) == 0 {
                let yv: Value = pool.read(tinyvm_alloc::Addr::from_raw(
                    y.offset() + HashCell::value_offset(j) as u32,
                ));
                if compare(pool, &xv, &yv) == 0 {
                    found = true;
                }
                break;
            }
        }
        if !found {
            return 1;
        }
    }
    0
}
