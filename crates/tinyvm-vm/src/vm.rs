// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-task VM state: the register file (§3.6), the call-info stack
//! (§3.5, component G), and the handful of single-bit/single-pointer
//! fields the dispatcher reads every iteration (`pc`, `pc_irep`, the
//! active register-window base, `target_class`, `flag_preemption`).
//!
//! Grounded on the teacher's `process/mod.rs::Process`: a flat
//! `#[repr(C)]` struct owning fixed-size arrays rather than `Vec`s, with
//! `const fn` constructors and plain field access (no getter/setter
//! ceremony) for the hot fields the dispatcher touches every instruction.
//! Per the Call-info-stack design note in spec.md §9, call frames are an
//! explicit fixed-capacity array here, not the teacher's pattern
//! (`process/mod.rs` already uses an array too; mrubyc's own `vm.c` is the
//! one using individually-allocated linked frames this note steers away
//! from) plus a length cursor.

use tinyvm_abi::config::{MAX_CALL_DEPTH, MAX_REGS_SIZE};
use tinyvm_alloc::Addr;
use tinyvm_core::Value;

/// A saved caller frame (§3.5). Pushed on `SEND`/`CALL` into a script
/// proc, popped on `RETURN`.
#[derive(Clone, Copy)]
pub struct CallInfo {
    /// Caller's `pc`, resumed on return.
    pub return_ip: usize,
    /// Caller's executing IREP.
    pub return_irep: Addr,
    /// Caller's active register-window base, restored on return.
    pub return_base: usize,
    /// Caller's `target_class`, restored on return.
    pub return_target_class: Addr,
    /// Caller's `defining_class` (the class whose method was executing
    /// before this call), restored on return so a nested `SUPER` resumes
    /// search from the right ancestor once this frame pops.
    pub return_defining_class: Addr,
    /// The method symbol this call invoked (used by `SUPER` to resume the
    /// search one class up from where this lookup started).
    pub called_method: u16,
    pub arg_count: u8,
}

impl CallInfo {
    const EMPTY: Self = Self {
        return_ip: 0,
        return_irep: Addr::NULL,
        return_base: 0,
        return_target_class: Addr::NULL,
        return_defining_class: Addr::NULL,
        called_method: 0,
        arg_count: 0,
    };
}

/// Per-VM execution state. Process-wide state (the pool, symbol table,
/// class registry, globals/constants) lives in [`crate::runtime::Runtime`]
/// instead, mirroring the teacher's `Process`/`Realm` split.
pub struct Vm {
    pub id: u8,
    /// Instruction offset into `irep`'s code array.
    pub pc: usize,
    /// The IREP currently executing (`pc_irep` in spec terms).
    pub irep: Addr,
    /// Offset of `R(0)` within `regs` for the currently active call
    /// window (§3.6: "a call... shifts the active base pointer forward").
    pub base: usize,
    /// The class receiving new method definitions emitted while executing
    /// a class body (§3.4 "target class").
    pub target_class: Addr,
    /// The class on which the currently-executing method was found.
    /// Distinct from `target_class` (which only matters inside a class
    /// body): this is what `SUPER` walks one step past. Not named
    /// explicitly in the distilled §3.5 call-info frame fields, but
    /// required to implement `SUPER` at all; threaded through
    /// `CallInfo::return_defining_class` exactly like `target_class` is.
    pub defining_class: Addr,
    pub regs: [Value; MAX_REGS_SIZE],
    pub call_stack: [CallInfo; MAX_CALL_DEPTH],
    pub call_len: usize,
    /// Set by `STOP`/`ABORT` or a scheduler tick; checked once after every
    /// opcode (§5 "Suspension points").
    pub flag_preemption: bool,
    /// Set only by `STOP`/`ABORT`: the VM has finished and should be
    /// `vm_close`d rather than resumed on the next scheduler slice. A
    /// preempted-but-still-runnable VM leaves this `false`.
    pub terminal: bool,
}

impl Vm {
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self {
            id,
            pc: 0,
            irep: Addr::NULL,
            base: 0,
            target_class: Addr::NULL,
            defining_class: Addr::NULL,
            regs: [Value::Empty; MAX_REGS_SIZE],
            call_stack: [CallInfo::EMPTY; MAX_CALL_DEPTH],
            call_len: 0,
            flag_preemption: false,
            terminal: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn reg(&self, n: usize) -> Value {
        self.regs[self.base + n]
    }

    /// Write `value` into `R(n)`, releasing whatever was there first
    /// (§3.2: "assignment to a register must first release its prior
    /// content").
    pub fn set_reg(&mut self, pool: &mut tinyvm_alloc::Pool, n: usize, value: Value) {
        let slot = self.base + n;
        tinyvm_core::release(pool, self.regs[slot]);
        self.regs[slot] = value;
    }

    /// Take ownership of `R(n)`'s value, leaving `EMPTY` behind without
    /// releasing it — used where the caller is about to move the value
    /// elsewhere rather than discard it (`RETURN`, `ARRAY`/`HASH`
    /// construction).
    pub fn take_reg(&mut self, n: usize) -> Value {
        core::mem::replace(&mut self.regs[self.base + n], Value::Empty)
    }

    pub fn push_call(&mut self, frame: CallInfo) -> Result<(), crate::error::VmError> {
        if self.call_len >= MAX_CALL_DEPTH {
            return Err(crate::error::VmError::CallStackOverflow);
        }
        self.call_stack[self.call_len] = frame;
        self.call_len += 1;
        Ok(())
    }

    pub fn pop_call(&mut self) -> Option<CallInfo> {
        if self.call_len == 0 {
            return None;
        }
        self.call_len -= 1;
        Some(self.call_stack[self.call_len])
    }
}
