// SPDX-License-Identifier: GPL-3.0-or-later

//! The cooperative task scheduler (component I, §5 "Concurrency &
//! Resource Model").
//!
//! "A VM runs until its `flag_preemption` is set... the dispatcher exits
//! after the current opcode, returning control to the scheduler, which
//! picks the next runnable VM round-robin." This crate is that
//! scheduler: a [`Scheduler`] trait plus [`RoundRobin`], a reference
//! implementation driving `Runtime::vm_run`'s quantum-based preemption in
//! a fixed cycle over every open VM slot.
//!
//! The scheduler runs a VM until it goes `terminal` but does not call
//! `vm_end`/`vm_close` on it — §6 "External Interfaces" gives those two
//! steps to the embedder, and a terminal-but-still-open VM is exactly
//! what lets a caller (the CLI, a test) read `Runtime::register0` before
//! its register file is torn down. Leaving a finished VM's slot occupied
//! does cost scheduling fairness under sustained load (a crowd of
//! terminal VMs nobody has closed yet still consumes a round-robin
//! slot each pass, doing no work); acceptable at this workspace's scale
//! (`MAX_VM_COUNT` in the single digits) and an explicit trade against
//! silently discarding results the embedder has not collected yet.
//!
//! The teacher workspace's own `lona-kernel` crate names this exact
//! responsibility ("scheduler, processes") but ships no source in this
//! pack, so [`RoundRobin`] is built fresh in the idiom this workspace
//! already settled on for its own small fixed-capacity trackers —
//! `tinyvm_vm::vmid::VmIdPool`'s plain struct-plus-methods shape and
//! `Runtime::open_ids`'s bool array, rather than inventing a new style.
//! `SCHEDULER_QUANTUM` (`tinyvm_abi::config`) stands in for the hardware
//! timer tick §5 assumes an external collaborator provides.

#![cfg_attr(not(feature = "std"), no_std)]

use tinyvm_abi::config::{MAX_VM_COUNT, SCHEDULER_QUANTUM};
use tinyvm_vm::{DiagnosticSink, Runtime, VmError};

/// Drives every open, not-yet-terminal VM forward, round-robin, one
/// quantum-bounded `vm_run` slice at a time.
///
/// Implementations must not starve a VM indefinitely: every open,
/// not-yet-terminal VM must eventually receive a slice. [`RoundRobin`]
/// satisfies this with strict index order, wrapping at `MAX_VM_COUNT`.
pub trait Scheduler {
    /// Run every open VM until each has either reached `terminal` or its
    /// slot has been closed by some other means. Does not call
    /// `vm_end`/`vm_close` itself (see module docs) — returns once no
    /// open VM has more work to do this pass.
    fn run_to_completion(
        &mut self,
        rt: &mut Runtime,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), VmError>;

    /// Run a single round: give each currently open, not-yet-terminal VM
    /// at most one quantum-bounded slice. Returns `true` if at least one
    /// VM slot is still open and not yet terminal afterward (i.e.
    /// another round is worth running).
    fn run_one_round(
        &mut self,
        rt: &mut Runtime,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<bool, VmError>;
}

/// Reference round-robin scheduler: a bare cursor over VM slot indices,
/// no state beyond where the last round left off. Grounded on
/// `VmIdPool`'s "lowest free id first" allocation order, generalized
/// here to "next slot after the last one served" so no single low-index
/// VM can monopolize every round.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin {
    next: u8,
    quantum: usize,
}

impl RoundRobin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: 0,
            quantum: SCHEDULER_QUANTUM,
        }
    }

    /// Build a scheduler with an explicit per-slice instruction quantum,
    /// overriding `tinyvm_abi::config::SCHEDULER_QUANTUM` (used by tests
    /// that need a VM to straddle more than one slice deliberately).
    #[must_use]
    pub const fn with_quantum(quantum: usize) -> Self {
        Self { next: 0, quantum }
    }
}

impl Scheduler for RoundRobin {
    fn run_to_completion(
        &mut self,
        rt: &mut Runtime,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), VmError> {
        loop {
            let runnable = self.run_one_round(rt, sink)?;
            if !runnable {
                return Ok(());
            }
        }
    }

    fn run_one_round(
        &mut self,
        rt: &mut Runtime,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<bool, VmError> {
        let mut runnable = false;
        for step in 0..MAX_VM_COUNT {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "MAX_VM_COUNT fits u8 per tinyvm_abi::config's own const assertion"
            )]
            let id = ((self.next as usize + step) % MAX_VM_COUNT) as u8;
            if !rt.is_open(id) || rt.is_terminal(id) {
                continue;
            }
            rt.vm_run(id, sink, Some(self.quantum))?;
            if !rt.is_terminal(id) {
                runnable = true;
            }
        }
        self.next = (self.next + 1) % MAX_VM_COUNT as u8;
        Ok(runnable)
    }
}

#[cfg(test)]
mod scheduler_test {
    use super::*;
    use tinyvm_abi::opcode;
    use tinyvm_vm::diagnostics::NullSink;

    fn one_instruction_irep(rt: &mut Runtime, word: u32) -> tinyvm_alloc::Addr {
        use tinyvm_alloc::Addr;
        use tinyvm_core::IrepHeader;

        let size = IrepHeader::alloc_size(1, 0, 0, 0);
        let addr = rt.pool.raw_alloc(size).unwrap();
        rt.pool.write(
            addr,
            IrepHeader {
                nregs: 1,
                nlocals: 0,
                _pad: 0,
                code_len: 1,
                pool_len: 0,
                sym_len: 0,
                rep_len: 0,
            },
        );
        let code_off = IrepHeader::code_offset();
        rt.pool
            .write(Addr::from_raw(addr.offset() + code_off as u32), word);
        addr
    }

    #[test]
    fn a_single_stop_vm_reaches_terminal_after_one_round_and_stays_open() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        let irep = one_instruction_irep(&mut rt, opcode::STOP as u32);
        let id = rt.vm_open().unwrap();
        rt.vm_begin(id, irep).unwrap();

        let mut scheduler = RoundRobin::new();
        let mut sink = NullSink;
        scheduler.run_to_completion(&mut rt, &mut sink).unwrap();

        assert!(rt.is_open(id));
        assert!(rt.is_terminal(id));

        rt.vm_end(id);
        rt.vm_close(id);
        assert!(!rt.is_open(id));
    }

    #[test]
    fn two_vms_both_reach_terminal_round_robin() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        let irep_a = one_instruction_irep(&mut rt, opcode::STOP as u32);
        let irep_b = one_instruction_irep(&mut rt, opcode::STOP as u32);

        let a = rt.vm_open().unwrap();
        rt.vm_begin(a, irep_a).unwrap();
        let b = rt.vm_open().unwrap();
        rt.vm_begin(b, irep_b).unwrap();

        let mut scheduler = RoundRobin::new();
        let mut sink = NullSink;
        scheduler.run_to_completion(&mut rt, &mut sink).unwrap();

        assert!(rt.is_terminal(a));
        assert!(rt.is_terminal(b));
    }

    #[test]
    fn a_tiny_quantum_still_reaches_stop_across_several_rounds() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        // MOVE R0 R0 (a harmless single-word no-op instruction) then STOP,
        // forced across two rounds by a one-instruction quantum.
        use tinyvm_alloc::Addr;
        use tinyvm_core::IrepHeader;
        let size = IrepHeader::alloc_size(2, 0, 0, 0);
        let addr = rt.pool.raw_alloc(size).unwrap();
        rt.pool.write(
            addr,
            IrepHeader {
                nregs: 1,
                nlocals: 0,
                _pad: 0,
                code_len: 2,
                pool_len: 0,
                sym_len: 0,
                rep_len: 0,
            },
        );
        let code_off = IrepHeader::code_offset();
        rt.pool.write(Addr::from_raw(addr.offset() + code_off as u32), 0u32);
        rt.pool.write(
            Addr::from_raw(addr.offset() + code_off as u32 + 4),
            opcode::STOP as u32,
        );

        let id = rt.vm_open().unwrap();
        rt.vm_begin(id, addr).unwrap();

        let mut scheduler = RoundRobin::with_quantum(1);
        let mut sink = NullSink;
        scheduler.run_to_completion(&mut rt, &mut sink).unwrap();

        assert!(rt.is_terminal(id));
    }
}
