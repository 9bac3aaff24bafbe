// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide state shared by every VM instance, and the `vm_open` /
//! `vm_begin` / `vm_run` / `vm_end` / `vm_close` lifecycle from §6
//! "External Interfaces".
//!
//! Grounded on the teacher's `Realm` (process-wide class/namespace
//! registries shared across `Process`es) for the shared-state split, and
//! on `bin/lona-vm.rs`'s boot sequence (pool → realm → process → run) for
//! the lifecycle shape, with the seL4/TCB bring-up this workspace treats
//! as an external collaborator stripped out.

use crate::classes::ClassRegistry;
use crate::diagnostics::DiagnosticSink;
use crate::dispatch;
use crate::error::VmError;
use crate::native::{self, NativeTable};
use crate::table::NameTable;
use crate::vm::Vm;
use crate::vmid::VmIdPool;
use tinyvm_abi::config::{MAX_SYMBOLS_COUNT, MAX_VM_COUNT};
use tinyvm_alloc::{Addr, Pool};
use tinyvm_core::{HeapHeader, SymbolTable, Value};

pub struct Runtime<'a> {
    pub pool: Pool<'a>,
    pub syms: SymbolTable,
    pub classes: ClassRegistry,
    pub globals: NameTable,
    pub consts: NameTable,
    pub natives: NativeTable,
    vmids: VmIdPool,
    vms: [Option<Vm>; MAX_VM_COUNT],
}

impl<'a> Runtime<'a> {
    /// Build a fresh process: bootstraps the symbol table, class
    /// registry, and the one native method (`Class#new`) the core needs
    /// to exercise `SEND` end to end. `None` if `buf` is too small even
    /// for the bootstrap allocations.
    pub fn new(buf: &'a mut [u8]) -> Option<Self> {
        let mut pool = Pool::new(buf);
        let mut syms = SymbolTable::new();
        let classes = ClassRegistry::bootstrap(&mut pool, &mut syms)?;
        let mut natives = NativeTable::new();
        let class_new_id = natives.register(native::class_new)?;

        let new_sym = syms.intern(&mut pool, "new")?;
        let new_proc_addr = pool.raw_alloc(tinyvm_core::ProcCell::SIZE)?;
        pool.write(
            new_proc_addr,
            tinyvm_core::ProcCell {
                header: HeapHeader::new(tinyvm_alloc::RAW_VM_ID),
                method_sym: new_sym,
                kind: tinyvm_core::ProcKind::Native as u8,
                _pad: 0,
                link: Addr::NULL,
                payload: Addr::from_raw(u32::from(class_new_id)),
            },
        );
        tinyvm_core::class::attach_method(
            &mut pool,
            classes.builtin(tinyvm_abi::Tag::Class),
            new_sym,
            new_proc_addr,
        );

        Some(Self {
            pool,
            syms,
            classes,
            globals: NameTable::new(),
            consts: NameTable::new(),
            natives,
            vmids: VmIdPool::new(),
            vms: [const { None }; MAX_VM_COUNT],
        })
    }

    /// `vm_open`: allocate a VM id and install a fresh, not-yet-started
    /// `Vm` in its slot.
    pub fn vm_open(&mut self) -> Result<u8, VmError> {
        let id = self.vmids.alloc().ok_or(VmError::NoFreeVmSlot)?;
        self.vms[id as usize] = Some(Vm::new(id));
        Ok(id)
    }

    /// `vm_begin`: point the instruction pointer at `root_irep` and seed
    /// `R(0)` with the root `Object` class as self (§6).
    pub fn vm_begin(&mut self, id: u8, root_irep: Addr) -> Result<(), VmError> {
        let object = self.classes.object();
        let vm = self.vm_mut(id)?;
        vm.pc = 0;
        vm.irep = root_irep;
        vm.base = 0;
        vm.target_class = object;
        vm.regs[0] = Value::Class(object);
        Ok(())
    }

    /// `vm_run`: dispatch until `flag_preemption` is set, either by
    /// `STOP`/`ABORT` or by `quantum` instructions having executed (the
    /// host-simulated scheduler tick — see
    /// `tinyvm_abi::config::SCHEDULER_QUANTUM`).
    pub fn vm_run(
        &mut self,
        id: u8,
        sink: &mut dyn DiagnosticSink,
        quantum: Option<usize>,
    ) -> Result<(), VmError> {
        let mut vm = self.vms[id as usize].take().ok_or(VmError::NoFreeVmSlot)?;
        vm.flag_preemption = false;
        let result = dispatch::run(&mut vm, self, sink, quantum);
        self.vms[id as usize] = Some(vm);
        result
    }

    #[must_use]
    pub fn is_terminal(&self, id: u8) -> bool {
        self.vms[id as usize].as_ref().is_some_and(|vm| vm.terminal)
    }

    #[must_use]
    pub fn is_open(&self, id: u8) -> bool {
        self.vms[id as usize].is_some()
    }

    /// `vm_end`: sweep this VM's values out of the process-wide globals
    /// and constants tables (§6: "clears per-vm refs from global tables").
    pub fn vm_end(&mut self, id: u8) {
        sweep_table(&mut self.pool, &mut self.globals, id);
        sweep_table(&mut self.pool, &mut self.consts, id);
    }

    /// `vm_close`: reclaim this VM's id slot, release its IREP tree and
    /// every heap cell it owns, and drop its execution state.
    pub fn vm_close(&mut self, id: u8) {
        self.pool.free_all(id);
        self.vmids.free(id);
        self.vms[id as usize] = None;
    }

    fn vm_mut(&mut self, id: u8) -> Result<&mut Vm, VmError> {
        self.vms[id as usize].as_mut().ok_or(VmError::NoFreeVmSlot)
    }

    pub(crate) fn vm_ref(&self, id: u8) -> Option<&Vm> {
        self.vms[id as usize].as_ref()
    }

    /// Read a VM's `R(0)` without taking it out of its slot — lets a caller
    /// (the CLI, a test) observe a just-finished VM's result before
    /// `vm_end`/`vm_close` discard its state.
    #[must_use]
    pub fn register0(&self, id: u8) -> Option<Value> {
        self.vm_ref(id).map(|vm| vm.reg(0))
    }

    /// One bit per VM slot: whether it currently holds an open `Vm`.
    /// Exposed for a scheduler to enumerate candidates for its next
    /// round-robin slice.
    #[must_use]
    pub fn open_ids(&self) -> [bool; MAX_VM_COUNT] {
        let mut out = [false; MAX_VM_COUNT];
        for (i, slot) in self.vms.iter().enumerate() {
            out[i] = slot.is_some();
        }
        out
    }
}

/// Release every value in `table` whose heap cell is tagged with `id`,
/// leaving those slots `EMPTY`.
fn sweep_table(pool: &mut Pool, table: &mut NameTable, id: u8) {
    for sym in 0..MAX_SYMBOLS_COUNT as u16 {
        let value = table.get(sym);
        let Some(addr) = value.heap_addr() else {
            continue;
        };
        let header: HeapHeader = pool.read(addr);
        if header.vm_id == id {
            table.set(sym, Value::Empty);
            tinyvm_core::release(pool, value);
        }
    }
}

#[cfg(test)]
mod runtime_test {
    use super::*;
    use crate::diagnostics::NullSink;

    #[test]
    fn bootstrap_and_open_close_round_trips() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        let id = rt.vm_open().unwrap();
        assert!(rt.is_open(id));
        rt.vm_close(id);
        assert!(!rt.is_open(id));
    }

    #[test]
    fn vm_begin_seeds_self_with_root_object_class() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        let id = rt.vm_open().unwrap();
        rt.vm_begin(id, Addr::NULL).unwrap();
        assert_eq!(rt.vm_ref(id).unwrap().reg(0), Value::Class(rt.classes.object()));
    }

    #[test]
    fn vm_end_sweeps_only_matching_vm_globals() {
        let mut buf = vec![0u8; 32 * 1024];
        let mut rt = Runtime::new(&mut buf).unwrap();
        let id = rt.vm_open().unwrap();
        let addr = rt
            .pool
            .alloc(id, tinyvm_core::heap::StringCell::alloc_size(0))
            .unwrap();
        rt.pool.write(
            addr,
            tinyvm_core::heap::StringCell {
                header: HeapHeader::new(id),
                len: 0,
            },
        );
        rt.globals.set(1, Value::String(addr));
        rt.vm_end(id);
        assert!(rt.globals.get(1).is_empty());
    }

    #[test]
    fn null_sink_is_usable_by_value() {
        let mut sink = NullSink;
        sink.report("unused");
    }
}
