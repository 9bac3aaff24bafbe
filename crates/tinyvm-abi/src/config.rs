// SPDX-License-Identifier: GPL-3.0-or-later

//! Compile-time configuration knobs.
//!
//! Defaults mirror the mruby/c reference configuration header this system
//! is derived from (`vm_config.h`): five concurrent VMs, a 100-slot
//! register file, a 300-entry symbol table, float support on, the
//! `MRBC_USE_MATH` extension off, big-endian bytecode, and debug method
//! names on.

/// Maximum number of concurrently open VM instances. Bounds the vm-id
/// bitmap. Must be `<= 1024`.
pub const MAX_VM_COUNT: usize = 5;

/// Number of slots in a VM's flat register file.
pub const MAX_REGS_SIZE: usize = 100;

/// Capacity of the process-wide symbol table.
pub const MAX_SYMBOLS_COUNT: usize = 300;

/// Enables the `FLOAT` tag and the arithmetic fast-paths that promote to it.
pub const USE_FLOAT: bool = true;

/// Enables the `STRING` tag and its opcodes (`STRING`, `STRCAT`).
pub const USE_STRING: bool = true;

/// Enables extended math intrinsics (unused by the core opcode set; named
/// here only because it is part of the reference configuration surface).
pub const USE_MATH: bool = false;

/// IREP binary numeric fields are big-endian unless this is set.
pub const LITTLE_ENDIAN: bool = false;

/// Bytecode words and IREP fields are required to be 4-byte aligned.
pub const REQUIRE_32BIT_ALIGNMENT: bool = true;

/// Stores method-name strings on procs for diagnostics (method-not-found
/// messages, disassembly). Disabling this saves the name bytes but makes
/// diagnostics print only the symbol id.
pub const DEBUG: bool = true;

/// Maximum depth of the call-info stack. The distilled spec leaves this
/// "bounded only by the allocator" for a linked-frame design; this
/// workspace instead keeps call-info frames in a fixed-capacity vector
/// (see the Call-info stack design note), so a concrete bound is needed.
pub const MAX_CALL_DEPTH: usize = 128;

/// Fixed instance-variable capacity given to every `OBJECT` cell at
/// allocation time (§4.F: object ivar storage is laid out once and does
/// not grow, since objects are addressed by `Addr` from creation).
pub const MAX_OBJECT_IVARS: usize = 8;

/// Capacity of the process-wide native-method table (§6 "Native-method
/// ABI"). Bounds `NativeTable`'s fixed array of function pointers.
pub const MAX_NATIVE_METHODS: usize = 16;

/// Instruction quantum a cooperative scheduler tick grants a VM before
/// forcing `flag_preemption` (§5 "a scheduler tick invoked by the
/// collaborator on a periodic timer"). This workspace has no hardware
/// timer to drive that tick from, so `tinyvm-kernel`'s round-robin
/// scheduler simulates it with an instruction-count budget per slice —
/// documented as an Open Question resolution in DESIGN.md, not part of
/// the distilled spec itself.
pub const SCHEDULER_QUANTUM: usize = 10_000;

/// Bounds on a single IREP node's trailing arrays, used by the loader to
/// size fixed stack buffers while it parses one node's four counted
/// sections before it knows the node's total allocation size (no heap
/// available to grow a buffer on demand). Exceeding any of these is a
/// malformed-bytecode error, not a silent truncation.
pub const MAX_IREP_CODE_LEN: usize = 512;
pub const MAX_IREP_POOL_LEN: usize = 64;
pub const MAX_IREP_SYM_LEN: usize = 64;
pub const MAX_IREP_CHILDREN: usize = 32;

const _: () = assert!(MAX_VM_COUNT <= 1024);
