// SPDX-License-Identifier: GPL-3.0-or-later

//! Host-side demo binary: loads a precompiled IREP bytecode file from
//! disk and runs it to completion via [`tinyvm_kernel::RoundRobin`].
//!
//! Grounded on the teacher's `bin/lona-vm.rs` boot sequence (pool →
//! process → run), with every seL4/TCB/UART hardware bring-up step
//! stripped — that bring-up is an external collaborator per §1/§6 of
//! the distilled spec, and this binary's entire reason to exist is to
//! give the core something to run on a developer's machine instead. The
//! read-eval-ish shape of `repl/mod.rs` (parse CLI input, run, report
//! the result or the error) carries over at the granularity of "one
//! bytecode file in, one result or diagnostic stream out" rather than a
//! line-at-a-time loop, since source compilation is a Non-goal here.

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tinyvm_core::Value;
use tinyvm_kernel::{RoundRobin, Scheduler};
use tinyvm_vm::diagnostics::StderrSink;
use tinyvm_vm::Runtime;

/// Run a precompiled tinyvm IREP bytecode file to completion.
#[derive(Parser, Debug)]
#[command(name = "tinyvm", version, about)]
struct Args {
    /// Path to a length-prefixed IREP binary (see §6 "External Interfaces").
    bytecode: PathBuf,

    /// Size, in bytes, of the fixed memory pool backing every allocation
    /// (the allocator, symbol table, and every VM the scheduler opens).
    #[arg(long, default_value_t = 64 * 1024)]
    pool_size: usize,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let bytecode = match fs::read(&args.bytecode) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("tinyvm: cannot read {}: {e}", args.bytecode.display());
            return ExitCode::FAILURE;
        }
    };

    let mut pool_buf = vec![0u8; args.pool_size];
    let Some(mut rt) = Runtime::new(&mut pool_buf) else {
        eprintln!("tinyvm: pool too small to bootstrap a runtime");
        return ExitCode::FAILURE;
    };

    let id = match rt.vm_open() {
        Ok(id) => id,
        Err(e) => {
            eprintln!("tinyvm: {e}");
            return ExitCode::FAILURE;
        }
    };

    let root_irep = match tinyvm_vm::loader::load(&mut rt.pool, &mut rt.syms, id, &bytecode) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("tinyvm: malformed bytecode: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = rt.vm_begin(id, root_irep) {
        eprintln!("tinyvm: {e}");
        return ExitCode::FAILURE;
    }

    let mut sink = StderrSink;
    let mut scheduler = RoundRobin::new();
    if let Err(e) = scheduler.run_to_completion(&mut rt, &mut sink) {
        eprintln!("tinyvm: {e}");
        return ExitCode::FAILURE;
    }

    // The scheduler leaves a terminal VM open so its register file is
    // still readable here; vm_end/vm_close are ours to call once we are
    // done looking at it (§6 "External Interfaces").
    print_result(&rt, id);
    rt.vm_end(id);
    rt.vm_close(id);
    ExitCode::SUCCESS
}

/// Print the root VM's `R(0)` the way a REPL would print its last
/// expression's value, via the same `to_s` rendering `STRCAT` uses
/// internally. Must run before `vm_end`/`vm_close`, while the VM's
/// register file is still intact.
fn print_result(rt: &Runtime, id: u8) {
    match rt.register0(id) {
        Some(value) if !matches!(value, Value::Empty) => {
            let mut out = std::string::String::new();
            let _ = tinyvm_vm::printer::write_to_s(&rt.pool, &rt.syms, value, &mut out);
            println!("{out}");
        }
        _ => {}
    }
}
