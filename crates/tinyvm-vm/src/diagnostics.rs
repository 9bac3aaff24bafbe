// SPDX-License-Identifier: GPL-3.0-or-later

//! The non-fatal diagnostic stream (§7, classes 2-4).
//!
//! mrubyc prints these straight to its console HAL (`original_source`'s
//! `hal.h`/`console.c`); this workspace generalizes that single sink into
//! a trait so a bare-metal build can still wire it to a UART. Grounded on
//! the teacher workspace's `uart::Uart`/`uart::UartExt` trait pair
//! (`lona-vm/src/uart/mod.rs`), stripped to the one method this system's
//! error taxonomy actually needs.

/// Receives one diagnostic line per non-fatal error (§7 classes 2-4:
/// method-not-found, uninitialized-constant, unsupported-opcode).
/// Implementations must not block or allocate unboundedly — native
/// methods and the dispatcher call this inline, mid-opcode.
pub trait DiagnosticSink {
    fn report(&mut self, message: &str);
}

/// Discards every diagnostic. Used by tests and by any embedder that has
/// no console attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&mut self, _message: &str) {}
}

/// A fixed-capacity `core::fmt::Write` target for composing a diagnostic
/// line in place, with no allocator available (`report` takes `&str`, not
/// a formatter, so the dispatcher needs somewhere to `write!` into before
/// handing the result off). Overlong output is truncated rather than
/// rejected — a clipped diagnostic still reaches the operator, which
/// matters more on an embedded target than a dropped one.
pub struct MessageBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> MessageBuf<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // `write_str` clamps `take` to a char boundary, so this should
        // always succeed; fall back to empty rather than trust that with
        // `unsafe` and risk handing out a string cut mid-codepoint.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl<const N: usize> Default for MessageBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Write for MessageBuf<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = N - self.len;
        let mut take = room.min(s.len());
        // Don't split a multibyte scalar across the cutoff — back off to
        // the nearest char boundary so `as_str` always sees whole codepoints.
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

#[cfg(feature = "std")]
mod std_impl {
    use super::DiagnosticSink;

    /// Writes every diagnostic to stderr, one line per call. The CLI's
    /// default sink, analogous to the teacher binary writing boot
    /// diagnostics straight to its UART.
    #[derive(Debug, Default)]
    pub struct StderrSink;

    impl DiagnosticSink for StderrSink {
        fn report(&mut self, message: &str) {
            eprintln!("{message}");
        }
    }
}

#[cfg(feature = "std")]
pub use std_impl::StderrSink;

#[cfg(test)]
mod diagnostics_test {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        lines: std::vec::Vec<std::string::String>,
    }

    impl DiagnosticSink for Recorder {
        fn report(&mut self, message: &str) {
            self.lines.push(message.into());
        }
    }

    #[test]
    fn recorder_collects_messages() {
        let mut r = Recorder::default();
        r.report("No method. Class:Fixnum Method:nope");
        assert_eq!(r.lines.len(), 1);
    }

    #[test]
    fn null_sink_discards() {
        let mut s = NullSink;
        s.report("ignored");
    }

    #[test]
    fn message_buf_formats_and_reports() {
        use core::fmt::Write;
        let mut msg: MessageBuf<64> = MessageBuf::new();
        write!(msg, "No method. Class:{} Method:{}", "Fixnum", "nope").unwrap();
        assert_eq!(msg.as_str(), "No method. Class:Fixnum Method:nope");
    }

    #[test]
    fn message_buf_truncates_rather_than_panics() {
        use core::fmt::Write;
        let mut msg: MessageBuf<4> = MessageBuf::new();
        write!(msg, "hello world").unwrap();
        assert_eq!(msg.as_str(), "hell");
    }

    #[test]
    fn message_buf_truncation_backs_off_a_split_multibyte_char() {
        use core::fmt::Write;
        // "Cl\u{e9}" (3 bytes: 'C', 'l', then a 2-byte 'é') into a 3-byte
        // buffer: a byte-boundary cutoff would land inside 'é' and produce
        // invalid UTF-8. The char-boundary backoff must drop the whole
        // scalar instead of handing out a split prefix.
        let mut msg: MessageBuf<3> = MessageBuf::new();
        write!(msg, "Cl\u{e9}").unwrap();
        assert_eq!(msg.as_str(), "Cl");
    }
}
