// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared, dependency-free ABI types for the tinyvm workspace.
//!
//! Every other crate in the workspace compiles against these definitions
//! instead of duplicating tag numbers, opcode numbers, or the instruction
//! bit layout. Kept `#![no_std]` and free of `alloc` so it can be used from
//! bare-metal targets without pulling in an allocator.

#![no_std]

pub mod config;
pub mod inst;
pub mod irep_format;
pub mod opcode;
pub mod tag;

pub use inst::Instruction;
pub use tag::Tag;
