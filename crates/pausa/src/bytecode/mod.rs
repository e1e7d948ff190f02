//! Bytecode compiler and virtual machine.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions
//! - `code` - Code object containing instructions, constants and source positions
//! - `builder` - CodeBuilder for emitting bytecode during compilation
//! - `compiler` - Node tree to bytecode compiler, including static name resolution
//! - `vm` - Virtual machine that runs until completion or a host request

pub(crate) use code::Code;
pub(crate) use compiler::{CompileResult, Compiler};
pub(crate) use vm::{FrameExit, VM, VMSnapshot};

mod builder;
mod code;
mod compiler;
mod op;
mod vm;
