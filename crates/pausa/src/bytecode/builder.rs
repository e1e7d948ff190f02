//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` collects instructions with their source positions, interns constants and
//! names, and patches forward jumps once their target is known.

use super::{code::Code, op::Opcode};
use crate::{parse::CodeRange, value::Value};

#[derive(Debug, Default)]
pub(super) struct CodeBuilder {
    ops: Vec<Opcode>,
    positions: Vec<CodeRange>,
    consts: Vec<Value>,
    names: Vec<String>,
    kwnames: Vec<Vec<String>>,
    /// Position recorded for the next emitted instruction.
    current_location: CodeRange,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source position for subsequent instructions.
    pub fn set_location(&mut self, range: CodeRange) {
        self.current_location = range;
    }

    pub fn emit(&mut self, op: Opcode) {
        self.ops.push(op);
        self.positions.push(self.current_location);
    }

    /// Index the next instruction will have.
    pub fn offset(&self) -> u32 {
        self.ops.len() as u32
    }

    /// Emits a jump with an unknown target, to be fixed by [`Self::patch_jump`].
    ///
    /// `make` builds the jump opcode from a target.
    pub fn emit_jump(&mut self, make: fn(u32) -> Opcode) -> usize {
        self.emit(make(u32::MAX));
        self.ops.len() - 1
    }

    /// Points the jump at `index` to the next instruction.
    pub fn patch_jump(&mut self, index: usize) {
        let target = self.offset();
        self.patch_jump_to(index, target);
    }

    pub fn patch_jump_to(&mut self, index: usize, target: u32) {
        self.ops[index] = match self.ops[index] {
            Opcode::Jump(_) => Opcode::Jump(target),
            Opcode::JumpIfFalse(_) => Opcode::JumpIfFalse(target),
            Opcode::JumpIfTrue(_) => Opcode::JumpIfTrue(target),
            Opcode::JumpIfFalseOrPop(_) => Opcode::JumpIfFalseOrPop(target),
            Opcode::JumpIfTrueOrPop(_) => Opcode::JumpIfTrueOrPop(target),
            Opcode::ForIter(_) => Opcode::ForIter(target),
            Opcode::SetupExcept(_) => Opcode::SetupExcept(target),
            other => unreachable!("patching non-jump instruction {other:?}"),
        };
    }

    pub fn add_const(&mut self, value: Value) -> u32 {
        // floats are not deduplicated, `0.0 == -0.0`
        if !matches!(value, Value::Float(_))
            && let Some(idx) = self.consts.iter().position(|c| c == &value)
        {
            return idx as u32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return idx as u32;
        }
        self.names.push(name.to_owned());
        (self.names.len() - 1) as u32
    }

    /// Registers keyword names for a call site, `None` when there are none.
    pub fn add_kwnames(&mut self, names: Vec<String>) -> Option<u32> {
        if names.is_empty() {
            return None;
        }
        self.kwnames.push(names);
        Some((self.kwnames.len() - 1) as u32)
    }

    pub fn build(self, name: String, local_names: Vec<String>, num_params: u32) -> Code {
        Code {
            name,
            ops: self.ops,
            positions: self.positions,
            consts: self.consts,
            names: self.names,
            kwnames: self.kwnames,
            local_names,
            num_params,
        }
    }
}
