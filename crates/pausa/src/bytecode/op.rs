//! Opcode definitions for the bytecode VM.
//!
//! Operands are stored inline in each variant. Jump targets are absolute instruction indices
//! into the owning code object's `ops`.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    ExcType,
    builtins::Builtin,
    expressions::{CmpOperator, Conversion, Module, Operator},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, IntoStaticStr)]
pub(crate) enum Opcode {
    // Loads and stores
    /// Pushes `consts[idx]`.
    LoadConst(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    LoadGlobal(u32),
    StoreGlobal(u32),
    LoadBuiltin(Builtin),
    LoadExcClass(ExcType),

    // Stack manipulation
    Pop,
    Dup,
    /// `[a, b]` to `[a, b, a, b]`.
    Dup2,
    /// `[a, b]` to `[b, a]`.
    Rot2,
    /// `[a, b, c]` to `[c, a, b]`.
    Rot3,

    // Operators
    Binary(Operator),
    /// `a op= b`, mutates lists in place.
    Inplace(Operator),
    Compare(CmpOperator),
    Not,
    Neg,
    Pos,

    // Builders
    BuildList(u32),
    BuildTuple(u32),
    /// Pops `2 * n` values: key, value pairs in source order.
    BuildDict(u32),
    /// Concatenates `n` strings produced by f-string parts.
    BuildString(u32),
    /// Formats the top of stack for an f-string, `spec` is a constant index.
    FormatValue {
        conversion: Conversion,
        spec: Option<u32>,
    },
    /// Pops start, stop and step, `None` for each missing part.
    BuildSlice,
    /// Converts the top of stack to a tuple, used for `*args`.
    ToTuple,
    /// Pops an iterable and pushes exactly `n` items, the first on top.
    UnpackSequence(u32),

    // Item and attribute access
    /// `[obj, index]` to `[obj[index]]`.
    Subscript,
    /// `[value, obj, index]`, performs `obj[index] = value`.
    StoreSubscript,
    /// Pops an object and pushes the attribute named `names[idx]`.
    GetAttr(u32),

    // Calls
    /// Stack: `func, args..., kwvalues...`, `kwnames` indexes the code's keyword name lists.
    Call { args: u32, kwnames: Option<u32> },
    /// Stack: `func, argtuple, kwvalues...`, for calls with `*args`.
    CallVar { kwnames: Option<u32> },
    /// Stack: `obj, args..., kwvalues...`, calls `obj.names[name](...)`.
    CallMethod {
        name: u32,
        args: u32,
        kwnames: Option<u32>,
    },
    CallMethodVar { name: u32, kwnames: Option<u32> },

    // Control flow
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    /// Jumps keeping the value if falsy, otherwise pops it. Used by `and` and comparison chains.
    JumpIfFalseOrPop(u32),
    JumpIfTrueOrPop(u32),
    GetIter,
    /// Pushes the next item, or pops the iterator and jumps when it is exhausted.
    ForIter(u32),

    // Functions
    /// Pops `defaults` values and pushes a function for `functions[function]`.
    MakeFunction { function: u32, defaults: u32 },
    Return,
    Await,
    ImportModule(Module),

    // Exceptions
    /// Registers a handler: an exception raised before the matching `PopBlock` jumps to it.
    SetupExcept(u32),
    PopBlock,
    /// Leaves an `except` clause, dropping the exception being handled.
    PopExcept,
    Raise,
    /// Re-raises the exception being handled, as `raise` with no argument does.
    Reraise,
    /// `[exc, class]` to `[matched]`, `class` may be a tuple of classes.
    CheckExcMatch,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        self.into()
    }
}
