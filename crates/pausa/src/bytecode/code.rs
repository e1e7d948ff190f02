use serde::{Deserialize, Serialize};

use super::op::Opcode;
use crate::{parse::CodeRange, value::Value};

/// A compiled function or module body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Code {
    /// Function name, `<module>` for top level code.
    pub name: String,
    pub ops: Vec<Opcode>,
    /// Source position of each instruction, same length as `ops`.
    pub positions: Vec<CodeRange>,
    pub consts: Vec<Value>,
    /// Attribute and method names referenced by `GetAttr` and `CallMethod`.
    pub names: Vec<String>,
    /// Keyword argument names for each call site that passes keywords.
    pub kwnames: Vec<Vec<String>>,
    /// Parameters first, then other locals.
    pub local_names: Vec<String>,
    pub num_params: u32,
}

impl Code {
    pub fn num_locals(&self) -> usize {
        self.local_names.len()
    }

    pub fn params(&self) -> &[String] {
        &self.local_names[..self.num_params as usize]
    }

    /// Source position of the instruction at `ip`.
    pub fn position(&self, ip: usize) -> CodeRange {
        self.positions.get(ip).copied().unwrap_or_default()
    }
}
