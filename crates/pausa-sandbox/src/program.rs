//! Compiling guest code into a reusable [`Program`].

use std::collections::BTreeMap;

use pausa::{CollectStringPrint, NoopTracer, Object, Runner, VmTracer};
use tracing::debug;

use crate::{Limits, Progress, SandboxError};

const DEFAULT_SCRIPT_NAME: &str = "main.py";

/// Names and display name a program is compiled with.
///
/// Names must be Python identifiers and each may appear once, across inputs and external
/// functions together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    input_names: Vec<String>,
    external_functions: Vec<String>,
    script_name: Option<String>,
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.input_names.push(name.into());
        self
    }

    #[must_use]
    pub fn inputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input_names.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn external_function(mut self, name: impl Into<String>) -> Self {
        self.external_functions.push(name.into());
        self
    }

    #[must_use]
    pub fn external_functions<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.external_functions.extend(names.into_iter().map(Into::into));
        self
    }

    /// File name shown in tracebacks, `main.py` unless set.
    #[must_use]
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = Some(name.into());
        self
    }

    /// Sorted input names and sorted external function names.
    fn validate(&self) -> Result<(Vec<String>, Vec<String>), SandboxError> {
        let inputs = sorted_names("input", &self.input_names)?;
        let externals = sorted_names("external function", &self.external_functions)?;
        if let Some(name) = inputs.iter().find(|name| externals.binary_search(*name).is_ok()) {
            return Err(SandboxError::Validation(format!(
                "'{name}' is declared both as an input and as an external function"
            )));
        }
        Ok((inputs, externals))
    }
}

fn sorted_names(kind: &str, names: &[String]) -> Result<Vec<String>, SandboxError> {
    let mut sorted = names.to_vec();
    sorted.sort();
    if let Some(bad) = sorted.iter().find(|name| !is_identifier(name)) {
        return Err(SandboxError::Validation(if bad.is_empty() {
            format!("empty {kind} name")
        } else {
            format!("invalid {kind} name '{bad}'")
        }));
    }
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(SandboxError::Validation(format!("duplicate {kind} name '{}'", pair[0])));
    }
    Ok(sorted)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c == '_' || c.is_alphabetic()) && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// A compiled guest script.
///
/// Immutable and `Send + Sync`: any number of runs, on any threads, may start from one program.
#[derive(Debug, Clone)]
pub struct Program {
    runner: Runner,
}

impl Program {
    /// Parses and compiles `code`.
    ///
    /// Bad names are a validation error; parse and compile failures are a compile error
    /// carrying the `SyntaxError` (or `NotImplementedError` for unsupported syntax).
    pub fn compile(code: &str, options: &CompileOptions) -> Result<Self, SandboxError> {
        let (input_names, external_functions) = options.validate()?;
        let script_name = options.script_name.as_deref().unwrap_or(DEFAULT_SCRIPT_NAME);
        let runner = Runner::new(code.to_owned(), script_name, input_names, external_functions)
            .map_err(SandboxError::Compile)?;
        Ok(Self { runner })
    }

    /// Sorted input names.
    #[must_use]
    pub fn input_names(&self) -> &[String] {
        self.runner.input_names()
    }

    /// Sorted external function names.
    #[must_use]
    pub fn external_functions(&self) -> &[String] {
        self.runner.external_functions()
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        self.runner.script_name()
    }

    #[must_use]
    pub fn code(&self) -> &str {
        self.runner.code()
    }

    /// Starts a run, returning at the first pause or at completion.
    ///
    /// Every declared input must be supplied exactly once.
    pub fn start(&self, inputs: Vec<(&str, Object)>, limits: &Limits) -> Result<Progress, SandboxError> {
        self.start_traced(inputs, limits, &mut NoopTracer)
    }

    /// Same as [`Program::start`] with every VM event reported to `tracer`.
    pub fn start_traced(
        &self,
        inputs: Vec<(&str, Object)>,
        limits: &Limits,
        tracer: &mut impl VmTracer,
    ) -> Result<Progress, SandboxError> {
        let inputs = self.order_inputs(inputs)?;
        let tracker = limits.tracker()?;
        debug!(script = self.script_name(), "starting run");
        let mut print = CollectStringPrint::new();
        let progress = self
            .runner
            .start_traced(inputs, tracker, &mut print, tracer)
            .map_err(SandboxError::from_run)?;
        Ok(Progress::from_run(progress, print.into_output()))
    }

    /// Runs to completion without a host.
    ///
    /// External function and OS calls raise `NotImplementedError` inside the guest, which it
    /// may catch. Returns the final value and the captured output.
    pub fn run(&self, inputs: Vec<(&str, Object)>, limits: &Limits) -> Result<(Object, String), SandboxError> {
        let inputs = self.order_inputs(inputs)?;
        let tracker = limits.tracker()?;
        let mut print = CollectStringPrint::new();
        let value = self
            .runner
            .run(inputs, tracker, &mut print)
            .map_err(SandboxError::from_run)?;
        Ok((value, print.into_output()))
    }

    pub fn dump(&self) -> Result<Vec<u8>, SandboxError> {
        Ok(self.runner.dump()?)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, SandboxError> {
        Ok(Self {
            runner: Runner::load(bytes)?,
        })
    }

    /// Puts named inputs in declaration order.
    fn order_inputs(&self, inputs: Vec<(&str, Object)>) -> Result<Vec<Object>, SandboxError> {
        let mut by_name: BTreeMap<&str, Object> = BTreeMap::new();
        for (name, value) in inputs {
            if !self.input_names().iter().any(|declared| declared == name) {
                return Err(SandboxError::Validation(format!("unexpected input '{name}'")));
            }
            if by_name.insert(name, value).is_some() {
                return Err(SandboxError::Validation(format!("input '{name}' supplied more than once")));
            }
        }
        self.input_names()
            .iter()
            .map(|name| {
                by_name
                    .remove(name.as_str())
                    .ok_or_else(|| SandboxError::Validation(format!("missing input '{name}'")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_private2"));
        assert!(is_identifier("données"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("a-b"));
    }

    #[test]
    fn names_are_sorted() {
        let options = CompileOptions::new().inputs(["b", "a"]).external_functions(["z", "y"]);
        let (inputs, externals) = options.validate().unwrap();
        assert_eq!(inputs, vec!["a", "b"]);
        assert_eq!(externals, vec!["y", "z"]);
    }

    #[test]
    fn bad_names() {
        let err = CompileOptions::new().inputs(["a", "a"]).validate().unwrap_err();
        assert_eq!(err, SandboxError::Validation("duplicate input name 'a'".to_owned()));
        let err = CompileOptions::new().external_function("").validate().unwrap_err();
        assert_eq!(err, SandboxError::Validation("empty external function name".to_owned()));
        let err = CompileOptions::new().input("f").external_function("f").validate().unwrap_err();
        assert_eq!(
            err,
            SandboxError::Validation("'f' is declared both as an input and as an external function".to_owned())
        );
    }
}
