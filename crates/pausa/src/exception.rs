use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

use crate::{parse::CodeRange, resource::ResourceError};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Python exception types supported by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, VariantNames, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    FileExistsError,
    FileNotFoundError,
    ImportError,
    IndexError,
    IsADirectoryError,
    KeyError,
    LookupError,
    MemoryError,
    NameError,
    NotADirectoryError,
    NotImplementedError,
    OSError,
    OverflowError,
    PermissionError,
    RecursionError,
    RuntimeError,
    SyntaxError,
    TimeoutError,
    TypeError,
    UnboundLocalError,
    UnicodeDecodeError,
    ValueError,
    ZeroDivisionError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Used by `except` clauses to decide whether a handler catches a raised exception.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            Self::Exception => self != Self::BaseException,
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::RuntimeError => matches!(self, Self::RecursionError | Self::NotImplementedError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            Self::ValueError => matches!(self, Self::UnicodeDecodeError),
            Self::OSError => matches!(
                self,
                Self::FileNotFoundError
                    | Self::FileExistsError
                    | Self::IsADirectoryError
                    | Self::NotADirectoryError
                    | Self::PermissionError
            ),
            _ => false,
        }
    }

    /// Looks up an exception type by a loosely formatted name.
    ///
    /// Accepts the exact class name (`ValueError`), snake_case (`value_error`) and any other
    /// casing, since underscores and case are ignored when comparing.
    #[must_use]
    pub fn from_loose_name(name: &str) -> Option<Self> {
        if let Ok(exc_type) = name.parse() {
            return Some(exc_type);
        }
        let wanted: String = name.chars().filter(|c| *c != '_').collect();
        Self::VARIANTS
            .iter()
            .find(|variant| variant.eq_ignore_ascii_case(&wanted))
            .and_then(|variant| variant.parse().ok())
    }

    /// Returns the snake_case spelling of this exception type, e.g. `file_not_found_error`.
    #[must_use]
    pub fn snake_name(self) -> String {
        let name: &'static str = self.into();
        let mut out = String::with_capacity(name.len() + 4);
        let chars: Vec<char> = name.chars().collect();
        for (i, ch) in chars.iter().enumerate() {
            if ch.is_ascii_uppercase() {
                // a run of capitals like "OS" in "OSError" stays one word
                let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
                let next_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
                if i > 0 && (!prev_upper || next_lower) {
                    out.push('_');
                }
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(*ch);
            }
        }
        out
    }
}

/// Line and column of a position in source code, both 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One frame of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Script name the frame's code came from.
    pub filename: String,
    pub start: CodeLoc,
    pub end: CodeLoc,
    /// Function name, `<module>` for top level code.
    pub frame_name: Option<String>,
    /// The source line the frame points at, if the position is on a single line.
    pub preview_line: Option<String>,
}

impl StackFrame {
    pub(crate) fn from_position(position: CodeRange, filename: &str, frame_name: Option<&str>, source: &str) -> Self {
        let preview_line = if position.start.line == position.end.line {
            source
                .lines()
                .nth(position.start.line.saturating_sub(1) as usize)
                .map(str::to_owned)
        } else {
            None
        };
        Self {
            filename: filename.to_owned(),
            start: position.start,
            end: position.end,
            frame_name: frame_name.map(str::to_owned),
            preview_line,
        }
    }
}

/// A Python exception that escaped the sandboxed program, or was rejected before it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    exc_type: ExcType,
    message: Option<String>,
    traceback: Vec<StackFrame>,
    resource_error: Option<ResourceError>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            message,
            traceback: Vec::new(),
            resource_error: None,
        }
    }

    pub(crate) fn new_full(
        exc_type: ExcType,
        message: Option<String>,
        traceback: Vec<StackFrame>,
        resource_error: Option<ResourceError>,
    ) -> Self {
        Self {
            exc_type,
            message,
            traceback,
            resource_error,
        }
    }

    /// Shorthand for a `RuntimeError` with the given message.
    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::RuntimeError, Some(message.into()))
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// Traceback frames, outermost first.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// The resource limit that produced this exception, if it came from the resource tracker
    /// rather than from Python code.
    #[must_use]
    pub fn resource_error(&self) -> Option<&ResourceError> {
        self.resource_error.as_ref()
    }

    /// `ValueError: message` form as printed on the last line of a Python traceback.
    #[must_use]
    pub fn summary(&self) -> String {
        self.to_string()
    }

    /// Full Python-style traceback text.
    #[must_use]
    pub fn traceback_text(&self) -> String {
        let mut out = String::new();
        if !self.traceback.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
        }
        for frame in &self.traceback {
            out.push_str(&format!("  File \"{}\", line {}", frame.filename, frame.start.line));
            if let Some(name) = &frame.frame_name {
                out.push_str(&format!(", in {name}"));
            }
            out.push('\n');
            if let Some(line) = &frame.preview_line {
                out.push_str(&format!("    {}\n", line.trim()));
            }
        }
        out.push_str(&self.summary());
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) if !message.is_empty() => write!(f, "{}: {message}", self.exc_type),
            _ => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for Exception {}

/// A traceback position recorded while an exception unwinds: which code object and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RawFrame {
    pub code: usize,
    pub position: CodeRange,
}

/// An exception instance as it lives inside the VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExcInstance {
    pub exc_type: ExcType,
    pub message: Option<String>,
    pub traceback: Vec<RawFrame>,
    pub resource_error: Option<ResourceError>,
}

impl ExcInstance {
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            message,
            traceback: Vec::new(),
            resource_error: None,
        }
    }
}

/// Error produced while executing bytecode.
#[derive(Debug, Clone)]
pub(crate) enum RunError {
    /// A Python exception that `try`/`except` may catch.
    Exc(Box<ExcInstance>),
    /// A resource violation that unwinds straight out of the VM.
    Uncatchable(Box<ExcInstance>),
}

impl RunError {
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self::Exc(Box::new(ExcInstance::new(exc_type, Some(message.into()))))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::ValueError, message)
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(Box::new(ExcInstance {
            exc_type: exc.exc_type,
            message: exc.message,
            traceback: Vec::new(),
            resource_error: exc.resource_error,
        }))
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc_type = err.exc_type();
        let instance = Box::new(ExcInstance {
            exc_type,
            message: Some(err.to_string()),
            traceback: Vec::new(),
            resource_error: Some(err.clone()),
        });
        // only the recursion limit is visible to `except`, like CPython
        if matches!(err, ResourceError::Recursion { .. }) {
            Self::Exc(instance)
        } else {
            Self::Uncatchable(instance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_names() {
        assert_eq!(ExcType::from_loose_name("ValueError"), Some(ExcType::ValueError));
        assert_eq!(ExcType::from_loose_name("runtime_error"), Some(ExcType::RuntimeError));
        assert_eq!(ExcType::from_loose_name("os_error"), Some(ExcType::OSError));
        assert_eq!(ExcType::from_loose_name("file_not_found_error"), Some(ExcType::FileNotFoundError));
        assert_eq!(ExcType::from_loose_name("nonsense"), None);
    }

    #[test]
    fn snake_names() {
        assert_eq!(ExcType::OSError.snake_name(), "os_error");
        assert_eq!(ExcType::FileNotFoundError.snake_name(), "file_not_found_error");
        assert_eq!(ExcType::IsADirectoryError.snake_name(), "is_a_directory_error");
    }
}
