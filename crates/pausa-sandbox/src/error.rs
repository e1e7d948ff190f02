//! Structured errors returned by compile, start, resume and the dispatch loop.

use std::fmt;

use pausa::{ExcType, Exception, ResourceError, StackFrame};

/// Which resource limit aborted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Duration,
    Memory,
    Allocations,
    Operations,
    Recursion,
}

impl LimitKind {
    fn from_resource_error(err: &ResourceError) -> Self {
        match err {
            ResourceError::Time { .. } => Self::Duration,
            ResourceError::Memory { .. } => Self::Memory,
            ResourceError::Allocation { .. } => Self::Allocations,
            ResourceError::Operation { .. } => Self::Operations,
            ResourceError::Recursion { .. } => Self::Recursion,
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Duration => "duration",
            Self::Memory => "memory",
            Self::Allocations => "allocations",
            Self::Operations => "operations",
            Self::Recursion => "recursion",
        })
    }
}

/// Coarse classification of a [`SandboxError`], for hosts that branch on the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CompileError,
    ValidationError,
    NameError,
    RuntimeError,
    ConsumedSnapshot,
    ResourceLimitExceeded { limit: LimitKind },
    /// `OSError` or one of its subclasses escaped guest code.
    OsError { variant: ExcType },
    NotImplementedError,
    /// Any other exception type that escaped guest code.
    Exception(ExcType),
    SerializationError,
}

/// Error returned by every fallible sandbox operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// The source could not be parsed or compiled.
    Compile(Exception),
    /// Bad host-supplied configuration: names, inputs, limits or future results.
    Validation(String),
    /// An exception escaped guest code.
    Guest(Exception),
    /// A continuation or future batch was used after it had already been resumed or dumped.
    ConsumedSnapshot,
    /// A resource limit aborted the run.
    ResourceLimit { limit: LimitKind, exception: Exception },
    /// Dumped bytes could not be produced or decoded.
    Serialization(String),
}

impl SandboxError {
    /// Wraps an exception raised while running guest code, separating resource limit violations.
    pub(crate) fn from_run(exception: Exception) -> Self {
        match exception.resource_error() {
            Some(err) => Self::ResourceLimit {
                limit: LimitKind::from_resource_error(err),
                exception,
            },
            None => Self::Guest(exception),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compile(_) => ErrorKind::CompileError,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::ConsumedSnapshot => ErrorKind::ConsumedSnapshot,
            Self::ResourceLimit { limit, .. } => ErrorKind::ResourceLimitExceeded { limit: *limit },
            Self::Serialization(_) => ErrorKind::SerializationError,
            Self::Guest(exc) => match exc.exc_type() {
                ExcType::NameError | ExcType::UnboundLocalError => ErrorKind::NameError,
                ExcType::RuntimeError | ExcType::RecursionError => ErrorKind::RuntimeError,
                ExcType::NotImplementedError => ErrorKind::NotImplementedError,
                variant if variant.is_subclass_of(ExcType::OSError) => ErrorKind::OsError { variant },
                other => ErrorKind::Exception(other),
            },
        }
    }

    /// Human readable message, without the exception type prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Compile(exc) | Self::Guest(exc) | Self::ResourceLimit { exception: exc, .. } => {
                exc.message().unwrap_or_default().to_owned()
            }
            Self::Validation(msg) | Self::Serialization(msg) => msg.clone(),
            Self::ConsumedSnapshot => "snapshot has already been resumed".to_owned(),
        }
    }

    /// Traceback frames of the underlying exception, outermost first. Empty for host-side errors.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        self.exception().map_or(&[], Exception::traceback)
    }

    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Compile(exc) | Self::Guest(exc) | Self::ResourceLimit { exception: exc, .. } => Some(exc),
            _ => None,
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(exc) => write!(f, "compile error: {exc}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::Guest(exc) => write!(f, "{exc}"),
            Self::ConsumedSnapshot => f.write_str("snapshot has already been resumed"),
            Self::ResourceLimit { limit, exception } => {
                write!(f, "resource limit exceeded ({limit}): {exception}")
            }
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for SandboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.exception().map(|exc| exc as &(dyn std::error::Error + 'static))
    }
}

impl From<postcard::Error> for SandboxError {
    fn from(err: postcard::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
