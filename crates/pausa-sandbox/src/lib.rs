//! Host side of a pausa run.
//!
//! [`Program`] and [`Progress`] expose the pause/resume state machine directly: every external
//! function call, OS operation, or batch of awaited futures suspends the run and hands the host a
//! single-use handle to continue it. [`Sandbox`] drives that machine to completion from
//! registered handlers, a [`Capabilities`] object and an in-memory [`PseudoFs`].
//!
//! ```
//! use pausa::Object;
//! use pausa_sandbox::{CompileOptions, HandlerResult, Limits, Program, Progress};
//!
//! let options = CompileOptions::new().input("name").external_function("greet");
//! let program = Program::compile("greet(name)", &options).unwrap();
//! let progress = program.start(vec![("name", Object::from("ada"))], &Limits::default()).unwrap();
//! let Progress::FunctionCall(call, continuation, _) = progress else { panic!("expected a call") };
//! assert_eq!(call.name, "greet");
//! let greeting = format!("hello {}", call.args[0].py_str());
//! let (value, _) = continuation.resume(HandlerResult::ok(greeting)).unwrap().into_complete().unwrap();
//! assert_eq!(value, Object::from("hello ada"));
//! ```

mod error;
mod handler;
mod limits;
mod program;
mod progress;
mod pseudo_fs;
mod sandbox;

pub use pausa::{ExcType, Exception, Object, OsFunction, StackFrame, VmTracer};

pub use crate::{
    error::{ErrorKind, LimitKind, SandboxError},
    handler::{HandlerFailure, HandlerResult},
    limits::Limits,
    program::{CompileOptions, Program},
    progress::{Continuation, FunctionCall, FutureBatch, OsCall, PendingRequest, Progress},
    pseudo_fs::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, FsError, Metadata, PseudoFs},
    sandbox::{Capabilities, RunResult, Sandbox},
};
