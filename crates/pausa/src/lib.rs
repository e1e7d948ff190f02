#![doc = include_str!("../../../README.md")]

mod args;
mod builtins;
mod bytecode;
mod exception;
mod expressions;
mod io;
mod object;
mod ops;
mod os;
mod parse;
mod pathlib;
mod resource;
mod run;
pub mod tracer;
mod value;

pub use crate::{
    exception::{CodeLoc, ExcType, Exception, StackFrame},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::Object,
    os::{OsFunction, S_IFDIR, S_IFREG, STAT_RESULT_FIELDS, dir_stat, file_stat, stat_result},
    parse::{CodeRange, ParseError},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LARGE_RESULT_THRESHOLD, LimitedTracker, MAX_RESULT_BYTES, NoLimitTracker,
        ResourceError, ResourceLimits, ResourceTracker,
    },
    run::{ExternalResult, FutureSnapshot, PausaFuture, RunProgress, Runner, Snapshot},
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
};
