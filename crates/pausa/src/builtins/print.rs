//! Implementation of the print() builtin function.

use crate::{
    args::ArgValues,
    exception::{RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    value::{Heap, Value},
};

/// Implementation of the print() builtin function.
///
/// Supports the `sep` and `end` keyword arguments, `None` for either means the default.
pub fn builtin_print(
    heap: &mut Heap<impl ResourceTracker>,
    mut args: ArgValues,
    print: &mut impl PrintWriter,
) -> RunResult<Value> {
    let sep = string_kwarg(heap, args.take_kwarg("sep"), "sep")?;
    let end = string_kwarg(heap, args.take_kwarg("end"), "end")?;
    // flush is accepted for compatibility, output is never buffered by the interpreter
    args.take_kwarg("flush");
    args.check_no_kwargs("print")?;

    for (i, value) in args.args.iter().enumerate() {
        if i > 0 {
            match &sep {
                Some(sep) => print.stdout_write(sep.into())?,
                None => print.stdout_push(' ')?,
            }
        }
        print.stdout_write(value.py_str(heap).into())?;
    }
    match end {
        Some(end) => print.stdout_write(end.into())?,
        None => print.stdout_push('\n')?,
    }
    Ok(Value::None)
}

fn string_kwarg(heap: &Heap<impl ResourceTracker>, value: Option<Value>, name: &str) -> RunResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s)),
        Some(other) => Err(RunError::type_error(format!(
            "{name} must be None or a string, not {}",
            other.type_name(heap)
        ))),
    }
}
