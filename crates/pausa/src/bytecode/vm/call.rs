//! Function calls: user functions, builtins, exception classes and host functions.

use super::{Frame, FrameExit, VM};
use crate::{
    ExcType,
    args::ArgValues,
    builtins::CallResult,
    exception::{ExcInstance, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{Function, Value},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Calls `func`, pushing its result or a new frame.
    ///
    /// Returns an exit when the call has to be answered by the host.
    pub(super) fn call_value(&mut self, func: Value, args: ArgValues) -> RunResult<Option<FrameExit>> {
        match func {
            Value::Function(function) => {
                self.push_frame(&function, args)?;
                Ok(None)
            }
            Value::ExtFunction(ext_id) => {
                let call_id = self.new_call_id();
                self.tracer.on_pause("function", Some(call_id));
                Ok(Some(FrameExit::ExternalCall { ext_id, args, call_id }))
            }
            Value::Builtin(builtin) => {
                let result = builtin.call(self.heap, self.print, args)?;
                Ok(self.handle_call_result(result))
            }
            Value::ExcClass(exc_type) => {
                let exc = self.instantiate_exception(exc_type, args)?;
                self.stack.push(Value::Exception(Box::new(exc)));
                Ok(None)
            }
            other => Err(RunError::type_error(format!(
                "'{}' object is not callable",
                other.type_name(self.heap)
            ))),
        }
    }

    /// Pushes a builtin's value, or pauses for an OS call.
    pub(super) fn handle_call_result(&mut self, result: CallResult) -> Option<FrameExit> {
        match result {
            CallResult::Value(value) => {
                self.stack.push(value);
                None
            }
            CallResult::OsCall { function, args, kwargs } => {
                let call_id = self.new_call_id();
                self.tracer.on_pause("os", Some(call_id));
                Some(FrameExit::OsCall {
                    function,
                    args: ArgValues::new(args, kwargs),
                    call_id,
                })
            }
        }
    }

    fn push_frame(&mut self, function: &Function, args: ArgValues) -> RunResult<()> {
        let code = &self.code[function.code as usize];
        let locals = bind_args(&code.name, code.params(), code.num_locals(), &function.defaults, args)?;
        self.heap.tracker.check_recursion_depth(self.frames.len())?;
        self.frames.push(Frame {
            code: function.code,
            ip: 0,
            locals,
            stack_base: self.stack.len(),
            blocks: Vec::new(),
            exc_base: self.exc_stack.len(),
        });
        self.tracer.on_call(&code.name, self.frames.len());
        Ok(())
    }

    /// `ValueError("msg")`, the message is `str()` of a single argument.
    fn instantiate_exception(&self, exc_type: ExcType, args: ArgValues) -> RunResult<ExcInstance> {
        let name: &'static str = exc_type.into();
        args.check_no_kwargs(name)?;
        let mut positional = args.args;
        let message = match positional.len() {
            0 => None,
            1 => positional.pop().map(|arg| arg.py_str(self.heap)),
            _ => Some(Value::Tuple(positional).py_repr(self.heap)),
        };
        Ok(ExcInstance::new(exc_type, message))
    }
}

/// Maps call arguments onto a function's local slots.
fn bind_args(
    name: &str,
    params: &[String],
    num_locals: usize,
    defaults: &[Value],
    args: ArgValues,
) -> RunResult<Vec<Value>> {
    let mut locals = vec![Value::Undefined; num_locals];
    if args.args.len() > params.len() {
        return Err(RunError::type_error(format!(
            "{name}() takes {} positional argument{} but {} {} given",
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.args.len(),
            if args.args.len() == 1 { "was" } else { "were" },
        )));
    }
    let positional = args.args.len();
    for (slot, value) in locals.iter_mut().zip(args.args) {
        *slot = value;
    }
    for (key, value) in args.kwargs {
        let Some(idx) = params.iter().position(|p| *p == key) else {
            return Err(RunError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        };
        if idx < positional || !matches!(locals[idx], Value::Undefined) {
            return Err(RunError::type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        locals[idx] = value;
    }

    // defaults belong to the last parameters
    let first_default = params.len() - defaults.len();
    let mut missing = Vec::new();
    for (idx, param) in params.iter().enumerate() {
        if matches!(locals[idx], Value::Undefined) {
            if idx >= first_default {
                locals[idx] = defaults[idx - first_default].clone();
            } else {
                missing.push(format!("'{param}'"));
            }
        }
    }
    if !missing.is_empty() {
        let list = match missing.as_slice() {
            [one] => one.clone(),
            [rest @ .., last] => format!("{} and {last}", rest.join(", ")),
            [] => String::new(),
        };
        return Err(RunError::type_error(format!(
            "{name}() missing {} required positional argument{}: {list}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
        )));
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    fn message(err: RunError) -> Option<String> {
        match err {
            RunError::Exc(exc) | RunError::Uncatchable(exc) => exc.message,
        }
    }

    #[test]
    fn defaults_and_keywords() {
        let locals = bind_args(
            "f",
            &params(&["a", "b", "c"]),
            4,
            &[Value::Int(2), Value::Int(3)],
            ArgValues::new(vec![Value::Int(1)], vec![("c".to_owned(), Value::Int(30))]),
        )
        .unwrap();
        assert_eq!(locals, vec![Value::Int(1), Value::Int(2), Value::Int(30), Value::Undefined]);
    }

    #[test]
    fn missing_arguments_are_listed() {
        let err = bind_args("f", &params(&["a", "b", "c"]), 3, &[], ArgValues::positional(vec![Value::Int(1)]))
            .unwrap_err();
        assert_eq!(
            message(err).as_deref(),
            Some("f() missing 2 required positional arguments: 'b' and 'c'")
        );
    }

    #[test]
    fn duplicate_argument() {
        let err = bind_args(
            "f",
            &params(&["a"]),
            1,
            &[],
            ArgValues::new(vec![Value::Int(1)], vec![("a".to_owned(), Value::Int(2))]),
        )
        .unwrap_err();
        assert_eq!(message(err).as_deref(), Some("f() got multiple values for argument 'a'"));
    }

    #[test]
    fn too_many_positional() {
        let err = bind_args(
            "f",
            &params(&["a"]),
            1,
            &[],
            ArgValues::positional(vec![Value::Int(1), Value::Int(2)]),
        )
        .unwrap_err();
        assert_eq!(
            message(err).as_deref(),
            Some("f() takes 1 positional argument but 2 were given")
        );
    }
}
