//! Exception raising, matching and unwinding.

use super::VM;
use crate::{
    ExcType,
    exception::{ExcInstance, RawFrame, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// Unwinds to the innermost handler that can take `err`.
    ///
    /// Each frame left behind is added to the exception's traceback. Returns `Ok` when a
    /// handler was found and the VM can keep running, or the error when nothing caught it.
    pub(super) fn handle_exception(&mut self, err: RunError) -> RunResult<()> {
        let mut skip_record = std::mem::take(&mut self.reraising);
        let mut exc = match err {
            RunError::Exc(exc) => exc,
            RunError::Uncatchable(mut exc) => {
                for frame in self.frames.iter().rev() {
                    exc.traceback.push(self.raw_frame(frame.code, frame.ip));
                }
                return Err(RunError::Uncatchable(exc));
            }
        };

        loop {
            let Some(frame) = self.frames.last() else {
                return Err(RunError::Exc(exc));
            };
            if !skip_record {
                let raw = self.raw_frame(frame.code, frame.ip);
                exc.traceback.push(raw);
            }
            skip_record = false;

            let frame = self.current_frame_mut();
            if let Some(block) = frame.blocks.pop() {
                frame.ip = block.handler as usize;
                self.stack.truncate(block.stack_depth);
                self.exc_stack.truncate(block.exc_depth);
                let value = Value::Exception(exc);
                self.stack.push(value.clone());
                self.exc_stack.push(value);
                self.tracer.on_exception_push(self.exc_stack.len());
                return Ok(());
            }

            if let Some(frame) = self.frames.pop() {
                self.stack.truncate(frame.stack_base);
                self.exc_stack.truncate(frame.exc_base);
            }
        }
    }

    /// Position of the instruction before `ip`, the one that raised.
    fn raw_frame(&self, code: u32, ip: usize) -> RawFrame {
        RawFrame {
            code: code as usize,
            position: self.code[code as usize].position(ip.saturating_sub(1)),
        }
    }

    /// Builds the error for a bare `raise`, keeping the traceback of the handled exception.
    pub(super) fn reraise(&mut self) -> RunError {
        match self.exc_stack.last() {
            Some(Value::Exception(exc)) => {
                self.reraising = true;
                RunError::Exc(exc.clone())
            }
            _ => RunError::new(ExcType::RuntimeError, "No active exception to reraise"),
        }
    }
}

/// Builds the error for `raise value`.
pub(super) fn raise_value(value: Value) -> RunError {
    match value {
        Value::Exception(mut exc) => {
            exc.traceback.clear();
            RunError::Exc(exc)
        }
        Value::ExcClass(exc_type) => RunError::Exc(Box::new(ExcInstance::new(exc_type, None))),
        _ => RunError::type_error("exceptions must derive from BaseException"),
    }
}

/// Whether `exc` is caught by an `except class:` clause, `class` may be a tuple.
pub(super) fn exception_matches(exc: &Value, class: &Value) -> RunResult<bool> {
    let Value::Exception(exc) = exc else {
        return Ok(false);
    };
    match class {
        Value::ExcClass(exc_type) => Ok(exc.exc_type.is_subclass_of(*exc_type)),
        Value::Tuple(classes) => {
            for class in classes {
                match class {
                    Value::ExcClass(exc_type) if exc.exc_type.is_subclass_of(*exc_type) => return Ok(true),
                    Value::ExcClass(_) => {}
                    _ => return Err(not_an_exception_class()),
                }
            }
            Ok(false)
        }
        _ => Err(not_an_exception_class()),
    }
}

fn not_an_exception_class() -> RunError {
    RunError::type_error("catching classes that do not inherit from BaseException is not allowed")
}
