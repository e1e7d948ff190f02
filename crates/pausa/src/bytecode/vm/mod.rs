//! Bytecode virtual machine for executing compiled Python code.
//!
//! The VM uses a stack-based execution model with an operand stack for computation
//! and a call stack for function frames. Each frame owns its instruction pointer (IP).
//!
//! Execution stops at every point the host must answer: an external function call, a
//! filesystem or environment operation, or an `await` on a future nobody has resolved yet.
//! The VM state at that point is taken with [`VM::snapshot`] and serialized with the heap.

mod attr;
mod call;
mod collections;
mod exceptions;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    ExcType,
    args::ArgValues,
    bytecode::{code::Code, op::Opcode},
    exception::{ExcInstance, RunError, RunResult},
    expressions::Conversion,
    io::PrintWriter,
    ops,
    os::OsFunction,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{Dict, Function, HashKey, Heap, HeapData, Value},
};

/// Why the VM stopped running.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// The module finished, with the value of its last expression statement.
    Return(Value),
    /// Sandboxed code called a host function.
    ExternalCall { ext_id: u32, args: ArgValues, call_id: u32 },
    /// Sandboxed code asked for a filesystem or environment operation.
    OsCall {
        function: OsFunction,
        args: ArgValues,
        call_id: u32,
    },
    /// Every runnable path awaits one of these unresolved futures.
    ResolveFutures(Vec<u32>),
}

/// A registered `except` or `finally` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Block {
    handler: u32,
    /// Operand stack length when the block was entered.
    stack_depth: usize,
    exc_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    /// Index into the function table.
    code: u32,
    ip: usize,
    locals: Vec<Value>,
    /// Operand stack length when the frame was pushed.
    stack_base: usize,
    blocks: Vec<Block>,
    /// Length of the handled-exception stack when the frame was pushed.
    exc_base: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FutureState {
    Pending,
    Resolved(Value),
    Failed(Box<ExcInstance>),
}

/// Serializable VM state between two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VMSnapshot {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    exc_stack: Vec<Value>,
    futures: BTreeMap<u32, FutureState>,
    next_call_id: u32,
    /// Id of the host call the VM is paused on, if any.
    pending_call_id: Option<u32>,
}

impl VMSnapshot {
    /// State of a VM about to run the module body.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            frames: vec![Frame {
                code: 0,
                ip: 0,
                locals: Vec::new(),
                stack_base: 0,
                blocks: Vec::new(),
                exc_base: 0,
            }],
            exc_stack: Vec::new(),
            futures: BTreeMap::new(),
            next_call_id: 0,
            pending_call_id: None,
        }
    }

    pub fn pending_call_id(&self) -> Option<u32> {
        self.pending_call_id
    }

    /// Ids of futures the host has not resolved yet, ascending.
    pub fn pending_futures(&self) -> Vec<u32> {
        self.futures
            .iter()
            .filter(|(_, state)| matches!(state, FutureState::Pending))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// The bytecode interpreter.
///
/// Borrows the heap, globals and output for the duration of one run; everything else is
/// owned and moves into a [`VMSnapshot`] when execution pauses.
pub(crate) struct VM<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    /// Exceptions being handled by an `except` clause or `finally` body, innermost last.
    exc_stack: Vec<Value>,
    futures: BTreeMap<u32, FutureState>,
    next_call_id: u32,
    pending_call_id: Option<u32>,
    /// Set by `Reraise` so the raising frame is not recorded twice in the traceback.
    reraising: bool,
    heap: &'a mut Heap<T>,
    globals: &'a mut Vec<Value>,
    code: &'a [Code],
    global_names: &'a [String],
    print: &'a mut P,
    tracer: &'a mut Tr,
}

impl<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'a, T, P, Tr> {
    /// Restores a VM from a snapshot.
    pub fn restore(
        snapshot: VMSnapshot,
        heap: &'a mut Heap<T>,
        globals: &'a mut Vec<Value>,
        code: &'a [Code],
        global_names: &'a [String],
        print: &'a mut P,
        tracer: &'a mut Tr,
    ) -> Self {
        Self {
            stack: snapshot.stack,
            frames: snapshot.frames,
            exc_stack: snapshot.exc_stack,
            futures: snapshot.futures,
            next_call_id: snapshot.next_call_id,
            pending_call_id: snapshot.pending_call_id,
            reraising: false,
            heap,
            globals,
            code,
            global_names,
            print,
            tracer,
        }
    }

    /// Consumes the VM, releasing its borrows and keeping its state.
    pub fn snapshot(self) -> VMSnapshot {
        VMSnapshot {
            stack: self.stack,
            frames: self.frames,
            exc_stack: self.exc_stack,
            futures: self.futures,
            next_call_id: self.next_call_id,
            pending_call_id: self.pending_call_id,
        }
    }

    /// Runs until the module returns or the host must be asked for something.
    ///
    /// An `Err` is an exception no handler caught; its traceback has been recorded.
    pub fn run(&mut self) -> RunResult<FrameExit> {
        loop {
            match self.step() {
                Ok(None) => {}
                Ok(Some(exit)) => return Ok(exit),
                Err(err) => self.handle_exception(err)?,
            }
        }
    }

    /// Answers the paused host call with a value.
    pub fn resume_value(&mut self, value: Value) {
        self.pending_call_id = None;
        self.stack.push(value);
    }

    /// Answers the paused host call by raising `exc` where the call was made.
    pub fn resume_error(&mut self, exc: ExcInstance) -> RunResult<()> {
        self.pending_call_id = None;
        self.handle_exception(RunError::Exc(Box::new(exc)))
    }

    /// Answers the paused host call with a future the host will resolve later.
    pub fn resume_future(&mut self) -> RunResult<()> {
        let call_id = self
            .pending_call_id
            .take()
            .ok_or_else(|| RunError::new(ExcType::RuntimeError, "no host call is pending"))?;
        self.futures.insert(call_id, FutureState::Pending);
        self.stack.push(Value::Future(call_id));
        Ok(())
    }

    /// Resolves pending futures, each with a value or an exception.
    ///
    /// Fails without changing anything if an id is not a pending future.
    pub fn resolve_futures(&mut self, results: Vec<(u32, Result<Value, ExcInstance>)>) -> RunResult<()> {
        if let Some((id, _)) = results
            .iter()
            .find(|(id, _)| !matches!(self.futures.get(id), Some(FutureState::Pending)))
        {
            return Err(RunError::new(
                ExcType::RuntimeError,
                format!("unknown call_id {id}, expected one of {:?}", self.pending_futures()),
            ));
        }
        for (id, result) in results {
            let state = match result {
                Ok(value) => FutureState::Resolved(value),
                Err(exc) => FutureState::Failed(Box::new(exc)),
            };
            self.futures.insert(id, state);
        }
        Ok(())
    }

    fn pending_futures(&self) -> Vec<u32> {
        self.futures
            .iter()
            .filter(|(_, state)| matches!(state, FutureState::Pending))
            .map(|(id, _)| *id)
            .collect()
    }

    fn new_call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id += 1;
        self.pending_call_id = Some(id);
        id
    }

    fn collect_garbage(&mut self) {
        let resolved = self.futures.values().filter_map(|state| match state {
            FutureState::Resolved(value) => Some(value),
            _ => None,
        });
        let roots = self
            .stack
            .iter()
            .chain(self.globals.iter())
            .chain(self.exc_stack.iter())
            .chain(self.frames.iter().flat_map(|f| f.locals.iter()))
            .chain(resolved);
        self.heap.collect_garbage(roots);
    }

    fn current_frame(&self) -> &Frame {
        match self.frames.last() {
            Some(frame) => frame,
            None => unreachable!("the VM always runs with at least one frame"),
        }
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => unreachable!("the VM always runs with at least one frame"),
        }
    }

    fn current_code(&self) -> &'a Code {
        let code: &'a [Code] = self.code;
        &code[self.current_frame().code as usize]
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::None)
    }

    /// Pops `n` values, returned in the order they were pushed.
    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    fn peek(&self) -> &Value {
        self.stack.last().unwrap_or(&Value::None)
    }

    /// Pops keyword values and pairs them with the call site's keyword names.
    fn pop_kwargs(&mut self, kwnames: Option<u32>) -> Vec<(String, Value)> {
        let Some(idx) = kwnames else {
            return Vec::new();
        };
        let names = &self.current_code().kwnames[idx as usize];
        let values = self.pop_n(names.len());
        names.iter().cloned().zip(values).collect()
    }

    fn jump(&mut self, target: u32) {
        self.current_frame_mut().ip = target as usize;
    }

    /// Executes one instruction.
    fn step(&mut self) -> RunResult<Option<FrameExit>> {
        self.heap.tracker.check_time()?;
        if self.heap.should_gc() {
            self.collect_garbage();
        }

        let code = self.current_code();
        let frame = self.current_frame_mut();
        let ip = frame.ip;
        let Some(&op) = code.ops.get(ip) else {
            return Err(RunError::new(ExcType::RuntimeError, "instruction pointer out of range"));
        };
        frame.ip += 1;
        let stack_depth = self.stack.len() - self.current_frame().stack_base;
        self.tracer.on_instruction(ip, op.name(), stack_depth, self.frames.len());

        match op {
            Opcode::LoadConst(idx) => self.stack.push(code.consts[idx as usize].clone()),
            Opcode::LoadLocal(idx) => {
                let value = self.current_frame().locals[idx as usize].clone();
                if matches!(value, Value::Undefined) {
                    let name = &code.local_names[idx as usize];
                    return Err(RunError::new(
                        ExcType::UnboundLocalError,
                        format!("cannot access local variable '{name}' where it is not associated with a value"),
                    ));
                }
                self.stack.push(value);
            }
            Opcode::StoreLocal(idx) => {
                let value = self.pop();
                self.current_frame_mut().locals[idx as usize] = value;
            }
            Opcode::LoadGlobal(idx) => {
                let value = self.globals.get(idx as usize).cloned().unwrap_or(Value::Undefined);
                if matches!(value, Value::Undefined) {
                    let name = self.global_names.get(idx as usize).map_or("?", String::as_str);
                    return Err(RunError::new(
                        ExcType::NameError,
                        format!("name '{name}' is not defined"),
                    ));
                }
                self.stack.push(value);
            }
            Opcode::StoreGlobal(idx) => {
                let value = self.pop();
                let idx = idx as usize;
                if idx >= self.globals.len() {
                    self.globals.resize(idx + 1, Value::Undefined);
                }
                self.globals[idx] = value;
            }
            Opcode::LoadBuiltin(builtin) => self.stack.push(Value::Builtin(builtin)),
            Opcode::LoadExcClass(exc_type) => self.stack.push(Value::ExcClass(exc_type)),

            Opcode::Pop => {
                self.pop();
            }
            Opcode::Dup => {
                let value = self.peek().clone();
                self.stack.push(value);
            }
            Opcode::Dup2 => {
                let len = self.stack.len();
                let pair = self.stack[len - 2..].to_vec();
                self.stack.extend(pair);
            }
            Opcode::Rot2 => {
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot3 => {
                let len = self.stack.len();
                self.stack[len - 3..].rotate_right(1);
            }

            Opcode::Binary(op) => {
                let b = self.pop();
                let a = self.pop();
                let result = ops::binary_op(self.heap, op, &a, &b)?;
                self.stack.push(result);
            }
            Opcode::Inplace(op) => {
                let b = self.pop();
                let a = self.pop();
                let result = ops::inplace_op(self.heap, op, &a, &b)?;
                self.stack.push(result);
            }
            Opcode::Compare(op) => {
                let b = self.pop();
                let a = self.pop();
                let result = ops::compare_op(self.heap, op, &a, &b)?;
                self.stack.push(Value::Bool(result));
            }
            Opcode::Not => {
                let value = self.pop();
                self.stack.push(Value::Bool(!value.is_truthy(self.heap)));
            }
            Opcode::Neg => {
                let value = self.pop();
                self.stack.push(ops::unary_neg(self.heap, &value)?);
            }
            Opcode::Pos => {
                let value = self.pop();
                self.stack.push(ops::unary_pos(self.heap, &value)?);
            }

            Opcode::BuildList(n) => {
                let items = self.pop_n(n as usize);
                let list = self.heap.alloc_list(items)?;
                self.stack.push(list);
            }
            Opcode::BuildTuple(n) => {
                let items = self.pop_n(n as usize);
                self.stack.push(Value::Tuple(items));
            }
            Opcode::BuildDict(n) => {
                let items = self.pop_n(2 * n as usize);
                let mut dict = Dict::default();
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    let hash_key = HashKey::new(&key, self.heap)?;
                    dict.insert(hash_key, key, value);
                }
                let dict = self.heap.alloc(HeapData::Dict(dict))?;
                self.stack.push(dict);
            }
            Opcode::BuildString(n) => {
                let parts = self.pop_n(n as usize);
                let mut out = String::new();
                for part in &parts {
                    out.push_str(&part.py_str(self.heap));
                }
                self.heap.tracker.check_large_result(out.len())?;
                self.stack.push(Value::Str(out));
            }
            Opcode::FormatValue { conversion, spec } => {
                let value = self.pop();
                let value = match conversion {
                    Conversion::None => value,
                    Conversion::Str => Value::Str(value.py_str(self.heap)),
                    Conversion::Repr => Value::Str(value.py_repr(self.heap)),
                };
                let spec = match spec.map(|idx| &code.consts[idx as usize]) {
                    Some(Value::Str(spec)) => spec.as_str(),
                    _ => "",
                };
                let formatted = ops::format_value(self.heap, &value, spec)?;
                self.stack.push(Value::Str(formatted));
            }
            Opcode::BuildSlice => {
                let parts = self.pop_n(3);
                let mut bounds = [None; 3];
                for (bound, part) in bounds.iter_mut().zip(&parts) {
                    *bound = match part {
                        Value::None => None,
                        Value::Int(i) => Some(*i),
                        Value::Bool(b) => Some(i64::from(*b)),
                        _ => {
                            return Err(RunError::type_error(
                                "slice indices must be integers or None or have an __index__ method",
                            ));
                        }
                    };
                }
                let [start, stop, step] = bounds;
                self.stack.push(Value::Slice { start, stop, step });
            }
            Opcode::ToTuple => {
                let value = self.pop();
                let items = match value {
                    Value::Tuple(items) => items,
                    other => self.heap.iter_items(&other).map_err(|_| {
                        RunError::type_error(format!(
                            "argument after * must be an iterable, not {}",
                            other.type_name(self.heap)
                        ))
                    })?,
                };
                self.stack.push(Value::Tuple(items));
            }
            Opcode::UnpackSequence(n) => {
                let value = self.pop();
                let items = self.unpack(&value, n as usize)?;
                self.stack.extend(items.into_iter().rev());
            }

            Opcode::Subscript => {
                let index = self.pop();
                let object = self.pop();
                let value = self.subscript(&object, &index)?;
                self.stack.push(value);
            }
            Opcode::StoreSubscript => {
                let index = self.pop();
                let object = self.pop();
                let value = self.pop();
                self.store_subscript(&object, index, value)?;
            }
            Opcode::GetAttr(idx) => {
                let object = self.pop();
                let name = &code.names[idx as usize];
                return self.get_attr(object, name);
            }

            Opcode::Call { args, kwnames } => {
                let kwargs = self.pop_kwargs(kwnames);
                let args = self.pop_n(args as usize);
                let func = self.pop();
                return self.call_value(func, ArgValues::new(args, kwargs));
            }
            Opcode::CallVar { kwnames } => {
                let kwargs = self.pop_kwargs(kwnames);
                let args = match self.pop() {
                    Value::Tuple(items) => items,
                    _ => Vec::new(),
                };
                let func = self.pop();
                return self.call_value(func, ArgValues::new(args, kwargs));
            }
            Opcode::CallMethod { name, args, kwnames } => {
                let kwargs = self.pop_kwargs(kwnames);
                let args = self.pop_n(args as usize);
                let object = self.pop();
                let name = &code.names[name as usize];
                return self.call_method(object, name, ArgValues::new(args, kwargs));
            }
            Opcode::CallMethodVar { name, kwnames } => {
                let kwargs = self.pop_kwargs(kwnames);
                let args = match self.pop() {
                    Value::Tuple(items) => items,
                    _ => Vec::new(),
                };
                let object = self.pop();
                let name = &code.names[name as usize];
                return self.call_method(object, name, ArgValues::new(args, kwargs));
            }

            Opcode::Jump(target) => self.jump(target),
            Opcode::JumpIfFalse(target) => {
                let value = self.pop();
                if !value.is_truthy(self.heap) {
                    self.jump(target);
                }
            }
            Opcode::JumpIfTrue(target) => {
                let value = self.pop();
                if value.is_truthy(self.heap) {
                    self.jump(target);
                }
            }
            Opcode::JumpIfFalseOrPop(target) => {
                if self.peek().is_truthy(self.heap) {
                    self.pop();
                } else {
                    self.jump(target);
                }
            }
            Opcode::JumpIfTrueOrPop(target) => {
                if self.peek().is_truthy(self.heap) {
                    self.jump(target);
                } else {
                    self.pop();
                }
            }
            Opcode::GetIter => {
                let value = self.pop();
                let iter = self.heap.make_iter(&value)?;
                self.stack.push(iter);
            }
            Opcode::ForIter(target) => {
                let next = match self.peek() {
                    Value::Ref(id) => self.heap.iter_next(*id),
                    _ => None,
                };
                match next {
                    Some(value) => self.stack.push(value),
                    None => {
                        self.pop();
                        self.jump(target);
                    }
                }
            }

            Opcode::MakeFunction { function, defaults } => {
                let defaults = self.pop_n(defaults as usize);
                self.stack
                    .push(Value::Function(Box::new(Function { code: function, defaults })));
            }
            Opcode::Return => {
                let value = self.pop();
                let frame = self.frames.pop();
                if let Some(frame) = frame {
                    self.stack.truncate(frame.stack_base);
                    self.exc_stack.truncate(frame.exc_base);
                }
                if self.frames.is_empty() {
                    return Ok(Some(FrameExit::Return(value)));
                }
                self.stack.push(value);
                self.tracer.on_return(self.frames.len());
            }
            Opcode::Await => return self.await_top(),
            Opcode::ImportModule(module) => self.stack.push(Value::Module(module)),

            Opcode::SetupExcept(handler) => {
                let block = Block {
                    handler,
                    stack_depth: self.stack.len(),
                    exc_depth: self.exc_stack.len(),
                };
                self.current_frame_mut().blocks.push(block);
            }
            Opcode::PopBlock => {
                self.current_frame_mut().blocks.pop();
            }
            Opcode::PopExcept => {
                self.exc_stack.pop();
                self.tracer.on_exception_pop(self.exc_stack.len());
            }
            Opcode::Raise => {
                let value = self.pop();
                return Err(exceptions::raise_value(value));
            }
            Opcode::Reraise => return Err(self.reraise()),
            Opcode::CheckExcMatch => {
                let class = self.pop();
                let exc = self.pop();
                let matched = exceptions::exception_matches(&exc, &class)?;
                self.stack.push(Value::Bool(matched));
            }
        }
        Ok(None)
    }

    /// Awaits the value on top of the stack.
    ///
    /// When a future is still pending the instruction is rewound, so the same `await` runs
    /// again after the host resolves it.
    fn await_top(&mut self) -> RunResult<Option<FrameExit>> {
        let ids: Vec<u32> = match self.peek() {
            Value::Future(id) => vec![*id],
            Value::Gather(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Future(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            other => {
                return Err(RunError::type_error(format!(
                    "object {} can't be used in 'await' expression",
                    other.type_name(self.heap)
                )));
            }
        };

        if ids
            .iter()
            .any(|id| matches!(self.futures.get(id), Some(FutureState::Pending)))
        {
            self.current_frame_mut().ip -= 1;
            let pending = self.pending_futures();
            self.tracer.on_pause("futures", None);
            return Ok(Some(FrameExit::ResolveFutures(pending)));
        }

        let awaited = self.pop();
        let result = |value: &Value| -> RunResult<Value> {
            match value {
                Value::Future(id) => match self.futures.get(id) {
                    Some(FutureState::Resolved(value)) => Ok(value.clone()),
                    Some(FutureState::Failed(exc)) => {
                        let mut exc = exc.clone();
                        exc.traceback.clear();
                        Err(RunError::Exc(exc))
                    }
                    _ => Err(RunError::new(
                        ExcType::RuntimeError,
                        format!("future {id} was never created"),
                    )),
                },
                other => Ok(other.clone()),
            }
        };
        let value = match &awaited {
            Value::Gather(items) => {
                let values = items.iter().map(&result).collect::<RunResult<Vec<_>>>()?;
                self.heap.alloc_list(values)?
            }
            other => result(other)?,
        };
        self.stack.push(value);
        Ok(None)
    }
}
