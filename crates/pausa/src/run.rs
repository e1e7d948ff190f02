//! Public interface for running pausa code.

use ahash::AHashSet;

use crate::{
    ExcType, Exception,
    args::ArgValues,
    bytecode::{Code, Compiler, FrameExit, VM, VMSnapshot},
    exception::{ExcInstance, RunError, StackFrame},
    io::{PrintWriter, StdPrint},
    object::Object,
    os::OsFunction,
    parse::parse,
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    value::{Heap, Value},
};

/// Primary interface for running pausa code.
///
/// `Runner` supports two execution modes:
/// - **Simple execution**: Use `run()` or `run_no_limits()` to run code to completion. Calls to
///   external functions and OS operations raise `NotImplementedError` inside the sandbox.
/// - **Iterative execution**: Use `start()` to start execution which will pause at external
///   function calls and OS operations, and can be resumed later
///
/// # Example
/// ```
/// use pausa::{Runner, Object};
///
/// let runner = Runner::new("x + 1".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
/// let result = runner.run_no_limits(vec![Object::Int(41)]).unwrap();
/// assert_eq!(result, Object::Int(42));
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Runner {
    /// The underlying executor containing compiled code.
    executor: Executor,
}

impl Runner {
    /// Parses and compiles the given code.
    ///
    /// No heap or globals are created yet, call `start()` or `run()` with inputs to execute.
    ///
    /// # Arguments
    /// * `code` - The Python code to execute
    /// * `script_name` - The script name for error messages
    /// * `input_names` - Names of input variables, bound as globals in this order
    /// * `external_functions` - Names of host functions the code may call
    ///
    /// # Errors
    /// Returns `Exception` if the code cannot be parsed or compiled, or a name is declared twice.
    pub fn new(
        code: String,
        script_name: &str,
        input_names: Vec<String>,
        external_functions: Vec<String>,
    ) -> Result<Self, Exception> {
        Executor::new(code, script_name, input_names, external_functions).map(|executor| Self { executor })
    }

    /// Returns the source code this runner was compiled from.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.executor.code
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.executor.script_name
    }

    #[must_use]
    pub fn input_names(&self) -> &[String] {
        &self.executor.input_names
    }

    #[must_use]
    pub fn external_functions(&self) -> &[String] {
        &self.executor.external_functions
    }

    /// Executes the code to completion without pausing.
    ///
    /// External function calls and OS operations raise `NotImplementedError` where they are
    /// made, so sandboxed code can catch them.
    ///
    /// # Arguments
    /// * `inputs` - Values for the input names, in the same order
    /// * `resource_tracker` - Custom resource tracker implementation
    /// * `print` - print implementation
    pub fn run(
        &self,
        inputs: Vec<Object>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<Object, Exception> {
        self.executor.run(inputs, resource_tracker, print, &mut NoopTracer)
    }

    /// Same as [`Runner::run`] with every VM event reported to `tracer`.
    pub fn run_traced(
        &self,
        inputs: Vec<Object>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<Object, Exception> {
        self.executor.run(inputs, resource_tracker, print, tracer)
    }

    /// Executes the code to completion with no resource limits, printing to stdout.
    pub fn run_no_limits(&self, inputs: Vec<Object>) -> Result<Object, Exception> {
        self.executor.run(inputs, NoLimitTracker, &mut StdPrint, &mut NoopTracer)
    }

    /// Serializes the runner to a binary format.
    ///
    /// The serialized data can be stored and later restored with `load()`.
    /// This allows caching compiled code to avoid re-parsing on subsequent runs.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a runner from binary format.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Starts execution with the given inputs and resource tracker.
    ///
    /// Creates the heap and globals, then runs until the code needs the host:
    /// - `RunProgress::FunctionCall { ..., state }` - external function call, call `state.run(return_value)` to resume
    /// - `RunProgress::OsCall { ..., state }` - filesystem or environment operation, resumed the same way
    /// - `RunProgress::ResolveFutures(state)` - every path awaits a deferred call, call `state.resume(results)`
    /// - `RunProgress::Complete(value)` - execution finished
    ///
    /// The runner itself is not consumed, it can start any number of runs.
    ///
    /// # Errors
    /// Returns `Exception` if:
    /// - The number of inputs doesn't match the number of input names
    /// - An input value is invalid (e.g., `Object::Repr`)
    /// - An exception escapes the code
    pub fn start<T: ResourceTracker>(
        &self,
        inputs: Vec<Object>,
        resource_tracker: T,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, Exception> {
        self.start_traced(inputs, resource_tracker, print, &mut NoopTracer)
    }

    /// Same as [`Runner::start`] with every VM event reported to `tracer`.
    pub fn start_traced<T: ResourceTracker>(
        &self,
        inputs: Vec<Object>,
        resource_tracker: T,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<RunProgress<T>, Exception> {
        let executor = self.executor.clone();
        let mut heap = Heap::new(resource_tracker);
        let mut globals = executor.prepare_globals(inputs, &mut heap)?;

        let mut vm = VM::restore(
            VMSnapshot::new(),
            &mut heap,
            &mut globals,
            &executor.functions,
            &executor.global_names,
            print,
            tracer,
        );
        let vm_result = vm.run();
        let vm_state = vm.snapshot();

        handle_vm_result(vm_result, vm_state, executor, heap, globals)
    }
}

/// Result of a single step of iterative execution.
///
/// This enum owns the execution state, ensuring type-safe state transitions.
/// - `FunctionCall` and `OsCall` contain the request and the state to resume
/// - `ResolveFutures` contains pending futures that need resolution before continuing
/// - `Complete` contains just the final value (execution is done)
///
/// # Type Parameters
/// * `T` - Resource tracker implementation (e.g., `NoLimitTracker` or `LimitedTracker`)
///
/// Serialization requires `T: Serialize + Deserialize`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound(serialize = "T: serde::Serialize", deserialize = "T: serde::de::DeserializeOwned"))]
pub enum RunProgress<T: ResourceTracker> {
    /// Execution paused at an external function call.
    ///
    /// The host can choose how to handle this:
    /// - **Sync resolution**: Call `state.run(return_value)` to push the result and continue
    /// - **Async resolution**: Call `state.run_pending()` to push a future and continue
    ///
    /// When using async resolution, the code continues and may `await` the future later.
    /// If the future isn't resolved when awaited, execution yields with `ResolveFutures`.
    FunctionCall {
        /// The name of the function being called.
        function_name: String,
        /// The positional arguments passed to the function.
        args: Vec<Object>,
        /// The keyword arguments passed to the function (key, value pairs).
        kwargs: Vec<(Object, Object)>,
        /// Unique identifier for this call within the run.
        call_id: u32,
        /// The execution state that can be resumed with a return value.
        state: Snapshot<T>,
    },
    /// Execution paused for an OS-level operation.
    ///
    /// The host should perform the operation (or emulate it) and call `state.run(return_value)`
    /// to provide the result and continue. The interpreter never performs I/O itself.
    OsCall {
        /// The OS function to execute.
        function: OsFunction,
        /// The positional arguments, the path first for `pathlib.Path` methods.
        args: Vec<Object>,
        /// The keyword arguments passed to the function (key, value pairs).
        kwargs: Vec<(Object, Object)>,
        /// Unique identifier for this call within the run.
        call_id: u32,
        /// The execution state that can be resumed with a return value.
        state: Snapshot<T>,
    },
    /// Every path is blocked awaiting futures created by `run_pending()`.
    ///
    /// Use `state.resume(results)` to provide results for pending calls,
    /// access the pending call ids with `.pending_call_ids()`
    ResolveFutures(FutureSnapshot<T>),
    /// Execution completed with a final result.
    Complete(Object),
}

impl<T: ResourceTracker> RunProgress<T> {
    /// Consumes the `RunProgress` and returns external function call info and state.
    ///
    /// Returns (function_name, positional_args, keyword_args, call_id, state).
    #[must_use]
    #[expect(clippy::type_complexity)]
    pub fn into_function_call(self) -> Option<(String, Vec<Object>, Vec<(Object, Object)>, u32, Snapshot<T>)> {
        match self {
            Self::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state,
            } => Some((function_name, args, kwargs, call_id, state)),
            _ => None,
        }
    }

    /// Consumes the `RunProgress` and returns OS call info and state.
    ///
    /// Returns (function, positional_args, keyword_args, call_id, state).
    #[must_use]
    #[expect(clippy::type_complexity)]
    pub fn into_os_call(self) -> Option<(OsFunction, Vec<Object>, Vec<(Object, Object)>, u32, Snapshot<T>)> {
        match self {
            Self::OsCall {
                function,
                args,
                kwargs,
                call_id,
                state,
            } => Some((function, args, kwargs, call_id, state)),
            _ => None,
        }
    }

    /// Consumes the `RunProgress` and returns the final value.
    #[must_use]
    pub fn into_complete(self) -> Option<Object> {
        match self {
            Self::Complete(value) => Some(value),
            _ => None,
        }
    }

    /// Consumes the `RunProgress` and returns the pending futures state.
    #[must_use]
    pub fn into_resolve_futures(self) -> Option<FutureSnapshot<T>> {
        match self {
            Self::ResolveFutures(state) => Some(state),
            _ => None,
        }
    }
}

impl<T: ResourceTracker + serde::Serialize> RunProgress<T> {
    /// Serializes the execution state to a binary format.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }
}

impl<T: ResourceTracker + serde::de::DeserializeOwned> RunProgress<T> {
    /// Deserializes execution state from binary format.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Execution state that can be resumed after an external function call or OS call.
///
/// - `run(result)`: Resume with the call's return value or exception (sync pattern)
/// - `run_pending()`: Resume with a future that can be awaited later (async pattern)
///
/// # Type Parameters
/// * `T` - Resource tracker implementation
///
/// Serialization requires `T: Serialize + Deserialize`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound(serialize = "T: serde::Serialize", deserialize = "T: serde::de::DeserializeOwned"))]
pub struct Snapshot<T: ResourceTracker> {
    /// The executor containing compiled code.
    executor: Executor,
    /// The VM state containing stack, frames, and exception state.
    vm_state: VMSnapshot,
    /// The heap containing all allocated objects.
    heap: Heap<T>,
    /// Global variable slots.
    globals: Vec<Value>,
    /// The call_id of the request that created this Snapshot.
    pending_call_id: u32,
}

/// Marker passed to [`Snapshot::run`] to answer a call with a future.
#[derive(Debug)]
pub struct PausaFuture;

/// Return value or exception from an external function.
#[derive(Debug)]
pub enum ExternalResult {
    /// Continues execution with the return value from the external function.
    Return(Object),
    /// Continues execution with the exception raised by the external function.
    Error(Exception),
    /// Pending future, resolved later through [`FutureSnapshot::resume`].
    Future,
}

impl From<Object> for ExternalResult {
    fn from(value: Object) -> Self {
        Self::Return(value)
    }
}

impl From<Exception> for ExternalResult {
    fn from(exception: Exception) -> Self {
        Self::Error(exception)
    }
}

impl From<PausaFuture> for ExternalResult {
    fn from(_: PausaFuture) -> Self {
        Self::Future
    }
}

impl<T: ResourceTracker> Snapshot<T> {
    /// The call id of the request this snapshot is waiting on.
    #[must_use]
    pub fn call_id(&self) -> u32 {
        self.pending_call_id
    }

    /// Continues execution with the return value or exception from the external function.
    ///
    /// Consumes self and returns the next execution progress.
    ///
    /// # Arguments
    /// * `result` - The return value or exception from the external function
    /// * `print` - The print writer to use for output
    pub fn run(
        self,
        result: impl Into<ExternalResult>,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, Exception> {
        self.run_traced(result, print, &mut NoopTracer)
    }

    /// Same as [`Snapshot::run`] with every VM event reported to `tracer`.
    pub fn run_traced(
        self,
        result: impl Into<ExternalResult>,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<RunProgress<T>, Exception> {
        let Self {
            executor,
            vm_state,
            mut heap,
            mut globals,
            pending_call_id: _,
        } = self;

        // convert the host value before the VM borrows the heap
        let resume = match result.into() {
            ExternalResult::Return(obj) => match Value::from_object(obj, &mut heap) {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(err),
            },
            ExternalResult::Error(exc) => Err(RunError::from(exc)),
            ExternalResult::Future => Ok(None),
        };

        let mut vm = VM::restore(
            vm_state,
            &mut heap,
            &mut globals,
            &executor.functions,
            &executor.global_names,
            print,
            tracer,
        );
        let vm_result = match resume {
            Ok(Some(value)) => {
                vm.resume_value(value);
                vm.run()
            }
            Ok(None) => vm.resume_future().and_then(|()| vm.run()),
            Err(RunError::Exc(exc)) => vm.resume_error(*exc).and_then(|()| vm.run()),
            Err(err @ RunError::Uncatchable(_)) => Err(err),
        };
        let vm_state = vm.snapshot();

        handle_vm_result(vm_result, vm_state, executor, heap, globals)
    }

    /// Continues execution by pushing a future instead of a concrete value.
    ///
    /// The code can `await` this future later. If it does so before the host resolved it,
    /// execution yields with `RunProgress::ResolveFutures`; the host then provides the
    /// result via `FutureSnapshot::resume()`.
    pub fn run_pending(self, print: &mut impl PrintWriter) -> Result<RunProgress<T>, Exception> {
        self.run(PausaFuture, print)
    }
}

/// Execution state paused while waiting for future results.
///
/// Results may be supplied for a subset of the pending ids: the resolved futures are
/// recorded and execution continues until it blocks again.
///
/// # Type Parameters
/// * `T` - Resource tracker implementation
///
/// Serialization requires `T: Serialize + Deserialize`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound(serialize = "T: serde::Serialize", deserialize = "T: serde::de::DeserializeOwned"))]
pub struct FutureSnapshot<T: ResourceTracker> {
    /// The executor containing compiled code.
    executor: Executor,
    /// The VM state containing stack, frames, and exception state.
    vm_state: VMSnapshot,
    /// The heap containing all allocated objects.
    heap: Heap<T>,
    /// Global variable slots.
    globals: Vec<Value>,
    /// The pending call_ids that this snapshot is waiting on.
    /// Used to validate that resume() only receives known call_ids.
    pending_call_ids: Vec<u32>,
}

impl<T: ResourceTracker> FutureSnapshot<T> {
    #[must_use]
    pub fn pending_call_ids(&self) -> &[u32] {
        &self.pending_call_ids
    }

    /// Resumes execution with results for some or all pending futures.
    ///
    /// # Arguments
    /// * `results` - List of (call_id, result) pairs. Can be a subset of pending calls;
    ///   an `ExternalResult::Future` entry leaves that call pending.
    /// * `print` - Writer for print output
    ///
    /// # Returns
    /// * `RunProgress::ResolveFutures` - More futures need resolution
    /// * `RunProgress::FunctionCall` / `RunProgress::OsCall` - VM hit another host call
    /// * `RunProgress::Complete` - Execution finished
    ///
    /// # Errors
    /// Returns `Err(Exception)` if any call_id in `results` is not in the pending set, or an
    /// exception escapes the code.
    pub fn resume(
        self,
        results: Vec<(u32, ExternalResult)>,
        print: &mut impl PrintWriter,
    ) -> Result<RunProgress<T>, Exception> {
        self.resume_traced(results, print, &mut NoopTracer)
    }

    /// Same as [`FutureSnapshot::resume`] with every VM event reported to `tracer`.
    pub fn resume_traced(
        self,
        results: Vec<(u32, ExternalResult)>,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<RunProgress<T>, Exception> {
        let Self {
            executor,
            vm_state,
            mut heap,
            mut globals,
            pending_call_ids,
        } = self;

        if let Some((call_id, _)) = results.iter().find(|(call_id, _)| !pending_call_ids.contains(call_id)) {
            return Err(Exception::runtime_error(format!(
                "unknown call_id {call_id}, expected one of: {pending_call_ids:?}"
            )));
        }

        let mut resolved = Vec::with_capacity(results.len());
        for (call_id, ext_result) in results {
            match ext_result {
                ExternalResult::Return(obj) => {
                    let value = Value::from_object(obj, &mut heap).map_err(|err| {
                        let exc = executor.exception_from(err);
                        Exception::runtime_error(format!("Invalid return type for call {call_id}: {exc}"))
                    })?;
                    resolved.push((call_id, Ok(value)));
                }
                ExternalResult::Error(exc) => resolved.push((call_id, Err(exc_instance(exc)))),
                // same as not returning this id
                ExternalResult::Future => {}
            }
        }

        let mut vm = VM::restore(
            vm_state,
            &mut heap,
            &mut globals,
            &executor.functions,
            &executor.global_names,
            print,
            tracer,
        );
        let vm_result = vm.resolve_futures(resolved).and_then(|()| vm.run());
        let vm_state = vm.snapshot();

        handle_vm_result(vm_result, vm_state, executor, heap, globals)
    }
}

impl<T: ResourceTracker + serde::Serialize> FutureSnapshot<T> {
    /// Serializes the paused state to a binary format.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }
}

impl<T: ResourceTracker + serde::de::DeserializeOwned> FutureSnapshot<T> {
    /// Deserializes paused state from binary format.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl<T: ResourceTracker + serde::Serialize> Snapshot<T> {
    /// Serializes the paused state to a binary format.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }
}

impl<T: ResourceTracker + serde::de::DeserializeOwned> Snapshot<T> {
    /// Deserializes paused state from binary format.
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// A host exception as the VM raises it, without a traceback.
fn exc_instance(exc: Exception) -> ExcInstance {
    match RunError::from(exc) {
        RunError::Exc(exc) | RunError::Uncatchable(exc) => *exc,
    }
}

/// Converts a `FrameExit` into the `RunProgress` handed to the host.
fn handle_vm_result<T: ResourceTracker>(
    result: Result<FrameExit, RunError>,
    vm_state: VMSnapshot,
    executor: Executor,
    heap: Heap<T>,
    globals: Vec<Value>,
) -> Result<RunProgress<T>, Exception> {
    match result {
        Ok(FrameExit::Return(value)) => Ok(RunProgress::Complete(value.to_object(&heap))),
        Ok(FrameExit::ExternalCall { ext_id, args, call_id }) => {
            let function_name = executor
                .external_functions
                .get(ext_id as usize)
                .cloned()
                .ok_or_else(|| Exception::runtime_error(format!("unknown external function id {ext_id}")))?;
            let (args, kwargs) = args_to_objects(args, &heap);
            Ok(RunProgress::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state: Snapshot {
                    executor,
                    vm_state,
                    heap,
                    globals,
                    pending_call_id: call_id,
                },
            })
        }
        Ok(FrameExit::OsCall { function, args, call_id }) => {
            let (args, kwargs) = args_to_objects(args, &heap);
            Ok(RunProgress::OsCall {
                function,
                args,
                kwargs,
                call_id,
                state: Snapshot {
                    executor,
                    vm_state,
                    heap,
                    globals,
                    pending_call_id: call_id,
                },
            })
        }
        Ok(FrameExit::ResolveFutures(pending_call_ids)) => Ok(RunProgress::ResolveFutures(FutureSnapshot {
            executor,
            vm_state,
            heap,
            globals,
            pending_call_ids,
        })),
        Err(err) => Err(executor.exception_from(err)),
    }
}

fn args_to_objects(args: ArgValues, heap: &Heap<impl ResourceTracker>) -> (Vec<Object>, Vec<(Object, Object)>) {
    let positional = args.args.iter().map(|v| v.to_object(heap)).collect();
    let kwargs = args
        .kwargs
        .into_iter()
        .map(|(name, v)| (Object::String(name), v.to_object(heap)))
        .collect();
    (positional, kwargs)
}

/// Compiled code plus everything needed to start a run and report errors.
///
/// This is an internal type used by [`Runner`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Executor {
    /// Script name used in tracebacks.
    script_name: String,
    /// Source code for error reporting (extracting preview lines for tracebacks).
    code: String,
    input_names: Vec<String>,
    external_functions: Vec<String>,
    /// Name of every global slot, external functions first, then inputs.
    global_names: Vec<String>,
    /// Compiled code objects, index 0 is the module body.
    functions: Vec<Code>,
}

impl Executor {
    fn new(
        code: String,
        script_name: &str,
        input_names: Vec<String>,
        external_functions: Vec<String>,
    ) -> Result<Self, Exception> {
        let mut seen = AHashSet::new();
        for name in external_functions.iter().chain(&input_names) {
            if !seen.insert(name.as_str()) {
                return Err(Exception::new(
                    ExcType::ValueError,
                    Some(format!("name '{name}' is declared more than once")),
                ));
            }
        }

        let nodes = parse(&code).map_err(|e| e.into_python_exc(script_name, &code))?;
        let compiled = Compiler::compile_module(&nodes, &external_functions, &input_names)
            .map_err(|e| e.into_python_exc(script_name, &code))?;

        Ok(Self {
            script_name: script_name.to_owned(),
            code,
            input_names,
            external_functions,
            global_names: compiled.global_names,
            functions: compiled.functions,
        })
    }

    /// Runs to completion, raising `NotImplementedError` for every host request.
    fn run(
        &self,
        inputs: Vec<Object>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
        tracer: &mut impl VmTracer,
    ) -> Result<Object, Exception> {
        let mut heap = Heap::new(resource_tracker);
        let mut globals = self.prepare_globals(inputs, &mut heap)?;

        let mut vm = VM::restore(
            VMSnapshot::new(),
            &mut heap,
            &mut globals,
            &self.functions,
            &self.global_names,
            print,
            tracer,
        );
        let mut result = vm.run();
        let value = loop {
            let message = match result {
                Ok(FrameExit::Return(value)) => break Ok(value),
                Err(err) => break Err(err),
                Ok(FrameExit::ExternalCall { ext_id, .. }) => {
                    let name = self.external_functions.get(ext_id as usize).map_or("?", String::as_str);
                    format!("External function '{name}' not implemented with standard execution")
                }
                Ok(FrameExit::OsCall { function, .. }) => {
                    format!("OS function '{function}' not implemented with standard execution")
                }
                Ok(FrameExit::ResolveFutures(_)) => {
                    break Err(RunError::new(ExcType::RuntimeError, "no futures can be resolved in standard execution"));
                }
            };
            let exc = ExcInstance::new(ExcType::NotImplementedError, Some(message));
            result = vm.resume_error(exc).and_then(|()| vm.run());
        };
        drop(vm);

        match value {
            Ok(value) => Ok(value.to_object(&heap)),
            Err(err) => Err(self.exception_from(err)),
        }
    }

    /// Builds the global slots: external functions, then inputs, then unset names.
    fn prepare_globals(
        &self,
        inputs: Vec<Object>,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> Result<Vec<Value>, Exception> {
        if inputs.len() != self.input_names.len() {
            return Err(Exception::runtime_error(format!(
                "expected {} inputs, got {}",
                self.input_names.len(),
                inputs.len()
            )));
        }
        let mut globals = Vec::with_capacity(self.global_names.len());
        globals.extend((0..self.external_functions.len()).map(|id| Value::ExtFunction(id as u32)));
        for input in inputs {
            let value = Value::from_object(input, heap)
                .map_err(|e| Exception::runtime_error(format!("invalid input type: {}", self.exception_from(e))))?;
            globals.push(value);
        }
        globals.resize(self.global_names.len(), Value::Undefined);
        Ok(globals)
    }

    /// Converts a VM error into the public exception, resolving its traceback.
    fn exception_from(&self, err: RunError) -> Exception {
        let (RunError::Exc(exc) | RunError::Uncatchable(exc)) = err;
        let ExcInstance {
            exc_type,
            message,
            traceback,
            resource_error,
        } = *exc;
        // recorded innermost first while unwinding
        let frames = traceback
            .iter()
            .rev()
            .map(|raw| {
                let name = self.functions.get(raw.code).map(|code| code.name.as_str());
                StackFrame::from_position(raw.position, &self.script_name, name, &self.code)
            })
            .collect();
        Exception::new_full(exc_type, message, frames, resource_error)
    }
}
