//! The capability dispatch loop.
//!
//! [`Sandbox`] compiles guest code, starts it, and answers every pause from the handlers it
//! was built with until the run completes or fails.

use std::{
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use ahash::AHashMap;
use pausa::{ExcType, NoopTracer, Object, OsFunction, VmTracer};
use tracing::{debug, instrument, warn};

use crate::{
    CompileOptions, FunctionCall, HandlerFailure, HandlerResult, Limits, OsCall, Program, Progress, PseudoFs,
    SandboxError,
};

type Handler = Box<dyn Fn(&[Object], &[(String, Object)]) -> HandlerResult + Send + Sync>;

/// A host object answering function and OS calls.
///
/// Every method has a default that declines, so implementors only write what they support.
/// Returning `None` passes the call on to the next dispatch step.
pub trait Capabilities: Send + Sync {
    /// Function names this object answers. The sandbox declares them to the guest when no
    /// explicit external function list is given.
    fn function_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn call_function(&self, _call: &FunctionCall) -> Option<HandlerResult> {
        None
    }

    fn os_call(&self, _call: &OsCall) -> Option<HandlerResult> {
        None
    }
}

/// Result of a completed [`Sandbox::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// The value of the final expression statement, `None` if there is none.
    pub value: Object,
    /// Everything the guest printed.
    pub output: String,
    /// The filesystem after every write the guest made, when a [`PseudoFs`] was configured.
    pub fs: Option<PseudoFs>,
}

/// Builder and driver for sandboxed runs.
///
/// Function calls are routed to, in order:
/// 1. a handler registered with [`Sandbox::function`]
/// 2. a deferred handler registered with [`Sandbox::deferred_function`]
/// 3. the [`Capabilities`] object
///
/// and otherwise fail in the guest with `NameError`. OS calls go to the [`PseudoFs`], then the
/// callbacks registered with [`Sandbox::os_callback`], then the capabilities object, and
/// otherwise fail with `OSError`. A handler that panics fails the call with `RuntimeError`.
///
/// ```
/// use pausa::Object;
/// use pausa_sandbox::{HandlerResult, Sandbox};
///
/// let sandbox = Sandbox::new().function("add", |args, _kwargs| match args {
///     [Object::Int(a), Object::Int(b)] => HandlerResult::ok(Object::Int(a + b)),
///     _ => HandlerResult::error("TypeError", "add() takes two ints"),
/// });
/// let result = sandbox.run("print('adding')\nadd(x, 2)", vec![("x", Object::Int(40))]).unwrap();
/// assert_eq!(result.value, Object::Int(42));
/// assert_eq!(result.output, "adding\n");
/// ```
pub struct Sandbox {
    script_name: String,
    external_functions: Option<Vec<String>>,
    functions: AHashMap<String, Handler>,
    deferred: AHashMap<String, Handler>,
    os_callbacks: AHashMap<OsFunction, Handler>,
    capabilities: Option<Box<dyn Capabilities>>,
    pseudo_fs: Option<PseudoFs>,
    limits: Limits,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut deferred: Vec<&String> = self.deferred.keys().collect();
        deferred.sort();
        f.debug_struct("Sandbox")
            .field("script_name", &self.script_name)
            .field("external_functions", &self.external_functions)
            .field("functions", &functions)
            .field("deferred", &deferred)
            .field("os_callbacks", &self.os_callbacks.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities.is_some())
            .field("pseudo_fs", &self.pseudo_fs)
            .field("limits", &self.limits)
            .finish()
    }
}

fn boxed<F, R>(handler: F) -> Handler
where
    F: Fn(&[Object], &[(String, Object)]) -> R + Send + Sync + 'static,
    R: Into<HandlerResult>,
{
    Box::new(move |args, kwargs| handler(args, kwargs).into())
}

impl Sandbox {
    #[must_use]
    pub fn new() -> Self {
        Self {
            script_name: "main.py".to_owned(),
            external_functions: None,
            functions: AHashMap::new(),
            deferred: AHashMap::new(),
            os_callbacks: AHashMap::new(),
            capabilities: None,
            pseudo_fs: None,
            limits: Limits::default(),
        }
    }

    #[must_use]
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Declares the external functions explicitly instead of deriving them from the handlers.
    #[must_use]
    pub fn external_functions<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.external_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Registers a synchronous host function.
    #[must_use]
    pub fn function<F, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Object], &[(String, Object)]) -> R + Send + Sync + 'static,
        R: Into<HandlerResult>,
    {
        self.functions.insert(name.into(), boxed(handler));
        self
    }

    /// Registers a host function answered with a future.
    ///
    /// The guest receives an awaitable at call time. The handler runs when the guest blocks on
    /// it, together with every other deferred call pending at that point, in call order.
    #[must_use]
    pub fn deferred_function<F, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Object], &[(String, Object)]) -> R + Send + Sync + 'static,
        R: Into<HandlerResult>,
    {
        self.deferred.insert(name.into(), boxed(handler));
        self
    }

    /// Registers a callback for one OS operation.
    #[must_use]
    pub fn os_callback<F, R>(mut self, function: OsFunction, handler: F) -> Self
    where
        F: Fn(&[Object], &[(String, Object)]) -> R + Send + Sync + 'static,
        R: Into<HandlerResult>,
    {
        self.os_callbacks.insert(function, boxed(handler));
        self
    }

    /// Fallback for function names and OS operations that no explicit handler covers.
    #[must_use]
    pub fn capabilities(mut self, capabilities: impl Capabilities + 'static) -> Self {
        self.capabilities = Some(Box::new(capabilities));
        self
    }

    /// Serves filesystem and environment operations first. The final state is returned in
    /// [`RunResult::fs`].
    #[must_use]
    pub fn pseudo_fs(mut self, fs: PseudoFs) -> Self {
        self.pseudo_fs = Some(fs);
        self
    }

    /// Resource limits applied to every run. Validated when a run starts.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// External functions declared to the guest: the explicit list, or every handler name.
    ///
    /// A `Capabilities::function_names` that panics contributes no names.
    #[must_use]
    pub fn external_function_names(&self) -> Vec<String> {
        if let Some(names) = &self.external_functions {
            return names.clone();
        }
        let mut names: Vec<String> = self.functions.keys().chain(self.deferred.keys()).cloned().collect();
        if let Some(capabilities) = &self.capabilities
            && let Ok(extra) = guard("function_names", || capabilities.function_names())
        {
            names.extend(extra);
        }
        names.sort();
        names.dedup();
        names
    }

    /// Compiles `code` with this sandbox's names, without running it.
    pub fn compile(&self, code: &str, input_names: &[&str]) -> Result<Program, SandboxError> {
        let options = CompileOptions::new()
            .script_name(self.script_name.as_str())
            .inputs(input_names.iter().copied())
            .external_functions(self.external_function_names());
        Program::compile(code, &options)
    }

    /// Compiles and runs `code` to completion.
    pub fn run(&self, code: &str, inputs: Vec<(&str, Object)>) -> Result<RunResult, SandboxError> {
        self.run_traced(code, inputs, &mut NoopTracer)
    }

    /// Same as [`Sandbox::run`] with every VM event reported to `tracer`.
    #[instrument(name = "sandbox_run", skip_all, fields(script = %self.script_name))]
    pub fn run_traced(
        &self,
        code: &str,
        inputs: Vec<(&str, Object)>,
        tracer: &mut impl VmTracer,
    ) -> Result<RunResult, SandboxError> {
        let input_names: Vec<&str> = inputs.iter().map(|(name, _)| *name).collect();
        let program = self.compile(code, &input_names)?;

        let mut fs = self.pseudo_fs.clone();
        let mut output = String::new();
        let mut deferred_calls: BTreeMap<u32, FunctionCall> = BTreeMap::new();
        let mut progress = program.start_traced(inputs, &self.limits, tracer)?;
        loop {
            progress = match progress {
                Progress::Complete(value, fragment) => {
                    output.push_str(&fragment);
                    debug!(output_len = output.len(), "run complete");
                    return Ok(RunResult { value, output, fs });
                }
                Progress::FunctionCall(call, continuation, fragment) => {
                    output.push_str(&fragment);
                    if !self.functions.contains_key(&call.name) && self.deferred.contains_key(&call.name) {
                        debug!(
                            call_id = call.call_id,
                            name = %call.name,
                            source = "deferred",
                            "dispatch function call"
                        );
                        deferred_calls.insert(call.call_id, call);
                        continuation.defer_traced(tracer)?
                    } else {
                        let result = self.dispatch_function(&call);
                        continuation.resume_traced(result, tracer)?
                    }
                }
                Progress::OsCall(call, continuation, fragment) => {
                    output.push_str(&fragment);
                    let result = self.dispatch_os(&call, &mut fs);
                    continuation.resume_traced(result, tracer)?
                }
                Progress::FutureBatch(batch, fragment) => {
                    output.push_str(&fragment);
                    let mut pending = batch.pending_call_ids().to_vec();
                    pending.sort_unstable();
                    let results: Vec<(u32, HandlerResult)> = pending
                        .into_iter()
                        .map(|call_id| (call_id, self.run_deferred(deferred_calls.remove(&call_id).as_ref())))
                        .collect();
                    batch.resolve_traced(results, tracer)?
                }
            };
        }
    }

    fn dispatch_function(&self, call: &FunctionCall) -> HandlerResult {
        if let Some(handler) = self.functions.get(&call.name) {
            debug!(call_id = call.call_id, name = %call.name, source = "function_map", "dispatch function call");
            return guard(&call.name, || handler(&call.args, &call.kwargs)).unwrap_or_else(HandlerResult::Failure);
        }
        if let Some(capabilities) = &self.capabilities {
            match guard(&call.name, || capabilities.call_function(call)) {
                Ok(Some(result)) => {
                    debug!(
                        call_id = call.call_id,
                        name = %call.name,
                        source = "capabilities",
                        "dispatch function call"
                    );
                    return result;
                }
                Ok(None) => {}
                Err(failure) => return HandlerResult::Failure(failure),
            }
        }
        debug!(call_id = call.call_id, name = %call.name, source = "none", "dispatch function call");
        HandlerResult::Failure(HandlerFailure::new(
            ExcType::NameError,
            format!("function '{}' is not defined", call.name),
        ))
    }

    fn dispatch_os(&self, call: &OsCall, fs: &mut Option<PseudoFs>) -> HandlerResult {
        let tag: &'static str = call.function.into();
        if let Some(current) = fs.as_ref() {
            debug!(call_id = call.call_id, function = tag, source = "pseudo_fs", "dispatch os call");
            return match guard(tag, || current.handle(call.function, &call.args, &call.kwargs)) {
                Ok((result, updated)) => {
                    if let Some(updated) = updated {
                        *fs = Some(updated);
                    }
                    result
                }
                Err(failure) => HandlerResult::Failure(failure),
            };
        }
        if let Some(handler) = self.os_callbacks.get(&call.function) {
            debug!(call_id = call.call_id, function = tag, source = "os_callback", "dispatch os call");
            return guard(tag, || handler(&call.args, &call.kwargs)).unwrap_or_else(HandlerResult::Failure);
        }
        if let Some(capabilities) = &self.capabilities {
            match guard(tag, || capabilities.os_call(call)) {
                Ok(Some(result)) => {
                    debug!(call_id = call.call_id, function = tag, source = "capabilities", "dispatch os call");
                    return result;
                }
                Ok(None) => {}
                Err(failure) => return HandlerResult::Failure(failure),
            }
        }
        debug!(call_id = call.call_id, function = tag, source = "none", "dispatch os call");
        HandlerResult::Failure(HandlerFailure::new(
            ExcType::OSError,
            format!("OS operation '{tag}' is not permitted"),
        ))
    }

    /// Answers one pending future: the recorded deferred call's handler result, or `None`.
    fn run_deferred(&self, call: Option<&FunctionCall>) -> HandlerResult {
        let Some(call) = call else {
            return HandlerResult::Success(Object::None);
        };
        match self.deferred.get(&call.name) {
            Some(handler) => {
                debug!(call_id = call.call_id, name = %call.name, "resolving deferred call");
                guard(&call.name, || handler(&call.args, &call.kwargs)).unwrap_or_else(HandlerResult::Failure)
            }
            None => HandlerResult::Success(Object::None),
        }
    }
}

/// Runs host code, turning a panic into a `RuntimeError` failure.
fn guard<T>(source: &str, f: impl FnOnce() -> T) -> Result<T, HandlerFailure> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let failure = HandlerFailure::from_panic(source, payload.as_ref());
        warn!(source, message = %failure.message, "host handler panicked");
        failure
    })
}
