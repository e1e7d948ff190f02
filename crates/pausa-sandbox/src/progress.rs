//! The pause/resume state machine.
//!
//! Each step of a run yields a [`Progress`]. Non-terminal variants carry a handle that resumes
//! the run exactly once: a [`Continuation`] for a single pending call, a [`FutureBatch`] for a
//! set of concurrently pending calls.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use pausa::{
    CollectStringPrint, ExternalResult, FutureSnapshot, LimitedTracker, NoopTracer, Object, OsFunction, RunProgress,
    Snapshot, VmTracer,
};
use serde::{Deserialize, Serialize};

use crate::{HandlerResult, SandboxError};

type Tracker = LimitedTracker;

/// A guest call to a host function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name the guest called, one of the program's external functions.
    pub name: String,
    /// Positional arguments in call order.
    pub args: Vec<Object>,
    /// Keyword arguments in call order.
    pub kwargs: Vec<(String, Object)>,
    /// Unique within the run.
    pub call_id: u32,
}

impl FunctionCall {
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&Object> {
        find_kwarg(&self.kwargs, name)
    }
}

/// A guest filesystem or environment operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsCall {
    pub function: OsFunction,
    /// For path operations the path comes first.
    pub args: Vec<Object>,
    pub kwargs: Vec<(String, Object)>,
    /// Shares the numbering of [`FunctionCall::call_id`].
    pub call_id: u32,
}

impl OsCall {
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&Object> {
        find_kwarg(&self.kwargs, name)
    }
}

fn find_kwarg<'a>(kwargs: &'a [(String, Object)], name: &str) -> Option<&'a Object> {
    kwargs.iter().find(|(key, _)| key == name).map(|(_, value)| value)
}

fn kwarg_key_to_string(key: Object) -> String {
    match key {
        Object::String(s) => s,
        other => other.py_repr(),
    }
}

fn string_kwargs(kwargs: Vec<(Object, Object)>) -> Vec<(String, Object)> {
    kwargs.into_iter().map(|(k, v)| (kwarg_key_to_string(k), v)).collect()
}

/// What a paused [`Continuation`] is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingRequest {
    Function(FunctionCall),
    Os(OsCall),
}

impl PendingRequest {
    #[must_use]
    pub fn call_id(&self) -> u32 {
        match self {
            Self::Function(call) => call.call_id,
            Self::Os(call) => call.call_id,
        }
    }
}

/// One step of a run. The string in every variant is the output printed during that step.
#[derive(Debug)]
pub enum Progress {
    FunctionCall(FunctionCall, Continuation, String),
    OsCall(OsCall, Continuation, String),
    FutureBatch(FutureBatch, String),
    Complete(Object, String),
}

impl Progress {
    pub(crate) fn from_run(progress: RunProgress<Tracker>, output: String) -> Self {
        match progress {
            RunProgress::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state,
            } => {
                let call = FunctionCall {
                    name: function_name,
                    args,
                    kwargs: string_kwargs(kwargs),
                    call_id,
                };
                let continuation = Continuation::new(PendingRequest::Function(call.clone()), state);
                Self::FunctionCall(call, continuation, output)
            }
            RunProgress::OsCall {
                function,
                args,
                kwargs,
                call_id,
                state,
            } => {
                let call = OsCall {
                    function,
                    args,
                    kwargs: string_kwargs(kwargs),
                    call_id,
                };
                let continuation = Continuation::new(PendingRequest::Os(call.clone()), state);
                Self::OsCall(call, continuation, output)
            }
            RunProgress::ResolveFutures(state) => Self::FutureBatch(FutureBatch::new(state), output),
            RunProgress::Complete(value) => Self::Complete(value, output),
        }
    }

    /// Output printed during the step that produced this progress.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::FunctionCall(_, _, output)
            | Self::OsCall(_, _, output)
            | Self::FutureBatch(_, output)
            | Self::Complete(_, output) => output,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(..))
    }

    /// The final value and last output fragment, if the run has finished.
    #[must_use]
    pub fn into_complete(self) -> Option<(Object, String)> {
        match self {
            Self::Complete(value, output) => Some((value, output)),
            _ => None,
        }
    }
}

/// Takes the state out of a single-use slot, recovering a poisoned lock.
fn take_state<S>(slot: &Mutex<Option<S>>) -> Result<S, SandboxError> {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .ok_or(SandboxError::ConsumedSnapshot)
}

fn is_taken<S>(slot: &Mutex<Option<S>>) -> bool {
    slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
}

/// Handle to a run paused at one host call.
///
/// Clones share the same paused state. The first of `resume`, `defer` or `dump` on any clone
/// consumes it; every later use fails with [`SandboxError::ConsumedSnapshot`].
#[derive(Debug, Clone)]
pub struct Continuation {
    request: Arc<PendingRequest>,
    state: Arc<Mutex<Option<Snapshot<Tracker>>>>,
}

#[derive(Serialize)]
struct DumpedContinuationRef<'a> {
    request: &'a PendingRequest,
    snapshot: &'a Snapshot<Tracker>,
}

#[derive(Deserialize)]
struct DumpedContinuation {
    request: PendingRequest,
    snapshot: Snapshot<Tracker>,
}

impl Continuation {
    fn new(request: PendingRequest, snapshot: Snapshot<Tracker>) -> Self {
        Self {
            request: Arc::new(request),
            state: Arc::new(Mutex::new(Some(snapshot))),
        }
    }

    #[must_use]
    pub fn request(&self) -> &PendingRequest {
        &self.request
    }

    #[must_use]
    pub fn call_id(&self) -> u32 {
        self.request.call_id()
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        is_taken(&self.state)
    }

    /// Answers the pending call and runs to the next pause.
    pub fn resume(&self, result: impl Into<HandlerResult>) -> Result<Progress, SandboxError> {
        self.resume_traced(result, &mut NoopTracer)
    }

    /// [`Continuation::resume`] with every VM instruction reported to `tracer`.
    pub fn resume_traced(
        &self,
        result: impl Into<HandlerResult>,
        tracer: &mut impl VmTracer,
    ) -> Result<Progress, SandboxError> {
        let snapshot = take_state(&self.state)?;
        let mut print = CollectStringPrint::new();
        let progress = snapshot
            .run_traced(result.into().into_external(), &mut print, tracer)
            .map_err(SandboxError::from_run)?;
        Ok(Progress::from_run(progress, print.into_output()))
    }

    /// Answers a function call with a pending future.
    ///
    /// The guest gets an awaitable; awaiting it before it is resolved yields a
    /// [`Progress::FutureBatch`] containing this call id. OS calls cannot be deferred.
    pub fn defer(&self) -> Result<Progress, SandboxError> {
        self.defer_traced(&mut NoopTracer)
    }

    pub fn defer_traced(&self, tracer: &mut impl VmTracer) -> Result<Progress, SandboxError> {
        if self.is_consumed() {
            return Err(SandboxError::ConsumedSnapshot);
        }
        if let PendingRequest::Os(call) = self.request() {
            return Err(SandboxError::Validation(format!(
                "OS call '{}' cannot be deferred",
                call.function
            )));
        }
        let snapshot = take_state(&self.state)?;
        let mut print = CollectStringPrint::new();
        let progress = snapshot
            .run_traced(ExternalResult::Future, &mut print, tracer)
            .map_err(SandboxError::from_run)?;
        Ok(Progress::from_run(progress, print.into_output()))
    }

    /// Serializes the paused run together with its pending request. Consumes the continuation.
    pub fn dump(&self) -> Result<Vec<u8>, SandboxError> {
        let snapshot = take_state(&self.state)?;
        let dumped = DumpedContinuationRef {
            request: &self.request,
            snapshot: &snapshot,
        };
        Ok(postcard::to_allocvec(&dumped)?)
    }

    /// Restores a continuation from [`Continuation::dump`] output.
    ///
    /// Resource limit clocks restart from zero.
    pub fn load(bytes: &[u8]) -> Result<Self, SandboxError> {
        let DumpedContinuation { request, snapshot } = postcard::from_bytes(bytes)?;
        Ok(Self::new(request, snapshot))
    }
}

/// Handle to a run blocked on several deferred calls at once.
///
/// Like [`Continuation`] it is single-use across all clones.
#[derive(Debug, Clone)]
pub struct FutureBatch {
    pending: Arc<[u32]>,
    state: Arc<Mutex<Option<FutureSnapshot<Tracker>>>>,
}

impl FutureBatch {
    fn new(snapshot: FutureSnapshot<Tracker>) -> Self {
        Self {
            pending: snapshot.pending_call_ids().into(),
            state: Arc::new(Mutex::new(Some(snapshot))),
        }
    }

    #[must_use]
    pub fn pending_call_ids(&self) -> &[u32] {
        &self.pending
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        is_taken(&self.state)
    }

    /// Resolves every pending call and runs to the next pause.
    ///
    /// `results` must contain exactly one entry per pending call id. A mismatch is a validation
    /// error and leaves the batch unconsumed. A batch that was already resolved or dumped fails
    /// with [`SandboxError::ConsumedSnapshot`] whatever `results` holds.
    pub fn resolve(&self, results: impl IntoIterator<Item = (u32, HandlerResult)>) -> Result<Progress, SandboxError> {
        self.resolve_traced(results, &mut NoopTracer)
    }

    pub fn resolve_traced(
        &self,
        results: impl IntoIterator<Item = (u32, HandlerResult)>,
        tracer: &mut impl VmTracer,
    ) -> Result<Progress, SandboxError> {
        if self.is_consumed() {
            return Err(SandboxError::ConsumedSnapshot);
        }
        let mut by_id = BTreeMap::new();
        for (call_id, result) in results {
            if !self.pending.contains(&call_id) {
                return Err(SandboxError::Validation(format!(
                    "unknown call_id {call_id}, expected one of: {:?}",
                    &*self.pending
                )));
            }
            if by_id.insert(call_id, result).is_some() {
                return Err(SandboxError::Validation(format!("call_id {call_id} resolved more than once")));
            }
        }
        if let Some(missing) = self.pending.iter().find(|id| !by_id.contains_key(*id)) {
            return Err(SandboxError::Validation(format!("missing result for call_id {missing}")));
        }

        let snapshot = take_state(&self.state)?;
        let results = by_id
            .into_iter()
            .map(|(call_id, result)| (call_id, result.into_external()))
            .collect();
        let mut print = CollectStringPrint::new();
        let progress = snapshot
            .resume_traced(results, &mut print, tracer)
            .map_err(SandboxError::from_run)?;
        Ok(Progress::from_run(progress, print.into_output()))
    }

    /// Serializes the blocked run. Consumes the batch.
    pub fn dump(&self) -> Result<Vec<u8>, SandboxError> {
        let snapshot = take_state(&self.state)?;
        Ok(snapshot.dump()?)
    }

    /// Restores a batch from [`FutureBatch::dump`] output with the same pending call ids.
    pub fn load(bytes: &[u8]) -> Result<Self, SandboxError> {
        Ok(Self::new(FutureSnapshot::<Tracker>::load(bytes)?))
    }
}
