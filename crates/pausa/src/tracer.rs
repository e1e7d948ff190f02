//! Instruction-level tracing hooks for the VM.
//!
//! The VM is generic over a [`VmTracer`], so the default [`NoopTracer`] compiles every hook
//! away in the same way [`NoLimitTracker`](crate::NoLimitTracker) removes limit checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op, the default |
//! | [`StderrTracer`] | Human-readable execution log on stderr |
//! | [`ProfilingTracer`] | Opcode frequency and call depth counters |
//! | [`RecordingTracer`] | Every event kept in memory, for tests and post-mortems |
//!
//! Opcodes are reported by name, e.g. `"LoadConst"`.

use std::{collections::HashMap, fmt};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An opcode was dispatched.
    Instruction {
        /// Index of the instruction in its code object.
        ip: usize,
        opcode: &'static str,
        /// Operand stack depth relative to the frame's base.
        stack_depth: usize,
    },
    /// A user function call pushed a frame.
    Call { func_name: String, depth: usize },
    /// A frame returned.
    Return { depth: usize },
    /// Execution paused to ask the host for something.
    Pause {
        /// `"function"`, `"os"` or `"futures"`.
        kind: &'static str,
        call_id: Option<u32>,
    },
    /// An `except` handler was entered.
    ExceptionPush { depth: usize },
    /// An `except` handler was left.
    ExceptionPop { depth: usize },
}

/// Hooks called by the VM at key execution events.
///
/// Every method has an empty default, implementations override what they need.
pub trait VmTracer: fmt::Debug {
    /// Called before each instruction is executed. This is the hottest hook.
    #[inline]
    fn on_instruction(&mut self, _ip: usize, _opcode: &'static str, _stack_depth: usize, _frame_depth: usize) {}

    /// Called after a function call pushed a frame, `depth` is the frame count after the push.
    #[inline]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called after a frame is popped by `return`.
    #[inline]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when the VM pauses for the host.
    #[inline]
    fn on_pause(&mut self, _kind: &'static str, _call_id: Option<u32>) {}

    #[inline]
    fn on_exception_push(&mut self, _depth: usize) {}

    #[inline]
    fn on_exception_pop(&mut self, _depth: usize) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints an execution log to stderr.
///
/// ```text
/// [    0] LoadConst       stack=0  frames=1
///   >>> CALL fetch        depth=2
///   <<< RETURN            depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop printing after this many instructions, `None` for no limit.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: &'static str, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:<16} stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {func_name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }

    fn on_pause(&mut self, kind: &'static str, call_id: Option<u32>) {
        if self.stopped {
            return;
        }
        match call_id {
            Some(id) => eprintln!("  ||| PAUSE {kind:<19} call_id={id}"),
            None => eprintln!("  ||| PAUSE {kind}"),
        }
    }
}

/// Counts opcode executions and tracks call depth.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: HashMap<&'static str, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    total_pauses: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug)]
pub struct ProfilingReport {
    /// Opcode counts, most frequent first.
    pub opcode_counts: Vec<(&'static str, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
    pub total_pauses: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            total_pauses: self.total_pauses,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: &'static str, _stack_depth: usize, frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
        self.max_depth = self.max_depth.max(frame_depth);
    }

    fn on_call(&mut self, _func_name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_pause(&mut self, _kind: &'static str, _call_id: Option<u32>) {
        self.total_pauses += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Host pauses:        {}", self.total_pauses)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {opcode:<20} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

/// Records every event in order.
///
/// Allocates per event, so keep it to short executions.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|l| self.events.len() < l) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: &'static str, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            ip,
            opcode,
            stack_depth,
        });
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_pause(&mut self, kind: &'static str, call_id: Option<u32>) {
        self.record(TraceEvent::Pause { kind, call_id });
    }

    fn on_exception_push(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPush { depth });
    }

    fn on_exception_pop(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPop { depth });
    }
}
