//! Tests for the VM tracing hooks.

use pausa::{
    CollectStringPrint, NoLimitTracker, Object, ProfilingTracer, RecordingTracer, Runner, TraceEvent,
};
use pretty_assertions::assert_eq;

fn calls_and_pauses(events: &[TraceEvent]) -> Vec<TraceEvent> {
    events
        .iter()
        .filter(|e| !matches!(e, TraceEvent::Instruction { .. }))
        .cloned()
        .collect()
}

#[test]
fn records_calls_and_returns() {
    let code = "def double(x):\n    return x * 2\ndouble(4)";
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut tracer = RecordingTracer::new();
    let result = runner
        .run_traced(vec![], NoLimitTracker, &mut CollectStringPrint::new(), &mut tracer)
        .unwrap();
    assert_eq!(result, Object::Int(8));
    assert_eq!(
        calls_and_pauses(tracer.events()),
        vec![
            TraceEvent::Call {
                func_name: "double".to_owned(),
                depth: 2,
            },
            TraceEvent::Return { depth: 1 },
        ]
    );
}

#[test]
fn records_pauses() {
    let runner = Runner::new("fetch()".to_owned(), "test.py", vec![], vec!["fetch".to_owned()]).unwrap();
    let mut tracer = RecordingTracer::new();
    let mut print = CollectStringPrint::new();
    let progress = runner
        .start_traced(vec![], NoLimitTracker, &mut print, &mut tracer)
        .unwrap();
    let (_, _, _, _, state) = progress.into_function_call().unwrap();
    let result = state.run_traced(Object::Int(1), &mut print, &mut tracer).unwrap();
    assert_eq!(result.into_complete(), Some(Object::Int(1)));
    assert_eq!(
        calls_and_pauses(tracer.events()),
        vec![TraceEvent::Pause {
            kind: "function",
            call_id: Some(0),
        }]
    );
}

#[test]
fn exception_handlers_are_recorded() {
    let code = "try:\n    raise ValueError()\nexcept ValueError:\n    pass";
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut tracer = RecordingTracer::new();
    runner
        .run_traced(vec![], NoLimitTracker, &mut CollectStringPrint::new(), &mut tracer)
        .unwrap();
    assert_eq!(
        calls_and_pauses(tracer.events()),
        vec![TraceEvent::ExceptionPush { depth: 1 }, TraceEvent::ExceptionPop { depth: 0 }]
    );
}

#[test]
fn recording_limit() {
    let runner = Runner::new("x = 0\nwhile x < 100:\n    x += 1".to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut tracer = RecordingTracer::with_limit(10);
    runner
        .run_traced(vec![], NoLimitTracker, &mut CollectStringPrint::new(), &mut tracer)
        .unwrap();
    assert_eq!(tracer.events().len(), 10);
}

#[test]
fn profiling_counts_calls() {
    let code = "def f(n):\n    return n\nfor i in range(5):\n    f(i)";
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut tracer = ProfilingTracer::new();
    runner
        .run_traced(vec![], NoLimitTracker, &mut CollectStringPrint::new(), &mut tracer)
        .unwrap();
    let report = tracer.report();
    assert_eq!(report.total_calls, 5);
    assert_eq!(report.max_depth, 2);
    assert!(report.total_instructions > 0);
}
