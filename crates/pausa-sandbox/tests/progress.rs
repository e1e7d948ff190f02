//! Tests for driving a run by hand through `Program`, `Continuation` and `FutureBatch`.

use pausa::{ExcType, Object, OsFunction};
use pausa_sandbox::{
    CompileOptions, Continuation, ErrorKind, FutureBatch, HandlerResult, Limits, PendingRequest, Program, Progress,
    SandboxError,
};
use pretty_assertions::assert_eq;

fn s(value: &str) -> Object {
    Object::String(value.to_owned())
}

fn compile(code: &str, inputs: &[&str], functions: &[&str]) -> Program {
    let options = CompileOptions::new()
        .inputs(inputs.iter().copied())
        .external_functions(functions.iter().copied())
        .script_name("test.py");
    Program::compile(code, &options).unwrap()
}

fn start(program: &Program) -> Progress {
    program.start(vec![], &Limits::default()).unwrap()
}

fn expect_call(progress: Progress) -> (String, Vec<Object>, Continuation) {
    match progress {
        Progress::FunctionCall(call, continuation, _) => (call.name, call.args, continuation),
        other => panic!("expected a function call, got {other:?}"),
    }
}

fn expect_batch(mut progress: Progress) -> FutureBatch {
    loop {
        progress = match progress {
            Progress::FunctionCall(_, continuation, _) => continuation.defer().unwrap(),
            Progress::FutureBatch(batch, _) => return batch,
            other => panic!("expected a future batch, got {other:?}"),
        };
    }
}

const GATHER: &str = "
import asyncio
a, b = await asyncio.gather(foo(), bar())
a + b
";

// === program ===

#[test]
fn program_metadata() {
    let program = compile("x + y", &["y", "x"], &["f"]);
    assert_eq!(program.input_names(), ["x", "y"]);
    assert_eq!(program.external_functions(), ["f"]);
    assert_eq!(program.script_name(), "test.py");
    assert_eq!(program.code(), "x + y");
}

#[test]
fn program_is_reusable() {
    let program = compile("x * 2", &["x"], &[]);
    for i in 0..3 {
        let (value, _) = program
            .start(vec![("x", Object::Int(i))], &Limits::default())
            .unwrap()
            .into_complete()
            .unwrap();
        assert_eq!(value, Object::Int(i * 2));
    }
}

#[test]
fn input_validation() {
    let program = compile("x", &["x"], &[]);
    let limits = Limits::default();
    let err = program.start(vec![], &limits).unwrap_err();
    assert_eq!(err, SandboxError::Validation("missing input 'x'".to_owned()));
    let err = program.start(vec![("x", Object::Int(1)), ("z", Object::Int(2))], &limits).unwrap_err();
    assert_eq!(err, SandboxError::Validation("unexpected input 'z'".to_owned()));
    let err = program
        .start(vec![("x", Object::Int(1)), ("x", Object::Int(2))], &limits)
        .unwrap_err();
    assert_eq!(err, SandboxError::Validation("input 'x' supplied more than once".to_owned()));
}

#[test]
fn run_without_host_raises_not_implemented() {
    let program = compile("fetch()", &[], &["fetch"]);
    let err = program.run(vec![], &Limits::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplementedError);

    let program = compile(
        "try:\n    fetch()\nexcept NotImplementedError:\n    print('no host')",
        &[],
        &["fetch"],
    );
    let (value, output) = program.run(vec![], &Limits::default()).unwrap();
    assert_eq!((value, output.as_str()), (Object::None, "no host\n"));
}

#[test]
fn program_dump_load() {
    let program = compile("x * 2", &["x"], &[]);
    let loaded = Program::load(&program.dump().unwrap()).unwrap();
    assert_eq!(loaded.code(), "x * 2");
    let (value, _) = loaded.run(vec![("x", Object::Int(21))], &Limits::default()).unwrap();
    assert_eq!(value, Object::Int(42));
}

#[test]
fn corrupt_bytes_are_serialization_errors() {
    let err = Program::load(b"\xff\xff\xff").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializationError);
    let err = Continuation::load(b"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SerializationError);
}

// === continuations ===

#[test]
fn function_call_round_trip() {
    let program = compile("print('before')\nr = greet('ada', loud=True)\nprint(r)\nr", &[], &["greet"]);
    let progress = start(&program);
    assert_eq!(progress.output(), "before\n");
    let Progress::FunctionCall(call, continuation, _) = progress else {
        panic!("expected a function call");
    };
    assert_eq!(call.name, "greet");
    assert_eq!(call.args, vec![s("ada")]);
    assert_eq!(call.kwarg("loud"), Some(&Object::Bool(true)));
    assert_eq!(continuation.call_id(), call.call_id);

    let progress = continuation.resume(HandlerResult::ok("HI ADA")).unwrap();
    assert_eq!(progress.output(), "HI ADA\n");
    assert_eq!(progress.into_complete(), Some((s("HI ADA"), "HI ADA\n".to_owned())));
}

#[test]
fn second_resume_fails() {
    let program = compile("f()", &[], &["f"]);
    let (_, _, continuation) = expect_call(start(&program));
    let copy = continuation.clone();
    continuation.resume(HandlerResult::ok(Object::Int(1))).unwrap();
    assert!(copy.is_consumed());
    let err = copy.resume(HandlerResult::ok(Object::Int(2))).unwrap_err();
    assert_eq!(err, SandboxError::ConsumedSnapshot);
    assert_eq!(err.kind(), ErrorKind::ConsumedSnapshot);
}

#[test]
fn os_call_request() {
    let program = compile("from pathlib import Path\nPath('/a/b').mkdir(parents=True)", &[], &[]);
    let Progress::OsCall(call, continuation, _) = start(&program) else {
        panic!("expected an os call");
    };
    assert_eq!(call.function, OsFunction::Mkdir);
    assert_eq!(call.args, vec![Object::Path("/a/b".to_owned())]);
    assert_eq!(call.kwarg("parents"), Some(&Object::Bool(true)));
    assert!(matches!(continuation.request(), PendingRequest::Os(_)));

    let err = continuation.defer().unwrap_err();
    assert_eq!(err, SandboxError::Validation("OS call 'mkdir' cannot be deferred".to_owned()));
    assert!(!continuation.is_consumed());
    let progress = continuation.resume(HandlerResult::ok(Object::None)).unwrap();
    assert!(progress.is_complete());
    assert_eq!(continuation.defer().unwrap_err(), SandboxError::ConsumedSnapshot);
}

#[test]
fn failure_raises_inside_guest() {
    let program = compile("try:\n    f()\nexcept ValueError as e:\n    r = str(e)\nr", &[], &["f"]);
    let (_, _, continuation) = expect_call(start(&program));
    let (value, _) = continuation
        .resume(HandlerResult::error("value_error", "nope"))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(value, s("nope"));
}

#[test]
fn uncaught_failure_ends_run() {
    let program = compile("f()", &[], &["f"]);
    let (_, _, continuation) = expect_call(start(&program));
    let err = continuation.resume(HandlerResult::error("KeyError", "k")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exception(ExcType::KeyError));
}

#[test]
fn continuation_dump_load() {
    let code = "
items = [1, 2]
def total(extra):
    return sum(items) + extra
total(fetch('n'))
";
    let program = compile(code, &[], &["fetch"]);
    let (_, _, continuation) = expect_call(start(&program));
    let bytes = continuation.dump().unwrap();
    assert!(continuation.is_consumed());
    assert_eq!(
        continuation.resume(HandlerResult::ok(Object::Int(1))).unwrap_err(),
        SandboxError::ConsumedSnapshot
    );

    let loaded = Continuation::load(&bytes).unwrap();
    let PendingRequest::Function(call) = loaded.request() else {
        panic!("expected a function request");
    };
    assert_eq!((call.name.as_str(), call.args.clone()), ("fetch", vec![s("n")]));
    let (value, _) = loaded.resume(HandlerResult::ok(Object::Int(10))).unwrap().into_complete().unwrap();
    assert_eq!(value, Object::Int(13));
}

// === future batches ===

#[test]
fn batch_resolves_all_pending() {
    let program = compile(GATHER, &[], &["foo", "bar"]);
    let batch = expect_batch(start(&program));
    assert_eq!(batch.pending_call_ids(), [0, 1]);
    let progress = batch
        .resolve(vec![
            (1, HandlerResult::ok(Object::Int(32))),
            (0, HandlerResult::ok(Object::Int(10))),
        ])
        .unwrap();
    assert_eq!(progress.into_complete().map(|(value, _)| value), Some(Object::Int(42)));
    assert!(batch.is_consumed());
}

#[test]
fn resolved_batch_reports_consumed_for_any_result_set() {
    let program = compile(GATHER, &[], &["foo", "bar"]);
    let batch = expect_batch(start(&program));
    let copy = batch.clone();
    batch
        .resolve(vec![(0, HandlerResult::ok(Object::Int(1))), (1, HandlerResult::ok(Object::Int(2)))])
        .unwrap();

    assert_eq!(copy.resolve(Vec::new()).unwrap_err(), SandboxError::ConsumedSnapshot);
    let partial = vec![(1, HandlerResult::ok(Object::None))];
    assert_eq!(copy.resolve(partial).unwrap_err(), SandboxError::ConsumedSnapshot);
    let unknown = vec![(9, HandlerResult::ok(Object::None))];
    assert_eq!(copy.resolve(unknown).unwrap_err(), SandboxError::ConsumedSnapshot);
    assert_eq!(copy.dump().unwrap_err(), SandboxError::ConsumedSnapshot);
}

#[test]
fn batch_rejects_bad_result_sets() {
    let program = compile(GATHER, &[], &["foo", "bar"]);
    let batch = expect_batch(start(&program));

    let err = batch.resolve(vec![(0, HandlerResult::ok(Object::Int(1)))]).unwrap_err();
    assert_eq!(err, SandboxError::Validation("missing result for call_id 1".to_owned()));
    let err = batch.resolve(vec![(7, HandlerResult::ok(Object::None))]).unwrap_err();
    assert_eq!(
        err,
        SandboxError::Validation("unknown call_id 7, expected one of: [0, 1]".to_owned())
    );
    let err = batch
        .resolve(vec![
            (0, HandlerResult::ok(Object::None)),
            (0, HandlerResult::ok(Object::None)),
        ])
        .unwrap_err();
    assert_eq!(err, SandboxError::Validation("call_id 0 resolved more than once".to_owned()));
    assert!(!batch.is_consumed());

    let progress = batch
        .resolve(vec![(0, HandlerResult::ok(Object::Int(1))), (1, HandlerResult::ok(Object::Int(2)))])
        .unwrap();
    assert!(progress.is_complete());
}

#[test]
fn batch_dump_load() {
    let program = compile(GATHER, &[], &["foo", "bar"]);
    let batch = expect_batch(start(&program));
    let bytes = batch.dump().unwrap();
    let err = batch
        .resolve(vec![(0, HandlerResult::ok(Object::None)), (1, HandlerResult::ok(Object::None))])
        .unwrap_err();
    assert_eq!(err, SandboxError::ConsumedSnapshot);

    let loaded = FutureBatch::load(&bytes).unwrap();
    assert_eq!(loaded.pending_call_ids(), [0, 1]);
    let progress = loaded
        .resolve(vec![(0, HandlerResult::ok(s("a"))), (1, HandlerResult::ok(s("b")))])
        .unwrap();
    assert_eq!(progress.into_complete().map(|(value, _)| value), Some(s("ab")));
}

// === limits ===

#[test]
fn recursion_limit_escapes_as_resource_error() {
    let program = compile("def down(n):\n    return down(n + 1)\ndown(0)", &[], &[]);
    let err = program
        .start(vec![], &Limits::new().max_recursion_depth(20))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ResourceLimitExceeded { .. }));
    assert!(err.to_string().starts_with("resource limit exceeded (recursion)"));
}
