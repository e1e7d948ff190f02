//! Tests for the capability dispatch loop.

use std::sync::{Arc, Mutex};

use pausa::{ExcType, Object, OsFunction};
use pausa_sandbox::{
    Capabilities, CompileOptions, ErrorKind, FunctionCall, HandlerResult, LimitKind, Limits, OsCall, Program, Progress,
    PseudoFs, RunResult, Sandbox, SandboxError,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn s(value: &str) -> Object {
    Object::String(value.to_owned())
}

fn run(sandbox: &Sandbox, code: &str) -> RunResult {
    sandbox.run(code, vec![]).unwrap()
}

fn data_fs() -> PseudoFs {
    PseudoFs::new()
        .put_file("/data/a.txt", "alpha")
        .put_file("/data/b.txt", "beta")
        .mkdir("/data/sub")
        .put_env("HOME", "/home/guest")
}

struct Weather;

impl Capabilities for Weather {
    fn function_names(&self) -> Vec<String> {
        vec!["forecast".to_owned(), "fetch".to_owned()]
    }

    fn call_function(&self, call: &FunctionCall) -> Option<HandlerResult> {
        match call.name.as_str() {
            "forecast" => Some(HandlerResult::ok(format!("sunny in {}", call.args[0].py_str()))),
            "fetch" => Some(HandlerResult::ok("from capabilities")),
            _ => None,
        }
    }

    fn os_call(&self, call: &OsCall) -> Option<HandlerResult> {
        (call.function == OsFunction::Getenv).then(|| HandlerResult::ok("from capabilities"))
    }
}

struct BrokenNames;

impl Capabilities for BrokenNames {
    fn function_names(&self) -> Vec<String> {
        panic!("names unavailable")
    }
}

fn limit_kind(err: &SandboxError) -> Option<LimitKind> {
    match err.kind() {
        ErrorKind::ResourceLimitExceeded { limit } => Some(limit),
        _ => None,
    }
}

// === plain runs ===

#[test]
fn value_and_empty_output() {
    let result = Sandbox::new().run("x * 2", vec![("x", Object::Int(21))]).unwrap();
    assert_eq!(result.value, Object::Int(42));
    assert_eq!(result.output, "");
    assert_eq!(result.fs, None);
}

#[test]
fn output_is_accumulated_across_pauses() {
    let sandbox = Sandbox::new().function("noop", |_, _| HandlerResult::ok(Object::None));
    let result = run(&sandbox, "print('a', end='')\nnoop()\nprint('b', end='')");
    assert_eq!(result.output, "ab");
    assert_eq!(result.value, Object::None);
}

#[test]
fn compile_error() {
    let err = Sandbox::new().run("x = (", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompileError);
    assert_eq!(err.exception().unwrap().exc_type(), ExcType::SyntaxError);
}

#[test]
fn uncaught_guest_exception() {
    let err = Sandbox::new().run("x = 1\nraise ValueError('bad')", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exception(ExcType::ValueError));
    assert_eq!(err.message(), "bad");
    assert_eq!(err.traceback().len(), 1);
    assert_eq!(err.traceback()[0].start.line, 2);
}

// === function calls ===

#[test]
fn function_receives_args_and_kwargs() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let sandbox = Sandbox::new().function("fetch", move |args, kwargs| {
        recorder.lock().unwrap().push((args.to_vec(), kwargs.to_vec()));
        HandlerResult::ok(Object::Int(200))
    });
    let result = run(&sandbox, "fetch('https://x', timeout=5)");
    assert_eq!(result.value, Object::Int(200));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(vec![s("https://x")], vec![("timeout".to_owned(), Object::Int(5))])]
    );
}

#[test]
fn handler_failure_is_catchable() {
    let code = "
try:
    fetch('x')
except RuntimeError as e:
    result = str(e)
result
";
    let sandbox = Sandbox::new().function("fetch", |_, _| HandlerResult::error("runtime_error", "network error"));
    assert_eq!(run(&sandbox, code).value, s("network error"));
}

#[test]
fn typed_result_from_handler() {
    let sandbox = Sandbox::new().function("parse", |args, _| match &args[0] {
        Object::String(text) => text
            .parse::<i64>()
            .map(Object::Int)
            .map_err(|err| (ExcType::ValueError, err.to_string())),
        other => Err((ExcType::TypeError, format!("expected str, got {}", other.type_name()))),
    });
    assert_eq!(run(&sandbox, "parse('12') + 1").value, Object::Int(13));
    let err = sandbox.run("parse('x')", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exception(ExcType::ValueError));
}

#[test]
fn declared_function_without_handler_is_name_error() {
    let sandbox = Sandbox::new().external_functions(["fetch"]);
    let err = sandbox.run("fetch('x')", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameError);
    assert_eq!(err.message(), "function 'fetch' is not defined");
}

#[test]
fn function_map_takes_precedence_over_capabilities() {
    let sandbox = Sandbox::new()
        .function("fetch", |_, _| HandlerResult::ok("from map"))
        .capabilities(Weather);
    let result = run(&sandbox, "(fetch(), forecast('Lisbon'))");
    assert_eq!(result.value, Object::Tuple(vec![s("from map"), s("sunny in Lisbon")]));
}

#[test]
fn external_names_are_derived_from_handlers() {
    let sandbox = Sandbox::new()
        .function("b", |_, _| HandlerResult::ok(Object::None))
        .deferred_function("a", |_, _| HandlerResult::ok(Object::None))
        .capabilities(Weather);
    assert_eq!(sandbox.external_function_names(), vec!["a", "b", "fetch", "forecast"]);
}

#[test]
fn panicking_function_names_contribute_nothing() {
    let sandbox = Sandbox::new()
        .function("ok", |_, _| HandlerResult::ok(Object::Int(1)))
        .capabilities(BrokenNames);
    assert_eq!(sandbox.external_function_names(), vec!["ok"]);
    assert_eq!(run(&sandbox, "ok() + 1").value, Object::Int(2));
}

#[test]
fn json_handler_results() {
    let sandbox = Sandbox::new()
        .function("good", |_, _| HandlerResult::from_json(json!({"ok": [1, "two"]})))
        .function("bad", |_, _| HandlerResult::from_json(json!({"status": "fine"})));
    assert_eq!(
        run(&sandbox, "good()").value,
        Object::List(vec![Object::Int(1), s("two")])
    );
    let err = sandbox.run("bad()", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeError);
    assert_eq!(err.message(), r#"invalid handler result: {"status":"fine"}"#);
}

#[test]
fn panicking_handler_becomes_runtime_error() {
    let code = "
try:
    explode()
except RuntimeError as e:
    result = str(e)
result
";
    let sandbox = Sandbox::new().function("explode", |_, _| -> HandlerResult { panic!("kaboom") });
    assert_eq!(run(&sandbox, code).value, s("handler for 'explode' panicked: kaboom"));
}

// === deferred functions ===

#[test]
fn deferred_functions_resolve_together() {
    let code = "
import asyncio
a, b = await asyncio.gather(double(5), double(16))
a + b
";
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&calls);
    let sandbox = Sandbox::new().deferred_function("double", move |args, _| {
        recorder.lock().unwrap().push(args[0].clone());
        match args[0] {
            Object::Int(n) => HandlerResult::ok(Object::Int(n * 2)),
            _ => HandlerResult::error("TypeError", "expected int"),
        }
    });
    assert_eq!(run(&sandbox, code).value, Object::Int(42));
    assert_eq!(*calls.lock().unwrap(), vec![Object::Int(5), Object::Int(16)]);
}

#[test]
fn deferred_failure_raises_at_await() {
    let code = "
x = lookup('k')
try:
    await x
except KeyError as e:
    result = 'missing'
result
";
    let sandbox = Sandbox::new().deferred_function("lookup", |_, _| HandlerResult::error("KeyError", "k"));
    assert_eq!(run(&sandbox, code).value, s("missing"));
}

// === OS calls ===

#[test]
fn os_call_without_handler_is_os_error() {
    let err = Sandbox::new()
        .run("from pathlib import Path\nPath('/a').exists()", vec![])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OsError { variant: ExcType::OSError });
    assert_eq!(err.message(), "OS operation 'exists' is not permitted");
}

#[test]
fn write_then_read_through_pseudo_fs() {
    let code = "
from pathlib import Path
p = Path('/out/report.txt')
p.parent.mkdir(parents=True)
p.write_text('hello')
p.read_text()
";
    let original = PseudoFs::new();
    let result = Sandbox::new().pseudo_fs(original.clone()).run(code, vec![]).unwrap();
    assert_eq!(result.value, s("hello"));
    let fs = result.fs.unwrap();
    assert_eq!(fs.read_text("/out/report.txt"), Ok("hello"));
    assert!(!original.exists("/out"));
}

#[test]
fn iterdir_lists_immediate_children() {
    let code = "
from pathlib import Path
names = []
for p in Path('/data').iterdir():
    names.append(p.name)
sorted(names)
";
    let result = Sandbox::new().pseudo_fs(data_fs()).run(code, vec![]).unwrap();
    assert_eq!(result.value, Object::List(vec![s("a.txt"), s("b.txt"), s("sub")]));
}

#[test]
fn rmdir_of_non_empty_directory_fails() {
    let code = "
from pathlib import Path
try:
    Path('/data').rmdir()
except OSError as e:
    result = str(e)
result
";
    let result = Sandbox::new().pseudo_fs(data_fs()).run(code, vec![]).unwrap();
    assert_eq!(result.value, s("[Errno 39] Directory not empty: '/data'"));
    assert!(result.fs.unwrap().is_dir("/data"));
}

#[test]
fn mkdir_parents_and_empty_rmdir() {
    let code = "
from pathlib import Path
try:
    Path('/a/b').mkdir()
except FileNotFoundError:
    missing = True
Path('/a/b').mkdir(parents=True)
made = (Path('/a').is_dir(), Path('/a/b').is_dir())
Path('/a/b').rmdir()
(missing, made, Path('/a/b').exists())
";
    let result = Sandbox::new().pseudo_fs(PseudoFs::new()).run(code, vec![]).unwrap();
    assert_eq!(
        result.value,
        Object::Tuple(vec![
            Object::Bool(true),
            Object::Tuple(vec![Object::Bool(true), Object::Bool(true)]),
            Object::Bool(false),
        ])
    );
    assert!(result.fs.unwrap().is_dir("/a"));
}

#[test]
fn missing_file_is_file_not_found() {
    let err = Sandbox::new()
        .pseudo_fs(data_fs())
        .run("from pathlib import Path\nPath('/data/zzz.txt').read_text()", vec![])
        .unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::OsError {
            variant: ExcType::FileNotFoundError
        }
    );
}

#[test]
fn remaining_path_operations_through_pseudo_fs() {
    let code = r"
from pathlib import Path
src = Path('/data/a.txt')
moved = src.rename('/data/moved.txt')
info = moved.stat()
Path('/blob.bin').write_bytes(b'\x00\x01')
raw = Path('/blob.bin').read_bytes()
Path('/data/b.txt').unlink()
(
    src.exists(),
    moved,
    info.st_size,
    moved.is_symlink(),
    raw,
    Path('/data/b.txt').exists(),
    Path('/data/sub/../a.txt').resolve(),
    Path('rel').absolute(),
)
";
    let result = Sandbox::new().pseudo_fs(data_fs()).run(code, vec![]).unwrap();
    assert_eq!(
        result.value,
        Object::Tuple(vec![
            Object::Bool(false),
            Object::Path("/data/moved.txt".to_owned()),
            Object::Int(5),
            Object::Bool(false),
            Object::Bytes(vec![0, 1]),
            Object::Bool(false),
            Object::Path("/data/a.txt".to_owned()),
            Object::Path("/rel".to_owned()),
        ])
    );
    let fs = result.fs.unwrap();
    assert_eq!(fs.read_text("/data/moved.txt"), Ok("alpha"));
    assert_eq!(fs.read_bytes("/blob.bin"), Ok(&[0_u8, 1][..]));
    assert!(!fs.exists("/data/b.txt"));
}

#[test]
fn stat_of_missing_path_is_file_not_found() {
    let code = "
from pathlib import Path
try:
    Path('/nowhere').stat()
except FileNotFoundError as e:
    r = str(e)
r
";
    let result = Sandbox::new().pseudo_fs(PseudoFs::new()).run(code, vec![]).unwrap();
    assert_eq!(result.value, s("[Errno 2] No such file or directory: '/nowhere'"));
}

#[test]
fn environment_comes_from_pseudo_fs() {
    let code = "import os\n(os.getenv('HOME'), os.getenv('SHELL', 'sh'))";
    let result = Sandbox::new().pseudo_fs(data_fs()).run(code, vec![]).unwrap();
    assert_eq!(result.value, Object::Tuple(vec![s("/home/guest"), s("sh")]));
}

#[test]
fn os_callback_and_capabilities_fallback() {
    let code = "import os\nfrom pathlib import Path\n(Path('/x').exists(), os.getenv('HOME'))";
    let sandbox = Sandbox::new()
        .os_callback(OsFunction::Exists, |args, _| {
            HandlerResult::ok(args[0] == Object::Path("/x".to_owned()))
        })
        .capabilities(Weather);
    assert_eq!(
        run(&sandbox, code).value,
        Object::Tuple(vec![Object::Bool(true), s("from capabilities")])
    );
}

// === limits ===

#[test]
fn operation_limit_aborts_run() {
    let sandbox = Sandbox::new().limits(Limits::new().max_operations(1000));
    let err = sandbox.run("while True:\n    pass", vec![]).unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::ResourceLimitExceeded {
            limit: LimitKind::Operations
        }
    );
}

#[test]
fn duration_limit_aborts_run() {
    let sandbox = Sandbox::new().limits(Limits::new().max_duration_secs(0.05));
    let err = sandbox.run("while True:\n    pass", vec![]).unwrap_err();
    assert_eq!(limit_kind(&err), Some(LimitKind::Duration));
}

#[test]
fn memory_limit_aborts_run() {
    let sandbox = Sandbox::new().limits(Limits::new().max_memory(50_000));
    let err = sandbox.run("big = 'a' * 200_000", vec![]).unwrap_err();
    assert_eq!(limit_kind(&err), Some(LimitKind::Memory));

    let code = "
items = []
while True:
    items.append([len(items)])
";
    let err = sandbox.run(code, vec![]).unwrap_err();
    assert_eq!(limit_kind(&err), Some(LimitKind::Memory));
    assert_eq!(run(&sandbox, "len('a' * 1000)").value, Object::Int(1000));
}

#[test]
fn memory_limit_cannot_be_caught() {
    let code = "
try:
    big = 'a' * 200_000
except MemoryError:
    big = 'caught'
";
    let sandbox = Sandbox::new().limits(Limits::new().max_memory(50_000));
    let err = sandbox.run(code, vec![]).unwrap_err();
    assert_eq!(limit_kind(&err), Some(LimitKind::Memory));
}

#[test]
fn invalid_limits_are_rejected_before_running() {
    let sandbox = Sandbox::new().limits(Limits::new().gc_interval(0));
    let err = sandbox.run("1", vec![]).unwrap_err();
    assert_eq!(err, SandboxError::Validation("gc_interval must be positive".to_owned()));
}

// === validation ===

#[test]
fn input_name_clashing_with_function_is_rejected() {
    let sandbox = Sandbox::new().function("x", |_, _| HandlerResult::ok(Object::None));
    let err = sandbox.run("x", vec![("x", Object::Int(1))]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

// === concurrency ===

#[test]
fn one_program_runs_on_many_threads() {
    let options = CompileOptions::new().input("n").external_function("scale");
    let program = Program::compile("scale(n) + n", &options).unwrap();

    let results: Vec<Object> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8_i64)
            .map(|n| {
                let program = &program;
                scope.spawn(move || {
                    let progress = program.start(vec![("n", Object::Int(n))], &Limits::default()).unwrap();
                    let Progress::FunctionCall(call, continuation, _) = progress else {
                        panic!("expected a function call");
                    };
                    assert_eq!(call.args, vec![Object::Int(n)]);
                    let answer = Object::Int(n * 10);
                    continuation.resume(answer).unwrap().into_complete().unwrap().0
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    let expected: Vec<Object> = (0..8).map(|n| Object::Int(n * 11)).collect();
    assert_eq!(results, expected);
}

#[test]
fn sandbox_is_shared_across_threads() {
    let sandbox = Arc::new(Sandbox::new().function("double", |args, _| match &args[0] {
        Object::Int(n) => HandlerResult::ok(Object::Int(n * 2)),
        _ => HandlerResult::error("TypeError", "expected int"),
    }));
    let handles: Vec<_> = (0..4_i64)
        .map(|n| {
            let sandbox = Arc::clone(&sandbox);
            std::thread::spawn(move || sandbox.run("double(x)", vec![("x", Object::Int(n))]).unwrap().value)
        })
        .collect();
    let values: Vec<Object> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    assert_eq!(values, (0..4).map(|n| Object::Int(n * 2)).collect::<Vec<_>>());
}
