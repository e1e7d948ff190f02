//! Tests for iterative execution: pausing at host calls and resuming with answers.

use pausa::{
    CollectStringPrint, ExcType, Exception, ExternalResult, FutureSnapshot, LimitedTracker, NoLimitTracker, Object,
    OsFunction, ResourceLimits, RunProgress, Runner, file_stat,
};
use pretty_assertions::assert_eq;

fn runner(code: &str, external_functions: &[&str]) -> Runner {
    Runner::new(
        code.to_owned(),
        "test.py",
        vec![],
        external_functions.iter().map(|s| (*s).to_owned()).collect(),
    )
    .unwrap()
}

fn s(value: &str) -> Object {
    Object::String(value.to_owned())
}

/// Answers every function call with `run_pending()` until the run blocks on futures.
fn drive_to_resolve_futures<T: pausa::ResourceTracker>(
    mut progress: RunProgress<T>,
    print: &mut CollectStringPrint,
) -> (FutureSnapshot<T>, Vec<u32>) {
    let mut call_ids = Vec::new();
    loop {
        match progress {
            RunProgress::FunctionCall { call_id, state, .. } => {
                call_ids.push(call_id);
                progress = state.run_pending(print).unwrap();
            }
            RunProgress::ResolveFutures(state) => return (state, call_ids),
            RunProgress::Complete(_) => panic!("unexpected Complete before ResolveFutures"),
            RunProgress::OsCall { function, .. } => panic!("unexpected OsCall: {function:?}"),
        }
    }
}

// === function calls ===

#[test]
fn function_call_args_and_kwargs() {
    let runner = runner("fetch('https://x', timeout=5)", &["fetch"]);
    let progress = runner.start(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap();
    let (name, args, kwargs, call_id, _state) = progress.into_function_call().unwrap();
    assert_eq!(name, "fetch");
    assert_eq!(args, vec![s("https://x")]);
    assert_eq!(kwargs, vec![(s("timeout"), Object::Int(5))]);
    assert_eq!(call_id, 0);
}

#[test]
fn output_is_split_around_pauses() {
    let runner = runner("print('a', end='')\nx = get()\nprint('b', end='')\nx + 1", &["get"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    assert_eq!(print.output(), "a");
    let (_, _, _, _, state) = progress.into_function_call().unwrap();

    let mut print = CollectStringPrint::new();
    let progress = state.run(Object::Int(41), &mut print).unwrap();
    assert_eq!(print.output(), "b");
    assert_eq!(progress.into_complete(), Some(Object::Int(42)));
}

#[test]
fn call_ids_increase() {
    let runner = runner("a = f()\nb = f()\na + b", &["f"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (_, _, _, first, state) = progress.into_function_call().unwrap();
    let progress = state.run(Object::Int(1), &mut print).unwrap();
    let (_, _, _, second, state) = progress.into_function_call().unwrap();
    assert_eq!((first, second), (0, 1));
    assert_eq!(state.call_id(), 1);
    let result = state.run(Object::Int(2), &mut print).unwrap().into_complete();
    assert_eq!(result, Some(Object::Int(3)));
}

#[test]
fn host_error_is_catchable() {
    let code = "
try:
    fetch('x')
except RuntimeError as e:
    result = 'caught: ' + str(e)
result
";
    let runner = runner(code, &["fetch"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (_, _, _, _, state) = progress.into_function_call().unwrap();
    let progress = state
        .run(Exception::runtime_error("network error"), &mut print)
        .unwrap();
    assert_eq!(progress.into_complete(), Some(s("caught: network error")));
}

#[test]
fn uncaught_host_error_has_traceback() {
    let runner = runner("x = 1\nfetch('x')", &["fetch"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (_, _, _, _, state) = progress.into_function_call().unwrap();
    let err = state
        .run(Exception::new(ExcType::ValueError, Some("bad".to_owned())), &mut print)
        .unwrap_err();
    assert_eq!(err.summary(), "ValueError: bad");
    assert_eq!(err.traceback().len(), 1);
    assert_eq!(err.traceback()[0].start.line, 2);
}

#[test]
fn runner_is_reusable() {
    let runner = Runner::new("x + 1".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
    for i in 0..3 {
        let progress = runner.start(vec![Object::Int(i)], NoLimitTracker, &mut CollectStringPrint::new());
        assert_eq!(progress.unwrap().into_complete(), Some(Object::Int(i + 1)));
    }
}

// === OS calls ===

#[test]
fn path_method_yields_os_call() {
    let code = "from pathlib import Path\nPath('/data') / 'a.txt'\nPath('/data/a.txt').read_text()";
    let runner = runner(code, &[]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (function, args, kwargs, _, state) = progress.into_os_call().unwrap();
    assert_eq!(function, OsFunction::ReadText);
    assert_eq!(args, vec![Object::Path("/data/a.txt".to_owned())]);
    assert_eq!(kwargs, vec![]);
    let result = state.run(s("contents"), &mut print).unwrap().into_complete();
    assert_eq!(result, Some(s("contents")));
}

#[test]
fn mkdir_kwargs_are_forwarded() {
    let runner = runner("from pathlib import Path\nPath('/a/b').mkdir(parents=True, exist_ok=True)", &[]);
    let progress = runner.start(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap();
    let (function, args, kwargs, _, _) = progress.into_os_call().unwrap();
    assert_eq!(function, OsFunction::Mkdir);
    assert_eq!(args, vec![Object::Path("/a/b".to_owned())]);
    assert_eq!(
        kwargs,
        vec![(s("parents"), Object::Bool(true)), (s("exist_ok"), Object::Bool(true))]
    );
}

#[test]
fn getenv_with_default() {
    let runner = runner("import os\nos.getenv('HOME', 'none')", &[]);
    let progress = runner.start(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap();
    let (function, args, _, _, _) = progress.into_os_call().unwrap();
    assert_eq!(function, OsFunction::Getenv);
    assert_eq!(args, vec![s("HOME"), s("none")]);
}

#[test]
fn stat_result_fields() {
    let runner = runner("from pathlib import Path\ninfo = Path('/f').stat()\n(info.st_size, info[6])", &[]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (function, _, _, _, state) = progress.into_os_call().unwrap();
    assert_eq!(function, OsFunction::Stat);
    let result = state.run(file_stat(0o644, 12, 0.0), &mut print).unwrap().into_complete();
    assert_eq!(result, Some(Object::Tuple(vec![Object::Int(12), Object::Int(12)])));
}

#[test]
fn os_error_from_host_is_catchable() {
    let code = "
from pathlib import Path
try:
    Path('/missing').read_text()
except OSError as e:
    result = repr(e)
result
";
    let runner = runner(code, &[]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (_, _, _, _, state) = progress.into_os_call().unwrap();
    let exc = Exception::new(ExcType::FileNotFoundError, Some("missing".to_owned()));
    let result = state.run(exc, &mut print).unwrap().into_complete();
    assert_eq!(result, Some(s("FileNotFoundError('missing')")));
}

// === futures ===

#[test]
fn gather_resolves_all_at_once() {
    let code = "
import asyncio
a, b = await asyncio.gather(foo(), bar())
a + b
";
    let runner = runner(code, &["foo", "bar"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (state, call_ids) = drive_to_resolve_futures(progress, &mut print);
    assert_eq!(call_ids, vec![0, 1]);
    assert_eq!(state.pending_call_ids(), &[0, 1]);

    let results = vec![
        (0, ExternalResult::Return(Object::Int(10))),
        (1, ExternalResult::Return(Object::Int(32))),
    ];
    let result = state.resume(results, &mut print).unwrap().into_complete();
    assert_eq!(result, Some(Object::Int(42)));
}

#[test]
fn partial_resolution_blocks_again() {
    let code = "
import asyncio
a, b = await asyncio.gather(foo(), bar())
a + b
";
    let runner = runner(code, &["foo", "bar"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (state, _) = drive_to_resolve_futures(progress, &mut print);

    let progress = state
        .resume(vec![(0, ExternalResult::Return(Object::Int(1)))], &mut print)
        .unwrap();
    let state = progress.into_resolve_futures().unwrap();
    assert_eq!(state.pending_call_ids(), &[1]);

    let progress = state
        .resume(vec![(1, ExternalResult::Return(Object::Int(2)))], &mut print)
        .unwrap();
    assert_eq!(progress.into_complete(), Some(Object::Int(3)));
}

#[test]
fn unknown_call_id_is_rejected() {
    let runner = runner("x = foo()\nawait x", &["foo"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (state, _) = drive_to_resolve_futures(progress, &mut print);
    let err = state
        .resume(vec![(99, ExternalResult::Return(Object::None))], &mut print)
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::RuntimeError);
    assert_eq!(err.message(), Some("unknown call_id 99, expected one of: [0]"));
}

#[test]
fn failed_future_raises_at_await() {
    let code = "
x = foo()
try:
    await x
except ValueError as e:
    result = str(e)
result
";
    let runner = runner(code, &["foo"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let (state, _) = drive_to_resolve_futures(progress, &mut print);
    let exc = Exception::new(ExcType::ValueError, Some("nope".to_owned()));
    let result = state
        .resume(vec![(0, ExternalResult::Error(exc))], &mut print)
        .unwrap()
        .into_complete();
    assert_eq!(result, Some(s("nope")));
}

// === serialization ===

#[test]
fn runner_dump_load() {
    let runner = Runner::new("x * 2".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
    let loaded = Runner::load(&runner.dump().unwrap()).unwrap();
    assert_eq!(loaded.code(), "x * 2");
    let result = loaded.run(vec![Object::Int(21)], NoLimitTracker, &mut CollectStringPrint::new());
    assert_eq!(result.unwrap(), Object::Int(42));
}

#[test]
fn snapshot_dump_load_mid_run() {
    let code = "
items = [1, 2]
def total(extra):
    return sum(items) + extra
total(fetch())
";
    let runner = runner(code, &["fetch"]);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], NoLimitTracker, &mut print).unwrap();
    let bytes = progress.dump().unwrap();

    let loaded: RunProgress<NoLimitTracker> = RunProgress::load(&bytes).unwrap();
    let (name, _, _, _, state) = loaded.into_function_call().unwrap();
    assert_eq!(name, "fetch");
    let result = state.run(Object::Int(10), &mut print).unwrap().into_complete();
    assert_eq!(result, Some(Object::Int(13)));
}

#[test]
fn limited_tracker_survives_dump() {
    let runner = runner("fetch() + 1", &["fetch"]);
    let limits = ResourceLimits::new().max_allocations(100);
    let mut print = CollectStringPrint::new();
    let progress = runner.start(vec![], LimitedTracker::new(limits), &mut print).unwrap();
    let (_, _, _, _, state) = progress.into_function_call().unwrap();
    let bytes = state.dump().unwrap();
    let state: pausa::Snapshot<LimitedTracker> = pausa::Snapshot::load(&bytes).unwrap();
    let result = state.run(Object::Int(1), &mut print).unwrap().into_complete();
    assert_eq!(result, Some(Object::Int(2)));
}

// === resource limits ===

#[test]
fn allocation_limit_is_not_catchable() {
    let code = "
items = []
try:
    for i in range(1000):
        items.append([i])
except MemoryError:
    pass
";
    let runner = runner(code, &[]);
    let limits = ResourceLimits::new().max_allocations(50);
    let err = runner
        .run(vec![], LimitedTracker::new(limits), &mut CollectStringPrint::new())
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    assert!(err.resource_error().is_some());
}

#[test]
fn recursion_limit_is_catchable() {
    let code = "
def down(n):
    return down(n + 1)
try:
    down(0)
except RecursionError:
    result = 'caught'
result
";
    let runner = runner(code, &[]);
    let limits = ResourceLimits::new().max_recursion_depth(Some(20));
    let result = runner
        .run(vec![], LimitedTracker::new(limits), &mut CollectStringPrint::new())
        .unwrap();
    assert_eq!(result, s("caught"));
}

#[test]
fn operation_limit() {
    let runner = runner("while True:\n    pass", &[]);
    let limits = ResourceLimits::new().max_operations(1000);
    let err = runner
        .run(vec![], LimitedTracker::new(limits), &mut CollectStringPrint::new())
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TimeoutError);
}
