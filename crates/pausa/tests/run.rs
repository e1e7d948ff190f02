//! Tests for running code to completion with `Runner::run`.

use pausa::{CollectStringPrint, ExcType, Exception, MAX_RESULT_BYTES, NoLimitTracker, Object, ResourceError, Runner};
use pretty_assertions::assert_eq;

fn run(code: &str) -> Object {
    run_with_output(code).0
}

fn run_with_output(code: &str) -> (Object, String) {
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut print = CollectStringPrint::new();
    let result = runner.run(vec![], NoLimitTracker, &mut print).unwrap();
    (result, print.into_output())
}

fn run_err(code: &str) -> Exception {
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    runner.run(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap_err()
}

fn s(value: &str) -> Object {
    Object::String(value.to_owned())
}

// === inputs and results ===

#[test]
fn input_times_two() {
    let runner = Runner::new("x * 2".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
    let mut print = CollectStringPrint::new();
    let result = runner.run(vec![Object::Int(21)], NoLimitTracker, &mut print).unwrap();
    assert_eq!(result, Object::Int(42));
    assert_eq!(print.output(), "");
}

#[test]
fn no_final_expression_is_none() {
    assert_eq!(run("x = 1"), Object::None);
}

#[test]
fn wrong_input_count() {
    let runner = Runner::new("x".to_owned(), "test.py", vec!["x".to_owned()], vec![]).unwrap();
    let err = runner.run(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::RuntimeError);
    assert_eq!(err.message(), Some("expected 1 inputs, got 0"));
}

#[test]
fn duplicate_names_are_rejected() {
    let err = Runner::new("x".to_owned(), "test.py", vec!["x".to_owned()], vec!["x".to_owned()]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ValueError);
}

#[test]
fn container_inputs() {
    let runner = Runner::new(
        "d['items'][1] + len(d)".to_owned(),
        "test.py",
        vec!["d".to_owned()],
        vec![],
    )
    .unwrap();
    let input = Object::dict([(s("items"), Object::List(vec![Object::Int(1), Object::Int(40)]))]);
    let result = runner.run(vec![input], NoLimitTracker, &mut CollectStringPrint::new()).unwrap();
    assert_eq!(result, Object::Int(41));
}

// === language ===

#[test]
fn arithmetic() {
    assert_eq!(run("7 // 2"), Object::Int(3));
    assert_eq!(run("-7 // 2"), Object::Int(-4));
    assert_eq!(run("-7 % 3"), Object::Int(2));
    assert_eq!(run("7 / 2"), Object::Float(3.5));
    assert_eq!(run("2 ** 10"), Object::Int(1024));
    assert_eq!(run("'ab' * 3"), s("ababab"));
}

#[test]
fn print_sep_and_end() {
    let (_, output) = run_with_output("print('a', 'b', sep='-', end='!')\nprint(1, 2)");
    assert_eq!(output, "a-b!1 2\n");
}

#[test]
fn functions_with_defaults_and_keywords() {
    let code = "
def greet(name, greeting='hello', punct='!'):
    return greeting + ' ' + name + punct

greet('world', punct='?')
";
    assert_eq!(run(code), s("hello world?"));
}

#[test]
fn recursion() {
    let code = "
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)

fib(15)
";
    assert_eq!(run(code), Object::Int(610));
}

#[test]
fn loops_with_break_and_continue() {
    let code = "
total = 0
for i in range(20):
    if i % 2 == 0:
        continue
    if i > 9:
        break
    total += i
n = 0
while True:
    n += 1
    if n == 5:
        break
(total, n)
";
    assert_eq!(run(code), Object::Tuple(vec![Object::Int(25), Object::Int(5)]));
}

#[test]
fn globals_from_functions() {
    let code = "
count = 0
def bump():
    global count
    count += 1
bump()
bump()
count
";
    assert_eq!(run(code), Object::Int(2));
}

#[test]
fn tuple_unpacking() {
    assert_eq!(run("a, b = 1, 2\na, b = b, a\n[a, b]"), Object::List(vec![Object::Int(2), Object::Int(1)]));
}

#[test]
fn chained_comparison() {
    assert_eq!(run("x = 5\n1 < x <= 5 < 6"), Object::Bool(true));
    assert_eq!(run("x = 5\n1 < x < 5"), Object::Bool(false));
}

#[test]
fn fstrings() {
    assert_eq!(run("name = 'pausa'\nn = 3\nf'{name!r} has {n:03d} parts'"), s("'pausa' has 003 parts"));
}

#[test]
fn string_methods() {
    assert_eq!(run("'  Hi There '.strip().lower()"), s("hi there"));
    assert_eq!(
        run("'a,b,,c'.split(',')"),
        Object::List(vec![s("a"), s("b"), s(""), s("c")])
    );
    assert_eq!(run("'-'.join(['x', 'y', 'z'])"), s("x-y-z"));
    assert_eq!(run("'hello'.replace('l', 'L')"), s("heLLo"));
    assert_eq!(run("'data.csv'.endswith('.csv')"), Object::Bool(true));
    assert_eq!(run("'é'.encode()"), Object::Bytes(vec![0xc3, 0xa9]));
    assert_eq!(run("b'ok'.decode()"), s("ok"));
}

#[test]
fn list_and_dict_methods() {
    let code = "
items = [3, 1, 2]
items.append(5)
items.insert(0, 9)
last = items.pop()
d = {'a': 1}
d['b'] = 2
missing = d.get('zzz', 0)
removed = d.pop('a')
(sorted(items), last, missing, removed, list(d.keys()), items.index(1))
";
    assert_eq!(
        run(code),
        Object::Tuple(vec![
            Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3), Object::Int(9)]),
            Object::Int(5),
            Object::Int(0),
            Object::Int(1),
            Object::List(vec![s("b")]),
            Object::Int(2),
        ])
    );
}

#[test]
fn slices() {
    assert_eq!(run("[0, 1, 2, 3, 4][1:4:2]"), Object::List(vec![Object::Int(1), Object::Int(3)]));
    assert_eq!(run("'hello'[::-1]"), s("olleh"));
}

#[test]
fn builtins() {
    assert_eq!(run("sum([1, 2, 3])"), Object::Int(6));
    assert_eq!(run("min(4, 2, 8)"), Object::Int(2));
    assert_eq!(run("max([4, 2, 8])"), Object::Int(8));
    assert_eq!(run("abs(-3)"), Object::Int(3));
    assert_eq!(run("int('42') + int(2.9)"), Object::Int(44));
    assert_eq!(run("isinstance(1, int)"), Object::Bool(true));
    assert_eq!(run("repr('x')"), s("'x'"));
    assert_eq!(
        run("sorted([3, 1, 2], reverse=True)"),
        Object::List(vec![Object::Int(3), Object::Int(2), Object::Int(1)])
    );
}

// === exceptions ===

#[test]
fn try_except_else_finally() {
    let code = "
log = []
try:
    log.append('body')
    1 / 0
except ZeroDivisionError as e:
    log.append('except ' + str(e))
else:
    log.append('else')
finally:
    log.append('finally')
log
";
    assert_eq!(
        run(code),
        Object::List(vec![s("body"), s("except division by zero"), s("finally")])
    );
}

#[test]
fn except_tuple_and_hierarchy() {
    let code = "
caught = []
for exc in [KeyError('k'), IndexError('i'), FileNotFoundError('f')]:
    try:
        raise exc
    except (LookupError, OSError) as e:
        caught.append(repr(e))
caught
";
    assert_eq!(
        run(code),
        Object::List(vec![
            s("KeyError('k')"),
            s("IndexError('i')"),
            s("FileNotFoundError('f')"),
        ])
    );
}

#[test]
fn bare_raise_reraises() {
    let err = run_err("try:\n    raise ValueError('bad')\nexcept ValueError:\n    raise");
    assert_eq!(err.exc_type(), ExcType::ValueError);
    assert_eq!(err.message(), Some("bad"));
}

#[test]
fn finally_runs_on_error() {
    let code = "
log = []
def f():
    try:
        raise KeyError('x')
    finally:
        log.append('cleanup')
try:
    f()
except KeyError:
    pass
log
";
    assert_eq!(run(code), Object::List(vec![s("cleanup")]));
}

#[test]
fn traceback_frames() {
    let code = "def inner():\n    raise ValueError('boom')\n\ndef outer():\n    inner()\n\nouter()\n";
    let err = run_err(code);
    assert_eq!(err.summary(), "ValueError: boom");
    let frames: Vec<(u32, Option<&str>)> = err
        .traceback()
        .iter()
        .map(|f| (f.start.line, f.frame_name.as_deref()))
        .collect();
    assert_eq!(
        frames,
        vec![(7, Some("<module>")), (5, Some("outer")), (2, Some("inner"))]
    );
    assert_eq!(err.traceback()[2].preview_line.as_deref(), Some("    raise ValueError('boom')"));
}

#[test]
fn name_error() {
    let err = run_err("undefined_thing + 1");
    assert_eq!(err.exc_type(), ExcType::NameError);
    assert_eq!(err.message(), Some("name 'undefined_thing' is not defined"));
}

#[test]
fn unbound_local() {
    let err = run_err("def f():\n    y = x\n    x = 1\nf()");
    assert_eq!(err.exc_type(), ExcType::UnboundLocalError);
}

#[test]
fn assert_statement() {
    let err = run_err("assert 1 == 2, 'math is broken'");
    assert_eq!(err.exc_type(), ExcType::AssertionError);
    assert_eq!(err.message(), Some("math is broken"));
}

#[test]
fn return_exception_object() {
    assert_eq!(
        run("ValueError('x')"),
        Object::Exception {
            exc_type: ExcType::ValueError,
            arg: Some("x".to_owned()),
        }
    );
}

// === result size ===

#[test]
fn repetition_past_usize_is_overflow_error() {
    let err = run_err("'abcde' * 2**62");
    assert_eq!(err.exc_type(), ExcType::OverflowError);
    assert_eq!(err.message(), Some("repeated sequence is too long"));
    assert_eq!(run_err("[0] * 2**62").exc_type(), ExcType::OverflowError);
    assert_eq!(run_err("2**62 * (1, 2)").exc_type(), ExcType::OverflowError);

    let code = "try:\n    b'abcd' * 2**62\nexcept OverflowError:\n    r = 'caught'\nr";
    assert_eq!(run(code), s("caught"));
}

#[test]
fn huge_results_abort_without_limits() {
    let err = run_err("'x' * 2**40");
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    assert_eq!(
        err.resource_error(),
        Some(&ResourceError::Memory {
            limit: MAX_RESULT_BYTES,
            used: 1 << 40,
        })
    );

    let err = run_err("try:\n    'x' * 2**40\nexcept MemoryError:\n    pass");
    assert!(matches!(err.resource_error(), Some(ResourceError::Memory { .. })));
}

#[test]
fn huge_format_width_is_rejected() {
    let err = run_err("f\"{1:9000000000000000000}\"");
    assert!(matches!(err.resource_error(), Some(ResourceError::Memory { .. })));
    let err = run_err("f\"{1.5:.9000000000000000000f}\"");
    assert!(matches!(err.resource_error(), Some(ResourceError::Memory { .. })));
    assert_eq!(run("f\"{7:>4}|{'ab':*<4}\""), s("   7|ab**"));
    assert_eq!(run("len('ab' * 1000) + len([0] * 0)"), Object::Int(2000));
}

// === compile errors ===

#[test]
fn syntax_error() {
    let err = Runner::new("x = (".to_owned(), "bad.py", vec![], vec![]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::SyntaxError);
    assert_eq!(err.traceback()[0].filename, "bad.py");
}

#[test]
fn unsupported_syntax() {
    let err = Runner::new("class A:\n    pass".to_owned(), "test.py", vec![], vec![]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::NotImplementedError);
    assert_eq!(
        err.message(),
        Some("The pausa parser does not yet support class definitions")
    );
}

#[test]
fn unknown_module() {
    let err = Runner::new("import socket".to_owned(), "test.py", vec![], vec![]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ImportError);
    assert_eq!(err.message(), Some("No module named 'socket'"));
}

#[test]
fn return_inside_finally_is_rejected() {
    let code = "def f():\n    try:\n        return 1\n    finally:\n        pass\nf()";
    let err = Runner::new(code.to_owned(), "test.py", vec![], vec![]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::NotImplementedError);
}

// === standard execution of host calls ===

#[test]
fn external_call_without_host_raises() {
    let code = "
try:
    fetch('x')
except NotImplementedError as e:
    msg = str(e)
msg
";
    let runner = Runner::new(code.to_owned(), "test.py", vec![], vec!["fetch".to_owned()]).unwrap();
    let result = runner.run(vec![], NoLimitTracker, &mut CollectStringPrint::new()).unwrap();
    assert_eq!(result, s("External function 'fetch' not implemented with standard execution"));
}

#[test]
fn os_call_without_host_raises() {
    let err = run_err("from pathlib import Path\nPath('/a').exists()");
    assert_eq!(err.exc_type(), ExcType::NotImplementedError);
    assert_eq!(
        err.message(),
        Some("OS function 'exists' not implemented with standard execution")
    );
}
