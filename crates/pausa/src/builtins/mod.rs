//! Python builtin functions available to sandboxed code.
//!
//! Larger builtins have their own submodule, the rest are implemented inline below.

mod convert;
mod isinstance;
mod min_max;
mod print;
mod sorted;

pub(crate) use sorted::sort_values;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    args::ArgValues,
    exception::{RunError, RunResult},
    io::PrintWriter,
    os::OsFunction,
    pathlib,
    resource::ResourceTracker,
    value::{Heap, HeapData, IterState, Value, range_len},
};

/// Outcome of calling a builtin function or method.
#[derive(Debug)]
pub(crate) enum CallResult {
    Value(Value),
    /// The call must be answered by the host, execution pauses.
    OsCall {
        function: OsFunction,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    },
}

impl From<Value> for CallResult {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Enumerates every builtin function.
///
/// `Gather` and `Getenv` are not global names, they are reached through `asyncio.gather`
/// and `os.getenv`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    Dict,
    Enumerate,
    Float,
    Int,
    Isinstance,
    Len,
    List,
    Max,
    Min,
    Print,
    Range,
    Repr,
    Reversed,
    Round,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
    #[strum(serialize = "Path")]
    Path,
    Gather,
    Getenv,
}

impl Builtin {
    /// Looks up a builtin by the name sandboxed code uses for it.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.parse() {
            Ok(Self::Gather | Self::Getenv | Self::Path) | Err(_) => None,
            Ok(builtin) => Some(builtin),
        }
    }

    pub fn call(
        self,
        heap: &mut Heap<impl ResourceTracker>,
        print: &mut impl PrintWriter,
        mut args: ArgValues,
    ) -> RunResult<CallResult> {
        let value = match self {
            Self::Print => print::builtin_print(heap, args, print)?,
            Self::Len => builtin_len(heap, args.get_one_arg("len")?)?,
            Self::Str => match args.get_zero_one_arg("str")? {
                Some(v) => Value::Str(v.py_str(heap)),
                None => Value::Str(String::new()),
            },
            Self::Repr => Value::Str(args.get_one_arg("repr")?.py_repr(heap)),
            Self::Int => convert::builtin_int(heap, args)?,
            Self::Float => convert::builtin_float(heap, args)?,
            Self::Bool => Value::Bool(args.get_zero_one_arg("bool")?.is_some_and(|v| v.is_truthy(heap))),
            Self::List => {
                let items = match args.get_zero_one_arg("list")? {
                    Some(v) => heap.iter_items(&v)?,
                    None => Vec::new(),
                };
                heap.alloc_list(items)?
            }
            Self::Tuple => match args.get_zero_one_arg("tuple")? {
                Some(v) => Value::Tuple(heap.iter_items(&v)?),
                None => Value::Tuple(Vec::new()),
            },
            Self::Dict => convert::builtin_dict(heap, args)?,
            Self::Range => builtin_range(args)?,
            Self::Sorted => sorted::builtin_sorted(heap, args)?,
            Self::Sum => sorted::builtin_sum(heap, args)?,
            Self::Min => min_max::builtin_min_max(heap, args, false)?,
            Self::Max => min_max::builtin_min_max(heap, args, true)?,
            Self::Abs => builtin_abs(heap, args.get_one_arg("abs")?)?,
            Self::Round => convert::builtin_round(heap, args)?,
            Self::Isinstance => isinstance::builtin_isinstance(heap, args)?,
            Self::Any => {
                let items = heap.iter_items(&args.get_one_arg("any")?)?;
                Value::Bool(items.iter().any(|v| v.is_truthy(heap)))
            }
            Self::All => {
                let items = heap.iter_items(&args.get_one_arg("all")?)?;
                Value::Bool(items.iter().all(|v| v.is_truthy(heap)))
            }
            Self::Enumerate => {
                let start = match args.take_kwarg("start") {
                    Some(v) => Some(v),
                    None if args.args.len() == 2 => args.args.pop(),
                    None => None,
                };
                let start = match start {
                    Some(Value::Int(i)) => i,
                    Some(other) => {
                        return Err(RunError::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            other.type_name(heap)
                        )));
                    }
                    None => 0,
                };
                let items = heap.iter_items(&args.get_one_arg("enumerate")?)?;
                let pairs = items
                    .into_iter()
                    .zip(start..)
                    .map(|(v, i)| Value::Tuple(vec![Value::Int(i), v]))
                    .collect();
                heap.alloc(HeapData::Iter(IterState::Items { items: pairs, pos: 0 }))?
            }
            Self::Zip => {
                args.check_no_kwargs("zip")?;
                let columns = args
                    .args
                    .iter()
                    .map(|v| heap.iter_items(v))
                    .collect::<RunResult<Vec<_>>>()?;
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let rows = (0..len)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect();
                heap.alloc(HeapData::Iter(IterState::Items { items: rows, pos: 0 }))?
            }
            Self::Reversed => {
                let mut items = heap.iter_items(&args.get_one_arg("reversed")?)?;
                items.reverse();
                heap.alloc(HeapData::Iter(IterState::Items { items, pos: 0 }))?
            }
            Self::Path => {
                args.check_no_kwargs("Path")?;
                let mut path = ".".to_owned();
                for part in &args.args {
                    match part {
                        Value::Str(s) | Value::Path(s) => path = pathlib::join(&path, s),
                        other => {
                            return Err(RunError::type_error(format!(
                                "argument should be a str or an os.PathLike object, not '{}'",
                                other.type_name(heap)
                            )));
                        }
                    }
                }
                Value::Path(path)
            }
            Self::Gather => {
                args.check_no_kwargs("gather")?;
                Value::Gather(args.args)
            }
            Self::Getenv => {
                let default = args.take_kwarg("default");
                let mut positional = args.between("getenv", 1, 2)?.into_iter();
                let key = positional.next().unwrap_or(Value::None);
                let default = default.or_else(|| positional.next()).unwrap_or(Value::None);
                if !matches!(key, Value::Str(_)) {
                    return Err(RunError::type_error(format!(
                        "str expected, not {}",
                        key.type_name(heap)
                    )));
                }
                return Ok(CallResult::OsCall {
                    function: OsFunction::Getenv,
                    args: vec![key, default],
                    kwargs: Vec::new(),
                });
            }
        };
        Ok(CallResult::Value(value))
    }
}

fn builtin_len(heap: &Heap<impl ResourceTracker>, value: Value) -> RunResult<Value> {
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::Tuple(items) => items.len(),
        Value::NamedTuple(nt) => nt.values.len(),
        Value::Range { start, stop, step } => range_len(*start, *stop, *step) as usize,
        Value::Ref(id) => match heap.get(*id) {
            HeapData::List(items) => items.len(),
            HeapData::Dict(dict) => dict.len(),
            HeapData::Iter(_) => return Err(no_len(heap, &value)),
        },
        _ => return Err(no_len(heap, &value)),
    };
    Ok(Value::Int(len as i64))
}

fn no_len(heap: &Heap<impl ResourceTracker>, value: &Value) -> RunError {
    RunError::type_error(format!("object of type '{}' has no len()", value.type_name(heap)))
}

fn builtin_range(args: ArgValues) -> RunResult<Value> {
    let ints = args
        .between("range", 1, 3)?
        .into_iter()
        .map(|v| match v {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            _ => Err(RunError::type_error("range() arguments must be integers")),
        })
        .collect::<RunResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("between() checked the argument count"),
    };
    if step == 0 {
        return Err(RunError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn builtin_abs(heap: &Heap<impl ResourceTracker>, value: Value) -> RunResult<Value> {
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| RunError::new(crate::ExcType::OverflowError, "integer result too large for 64 bits")),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RunError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name(heap)
        ))),
    }
}
