//! Attribute access and method calls on builtin types, paths and modules.

use super::{FrameExit, VM};
use crate::{
    ExcType,
    args::ArgValues,
    builtins::{Builtin, CallResult, sort_values},
    exception::{RunError, RunResult},
    expressions::Module,
    io::PrintWriter,
    os::OsFunction,
    pathlib,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{Dict, HashKey, Heap, HeapData, HeapId, Value},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `object.name`, pushing the attribute.
    pub(super) fn get_attr(&mut self, object: Value, name: &str) -> RunResult<Option<FrameExit>> {
        let value = match &object {
            Value::Path(path) => match name {
                "name" => Value::Str(pathlib::name(path).to_owned()),
                "parent" => Value::Path(pathlib::parent(path)),
                "suffix" => Value::Str(pathlib::suffix(path).to_owned()),
                "stem" => Value::Str(pathlib::stem(path).to_owned()),
                "parts" => Value::Tuple(pathlib::parts(path).into_iter().map(Value::Str).collect()),
                _ => return Err(self.no_attribute(&object, name)),
            },
            Value::NamedTuple(nt) => match nt.field_names.iter().position(|f| f == name) {
                Some(idx) => nt.values[idx].clone(),
                None => return Err(self.no_attribute(&object, name)),
            },
            Value::Exception(exc) if name == "args" => {
                Value::Tuple(exc.message.iter().map(|m| Value::Str(m.clone())).collect())
            }
            Value::Module(module) => {
                let result = module_attr(*module, name)?;
                return Ok(self.handle_call_result(result));
            }
            _ => return Err(self.no_attribute(&object, name)),
        };
        self.stack.push(value);
        Ok(None)
    }

    /// `object.name(*args)`, pushing the result or pausing for the host.
    pub(super) fn call_method(&mut self, object: Value, name: &str, args: ArgValues) -> RunResult<Option<FrameExit>> {
        if matches!(object, Value::Module(_) | Value::NamedTuple(_) | Value::Exception(_)) {
            if let Some(exit) = self.get_attr(object, name)? {
                return Ok(Some(exit));
            }
            let func = self.pop();
            return self.call_value(func, args);
        }
        if let Value::Path(path) = &object
            && let Some(function) = OsFunction::from_path_method(name)
        {
            let mut os_args = vec![Value::Path(path.clone())];
            os_args.extend(args.args);
            return Ok(self.handle_call_result(CallResult::OsCall {
                function,
                args: os_args,
                kwargs: args.kwargs,
            }));
        }

        let result = match &object {
            Value::Path(path) => path_method(self.heap, path, name, args),
            Value::Str(s) => Some(str_method(self.heap, s, name, args)),
            Value::Bytes(bytes) if name == "decode" => {
                Some(args.between("decode", 0, 2).and_then(|_| decode_utf8(bytes)))
            }
            Value::Ref(id) => {
                let id = *id;
                let (is_list, is_dict) = match self.heap.get(id) {
                    HeapData::List(_) => (true, false),
                    HeapData::Dict(_) => (false, true),
                    HeapData::Iter(_) => (false, false),
                };
                if is_list {
                    list_method(self.heap, id, name, args)
                } else if is_dict {
                    dict_method(self.heap, id, name, args)
                } else {
                    None
                }
            }
            _ => None,
        };
        match result {
            Some(value) => {
                self.stack.push(value?);
                Ok(None)
            }
            None => Err(self.no_attribute(&object, name)),
        }
    }

    fn no_attribute(&self, object: &Value, name: &str) -> RunError {
        RunError::new(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{name}'", object.type_name(self.heap)),
        )
    }
}

fn module_attr(module: Module, name: &str) -> RunResult<CallResult> {
    let value = match (module, name) {
        (Module::Os, "environ") => {
            return Ok(CallResult::OsCall {
                function: OsFunction::GetEnviron,
                args: Vec::new(),
                kwargs: Vec::new(),
            });
        }
        (Module::Os, "getenv") => Value::Builtin(Builtin::Getenv),
        (Module::Asyncio, "gather") => Value::Builtin(Builtin::Gather),
        (Module::Pathlib, "Path" | "PurePosixPath" | "PosixPath") => Value::Builtin(Builtin::Path),
        _ => {
            return Err(RunError::new(
                ExcType::AttributeError,
                format!("module '{module}' has no attribute '{name}'"),
            ));
        }
    };
    Ok(CallResult::Value(value))
}

/// Pure `PurePosixPath` methods, `None` when `name` is not one.
fn path_method(heap: &Heap<impl ResourceTracker>, path: &str, name: &str, args: ArgValues) -> Option<RunResult<Value>> {
    let result = match name {
        "joinpath" => args.between("joinpath", 0, usize::MAX).and_then(|parts| {
            let mut joined = path.to_owned();
            for part in parts {
                match part {
                    Value::Str(s) | Value::Path(s) => joined = pathlib::join(&joined, &s),
                    other => return Err(path_type_error(heap, &other)),
                }
            }
            Ok(Value::Path(joined))
        }),
        "with_suffix" => args.get_one_arg("with_suffix").and_then(|suffix| match suffix {
            Value::Str(suffix) => {
                if !suffix.is_empty() && (!suffix.starts_with('.') || suffix == ".") {
                    return Err(RunError::value_error(format!("Invalid suffix '{suffix}'")));
                }
                let stem = pathlib::stem(path);
                pathlib::with_name(path, &format!("{stem}{suffix}"))
                    .map(Value::Path)
                    .ok_or_else(|| RunError::value_error(format!("'{path}' has an empty name")))
            }
            other => Err(path_type_error(heap, &other)),
        }),
        "with_name" => args.get_one_arg("with_name").and_then(|new_name| match new_name {
            Value::Str(new_name) => pathlib::with_name(path, &new_name)
                .map(Value::Path)
                .ok_or_else(|| RunError::value_error(format!("'{path}' has an empty name"))),
            other => Err(path_type_error(heap, &other)),
        }),
        "is_absolute" => args.check_zero_args("is_absolute").map(|()| Value::Bool(path.starts_with('/'))),
        "as_posix" => args.check_zero_args("as_posix").map(|()| Value::Str(path.to_owned())),
        _ => return None,
    };
    Some(result)
}

fn path_type_error(heap: &Heap<impl ResourceTracker>, value: &Value) -> RunError {
    RunError::type_error(format!(
        "argument should be a str or an os.PathLike object, not '{}'",
        value.type_name(heap)
    ))
}

fn str_arg(heap: &Heap<impl ResourceTracker>, method: &str, value: &Value) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(RunError::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name(heap)
        ))),
    }
}

fn strip_chars(heap: &Heap<impl ResourceTracker>, method: &str, args: ArgValues) -> RunResult<Option<Vec<char>>> {
    match args.get_zero_one_arg(method)? {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(str_arg(heap, method, &chars)?.chars().collect())),
    }
}

/// `str` methods.
fn str_method(heap: &mut Heap<impl ResourceTracker>, s: &str, name: &str, mut args: ArgValues) -> RunResult<Value> {
    Ok(match name {
        "upper" => {
            args.check_zero_args("upper")?;
            Value::Str(s.to_uppercase())
        }
        "lower" => {
            args.check_zero_args("lower")?;
            Value::Str(s.to_lowercase())
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(heap, name, args)?;
            let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
            Value::Str(
                match name {
                    "strip" => s.trim_matches(matches),
                    "lstrip" => s.trim_start_matches(matches),
                    _ => s.trim_end_matches(matches),
                }
                .to_owned(),
            )
        }
        "split" => {
            let maxsplit = args.take_kwarg("maxsplit");
            let sep = args.take_kwarg("sep");
            let mut positional = args.between("split", 0, 2)?.into_iter();
            let sep = sep.or_else(|| positional.next()).unwrap_or(Value::None);
            let maxsplit = match maxsplit.or_else(|| positional.next()) {
                Some(Value::Int(n)) if n >= 0 => Some(n as usize),
                Some(Value::Int(_)) | None => None,
                Some(other) => {
                    return Err(RunError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name(heap)
                    )));
                }
            };
            let parts: Vec<Value> = match sep {
                Value::None => split_whitespace(s, maxsplit).into_iter().map(Value::Str).collect(),
                sep => {
                    let sep = str_arg(heap, "split", &sep)?;
                    if sep.is_empty() {
                        return Err(RunError::value_error("empty separator"));
                    }
                    match maxsplit {
                        Some(n) => s.splitn(n + 1, sep.as_str()).map(|p| Value::Str(p.to_owned())).collect(),
                        None => s.split(sep.as_str()).map(|p| Value::Str(p.to_owned())).collect(),
                    }
                }
            };
            heap.alloc_list(parts)?
        }
        "splitlines" => {
            args.check_zero_args("splitlines")?;
            let lines = s.lines().map(|l| Value::Str(l.to_owned())).collect();
            heap.alloc_list(lines)?
        }
        "join" => {
            let iterable = args.get_one_arg("join")?;
            let mut parts = Vec::new();
            for (i, item) in heap.iter_items(&iterable)?.into_iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => {
                        return Err(RunError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name(heap)
                        )));
                    }
                }
            }
            let joined = parts.join(s);
            heap.tracker.check_large_result(joined.len())?;
            Value::Str(joined)
        }
        "startswith" | "endswith" => {
            let affix = args.get_one_arg(name)?;
            let candidates = match affix {
                Value::Tuple(items) => items,
                other => vec![other],
            };
            let mut found = false;
            for candidate in &candidates {
                let candidate = str_arg(heap, name, candidate)?;
                found |= if name == "startswith" {
                    s.starts_with(&candidate)
                } else {
                    s.ends_with(&candidate)
                };
            }
            Value::Bool(found)
        }
        "replace" => {
            let mut positional = args.between("replace", 2, 3)?.into_iter();
            let old = str_arg(heap, "replace", &positional.next().unwrap_or(Value::None))?;
            let new = str_arg(heap, "replace", &positional.next().unwrap_or(Value::None))?;
            let replaced = match positional.next() {
                Some(Value::Int(count)) if count >= 0 => s.replacen(&old, &new, count as usize),
                _ => s.replace(&old, &new),
            };
            heap.tracker.check_large_result(replaced.len())?;
            Value::Str(replaced)
        }
        "encode" => {
            args.between("encode", 0, 2)?;
            Value::Bytes(s.as_bytes().to_vec())
        }
        "find" => {
            let needle = str_arg(heap, "find", &args.get_one_arg("find")?)?;
            match s.find(&needle) {
                Some(byte_idx) => Value::Int(s[..byte_idx].chars().count() as i64),
                None => Value::Int(-1),
            }
        }
        "count" => {
            let needle = str_arg(heap, "count", &args.get_one_arg("count")?)?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle.as_str()).count()
            };
            Value::Int(count as i64)
        }
        "isdigit" => {
            args.check_zero_args("isdigit")?;
            Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        }
        _ => {
            return Err(RunError::new(
                ExcType::AttributeError,
                format!("'str' object has no attribute '{name}'"),
            ));
        }
    })
}

/// Python's `str.split()` with no separator.
fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<String> {
    let Some(max) = maxsplit else {
        return s.split_whitespace().map(str::to_owned).collect();
    };
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == max {
            parts.push(rest.to_owned());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_owned());
        rest = rest[end..].trim_start();
    }
    parts
}

fn decode_utf8(bytes: &[u8]) -> RunResult<Value> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(Value::Str(s.to_owned())),
        Err(err) => {
            let position = err.valid_up_to();
            Err(RunError::new(
                ExcType::UnicodeDecodeError,
                format!(
                    "'utf-8' codec can't decode byte 0x{:02x} in position {position}: invalid start byte",
                    bytes[position]
                ),
            ))
        }
    }
}

fn list_items(heap: &mut Heap<impl ResourceTracker>, id: HeapId) -> &mut Vec<Value> {
    match heap.get_mut(id) {
        HeapData::List(items) => items,
        _ => unreachable!("list method called on a non-list"),
    }
}

fn dict_entries(heap: &mut Heap<impl ResourceTracker>, id: HeapId) -> &mut Dict {
    match heap.get_mut(id) {
        HeapData::Dict(dict) => dict,
        _ => unreachable!("dict method called on a non-dict"),
    }
}

/// `list` methods, `None` when `name` is not one.
fn list_method(
    heap: &mut Heap<impl ResourceTracker>,
    id: HeapId,
    name: &str,
    mut args: ArgValues,
) -> Option<RunResult<Value>> {
    let result = match name {
        "append" => args.get_one_arg("append").and_then(|item| {
            heap.track_insert(id)?;
            list_items(heap, id).push(item);
            Ok(Value::None)
        }),
        "extend" => args.get_one_arg("extend").and_then(|iterable| {
            let items = heap.iter_items(&iterable)?;
            for _ in &items {
                heap.track_insert(id)?;
            }
            list_items(heap, id).extend(items);
            Ok(Value::None)
        }),
        "insert" => args.get_two_args("insert").and_then(|(index, item)| {
            let Value::Int(index) = index else {
                return Err(RunError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    index.type_name(heap)
                )));
            };
            heap.track_insert(id)?;
            let items = list_items(heap, id);
            let len = items.len() as i64;
            let idx = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(idx as usize, item);
            Ok(Value::None)
        }),
        "pop" => args.get_zero_one_arg("pop").and_then(|index| {
            let items = list_items(heap, id);
            if items.is_empty() {
                return Err(RunError::new(ExcType::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match index {
                None => len - 1,
                Some(Value::Int(i)) if i < 0 => i + len,
                Some(Value::Int(i)) => i,
                Some(_) => return Err(RunError::type_error("list indices must be integers")),
            };
            if !(0..len).contains(&index) {
                return Err(RunError::new(ExcType::IndexError, "pop index out of range"));
            }
            Ok(items.remove(index as usize))
        }),
        "index" | "count" | "remove" => args.get_one_arg(name).and_then(|needle| {
            let items = heap.iter_items(&Value::Ref(id))?;
            let position = items.iter().position(|item| heap.py_eq(item, &needle));
            match name {
                "count" => Ok(Value::Int(items.iter().filter(|item| heap.py_eq(item, &needle)).count() as i64)),
                "index" => position
                    .map(|p| Value::Int(p as i64))
                    .ok_or_else(|| RunError::value_error(format!("{} is not in list", needle.py_repr(heap)))),
                _ => match position {
                    Some(p) => {
                        list_items(heap, id).remove(p);
                        Ok(Value::None)
                    }
                    None => Err(RunError::value_error("list.remove(x): x not in list")),
                },
            }
        }),
        "copy" => args.check_zero_args("copy").and_then(|()| {
            let items = heap.iter_items(&Value::Ref(id))?;
            Ok(heap.alloc_list(items)?)
        }),
        "reverse" => args.check_zero_args("reverse").map(|()| {
            list_items(heap, id).reverse();
            Value::None
        }),
        "clear" => args.check_zero_args("clear").map(|()| {
            list_items(heap, id).clear();
            Value::None
        }),
        "sort" => {
            let reverse = args.take_kwarg("reverse").is_some_and(|v| v.is_truthy(heap));
            if args.take_kwarg("key").is_some() {
                return Some(Err(RunError::new(
                    ExcType::NotImplementedError,
                    "list.sort() key= is not supported",
                )));
            }
            args.check_zero_args("sort").and_then(|()| {
                let mut items = std::mem::take(list_items(heap, id));
                let sorted = sort_values(heap, &mut items, reverse);
                *list_items(heap, id) = items;
                sorted.map(|()| Value::None)
            })
        }
        _ => return None,
    };
    Some(result)
}

/// `dict` methods, `None` when `name` is not one.
fn dict_method(
    heap: &mut Heap<impl ResourceTracker>,
    id: HeapId,
    name: &str,
    args: ArgValues,
) -> Option<RunResult<Value>> {
    let result = match name {
        "get" => args.get_one_two_args("get").and_then(|(key, default)| {
            let hash_key = HashKey::new(&key, heap)?;
            let found = dict_entries(heap, id).get(&hash_key).cloned();
            Ok(found.or(default).unwrap_or(Value::None))
        }),
        "keys" | "values" | "items" => args.check_zero_args(name).and_then(|()| {
            let dict = dict_entries(heap, id);
            let items = match name {
                "keys" => dict.keys(),
                "values" => dict.values(),
                _ => dict.iter().map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()])).collect(),
            };
            Ok(heap.alloc_list(items)?)
        }),
        "pop" => args.get_one_two_args("pop").and_then(|(key, default)| {
            let hash_key = HashKey::new(&key, heap)?;
            match (dict_entries(heap, id).remove(&hash_key), default) {
                (Some(value), _) | (None, Some(value)) => Ok(value),
                (None, None) => Err(RunError::new(ExcType::KeyError, key.py_repr(heap))),
            }
        }),
        "setdefault" => args.get_one_two_args("setdefault").and_then(|(key, default)| {
            let hash_key = HashKey::new(&key, heap)?;
            if let Some(value) = dict_entries(heap, id).get(&hash_key) {
                return Ok(value.clone());
            }
            let default = default.unwrap_or(Value::None);
            heap.track_insert(id)?;
            dict_entries(heap, id).insert(hash_key, key, default.clone());
            Ok(default)
        }),
        "update" => dict_update(heap, id, args),
        "copy" => args.check_zero_args("copy").and_then(|()| {
            let copy = dict_entries(heap, id).clone();
            Ok(heap.alloc(HeapData::Dict(copy))?)
        }),
        "clear" => args.check_zero_args("clear").map(|()| {
            dict_entries(heap, id).clear();
            Value::None
        }),
        _ => return None,
    };
    Some(result)
}

/// `dict.update(other, **kwargs)`.
fn dict_update(heap: &mut Heap<impl ResourceTracker>, id: HeapId, args: ArgValues) -> RunResult<Value> {
    let ArgValues { args: positional, kwargs } = args;
    if positional.len() > 1 {
        return Err(RunError::type_error(format!(
            "update expected at most 1 argument, got {}",
            positional.len()
        )));
    }
    let mut pairs = Vec::new();
    if let Some(other) = positional.into_iter().next() {
        let other_dict = match &other {
            Value::Ref(other_id) => match heap.get(*other_id) {
                HeapData::Dict(other) => Some(other.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>()),
                _ => None,
            },
            _ => None,
        };
        match other_dict {
            Some(items) => pairs.extend(items),
            None => {
                for (i, item) in heap.iter_items(&other)?.into_iter().enumerate() {
                    let pair = heap.iter_items(&item)?;
                    let len = pair.len();
                    let [k, v] = <[Value; 2]>::try_from(pair).map_err(|_| {
                        RunError::value_error(format!(
                            "dictionary update sequence element #{i} has length {len}; 2 is required"
                        ))
                    })?;
                    pairs.push((k, v));
                }
            }
        }
    }
    pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::Str(k), v)));
    for (key, value) in pairs {
        let hash_key = HashKey::new(&key, heap)?;
        if dict_entries(heap, id).insert(hash_key, key, value) {
            heap.track_insert(id)?;
        }
    }
    Ok(Value::None)
}
