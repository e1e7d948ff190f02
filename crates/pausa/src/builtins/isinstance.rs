//! Implementation of the isinstance() builtin function.

use super::Builtin;
use crate::{
    args::ArgValues,
    exception::{RunError, RunResult},
    resource::ResourceTracker,
    value::{Heap, HeapData, Value},
};

/// Implementation of the isinstance() builtin function.
///
/// The class may be a builtin type, an exception class or a tuple of either.
pub fn builtin_isinstance(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let (obj, classinfo) = args.get_two_args("isinstance")?;
    isinstance(heap, &obj, &classinfo).map(Value::Bool)
}

fn isinstance(heap: &Heap<impl ResourceTracker>, obj: &Value, classinfo: &Value) -> RunResult<bool> {
    match classinfo {
        Value::Tuple(classes) => {
            for class in classes {
                if isinstance(heap, obj, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::ExcClass(class) => Ok(matches!(obj, Value::Exception(exc) if exc.exc_type.is_subclass_of(*class))),
        Value::Builtin(builtin) => match builtin_type_check(heap, obj, *builtin) {
            Some(result) => Ok(result),
            None => Err(not_a_type()),
        },
        _ => Err(not_a_type()),
    }
}

fn not_a_type() -> RunError {
    RunError::type_error("isinstance() arg 2 must be a type, a tuple of types, or a union")
}

/// `None` when the builtin is a function rather than a type.
fn builtin_type_check(heap: &Heap<impl ResourceTracker>, obj: &Value, builtin: Builtin) -> Option<bool> {
    let heap_kind = match obj {
        Value::Ref(id) => Some(heap.get(*id)),
        _ => None,
    };
    Some(match builtin {
        // bool is a subclass of int
        Builtin::Int => matches!(obj, Value::Int(_) | Value::Bool(_)),
        Builtin::Bool => matches!(obj, Value::Bool(_)),
        Builtin::Float => matches!(obj, Value::Float(_)),
        Builtin::Str => matches!(obj, Value::Str(_)),
        Builtin::Tuple => matches!(obj, Value::Tuple(_) | Value::NamedTuple(_)),
        Builtin::List => matches!(heap_kind, Some(HeapData::List(_))),
        Builtin::Dict => matches!(heap_kind, Some(HeapData::Dict(_))),
        Builtin::Range => matches!(obj, Value::Range { .. }),
        Builtin::Path => matches!(obj, Value::Path(_)),
        _ => return None,
    })
}
