//! Implementation of the min() and max() builtin functions.

use std::cmp::Ordering;

use crate::{
    args::ArgValues,
    exception::{RunError, RunResult},
    resource::ResourceTracker,
    value::{Heap, Value},
};

/// Shared implementation of `min()` and `max()`.
///
/// Called with one argument it picks from the iterable, with several it picks among them.
/// An empty iterable returns `default` when given, otherwise raises `ValueError`.
pub fn builtin_min_max(heap: &mut Heap<impl ResourceTracker>, mut args: ArgValues, is_max: bool) -> RunResult<Value> {
    let name = if is_max { "max" } else { "min" };
    let default = args.take_kwarg("default");
    args.check_no_kwargs(name)?;

    let items = match args.args.len() {
        0 => {
            return Err(RunError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        1 => {
            let iterable = args.args.pop().unwrap_or(Value::None);
            heap.iter_items(&iterable)?
        }
        _ if default.is_some() => {
            return Err(RunError::type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        _ => args.args,
    };

    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return default.ok_or_else(|| RunError::value_error(format!("{name}() iterable argument is empty")));
    };
    let wanted = if is_max { Ordering::Greater } else { Ordering::Less };
    for item in iter {
        // ties keep the first item seen
        if heap.py_cmp(&item, &best)? == wanted {
            best = item;
        }
    }
    Ok(best)
}
