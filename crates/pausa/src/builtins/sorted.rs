//! Implementation of the sorted() and sum() builtin functions.

use std::cmp::Ordering;

use crate::{
    args::ArgValues,
    exception::{RunError, RunResult},
    expressions::Operator,
    ops::binary_op,
    resource::ResourceTracker,
    value::{Heap, Value},
};

/// Implementation of the sorted() builtin function.
///
/// Only the `reverse` keyword is supported, `key` functions would need to call back into the VM.
pub fn builtin_sorted(heap: &mut Heap<impl ResourceTracker>, mut args: ArgValues) -> RunResult<Value> {
    let reverse = args.take_kwarg("reverse").is_some_and(|v| v.is_truthy(heap));
    if args.take_kwarg("key").is_some() {
        return Err(RunError::new(
            crate::ExcType::NotImplementedError,
            "sorted() does not support the key argument",
        ));
    }
    let iterable = args.get_one_arg("sorted")?;
    let mut items = heap.iter_items(&iterable)?;
    sort_values(heap, &mut items, reverse)?;
    Ok(heap.alloc_list(items)?)
}

/// Stable sort of `items` with Python ordering, shared with `list.sort()`.
pub(crate) fn sort_values(heap: &Heap<impl ResourceTracker>, items: &mut [Value], reverse: bool) -> RunResult<()> {
    let mut error = None;
    items.sort_by(|a, b| {
        if error.is_some() {
            return Ordering::Equal;
        }
        let ordering = heap.py_cmp(a, b).unwrap_or_else(|e| {
            error = Some(e);
            Ordering::Equal
        });
        if reverse { ordering.reverse() } else { ordering }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Implementation of the sum() builtin function.
pub fn builtin_sum(heap: &mut Heap<impl ResourceTracker>, mut args: ArgValues) -> RunResult<Value> {
    let start = args.take_kwarg("start");
    let (iterable, positional_start) = args.get_one_two_args("sum")?;
    let mut total = start.or(positional_start).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(RunError::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in heap.iter_items(&iterable)? {
        total = binary_op(heap, Operator::Add, &total, &item)?;
    }
    Ok(total)
}
