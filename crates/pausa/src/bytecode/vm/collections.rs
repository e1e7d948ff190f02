//! Indexing, slicing and sequence unpacking.

use super::VM;
use crate::{
    ExcType,
    exception::{RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{HashKey, HeapData, Value, range_len},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `object[index]`.
    pub(super) fn subscript(&mut self, object: &Value, index: &Value) -> RunResult<Value> {
        match object {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(items) => match index {
                    Value::Slice { start, stop, step } => {
                        let items = slice_items(items, *start, *stop, *step)?;
                        Ok(self.heap.alloc_list(items)?)
                    }
                    Value::Int(_) | Value::Bool(_) => {
                        let idx = resolve_index(index, items.len(), "list")?;
                        Ok(items[idx].clone())
                    }
                    other => Err(RunError::type_error(format!(
                        "list indices must be integers or slices, not {}",
                        other.type_name(self.heap)
                    ))),
                },
                HeapData::Dict(dict) => {
                    let key = HashKey::new(index, self.heap)?;
                    dict.get(&key)
                        .cloned()
                        .ok_or_else(|| RunError::new(ExcType::KeyError, index.py_repr(self.heap)))
                }
                HeapData::Iter(_) => Err(self.not_subscriptable(object)),
            },
            Value::Tuple(items) => self.index_sequence(items, index, "tuple", Value::Tuple),
            Value::NamedTuple(nt) => self.index_sequence(&nt.values, index, "tuple", Value::Tuple),
            Value::Str(s) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::Str(c.to_string())).collect();
                self.index_sequence(&chars, index, "string", |chars| {
                    Value::Str(
                        chars
                            .into_iter()
                            .filter_map(|c| match c {
                                Value::Str(c) => Some(c),
                                _ => None,
                            })
                            .collect(),
                    )
                })
            }
            Value::Bytes(bytes) => {
                let values: Vec<Value> = bytes.iter().map(|b| Value::Int(i64::from(*b))).collect();
                self.index_sequence(&values, index, "bytes", |values| {
                    Value::Bytes(
                        values
                            .into_iter()
                            .filter_map(|v| match v {
                                Value::Int(i) => u8::try_from(i).ok(),
                                _ => None,
                            })
                            .collect(),
                    )
                })
            }
            Value::Range { start, stop, step } => {
                let len = range_len(*start, *stop, *step);
                if let Value::Slice { .. } = index {
                    let items = self.heap.iter_items(object)?;
                    return self.index_sequence(&items, index, "range", Value::Tuple).map(|v| match v {
                        Value::Tuple(items) => range_from_items(&items, *step),
                        other => other,
                    });
                }
                let idx = resolve_index(index, len as usize, "range object")?;
                Ok(Value::Int(start + idx as i64 * step))
            }
            other => Err(self.not_subscriptable(other)),
        }
    }

    fn index_sequence(
        &self,
        items: &[Value],
        index: &Value,
        kind: &str,
        make: impl FnOnce(Vec<Value>) -> Value,
    ) -> RunResult<Value> {
        match index {
            Value::Slice { start, stop, step } => Ok(make(slice_items(items, *start, *stop, *step)?)),
            Value::Int(_) | Value::Bool(_) => {
                let idx = resolve_index(index, items.len(), kind)?;
                Ok(items[idx].clone())
            }
            other => Err(RunError::type_error(format!(
                "{kind} indices must be integers or slices, not {}",
                other.type_name(self.heap)
            ))),
        }
    }

    fn not_subscriptable(&self, value: &Value) -> RunError {
        RunError::type_error(format!("'{}' object is not subscriptable", value.type_name(self.heap)))
    }

    /// `object[index] = value`.
    pub(super) fn store_subscript(&mut self, object: &Value, index: Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = object else {
            return Err(RunError::type_error(format!(
                "'{}' object does not support item assignment",
                object.type_name(self.heap)
            )));
        };
        let id = *id;
        match self.heap.get(id) {
            HeapData::List(items) => {
                let len = items.len();
                let idx = match &index {
                    Value::Int(_) | Value::Bool(_) => resolve_index(&index, len, "list assignment")?,
                    other => {
                        return Err(RunError::type_error(format!(
                            "list indices must be integers or slices, not {}",
                            other.type_name(self.heap)
                        )));
                    }
                };
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items[idx] = value;
                }
                Ok(())
            }
            HeapData::Dict(_) => {
                let key = HashKey::new(&index, self.heap)?;
                let inserted = match self.heap.get_mut(id) {
                    HeapData::Dict(dict) => dict.insert(key, index, value),
                    _ => false,
                };
                if inserted {
                    self.heap.track_insert(id)?;
                }
                Ok(())
            }
            HeapData::Iter(_) => Err(RunError::type_error(
                "'iterator' object does not support item assignment",
            )),
        }
    }

    /// Items of `value` for `a, b = value`, checking there are exactly `n`.
    pub(super) fn unpack(&self, value: &Value, n: usize) -> RunResult<Vec<Value>> {
        let items = self.heap.iter_items(value).map_err(|_| {
            RunError::type_error(format!(
                "cannot unpack non-iterable {} object",
                value.type_name(self.heap)
            ))
        })?;
        match items.len().cmp(&n) {
            std::cmp::Ordering::Equal => Ok(items),
            std::cmp::Ordering::Greater => Err(RunError::value_error(format!(
                "too many values to unpack (expected {n})"
            ))),
            std::cmp::Ordering::Less => Err(RunError::value_error(format!(
                "not enough values to unpack (expected {n}, got {})",
                items.len()
            ))),
        }
    }
}

/// Resolves a possibly negative integer index, failing when out of range.
fn resolve_index(index: &Value, len: usize, kind: &str) -> RunResult<usize> {
    let raw = match index {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        _ => return Err(RunError::type_error(format!("{kind} indices must be integers"))),
    };
    let len = len as i64;
    let idx = if raw < 0 { raw + len } else { raw };
    if (0..len).contains(&idx) {
        Ok(idx as usize)
    } else {
        Err(RunError::new(ExcType::IndexError, format!("{kind} index out of range")))
    }
}

/// Python slice semantics over `items`.
fn slice_items(
    items: &[Value],
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> RunResult<Vec<Value>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RunError::value_error("slice step cannot be zero"));
    }
    let len = items.len() as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map_or(0, |s| clamp(s, 0, len));
        let stop = stop.map_or(len, |s| clamp(s, 0, len));
        let mut i = start;
        while i < stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let start = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let stop = stop.map_or(-1, |s| clamp(s, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    Ok(out)
}

/// Rebuilds a range from the ints a range slice produced.
fn range_from_items(items: &[Value], step: i64) -> Value {
    match (items.first(), items.get(1)) {
        (Some(Value::Int(first)), Some(Value::Int(second))) => Value::Range {
            start: *first,
            stop: first + (second - first) * items.len() as i64,
            step: second - first,
        },
        (Some(Value::Int(first)), None) => Value::Range {
            start: *first,
            stop: first + step.signum(),
            step: step.signum(),
        },
        _ => Value::Range {
            start: 0,
            stop: 0,
            step: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|i| Value::Int(*i)).collect()
    }

    #[test]
    fn slices_follow_python() {
        let items = ints(&[0, 1, 2, 3, 4]);
        assert_eq!(slice_items(&items, Some(1), Some(3), None).unwrap(), ints(&[1, 2]));
        assert_eq!(slice_items(&items, Some(-2), None, None).unwrap(), ints(&[3, 4]));
        assert_eq!(slice_items(&items, None, None, Some(-1)).unwrap(), ints(&[4, 3, 2, 1, 0]));
        assert_eq!(slice_items(&items, None, None, Some(2)).unwrap(), ints(&[0, 2, 4]));
        assert_eq!(slice_items(&items, Some(10), None, None).unwrap(), ints(&[]));
        assert_eq!(slice_items(&items, Some(3), Some(0), Some(-1)).unwrap(), ints(&[3, 2, 1]));
    }

    #[test]
    fn zero_step_is_an_error() {
        assert!(slice_items(&ints(&[1]), None, None, Some(0)).is_err());
    }

    #[test]
    fn negative_index() {
        assert_eq!(resolve_index(&Value::Int(-1), 3, "list").unwrap(), 2);
        assert!(resolve_index(&Value::Int(3), 3, "list").is_err());
        assert!(resolve_index(&Value::Int(-4), 3, "list").is_err());
    }
}
