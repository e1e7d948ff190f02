//! Runtime values and the garbage-collected heap holding mutable containers.

use std::{cmp::Ordering, mem};

use ahash::AHashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    ExcType,
    builtins::Builtin,
    exception::{ExcInstance, RunError, RunResult},
    expressions::Module,
    object::Object,
    resource::{ResourceError, ResourceTracker},
};

/// Index of an entry in the [`Heap`].
pub(crate) type HeapId = u32;

/// A value on the operand stack, in a namespace or inside a container.
///
/// Immutable values are stored inline. Lists, dicts and iterators live in the heap and are
/// referenced with `Ref`, so that aliasing and in-place mutation behave like Python.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Value {
    /// An unassigned variable slot.
    Undefined,
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    Path(String),
    Exception(Box<ExcInstance>),
    NamedTuple(Box<NamedTuple>),
    Ref(HeapId),
    Function(Box<Function>),
    /// Host function bound as a global, by index into the external function names.
    ExtFunction(u32),
    Builtin(Builtin),
    ExcClass(ExcType),
    Module(Module),
    /// Result of an external call the host chose to defer.
    Future(u32),
    /// Result of `asyncio.gather(...)`, awaiting yields a list of the item results.
    Gather(Vec<Value>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NamedTuple {
    pub type_name: String,
    pub field_names: Vec<String>,
    pub values: Vec<Value>,
}

/// A user defined function: its code object and evaluated default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Function {
    pub code: u32,
    pub defaults: Vec<Value>,
}

impl Value {
    pub fn type_name(&self, heap: &Heap<impl ResourceTracker>) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::Path(_) => "PosixPath",
            Self::Exception(exc) => exc.exc_type.into(),
            Self::NamedTuple(_) => "stat_result",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::List(_) => "list",
                HeapData::Dict(_) => "dict",
                HeapData::Iter(_) => "iterator",
            },
            Self::Function(_) | Self::ExtFunction(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::ExcClass(_) => "type",
            Self::Module(_) => "module",
            Self::Future(_) => "Future",
            Self::Gather(_) => "_GatheringFuture",
            Self::Range { .. } => "range",
            Self::Slice { .. } => "slice",
        }
    }

    pub fn is_truthy(&self, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::None | Self::Undefined => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) | Self::Path(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::NamedTuple(nt) => !nt.values.is_empty(),
            Self::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::List(items) => !items.is_empty(),
                HeapData::Dict(dict) => !dict.is_empty(),
                HeapData::Iter(_) => true,
            },
            _ => true,
        }
    }

    /// Calls `f` with every heap id directly referenced by this value.
    fn visit_refs(&self, f: &mut impl FnMut(HeapId)) {
        match self {
            Self::Ref(id) => f(*id),
            Self::Tuple(items) | Self::Gather(items) => items.iter().for_each(|v| v.visit_refs(f)),
            Self::NamedTuple(nt) => nt.values.iter().for_each(|v| v.visit_refs(f)),
            Self::Function(func) => func.defaults.iter().for_each(|v| v.visit_refs(f)),
            _ => {}
        }
    }

    /// Python `repr()`.
    pub fn py_repr(&self, heap: &Heap<impl ResourceTracker>) -> String {
        self.to_object(heap).py_repr()
    }

    /// Python `str()`.
    pub fn py_str(&self, heap: &Heap<impl ResourceTracker>) -> String {
        match self {
            Self::Str(s) | Self::Path(s) => s.clone(),
            other => other.to_object(heap).py_str(),
        }
    }

    /// Converts this value to an [`Object`] for the host.
    ///
    /// Values without a host equivalent become [`Object::Repr`]. A container that contains
    /// itself is cut off with `[...]` or `{...}` as Python prints it.
    pub fn to_object(&self, heap: &Heap<impl ResourceTracker>) -> Object {
        self.to_object_inner(heap, &mut AHashSet::new())
    }

    fn to_object_inner(&self, heap: &Heap<impl ResourceTracker>, seen: &mut AHashSet<HeapId>) -> Object {
        match self {
            Self::Undefined | Self::None => Object::None,
            Self::Ellipsis => Object::Ellipsis,
            Self::Bool(b) => Object::Bool(*b),
            Self::Int(i) => Object::Int(*i),
            Self::Float(f) => Object::Float(*f),
            Self::Str(s) => Object::String(s.clone()),
            Self::Bytes(b) => Object::Bytes(b.clone()),
            Self::Tuple(items) => Object::Tuple(items.iter().map(|v| v.to_object_inner(heap, seen)).collect()),
            Self::Path(p) => Object::Path(p.clone()),
            Self::Exception(exc) => Object::Exception {
                exc_type: exc.exc_type,
                arg: exc.message.clone(),
            },
            Self::NamedTuple(nt) => Object::NamedTuple {
                type_name: nt.type_name.clone(),
                field_names: nt.field_names.clone(),
                values: nt.values.iter().map(|v| v.to_object_inner(heap, seen)).collect(),
            },
            Self::Ref(id) => {
                if !seen.insert(*id) {
                    return match heap.get(*id) {
                        HeapData::Dict(_) => Object::Repr("{...}".to_owned()),
                        _ => Object::Repr("[...]".to_owned()),
                    };
                }
                let obj = match heap.get(*id) {
                    HeapData::List(items) => {
                        Object::List(items.iter().map(|v| v.to_object_inner(heap, seen)).collect())
                    }
                    HeapData::Dict(dict) => Object::Dict(
                        dict.iter()
                            .map(|(k, v)| (k.to_object_inner(heap, seen), v.to_object_inner(heap, seen)))
                            .collect(),
                    ),
                    HeapData::Iter(_) => Object::Repr("<iterator object>".to_owned()),
                };
                seen.remove(id);
                obj
            }
            Self::Function(_) => Object::Repr("<function>".to_owned()),
            Self::ExtFunction(_) => Object::Repr("<external function>".to_owned()),
            Self::Builtin(b) => Object::Repr(format!("<built-in function {b}>")),
            Self::ExcClass(t) => Object::Repr(format!("<class '{t}'>")),
            Self::Module(m) => Object::Repr(format!("<module '{m}'>")),
            Self::Future(id) => Object::Repr(format!("<Future call_id={id}>")),
            Self::Gather(_) => Object::Repr("<_GatheringFuture>".to_owned()),
            Self::Range { start, stop, step } => {
                if *step == 1 {
                    Object::Repr(format!("range({start}, {stop})"))
                } else {
                    Object::Repr(format!("range({start}, {stop}, {step})"))
                }
            }
            Self::Slice { start, stop, step } => {
                let part = |v: &Option<i64>| v.map_or_else(|| "None".to_owned(), |v| v.to_string());
                Object::Repr(format!("slice({}, {}, {})", part(start), part(stop), part(step)))
            }
        }
    }

    /// Converts a host [`Object`] into a value, allocating containers on the heap.
    pub fn from_object(obj: Object, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Self> {
        Ok(match obj {
            Object::None => Self::None,
            Object::Ellipsis => Self::Ellipsis,
            Object::Bool(b) => Self::Bool(b),
            Object::Int(i) => Self::Int(i),
            Object::Float(f) => Self::Float(f),
            Object::String(s) => Self::Str(s),
            Object::Bytes(b) => Self::Bytes(b),
            Object::Path(p) => Self::Path(p),
            Object::Tuple(items) => Self::Tuple(
                items
                    .into_iter()
                    .map(|o| Self::from_object(o, heap))
                    .collect::<RunResult<_>>()?,
            ),
            Object::List(items) => {
                let items = items
                    .into_iter()
                    .map(|o| Self::from_object(o, heap))
                    .collect::<RunResult<Vec<_>>>()?;
                heap.alloc_list(items)?
            }
            Object::Dict(pairs) => {
                let mut dict = Dict::default();
                for (k, v) in pairs {
                    let k = Self::from_object(k, heap)?;
                    let v = Self::from_object(v, heap)?;
                    dict.insert(HashKey::new(&k, heap)?, k, v);
                }
                heap.alloc(HeapData::Dict(dict))?
            }
            Object::NamedTuple {
                type_name,
                field_names,
                values,
            } => Self::NamedTuple(Box::new(NamedTuple {
                type_name,
                field_names,
                values: values
                    .into_iter()
                    .map(|o| Self::from_object(o, heap))
                    .collect::<RunResult<_>>()?,
            })),
            Object::Exception { exc_type, arg } => Self::Exception(Box::new(ExcInstance::new(exc_type, arg))),
            Object::Repr(r) => {
                return Err(RunError::type_error(format!(
                    "repr-only value {r} cannot be passed into the sandbox"
                )));
            }
        })
    }
}

/// Number of items in `range(start, stop, step)`.
pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    }
}

/// Hashable projection of a value, used as the key of a [`Dict`].
///
/// Equal numbers hash equally across types (`1`, `1.0` and `True` are one key), as in Python.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<HashKey>),
    Path(String),
    ExcClass(ExcType),
    Builtin(Builtin),
}

impl HashKey {
    pub fn new(value: &Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        Ok(match value {
            Value::None => Self::None,
            Value::Ellipsis => Self::Ellipsis,
            Value::Bool(b) => Self::Int(i64::from(*b)),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e18 {
                    Self::Int(*f as i64)
                } else {
                    Self::Float(f.to_bits())
                }
            }
            Value::Str(s) => Self::Str(s.clone()),
            Value::Bytes(b) => Self::Bytes(b.clone()),
            Value::Path(p) => Self::Path(p.clone()),
            Value::Tuple(items) => Self::Tuple(
                items
                    .iter()
                    .map(|v| Self::new(v, heap))
                    .collect::<RunResult<_>>()?,
            ),
            Value::NamedTuple(nt) => Self::Tuple(
                nt.values
                    .iter()
                    .map(|v| Self::new(v, heap))
                    .collect::<RunResult<_>>()?,
            ),
            Value::ExcClass(t) => Self::ExcClass(*t),
            Value::Builtin(b) => Self::Builtin(*b),
            other => {
                return Err(RunError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name(heap)
                )));
            }
        })
    }
}

/// Insertion ordered dict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Dict {
    entries: IndexMap<HashKey, (Value, Value), ahash::RandomState>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Inserts or replaces a value, returning whether the key is new.
    pub fn insert(&mut self, hash_key: HashKey, key: Value, value: Value) -> bool {
        if let Some(entry) = self.entries.get_mut(&hash_key) {
            entry.1 = value;
            false
        } else {
            self.entries.insert(hash_key, (key, value));
            true
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.entries.shift_remove(key).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }
}

/// State of an iterator created by `iter()` or a `for` loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum IterState {
    /// Iterates a heap list by position so appends during iteration are seen.
    List { list: HeapId, pos: usize },
    Items { items: Vec<Value>, pos: usize },
    Range { next: i64, stop: i64, step: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum HeapData {
    List(Vec<Value>),
    Dict(Dict),
    Iter(IterState),
}

impl HeapData {
    fn estimate_size(&self) -> usize {
        let items = match self {
            Self::List(items) => items.len(),
            Self::Dict(dict) => dict.len() * 2,
            Self::Iter(IterState::Items { items, .. }) => items.len(),
            Self::Iter(_) => 0,
        };
        mem::size_of::<Self>() + items * mem::size_of::<Value>()
    }

    fn collect_child_ids(&self, work_list: &mut Vec<HeapId>) {
        let mut push = |id| work_list.push(id);
        match self {
            Self::List(items) | Self::Iter(IterState::Items { items, .. }) => {
                items.iter().for_each(|v| v.visit_refs(&mut push));
            }
            Self::Dict(dict) => {
                for (k, v) in dict.iter() {
                    k.visit_refs(&mut push);
                    v.visit_refs(&mut push);
                }
            }
            Self::Iter(IterState::List { list, .. }) => push(*list),
            Self::Iter(IterState::Range { .. }) => {}
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HeapEntry {
    data: HeapData,
    /// Bytes reported to the tracker when allocated, returned on free.
    tracked_bytes: usize,
}

/// Heap of mutable containers with mark-and-sweep collection.
///
/// The resource tracker lives with the heap so every allocation is accounted for.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
    allocations_since_gc: usize,
    pub tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            allocations_since_gc: 0,
            tracker,
        }
    }

    pub fn alloc(&mut self, data: HeapData) -> Result<Value, ResourceError> {
        let size = data.estimate_size();
        self.tracker.on_allocate(|| size)?;
        self.allocations_since_gc += 1;
        let entry = HeapEntry {
            data,
            tracked_bytes: size,
        };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id as usize] = Some(entry);
            id
        } else {
            self.entries.push(Some(entry));
            (self.entries.len() - 1) as HeapId
        };
        Ok(Value::Ref(id))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> Result<Value, ResourceError> {
        self.alloc(HeapData::List(items))
    }

    /// Returns the data for a live heap id.
    ///
    /// Ids only come from values reachable by the VM, and reachable entries are never swept.
    pub fn get(&self, id: HeapId) -> &HeapData {
        match self.entries.get(id as usize) {
            Some(Some(entry)) => &entry.data,
            _ => unreachable!("heap id {id} refers to a freed entry"),
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        match self.entries.get_mut(id as usize) {
            Some(Some(entry)) => &mut entry.data,
            _ => unreachable!("heap id {id} refers to a freed entry"),
        }
    }

    /// Accounts for one item added to an existing container.
    pub fn track_insert(&mut self, id: HeapId) -> Result<(), ResourceError> {
        let size = mem::size_of::<Value>();
        self.tracker.on_container_insert(|| size)?;
        if let Some(Some(entry)) = self.entries.get_mut(id as usize) {
            entry.tracked_bytes += size;
        }
        Ok(())
    }

    pub fn should_gc(&self) -> bool {
        self.tracker.should_gc(self.allocations_since_gc)
    }

    /// Frees every entry not reachable from `roots`.
    pub fn collect_garbage<'v>(&mut self, roots: impl IntoIterator<Item = &'v Value>) {
        self.allocations_since_gc = 0;
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list = Vec::new();
        for root in roots {
            root.visit_refs(&mut |id| work_list.push(id));
        }
        while let Some(id) = work_list.pop() {
            let idx = id as usize;
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(entry)) = self.entries.get(idx) {
                entry.data.collect_child_ids(&mut work_list);
            }
        }

        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(entry) = slot.take() {
                self.tracker.on_free(|| entry.tracked_bytes);
                self.free_list.push(idx as HeapId);
            }
        }
    }

    /// Number of live entries.
    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Items of any iterable value, materialized.
    pub fn iter_items(&self, value: &Value) -> RunResult<Vec<Value>> {
        Ok(match value {
            Value::Tuple(items) => items.clone(),
            Value::NamedTuple(nt) => nt.values.clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Bytes(b) => b.iter().map(|b| Value::Int(i64::from(*b))).collect(),
            Value::Range { start, stop, step } => {
                let len = range_len(*start, *stop, *step);
                (0..len).map(|i| Value::Int(start + i * step)).collect()
            }
            Value::Ref(id) => match self.get(*id) {
                HeapData::List(items) => items.clone(),
                HeapData::Dict(dict) => dict.keys(),
                HeapData::Iter(IterState::Items { items, pos }) => items[*pos..].to_vec(),
                HeapData::Iter(IterState::List { list, pos }) => match self.get(*list) {
                    HeapData::List(items) => items.get(*pos..).map(<[Value]>::to_vec).unwrap_or_default(),
                    _ => Vec::new(),
                },
                HeapData::Iter(IterState::Range { next, stop, step }) => {
                    let len = range_len(*next, *stop, *step);
                    (0..len).map(|i| Value::Int(next + i * step)).collect()
                }
            },
            other => {
                return Err(RunError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name(self)
                )));
            }
        })
    }

    /// Creates an iterator over `value`.
    pub fn make_iter(&mut self, value: &Value) -> RunResult<Value> {
        let state = match value {
            Value::Ref(id) => match self.get(*id) {
                HeapData::List(_) => IterState::List { list: *id, pos: 0 },
                HeapData::Iter(_) => return Ok(value.clone()),
                HeapData::Dict(_) => IterState::Items {
                    items: self.iter_items(value)?,
                    pos: 0,
                },
            },
            Value::Range { start, stop, step } => IterState::Range {
                next: *start,
                stop: *stop,
                step: *step,
            },
            other => IterState::Items {
                items: self.iter_items(other)?,
                pos: 0,
            },
        };
        Ok(self.alloc(HeapData::Iter(state))?)
    }

    /// Advances an iterator, `None` when exhausted.
    pub fn iter_next(&mut self, iter: HeapId) -> Option<Value> {
        // read the list length first, the iterator and list are separate entries
        let list_item = match self.get(iter) {
            HeapData::Iter(IterState::List { list, pos }) => match self.get(*list) {
                HeapData::List(items) => Some(items.get(*pos).cloned()),
                _ => Some(None),
            },
            _ => None,
        };
        match self.get_mut(iter) {
            HeapData::Iter(IterState::List { pos, .. }) => {
                let item = list_item.flatten();
                if item.is_some() {
                    *pos += 1;
                }
                item
            }
            HeapData::Iter(IterState::Items { items, pos }) => {
                let item = items.get(*pos).cloned();
                if item.is_some() {
                    *pos += 1;
                }
                item
            }
            HeapData::Iter(IterState::Range { next, stop, step }) => {
                let done = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if done {
                    None
                } else {
                    let item = *next;
                    *next += *step;
                    Some(Value::Int(item))
                }
            }
            _ => None,
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Ref(x), Value::Ref(y)) if x == y => true,
            (Value::Ref(x), Value::Ref(y)) => match (self.get(*x), self.get(*y)) {
                (HeapData::List(l), HeapData::List(r)) => self.seq_eq(l, r),
                (HeapData::Dict(l), HeapData::Dict(r)) => {
                    l.len() == r.len()
                        && l.iter().all(|(k, v)| {
                            let other = HashKey::new(k, self).ok().and_then(|hk| r.get(&hk));
                            other.is_some_and(|other| self.py_eq(v, other))
                        })
                }
                _ => false,
            },
            (Value::Tuple(l), Value::Tuple(r)) => self.seq_eq(l, r),
            (Value::NamedTuple(l), Value::NamedTuple(r)) => self.seq_eq(&l.values, &r.values),
            (Value::NamedTuple(l), Value::Tuple(r)) | (Value::Tuple(r), Value::NamedTuple(l)) => {
                self.seq_eq(&l.values, r)
            }
            (Value::Exception(l), Value::Exception(r)) => l.exc_type == r.exc_type && l.message == r.message,
            (Value::Undefined, _) | (_, Value::Undefined) => false,
            _ => match (number(a), number(b)) {
                (Some(x), Some(y)) => x.eq(&y),
                (None, None) => a == b,
                _ => false,
            },
        }
    }

    fn seq_eq(&self, l: &[Value], r: &[Value]) -> bool {
        l.len() == r.len() && l.iter().zip(r).all(|(a, b)| self.py_eq(a, b))
    }

    /// Ordering for `<`, `sorted()`, `min()` and `max()`.
    pub fn py_cmp(&self, a: &Value, b: &Value) -> RunResult<Ordering> {
        if let (Some(x), Some(y)) = (number(a), number(b)) {
            return x
                .partial_cmp(&y)
                .ok_or_else(|| RunError::value_error("cannot order NaN"));
        }
        match (a, b) {
            (Value::Str(x), Value::Str(y)) | (Value::Path(x), Value::Path(y)) => Ok(x.cmp(y)),
            (Value::Bytes(x), Value::Bytes(y)) => Ok(x.cmp(y)),
            (Value::Tuple(x), Value::Tuple(y)) => self.seq_cmp(x, y),
            (Value::Ref(x), Value::Ref(y)) => match (self.get(*x), self.get(*y)) {
                (HeapData::List(l), HeapData::List(r)) => self.seq_cmp(l, r),
                _ => Err(self.unorderable(a, b)),
            },
            _ => Err(self.unorderable(a, b)),
        }
    }

    fn seq_cmp(&self, l: &[Value], r: &[Value]) -> RunResult<Ordering> {
        for (a, b) in l.iter().zip(r) {
            if !self.py_eq(a, b) {
                return self.py_cmp(a, b);
            }
        }
        Ok(l.len().cmp(&r.len()))
    }

    fn unorderable(&self, a: &Value, b: &Value) -> RunError {
        RunError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(self),
            b.type_name(self)
        ))
    }
}

/// Numeric value of bools, ints and floats.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    #[test]
    fn gc_frees_unreachable_lists() {
        let mut heap = Heap::new(LimitedTracker::new(ResourceLimits::new().gc_interval(1)));
        let keep = heap.alloc_list(vec![Value::Int(1)]).unwrap();
        let inner = heap.alloc_list(Vec::new()).unwrap();
        let outer = heap.alloc_list(vec![inner]).unwrap();
        heap.alloc_list(Vec::new()).unwrap();
        assert_eq!(heap.live_count(), 4);
        assert!(heap.should_gc());

        heap.collect_garbage([&keep, &outer]);
        assert_eq!(heap.live_count(), 3);
        heap.collect_garbage([&keep]);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn gc_handles_cycles() {
        let mut heap = Heap::new(NoLimitTracker);
        let list = heap.alloc_list(Vec::new()).unwrap();
        let Value::Ref(id) = list else { panic!("expected ref") };
        if let HeapData::List(items) = heap.get_mut(id) {
            items.push(Value::Ref(id));
        }
        assert_eq!(list.py_repr(&heap), "[[...]]");
        heap.collect_garbage([]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn numeric_keys_unify() {
        let heap = Heap::new(NoLimitTracker);
        let mut dict = Dict::default();
        for (key, value) in [(Value::Int(1), "a"), (Value::Float(1.0), "b"), (Value::Bool(true), "c")] {
            let hash_key = HashKey::new(&key, &heap).unwrap();
            dict.insert(hash_key, key, Value::Str(value.to_owned()));
        }
        assert_eq!(dict.len(), 1);
        let one = HashKey::new(&Value::Int(1), &heap).unwrap();
        assert_eq!(dict.get(&one), Some(&Value::Str("c".to_owned())));
    }

    #[test]
    fn lists_are_unhashable() {
        let mut heap = Heap::new(NoLimitTracker);
        let list = heap.alloc_list(Vec::new()).unwrap();
        let Err(RunError::Exc(exc)) = HashKey::new(&list, &heap) else {
            panic!("expected TypeError");
        };
        assert_eq!(exc.message.as_deref(), Some("unhashable type: 'list'"));
    }
}
