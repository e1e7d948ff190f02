//! Arithmetic, comparison, membership and formatting of runtime values.

use std::cmp::Ordering;

use crate::{
    ExcType,
    exception::{RunError, RunResult},
    expressions::{CmpOperator, Operator},
    object::float_repr,
    pathlib,
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    value::{HashKey, Heap, HeapData, Value},
};

fn op_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::Div => "/",
        Operator::FloorDiv => "//",
        Operator::Mod => "%",
        Operator::Pow => "** or pow()",
    }
}

fn cmp_symbol(op: CmpOperator) -> &'static str {
    match op {
        CmpOperator::Lt => "<",
        CmpOperator::LtE => "<=",
        CmpOperator::Gt => ">",
        CmpOperator::GtE => ">=",
        CmpOperator::Eq => "==",
        CmpOperator::NotEq => "!=",
        CmpOperator::Is => "is",
        CmpOperator::IsNot => "is not",
        CmpOperator::In => "in",
        CmpOperator::NotIn => "not in",
    }
}

fn overflow() -> RunError {
    RunError::new(ExcType::OverflowError, "integer result too large for 64 bits")
}

fn zero_division(msg: &str) -> RunError {
    RunError::new(ExcType::ZeroDivisionError, msg)
}

/// Int view of bools and ints.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        other => as_int(other).map(|i| i as f64),
    }
}

/// Applies a binary operator, e.g. `a + b`.
pub(crate) fn binary_op(heap: &mut Heap<impl ResourceTracker>, op: Operator, a: &Value, b: &Value) -> RunResult<Value> {
    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        return int_op(op, x, y);
    }
    if let (Some(x), Some(y)) = (as_float(a), as_float(b)) {
        return float_op(op, x, y);
    }
    match (op, a, b) {
        (Operator::Add, Value::Str(x), Value::Str(y)) => {
            check_size(heap, x.len() + y.len())?;
            Ok(Value::Str(format!("{x}{y}")))
        }
        (Operator::Add, Value::Bytes(x), Value::Bytes(y)) => {
            check_size(heap, x.len() + y.len())?;
            Ok(Value::Bytes([x.as_slice(), y.as_slice()].concat()))
        }
        (Operator::Add, Value::Tuple(x), Value::Tuple(y)) => Ok(Value::Tuple([x.as_slice(), y.as_slice()].concat())),
        (Operator::Add, Value::Ref(x), Value::Ref(y)) => match (heap.get(*x), heap.get(*y)) {
            (HeapData::List(l), HeapData::List(r)) => {
                let items = [l.as_slice(), r.as_slice()].concat();
                Ok(heap.alloc_list(items)?)
            }
            _ => Err(unsupported(heap, op, a, b)),
        },
        (Operator::Mult, seq, count) | (Operator::Mult, count, seq) if as_int(count).is_some() => {
            let n = as_int(count).unwrap_or(0).max(0) as usize;
            repeat(heap, seq, n).unwrap_or_else(|| Err(unsupported(heap, op, a, b)))
        }
        (Operator::Div, Value::Path(base), Value::Str(part) | Value::Path(part)) => {
            Ok(Value::Path(pathlib::join(base, part)))
        }
        (Operator::Div, Value::Str(base), Value::Path(part)) => Ok(Value::Path(pathlib::join(base, part))),
        _ => Err(unsupported(heap, op, a, b)),
    }
}

/// `a op= b`, extending lists in place as Python does.
pub(crate) fn inplace_op(
    heap: &mut Heap<impl ResourceTracker>,
    op: Operator,
    a: &Value,
    b: &Value,
) -> RunResult<Value> {
    if op == Operator::Add
        && let Value::Ref(id) = a
        && matches!(heap.get(*id), HeapData::List(_))
    {
        let items = heap.iter_items(b)?;
        for _ in &items {
            heap.track_insert(*id)?;
        }
        if let HeapData::List(list) = heap.get_mut(*id) {
            list.extend(items);
        }
        return Ok(a.clone());
    }
    binary_op(heap, op, a, b)
}

fn unsupported(heap: &Heap<impl ResourceTracker>, op: Operator, a: &Value, b: &Value) -> RunError {
    RunError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op_symbol(op),
        a.type_name(heap),
        b.type_name(heap)
    ))
}

fn check_size(heap: &Heap<impl ResourceTracker>, bytes: usize) -> RunResult<()> {
    if bytes > LARGE_RESULT_THRESHOLD {
        heap.tracker.check_large_result(bytes)?;
    }
    Ok(())
}

/// Sequence repetition, `None` if `seq` is not a sequence.
fn repeat(heap: &mut Heap<impl ResourceTracker>, seq: &Value, n: usize) -> Option<RunResult<Value>> {
    let unit = match seq {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::Tuple(t) => t.len() * size_of::<Value>(),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::List(items) => items.len() * size_of::<Value>(),
            _ => return None,
        },
        _ => return None,
    };
    let Some(total) = unit.checked_mul(n) else {
        return Some(Err(RunError::new(ExcType::OverflowError, "repeated sequence is too long")));
    };
    if let Err(e) = check_size(heap, total) {
        return Some(Err(e));
    }
    Some(match seq {
        Value::Str(s) => Ok(Value::Str(s.repeat(n))),
        Value::Bytes(b) => Ok(Value::Bytes(b.repeat(n))),
        Value::Tuple(t) => Ok(Value::Tuple(std::iter::repeat_n(t, n).flatten().cloned().collect())),
        Value::Ref(id) => {
            let items = match heap.get(*id) {
                HeapData::List(items) => std::iter::repeat_n(items, n).flatten().cloned().collect(),
                _ => Vec::new(),
            };
            heap.alloc_list(items).map_err(RunError::from)
        }
        _ => return None,
    })
}

fn int_op(op: Operator, x: i64, y: i64) -> RunResult<Value> {
    let result = match op {
        Operator::Add => x.checked_add(y).ok_or_else(overflow)?,
        Operator::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        Operator::Mult => x.checked_mul(y).ok_or_else(overflow)?,
        Operator::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        Operator::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q }
        }
        Operator::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
        }
        Operator::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(result))
}

fn float_op(op: Operator, x: f64, y: f64) -> RunResult<Value> {
    let result = match op {
        Operator::Add => x + y,
        Operator::Sub => x - y,
        Operator::Mult => x * y,
        Operator::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        Operator::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        Operator::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        Operator::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(result))
}

pub(crate) fn unary_neg(heap: &Heap<impl ResourceTracker>, value: &Value) -> RunResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(-f)),
        other => match as_int(other) {
            Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            None => Err(RunError::type_error(format!(
                "bad operand type for unary -: '{}'",
                other.type_name(heap)
            ))),
        },
    }
}

pub(crate) fn unary_pos(heap: &Heap<impl ResourceTracker>, value: &Value) -> RunResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(*f)),
        other => match as_int(other) {
            Some(i) => Ok(Value::Int(i)),
            None => Err(RunError::type_error(format!(
                "bad operand type for unary +: '{}'",
                other.type_name(heap)
            ))),
        },
    }
}

/// Evaluates a comparison operator.
pub(crate) fn compare_op(heap: &Heap<impl ResourceTracker>, op: CmpOperator, a: &Value, b: &Value) -> RunResult<bool> {
    match op {
        CmpOperator::Eq => Ok(heap.py_eq(a, b)),
        CmpOperator::NotEq => Ok(!heap.py_eq(a, b)),
        CmpOperator::Is => Ok(is_same(a, b)),
        CmpOperator::IsNot => Ok(!is_same(a, b)),
        CmpOperator::In => contains(heap, b, a),
        CmpOperator::NotIn => contains(heap, b, a).map(|found| !found),
        CmpOperator::Lt | CmpOperator::LtE | CmpOperator::Gt | CmpOperator::GtE => {
            // NaN compares false without raising
            if let (Some(x), Some(y)) = (as_float(a), as_float(b)) {
                return Ok(match x.partial_cmp(&y) {
                    Some(ordering) => ordering_matches(op, ordering),
                    None => false,
                });
            }
            let ordering = heap.py_cmp(a, b).map_err(|_| {
                RunError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    cmp_symbol(op),
                    a.type_name(heap),
                    b.type_name(heap)
                ))
            })?;
            Ok(ordering_matches(op, ordering))
        }
    }
}

fn ordering_matches(op: CmpOperator, ordering: Ordering) -> bool {
    match op {
        CmpOperator::Lt => ordering == Ordering::Less,
        CmpOperator::LtE => ordering != Ordering::Greater,
        CmpOperator::Gt => ordering == Ordering::Greater,
        CmpOperator::GtE => ordering != Ordering::Less,
        _ => false,
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Ref(x), Value::Ref(y)) => x == y,
        (Value::Ref(_), _) | (_, Value::Ref(_)) => false,
        _ => a == b,
    }
}

/// `item in container`.
pub(crate) fn contains(heap: &Heap<impl ResourceTracker>, container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(RunError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name(heap)
            ))),
        },
        Value::Bytes(b) => match item {
            Value::Bytes(needle) => Ok(needle.is_empty() || b.windows(needle.len()).any(|w| w == needle.as_slice())),
            other => match as_int(other) {
                Some(i) => Ok(b.iter().any(|byte| i64::from(*byte) == i)),
                None => Err(RunError::type_error("a bytes-like object is required")),
            },
        },
        Value::Tuple(items) => Ok(items.iter().any(|v| heap.py_eq(v, item))),
        Value::NamedTuple(nt) => Ok(nt.values.iter().any(|v| heap.py_eq(v, item))),
        Value::Range { start, stop, step } => Ok(match as_int(item) {
            Some(i) => {
                let in_bounds = if *step > 0 { i >= *start && i < *stop } else { i <= *start && i > *stop };
                in_bounds && (i - start) % step == 0
            }
            None => false,
        }),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::List(items) => Ok(items.iter().any(|v| heap.py_eq(v, item))),
            HeapData::Dict(dict) => Ok(dict.get(&HashKey::new(item, heap)?).is_some()),
            HeapData::Iter(_) => Ok(heap.iter_items(container)?.iter().any(|v| heap.py_eq(v, item))),
        },
        other => Err(RunError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name(heap)
        ))),
    }
}

/// A parsed `[[fill]align][sign][0][width][,|_][.precision][type]` format spec.
#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = Self::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = Some(chars[0]);
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(c @ ('+' | '-' | ' ')) = chars.get(i) {
            out.sign = Some(*c);
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            out.width = chars[start..i].iter().collect::<String>().parse().ok()?;
        }
        if let Some(c @ (',' | '_')) = chars.get(i) {
            out.grouping = Some(*c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            out.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
        }
        if let Some(c) = chars.get(i) {
            out.kind = Some(*c);
            i += 1;
        }
        (i == chars.len()).then_some(out)
    }
}

/// Implements `format(value, spec)` for f-string interpolations.
pub(crate) fn format_value(heap: &Heap<impl ResourceTracker>, value: &Value, spec: &str) -> RunResult<String> {
    if spec.is_empty() {
        return Ok(value.py_str(heap));
    }
    let invalid = || {
        RunError::value_error(format!(
            "Invalid format specifier '{spec}' for object of type '{}'",
            value.type_name(heap)
        ))
    };
    let parsed = FormatSpec::parse(spec).ok_or_else(invalid)?;
    // padding and digit expansion produce at least this many characters
    let requested = parsed.width.max(parsed.precision.unwrap_or(0));
    check_size(heap, requested.saturating_mul(parsed.fill.map_or(1, char::len_utf8)))?;
    let numeric = as_float(value).is_some();

    let body = match (parsed.kind, value) {
        (None | Some('s'), Value::Str(s)) => match parsed.precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.clone(),
        },
        (None | Some('d'), v) if matches!(v, Value::Int(_)) || (parsed.kind.is_some() && as_int(v).is_some()) => {
            let i = as_int(v).unwrap_or_default();
            sign_prefix(parsed.sign, i < 0) + &group(&i.unsigned_abs().to_string(), parsed.grouping)
        }
        (Some(k @ ('x' | 'X' | 'o' | 'b')), v) if as_int(v).is_some() => {
            let i = as_int(v).unwrap_or_default();
            let digits = match k {
                'x' => format!("{:x}", i.unsigned_abs()),
                'X' => format!("{:X}", i.unsigned_abs()),
                'o' => format!("{:o}", i.unsigned_abs()),
                _ => format!("{:b}", i.unsigned_abs()),
            };
            sign_prefix(parsed.sign, i < 0) + &digits
        }
        (Some(k @ ('f' | 'F' | 'e' | 'E' | '%')), v) if numeric => {
            let f = as_float(v).unwrap_or_default();
            let precision = parsed.precision.unwrap_or(6);
            let digits = match k {
                '%' => format!("{:.precision$}%", f.abs() * 100.0),
                'e' | 'E' => {
                    let s = python_exp(f.abs(), precision);
                    if k == 'E' { s.to_uppercase() } else { s }
                }
                _ => format!("{:.precision$}", f.abs()),
            };
            let digits = match digits.split_once('.') {
                Some((int_part, frac)) => format!("{}.{frac}", group(int_part, parsed.grouping)),
                None => group(&digits, parsed.grouping),
            };
            sign_prefix(parsed.sign, f.is_sign_negative() && f != 0.0) + &digits
        }
        (None | Some('g'), Value::Float(f)) => {
            let text = match parsed.precision {
                Some(p) => format!("{:.p$}", f.abs()),
                None => float_repr(f.abs()),
            };
            sign_prefix(parsed.sign, f.is_sign_negative()) + &text
        }
        (None, other) if parsed.precision.is_none() && parsed.sign.is_none() => other.py_str(heap),
        _ => return Err(invalid()),
    };

    let numeric_layout = numeric && !(parsed.kind.is_none() && matches!(value, Value::Bool(_)));
    Ok(pad(&body, &parsed, numeric_layout))
}

fn sign_prefix(sign: Option<char>, negative: bool) -> String {
    match (negative, sign) {
        (true, _) => "-".to_owned(),
        (false, Some('+')) => "+".to_owned(),
        (false, Some(' ')) => " ".to_owned(),
        _ => String::new(),
    }
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_owned();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn python_exp(f: f64, precision: usize) -> String {
    let s = format!("{f:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => s,
    }
}

fn pad(body: &str, spec: &FormatSpec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body.to_owned();
    }
    let missing = spec.width - len;
    let (fill, align) = if spec.zero && spec.align.is_none() {
        ('0', '=')
    } else {
        let default_align = if numeric { '>' } else { '<' };
        (spec.fill.unwrap_or(' '), spec.align.unwrap_or(default_align))
    };
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '>' => fill_str(missing) + body,
        '^' => fill_str(missing / 2) + body + &fill_str(missing - missing / 2),
        '=' => {
            let sign_len = usize::from(body.starts_with(['-', '+', ' ']));
            format!("{}{}{}", &body[..sign_len], fill_str(missing), &body[sign_len..])
        }
        _ => body.to_owned() + &fill_str(missing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&Heap::new(NoLimitTracker), &value, spec).unwrap()
    }

    #[test]
    fn format_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "05d"), "-0042");
        assert_eq!(fmt(Value::Str("ab".to_owned()), ">4"), "  ab");
        assert_eq!(fmt(Value::Str("ab".to_owned()), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(1_234_567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(0.25), ".0%"), "25%");
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Float(12345.678), "e"), "1.234568e+04");
    }

    #[test]
    fn python_division_semantics() {
        assert_eq!(int_op(Operator::FloorDiv, -7, 2).unwrap(), Value::Int(-4));
        assert_eq!(int_op(Operator::Mod, -7, 2).unwrap(), Value::Int(1));
        assert_eq!(int_op(Operator::Mod, 7, -2).unwrap(), Value::Int(-1));
        assert_eq!(int_op(Operator::Div, 7, 2).unwrap(), Value::Float(3.5));
        assert!(int_op(Operator::Mult, i64::MAX, 2).is_err());
    }
}
