//! Type conversion builtins: `int()`, `float()`, `dict()` and `round()`.

use crate::{
    ExcType,
    args::ArgValues,
    exception::{RunError, RunResult},
    object::string_repr,
    resource::ResourceTracker,
    value::{Dict, HashKey, Heap, HeapData, Value},
};

/// Implementation of the int() builtin function.
///
/// Accepts an optional `base` for string arguments, `0` means the base is read from a prefix.
pub fn builtin_int(heap: &mut Heap<impl ResourceTracker>, mut args: ArgValues) -> RunResult<Value> {
    let base = args.take_kwarg("base");
    let mut positional = args.between("int", 0, 2)?.into_iter();
    let (value, base) = match (positional.next(), positional.next().or(base)) {
        (None, None) => return Ok(Value::Int(0)),
        (Some(value), base) => (value, base),
        (None, Some(_)) => return Err(RunError::type_error("int() missing string argument")),
    };
    match (value, base) {
        (Value::Str(s), base) => {
            let base = match base {
                None => 10,
                Some(Value::Int(b)) if b == 0 || (2..=36).contains(&b) => b as u32,
                Some(Value::Int(_)) => return Err(RunError::value_error("int() base must be >= 2 and <= 36, or 0")),
                Some(other) => {
                    return Err(RunError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name(heap)
                    )));
                }
            };
            parse_int(&s, base)
                .map(Value::Int)
                .ok_or_else(|| {
                    RunError::value_error(format!(
                        "invalid literal for int() with base {base}: {}",
                        string_repr(&s)
                    ))
                })
        }
        (_, Some(_)) => Err(RunError::type_error("int() can't convert non-string with explicit base")),
        (Value::Int(i), None) => Ok(Value::Int(i)),
        (Value::Bool(b), None) => Ok(Value::Int(i64::from(b))),
        (Value::Float(f), None) => {
            if f.is_nan() {
                Err(RunError::value_error("cannot convert float NaN to integer"))
            } else if f.is_infinite() {
                Err(RunError::new(ExcType::OverflowError, "cannot convert float infinity to integer"))
            } else if f.abs() >= 9.2e18 {
                Err(RunError::new(ExcType::OverflowError, "integer result too large for 64 bits"))
            } else {
                Ok(Value::Int(f.trunc() as i64))
            }
        }
        (other, None) => Err(RunError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name(heap)
        ))),
    }
}

fn parse_int(s: &str, base: u32) -> Option<i64> {
    let s = s.trim().replace('_', "");
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(&s)),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..]),
        (0 | 8, Some("0o")) => (8, &digits[2..]),
        (0 | 2, Some("0b")) => (2, &digits[2..]),
        (0, _) => (10, digits),
        (base, _) => (base, digits),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, base).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Implementation of the float() builtin function.
pub fn builtin_float(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    match args.get_zero_one_arg("float")? {
        None => Ok(Value::Float(0.0)),
        Some(Value::Float(f)) => Ok(Value::Float(f)),
        Some(Value::Int(i)) => Ok(Value::Float(i as f64)),
        Some(Value::Bool(b)) => Ok(Value::Float(f64::from(u8::from(b)))),
        Some(Value::Str(s)) => parse_float(&s)
            .map(Value::Float)
            .ok_or_else(|| RunError::value_error(format!("could not convert string to float: {}", string_repr(&s)))),
        Some(other) => Err(RunError::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name(heap)
        ))),
    }
}

fn parse_float(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().trim_start_matches(['+', '-']) {
        "inf" | "infinity" | "nan" => {}
        other if other.chars().any(char::is_alphabetic) && !other.contains('e') => return None,
        _ => {}
    }
    trimmed.replace('_', "").parse().ok()
}

/// Implementation of the dict() builtin function.
///
/// Takes an optional mapping or iterable of pairs, then keyword arguments as extra entries.
pub fn builtin_dict(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let ArgValues { args, kwargs } = args;
    if args.len() > 1 {
        return Err(RunError::type_error(format!(
            "dict expected at most 1 argument, got {}",
            args.len()
        )));
    }
    let mut dict = Dict::default();
    if let Some(source) = args.into_iter().next() {
        let pairs = match &source {
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Dict(existing) => existing.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                _ => pairs_from_iterable(heap, &source)?,
            },
            _ => pairs_from_iterable(heap, &source)?,
        };
        for (k, v) in pairs {
            dict.insert(HashKey::new(&k, heap)?, k, v);
        }
    }
    for (k, v) in kwargs {
        let key = Value::Str(k);
        dict.insert(HashKey::new(&key, heap)?, key, v);
    }
    Ok(heap.alloc(HeapData::Dict(dict))?)
}

fn pairs_from_iterable(heap: &Heap<impl ResourceTracker>, source: &Value) -> RunResult<Vec<(Value, Value)>> {
    heap.iter_items(source)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let parts = heap.iter_items(&item)?;
            match <[Value; 2]>::try_from(parts) {
                Ok([k, v]) => Ok((k, v)),
                Err(parts) => Err(RunError::value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    parts.len()
                ))),
            }
        })
        .collect()
}

/// Implementation of the round() builtin function, rounding half to even like Python.
pub fn builtin_round(heap: &mut Heap<impl ResourceTracker>, args: ArgValues) -> RunResult<Value> {
    let (value, ndigits) = args.get_one_two_args("round")?;
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(Value::Int(n)) => Some(n),
        Some(other) => {
            return Err(RunError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name(heap)
            )));
        }
    };
    match (value, ndigits) {
        (Value::Int(i), _) => Ok(Value::Int(i)),
        (Value::Bool(b), _) => Ok(Value::Int(i64::from(b))),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(RunError::new(ExcType::OverflowError, "cannot convert float infinity to integer"));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Value::Float(f), Some(n)) => {
            let factor = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
        (other, _) => Err(RunError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name(heap)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-1_000", 10), Some(-1000));
        assert_eq!(parse_int("0xff", 0), Some(255));
        assert_eq!(parse_int("ff", 16), Some(255));
        assert_eq!(parse_int("0b101", 0), Some(5));
        assert_eq!(parse_int("12a", 10), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn float_literals() {
        assert_eq!(parse_float("1.5"), Some(1.5));
        assert_eq!(parse_float(" -2e3 "), Some(-2000.0));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float("abc"), None);
    }
}
