use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::ExcType;

/// A Python value passed across the sandbox boundary.
///
/// Inputs, external function arguments and return values, OS call arguments and the final
/// result of a program are all `Object`s. Inside the VM values live in a heap; they are
/// converted to and from `Object` whenever execution pauses or resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Object>),
    Tuple(Vec<Object>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Object, Object)>),
    /// A `pathlib.PurePosixPath`.
    Path(String),
    /// A named tuple such as `os.stat_result`.
    NamedTuple {
        type_name: String,
        field_names: Vec<String>,
        values: Vec<Object>,
    },
    /// An exception instance, e.g. from `return ValueError('x')`.
    Exception { exc_type: ExcType, arg: Option<String> },
    /// Output-only representation of a value with no host equivalent (functions, modules, ...).
    Repr(String),
}

impl Object {
    /// Convenience constructor for a dict from any iterable of pairs.
    pub fn dict(pairs: impl IntoIterator<Item = (Self, Self)>) -> Self {
        Self::Dict(pairs.into_iter().collect())
    }

    /// Python type name, as `type(x).__name__` would report it.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Path(_) => "PosixPath",
            Self::NamedTuple { type_name, .. } => type_name,
            Self::Exception { exc_type, .. } => (*exc_type).into(),
            Self::Repr(_) => "object",
        }
    }

    /// Python truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(pairs) => !pairs.is_empty(),
            Self::NamedTuple { values, .. } => !values.is_empty(),
            _ => true,
        }
    }

    /// Python `repr()` of this value.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // writing to a String cannot fail
        let _ = self.repr_fmt(&mut s);
        s
    }

    /// Python `str()` of this value.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::String(s) | Self::Path(s) => s.clone(),
            Self::Exception { arg, .. } => arg.clone().unwrap_or_default(),
            Self::Repr(s) => s.clone(),
            other => other.py_repr(),
        }
    }

    /// Converts to JSON, tagging values JSON cannot represent directly.
    ///
    /// Bytes become `{"$bytes": [..]}`, tuples `{"$tuple": [..]}` and paths `{"$path": ".."}`.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::{Value as JV, json};
        match self {
            Self::None => JV::Null,
            Self::Ellipsis => json!({"$ellipsis": true}),
            Self::Bool(b) => JV::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => {
                if f.is_nan() || f.is_infinite() {
                    JV::Null
                } else {
                    json!(f)
                }
            }
            Self::String(s) => JV::String(s.clone()),
            Self::Bytes(b) => json!({"$bytes": b}),
            Self::List(items) => JV::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Tuple(items) => json!({"$tuple": items.iter().map(Self::to_json_value).collect::<Vec<_>>()}),
            Self::Dict(pairs) => {
                let map: serde_json::Map<String, JV> = pairs
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Self::String(s) => s.clone(),
                            other => other.py_repr(),
                        };
                        (key, v.to_json_value())
                    })
                    .collect();
                JV::Object(map)
            }
            Self::Path(p) => json!({"$path": p}),
            Self::NamedTuple {
                type_name,
                field_names,
                values,
            } => {
                let fields: serde_json::Map<String, JV> = field_names
                    .iter()
                    .zip(values)
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect();
                json!({"$namedtuple": {"type": type_name, "fields": fields}})
            }
            Self::Exception { exc_type, arg } => json!({"$exception": {"type": exc_type.to_string(), "arg": arg}}),
            Self::Repr(s) => json!({"$repr": s}),
        }
    }

    /// Converts from JSON, understanding the tags written by [`Self::to_json_value`].
    #[must_use]
    pub fn from_json_value(value: serde_json::Value) -> Self {
        use serde_json::Value as JV;
        match value {
            JV::Null => Self::None,
            JV::Bool(b) => Self::Bool(b),
            JV::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JV::String(s) => Self::String(s),
            JV::Array(arr) => Self::List(arr.into_iter().map(Self::from_json_value).collect()),
            JV::Object(mut map) => {
                if map.len() == 1 {
                    if let Some(JV::String(p)) = map.get("$path") {
                        return Self::Path(p.clone());
                    }
                    if let Some(JV::Array(items)) = map.get_mut("$tuple") {
                        return Self::Tuple(std::mem::take(items).into_iter().map(Self::from_json_value).collect());
                    }
                    if let Some(JV::Array(items)) = map.get("$bytes") {
                        let bytes: Option<Vec<u8>> = items
                            .iter()
                            .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                            .collect();
                        if let Some(bytes) = bytes {
                            return Self::Bytes(bytes);
                        }
                    }
                    if map.contains_key("$ellipsis") {
                        return Self::Ellipsis;
                    }
                }
                Self::Dict(
                    map.into_iter()
                        .map(|(k, v)| (Self::String(k), Self::from_json_value(v)))
                        .collect(),
                )
            }
        }
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => f.write_str(&float_repr(*v)),
            Self::String(s) => f.write_str(&string_repr(s)),
            Self::Bytes(b) => f.write_str(&bytes_repr(b)),
            Self::List(items) => {
                f.write_char('[')?;
                write_joined(f, items)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_joined(f, items)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(pairs) => {
                f.write_char('{')?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    k.repr_fmt(f)?;
                    f.write_str(": ")?;
                    v.repr_fmt(f)?;
                }
                f.write_char('}')
            }
            Self::Path(p) => write!(f, "PosixPath({})", string_repr(p)),
            Self::NamedTuple {
                type_name,
                field_names,
                values,
            } => {
                write!(f, "{type_name}(")?;
                for (i, (name, value)) in field_names.iter().zip(values).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}=")?;
                    value.repr_fmt(f)?;
                }
                f.write_char(')')
            }
            Self::Exception { exc_type, arg } => match arg {
                Some(arg) => write!(f, "{exc_type}({})", string_repr(arg)),
                None => write!(f, "{exc_type}()"),
            },
            Self::Repr(s) => f.write_str(s),
        }
    }
}

fn write_joined(f: &mut impl Write, items: &[Object]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f)?;
    }
    Ok(())
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_str())
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Object {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for Object {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Python repr of a float: shortest round-trip digits, always with a decimal point or exponent.
pub(crate) fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{v:e}");
        // Rust writes `1e20`, Python writes `1e+20`
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp:0>2}"),
            Some((mantissa, exp)) => format!("{mantissa}e-{:0>2}", &exp[1..]),
            None => s,
        };
    }
    let s = v.to_string();
    if s.contains('.') { s } else { format!("{s}.0") }
}

/// Python repr of a str, preferring single quotes.
pub(crate) fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python repr of a bytes object.
pub(crate) fn bytes_repr(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(b.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            byte if byte == quote => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..0x7f => out.push(byte as char),
            byte => {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out.push(quote as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_reprs() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
    }

    #[test]
    fn string_reprs() {
        assert_eq!(string_repr("abc"), "'abc'");
        assert_eq!(string_repr("it's"), "\"it's\"");
        assert_eq!(string_repr("a\nb"), "'a\\nb'");
        assert_eq!(bytes_repr(b"a\x00"), "b'a\\x00'");
    }

    #[test]
    fn json_tags_round_trip() {
        let obj = Object::Tuple(vec![Object::Path("/a".into()), Object::Bytes(vec![1, 2])]);
        assert_eq!(Object::from_json_value(obj.to_json_value()), obj);
    }
}
