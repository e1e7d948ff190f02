//! Normalization of host handler outcomes.
//!
//! Whatever a handler returns is reduced to a [`HandlerResult`]: a value for the guest, or a
//! failure that is raised inside the guest as an exception of the given type.

use std::any::Any;

use pausa::{ExcType, Exception, ExternalResult, Object};
use serde_json::Value as JsonValue;

/// A failure the guest sees as a raised exception.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub kind: ExcType,
    pub message: String,
}

impl HandlerFailure {
    #[must_use]
    pub fn new(kind: ExcType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failure with a kind given by name, `ValueError` or `value_error`.
    ///
    /// Unknown names become `RuntimeError`.
    #[must_use]
    pub fn named(kind: &str, message: impl Into<String>) -> Self {
        Self::new(ExcType::from_loose_name(kind).unwrap_or(ExcType::RuntimeError), message)
    }

    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::RuntimeError, message)
    }

    /// Describes a panic payload caught while running a handler.
    pub(crate) fn from_panic(source: &str, payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Self::runtime_error(format!("handler for '{source}' panicked: {detail}"))
    }
}

impl From<(ExcType, String)> for HandlerFailure {
    fn from((kind, message): (ExcType, String)) -> Self {
        Self::new(kind, message)
    }
}

impl From<(ExcType, &str)> for HandlerFailure {
    fn from((kind, message): (ExcType, &str)) -> Self {
        Self::new(kind, message)
    }
}

impl From<(&str, &str)> for HandlerFailure {
    fn from((kind, message): (&str, &str)) -> Self {
        Self::named(kind, message)
    }
}

impl From<String> for HandlerFailure {
    fn from(message: String) -> Self {
        Self::runtime_error(message)
    }
}

impl From<&str> for HandlerFailure {
    fn from(message: &str) -> Self {
        Self::runtime_error(message)
    }
}

impl From<Exception> for HandlerFailure {
    fn from(exc: Exception) -> Self {
        let kind = exc.exc_type();
        Self::new(kind, exc.into_message().unwrap_or_default())
    }
}

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    Success(Object),
    Failure(HandlerFailure),
}

impl HandlerResult {
    #[must_use]
    pub fn ok(value: impl Into<Object>) -> Self {
        Self::Success(value.into())
    }

    /// Failure with a kind given by name; see [`HandlerFailure::named`].
    #[must_use]
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::Failure(HandlerFailure::named(kind, message))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Interprets a JSON-encoded handler answer.
    ///
    /// Accepted shapes:
    /// - `{"ok": value}` and `["ok", value]`
    /// - `{"error": "message"}` and `["error", "message"]`, raised as `RuntimeError`
    /// - `{"error": {"kind": "ValueError", "message": "..."}}` and `["error", "value_error", "..."]`
    ///
    /// Anything else becomes a `RuntimeError` naming the rejected JSON.
    #[must_use]
    pub fn from_json(value: JsonValue) -> Self {
        match parse_json_shape(&value) {
            Some(result) => result,
            None => Self::Failure(HandlerFailure::runtime_error(format!("invalid handler result: {value}"))),
        }
    }

    pub(crate) fn into_external(self) -> ExternalResult {
        match self {
            Self::Success(value) => ExternalResult::Return(value),
            Self::Failure(HandlerFailure { kind, message }) => {
                ExternalResult::Error(Exception::new(kind, Some(message)))
            }
        }
    }
}

fn parse_json_shape(value: &JsonValue) -> Option<HandlerResult> {
    match value {
        JsonValue::Object(map) if map.len() == 1 => {
            if let Some(ok) = map.get("ok") {
                return Some(HandlerResult::Success(Object::from_json_value(ok.clone())));
            }
            match map.get("error")? {
                JsonValue::String(message) => Some(HandlerResult::Failure(HandlerFailure::runtime_error(message))),
                JsonValue::Object(detail) => {
                    let message = detail.get("message")?.as_str()?;
                    let kind = match detail.get("kind") {
                        Some(kind) => kind.as_str()?,
                        None => "RuntimeError",
                    };
                    Some(HandlerResult::error(kind, message))
                }
                _ => None,
            }
        }
        JsonValue::Array(items) => match items.as_slice() {
            [JsonValue::String(tag), ok] if tag == "ok" => {
                Some(HandlerResult::Success(Object::from_json_value(ok.clone())))
            }
            [JsonValue::String(tag), JsonValue::String(message)] if tag == "error" => {
                Some(HandlerResult::Failure(HandlerFailure::runtime_error(message)))
            }
            [JsonValue::String(tag), JsonValue::String(kind), JsonValue::String(message)] if tag == "error" => {
                Some(HandlerResult::error(kind, message.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

impl From<Object> for HandlerResult {
    fn from(value: Object) -> Self {
        Self::Success(value)
    }
}

impl From<HandlerFailure> for HandlerResult {
    fn from(failure: HandlerFailure) -> Self {
        Self::Failure(failure)
    }
}

impl<E: Into<HandlerFailure>> From<Result<Object, E>> for HandlerResult {
    fn from(result: Result<Object, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn failure_shapes() {
        assert_eq!(
            HandlerFailure::from(("runtime_error", "network error")),
            HandlerFailure::new(ExcType::RuntimeError, "network error")
        );
        assert_eq!(
            HandlerFailure::from(("KeyError", "k")),
            HandlerFailure::new(ExcType::KeyError, "k")
        );
        assert_eq!(
            HandlerFailure::from(("no_such_error", "x")),
            HandlerFailure::new(ExcType::RuntimeError, "x")
        );
        assert_eq!(HandlerFailure::from("boom"), HandlerFailure::new(ExcType::RuntimeError, "boom"));
    }

    #[test]
    fn result_conversion() {
        let ok: Result<Object, &str> = Ok(Object::Int(1));
        assert_eq!(HandlerResult::from(ok), HandlerResult::Success(Object::Int(1)));
        let err: Result<Object, (ExcType, String)> = Err((ExcType::ValueError, "bad".to_owned()));
        assert_eq!(HandlerResult::from(err), HandlerResult::error("ValueError", "bad"));
    }

    #[test]
    fn json_shapes() {
        assert_eq!(HandlerResult::from_json(json!({"ok": 5})), HandlerResult::ok(Object::Int(5)));
        assert_eq!(HandlerResult::from_json(json!(["ok", "x"])), HandlerResult::ok("x"));
        assert_eq!(
            HandlerResult::from_json(json!({"error": "nope"})),
            HandlerResult::error("RuntimeError", "nope")
        );
        assert_eq!(
            HandlerResult::from_json(json!({"error": {"kind": "file_not_found_error", "message": "gone"}})),
            HandlerResult::error("FileNotFoundError", "gone")
        );
        assert_eq!(
            HandlerResult::from_json(json!(["error", "ValueError", "bad"])),
            HandlerResult::error("ValueError", "bad")
        );
    }

    #[test]
    fn invalid_json_shape() {
        assert_eq!(
            HandlerResult::from_json(json!({"value": 1})),
            HandlerResult::error("RuntimeError", r#"invalid handler result: {"value":1}"#)
        );
        assert_eq!(
            HandlerResult::from_json(json!(["maybe", 1])),
            HandlerResult::error("RuntimeError", r#"invalid handler result: ["maybe",1]"#)
        );
    }

    #[test]
    fn panic_payloads() {
        let failure = HandlerFailure::from_panic("fetch", &"oops");
        assert_eq!(failure.message, "handler for 'fetch' panicked: oops");
        let failure = HandlerFailure::from_panic("fetch", &String::from("owned"));
        assert_eq!(failure.message, "handler for 'fetch' panicked: owned");
    }
}
