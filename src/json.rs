//! Data bridge between interpreter values and JSON.
//!
//! | JSON | Value |
//! |---|---|
//! | `null` | `nil` |
//! | `true` / `false` | Bool |
//! | integer in `i64` range | Integer |
//! | string | String |
//! | array | Vector (List and Vector both encode as arrays) |
//! | object | HashMap with String keys (Keyword keys encode without the colon) |
//!
//! Floats, functions, atoms and symbols have no counterpart and are rejected.

use crate::ast::Value;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};
use std::rc::Rc;

/// Convert a value to JSON
pub fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    to_json_with_depth(value, 0)
}

fn to_json_with_depth(value: &Value, depth: usize) -> Result<serde_json::Value, Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::EvalError(format!(
            "value too deeply nested for JSON (max depth: {MAX_PARSE_DEPTH})"
        )));
    }
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(n) => Ok(serde_json::Value::from(*n)),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::List(items) | Value::Vector(items) => items
            .iter()
            .map(|item| to_json_with_depth(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::HashMap(items) => {
            if items.len() % 2 != 0 {
                return Err(Error::TypeError(
                    "hash-map has a key without a value".to_owned(),
                ));
            }
            let mut object = serde_json::Map::new();
            for pair in items.chunks_exact(2) {
                let key = match &pair[0] {
                    Value::String(s) | Value::Keyword(s) => s.clone(),
                    other => {
                        return Err(Error::TypeError(format!(
                            "JSON object keys must be strings or keywords, got {}",
                            other.type_name()
                        )));
                    }
                };
                object.insert(key, to_json_with_depth(&pair[1], depth + 1)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        other => Err(Error::TypeError(format!(
            "cannot encode {} as JSON",
            other.type_name()
        ))),
    }
}

/// Parse JSON text into a value
pub fn from_json(input: &str) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::from_str(input).map_err(|e| {
        let kind = if e.is_eof() {
            ParseErrorKind::Incomplete
        } else {
            ParseErrorKind::InvalidSyntax
        };
        Error::ParseError(ParseError::from_message(kind, format!("Invalid JSON: {e}")))
    })?;
    from_json_value(json, 0)
}

fn from_json_value(json: serde_json::Value, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("JSON document too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        )));
    }
    match json {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Integer).ok_or_else(|| {
            Error::TypeError(format!("Number too large or not integer: {n}"))
        }),
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(arr) => {
            let items = arr
                .into_iter()
                .map(|v| from_json_value(v, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Vector(Rc::new(items)))
        }
        serde_json::Value::Object(object) => {
            let mut items = Vec::with_capacity(object.len() * 2);
            for (key, v) in object {
                items.push(Value::String(key));
                items.push(from_json_value(v, depth + 1)?);
            }
            Ok(Value::HashMap(Rc::new(items)))
        }
    }
}
