//! JSON emission and strict parsing for the `std.json` bindings.
//!
//! Two emitters: strict JSON (`format`), where non-finite reals, functions
//! and opaques degrade to `null`, and the JSON5-like `format5`, which
//! spells non-finite reals as named tokens and leaves identifier-shaped
//! object keys unquoted. Parsing accepts strict JSON only, through
//! serde_json with key order preserved, so a value → text → value round
//! trip is deterministic: same key order, same numeric representation.

use std::fmt::Write as _;

use crate::{
    exception::{ExecResult, Exception},
    value::{Value, write_quoted},
};

/// Emits `value` as strict JSON.
pub fn format(value: &Value) -> String {
    let mut text = String::new();
    emit(&mut text, value, false);
    text
}

/// Emits `value` in the JSON5-like relaxed form.
pub fn format5(value: &Value) -> String {
    let mut text = String::new();
    emit(&mut text, value, true);
    text
}

fn emit(out: &mut String, value: &Value, relaxed: bool) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Boolean(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Integer(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Real(r) => {
            if r.is_finite() {
                let _ = write!(out, "{r:?}");
            } else if !relaxed {
                out.push_str("null");
            } else if r.is_nan() {
                out.push_str("NaN");
            } else if *r > 0.0 {
                out.push_str("Infinity");
            } else {
                out.push_str("-Infinity");
            }
        }
        Value::String(s) => {
            let _ = write_quoted(out, s);
        }
        // Functions and opaques have no JSON representation.
        Value::Opaque(_) | Value::Function(_) => out.push_str("null"),
        Value::Array(a) => {
            out.push('[');
            for (n, element) in a.iter().enumerate() {
                if n != 0 {
                    out.push(',');
                }
                emit(out, element, relaxed);
            }
            out.push(']');
        }
        Value::Object(o) => {
            out.push('{');
            for (n, (key, element)) in o.iter().enumerate() {
                if n != 0 {
                    out.push(',');
                }
                if relaxed && is_identifier(key) {
                    out.push_str(key);
                } else {
                    let _ = write_quoted(out, key);
                }
                out.push(':');
                emit(out, element, relaxed);
            }
            out.push('}');
        }
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses strict JSON into a value. Integers that fit an i64 stay
/// integers; every other number becomes a real.
pub fn parse(text: &str) -> ExecResult<Value> {
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|error| Exception::runtime(format!("invalid JSON input ({error})")))?;
    Ok(convert(parsed))
}

fn convert(parsed: serde_json::Value) -> Value {
    match parsed {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(a) => Value::from(a.into_iter().map(convert).collect::<Vec<_>>()),
        serde_json::Value::Object(o) => {
            Value::object_from_pairs(o.into_iter().map(|(k, v)| (k, convert(v))))
        }
    }
}
