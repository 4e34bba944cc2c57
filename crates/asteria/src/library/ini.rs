//! INI reading and writing for the `std.ini` bindings.
//!
//! The dialect is deliberately small: `[section]` headers, `key = value`
//! pairs, `;`/`#` comments, whitespace trimmed around keys and values.
//! Keys before the first section header land directly on the root object;
//! each section becomes a nested object. All values are strings; a key
//! without a value reads as the empty string.

use std::fmt::Write as _;

use crate::{
    exception::{ExecResult, Exception},
    value::Value,
};

/// Parses INI text into an object of (strings and) section objects.
pub fn parse(text: &str) -> ExecResult<Value> {
    let mut root: Vec<(String, Value)> = Vec::new();
    let mut section: Option<(String, Vec<(String, Value)>)> = None;

    fn flush(section: &mut Option<(String, Vec<(String, Value)>)>, root: &mut Vec<(String, Value)>) {
        if let Some((name, entries)) = section.take() {
            root.push((name, Value::object_from_pairs(entries)));
        }
    }

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']') else {
                return Err(Exception::runtime(format!(
                    "invalid INI section header on line {}",
                    number + 1
                )));
            };
            flush(&mut section, &mut root);
            section = Some((name.trim().to_owned(), Vec::new()));
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, ""),
        };
        if key.is_empty() {
            return Err(Exception::runtime(format!(
                "missing key before `=` on line {}",
                number + 1
            )));
        }
        let entry = (key.to_owned(), Value::from(value));
        match &mut section {
            Some((_, entries)) => entries.push(entry),
            None => root.push(entry),
        }
    }
    flush(&mut section, &mut root);
    Ok(Value::object_from_pairs(root))
}

/// Emits an object of strings and section objects as INI text. Scalar
/// members are printed through the value formatter; nested objects become
/// sections; anything deeper is an error.
pub fn format(value: &Value) -> ExecResult<String> {
    let root = value.as_object()?;
    let mut text = String::new();
    // Loose keys first, so they stay outside every section when reparsed.
    for (key, member) in root {
        if !member.is_object() {
            writeln!(text, "{key} = {}", member.print_string()).expect("string formatting is infallible");
        }
    }
    for (key, member) in root {
        if let Ok(entries) = member.as_object() {
            writeln!(text, "[{key}]").expect("string formatting is infallible");
            for (entry_key, entry_value) in entries {
                if entry_value.is_object() {
                    return Err(Exception::runtime(format!(
                        "INI sections cannot nest (member `{entry_key}` of `{key}`)"
                    )));
                }
                writeln!(text, "{entry_key} = {}", entry_value.print_string())
                    .expect("string formatting is infallible");
            }
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
global = value
; a comment
[section1]
key = value
some crazy = spaces
[section2]
key without a value
";

    #[test]
    fn parses_sections_and_loose_keys() {
        let parsed = parse(SAMPLE).unwrap();
        let root = parsed.as_object().unwrap();
        assert_eq!(&**root.get("global").unwrap().as_string().unwrap(), "value");
        let section1 = root.get("section1").unwrap().as_object().unwrap();
        assert_eq!(&**section1.get("key").unwrap().as_string().unwrap(), "value");
        assert_eq!(&**section1.get("some crazy").unwrap().as_string().unwrap(), "spaces");
        let section2 = root.get("section2").unwrap().as_object().unwrap();
        assert_eq!(&**section2.get("key without a value").unwrap().as_string().unwrap(), "");
    }

    #[test]
    fn round_trips_through_format() {
        let parsed = parse(SAMPLE).unwrap();
        let emitted = format(&parsed).unwrap();
        let reparsed = parse(&emitted).unwrap();
        let root = reparsed.as_object().unwrap();
        assert_eq!(&**root.get("global").unwrap().as_string().unwrap(), "value");
        assert!(root.get("section1").unwrap().is_object());
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(parse("[oops\n").is_err());
        assert!(parse("= value\n").is_err());
    }
}
