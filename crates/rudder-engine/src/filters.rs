//! Kubernetes-flavoured template filters
//!
//! These filters extend MiniJinja with the helpers chart authors expect.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};

/// Filters registered by [`crate::Engine`], on top of MiniJinja's builtins
pub const AVAILABLE_FILTERS: &[&str] = &[
    "toyaml",
    "tojson",
    "tojson_pretty",
    "b64encode",
    "b64decode",
    "quote",
    "squote",
    "nindent",
    "indent",
    "required",
    "empty",
    "haskey",
    "merge",
    "sha256",
    "trunc",
    "trimprefix",
    "trimsuffix",
    "default",
];

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Convert a value to YAML format
///
/// Usage: {{ values.config | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Convert a value to JSON format
///
/// Usage: {{ values.config | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Usage: {{ values.config | tojson_pretty }}
pub fn tojson_pretty(value: Value) -> Result<String, Error> {
    serde_json::to_string_pretty(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Base64 encode a string
///
/// Usage: {{ secret | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Base64 decode a string
///
/// Usage: {{ encoded | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| {
            Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {}", e))
        })?;

    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("UTF-8 decode error: {}", e)))
}

fn display_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Quote a string with double quotes
///
/// Usage: {{ name | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    let s = display_string(&value);
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quote a string with single quotes
///
/// Usage: {{ name | squote }}
#[must_use]
pub fn squote(value: Value) -> String {
    format!("'{}'", display_string(&value).replace('\'', "''"))
}

/// Indent every non-empty line, with a leading newline
///
/// Usage: {{ content | nindent(4) }}
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Indent every non-empty line
///
/// Usage: {{ content | indent(4) }}
#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Require a value, fail if undefined, none or an empty string
///
/// Usage: {{ values.image.tag | required("image.tag is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);

    if missing {
        let msg = message.unwrap_or_else(|| "value is missing".to_string());
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("required: {}", msg),
        ))
    } else {
        Ok(value)
    }
}

/// Check if a value is empty
///
/// Usage: {% if values.list | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }

    match value.len() {
        Some(len) => len == 0,
        None => value.as_str().is_some_and(str::is_empty),
    }
}

/// Check if a mapping has a key
///
/// Usage: {% if values | haskey("foo") %}
pub fn haskey(value: Value, key: String) -> bool {
    value
        .get_attr(&key)
        .map(|v| !v.is_undefined())
        .unwrap_or(false)
}

/// Deep merge two mappings, the argument wins
///
/// Usage: {{ defaults | merge(overrides) }}
pub fn merge(base: Value, overlay: Value) -> Result<Value, Error> {
    let mut merged = rudder_core::Values(to_json(&base)?);
    merged.merge(&rudder_core::Values(to_json(&overlay)?));
    Ok(Value::from_serialize(merged.inner()))
}

/// SHA256 hash of a string
///
/// Usage: {{ values.config | tojson | sha256 }}
pub fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate a string to a maximum number of characters
///
/// Usage: {{ name | trunc(63) }}
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

/// Usage: {{ tag | trimprefix("v") }}
pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

/// Usage: {{ file | trimsuffix(".yaml") }}
pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toyaml() {
        let value = Value::from_serialize(serde_json::json!({
            "name": "test",
            "ports": [80, 443]
        }));
        let yaml = toyaml(value).unwrap();
        assert_eq!(yaml, "name: test\nports:\n- 80\n- 443");
    }

    #[test]
    fn test_b64encode_decode() {
        let encoded = b64encode("hello".to_string());
        assert_eq!(encoded, "aGVsbG8=");
        assert_eq!(b64decode(encoded).unwrap(), "hello");
        assert!(b64decode("***".to_string()).is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(Value::from("a\"b")), "\"a\\\"b\"");
        assert_eq!(quote(Value::from(3)), "\"3\"");
        assert_eq!(squote(Value::from("it's")), "'it''s'");
    }

    #[test]
    fn test_nindent() {
        assert_eq!(nindent("a: 1\n\nb: 2".to_string(), 2), "\n  a: 1\n\n  b: 2");
        assert_eq!(indent("x".to_string(), 4), "    x");
    }

    #[test]
    fn test_required() {
        assert!(required(Value::UNDEFINED, None).is_err());
        assert!(required(Value::from(""), Some("tag".into())).is_err());
        assert_eq!(required(Value::from("v1"), None).unwrap(), Value::from("v1"));

        let err = required(Value::from(()), Some("image.tag must be set".into())).unwrap_err();
        assert!(err.to_string().contains("image.tag must be set"));
    }

    #[test]
    fn test_empty() {
        assert!(empty(Value::UNDEFINED));
        assert!(empty(Value::from("")));
        assert!(empty(Value::from(Vec::<i32>::new())));
        assert!(!empty(Value::from("x")));
    }

    #[test]
    fn test_merge() {
        let base = Value::from_serialize(serde_json::json!({"a": {"x": 1, "y": 2}}));
        let overlay = Value::from_serialize(serde_json::json!({"a": {"y": 3}}));
        let merged = merge(base, overlay).unwrap();
        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            serde_json::json!({"a": {"x": 1, "y": 3}})
        );
    }

    #[test]
    fn test_trunc() {
        assert_eq!(trunc("hello".to_string(), 3), "hel");
        assert_eq!(trunc("hi".to_string(), 10), "hi");
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            sha256sum("abc".to_string()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
