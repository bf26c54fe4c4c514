//! Canonical JSON encoding
//!
//! Signatures are computed over the canonical form of a metadata body so that two
//! signers holding the same logical document sign identical bytes. The encoding:
//! - object keys sorted by their UTF-8 bytes
//! - no insignificant whitespace
//! - integers only; floating point numbers are rejected
//! - strings escape `"`, `\` and control characters; everything else is raw UTF-8

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Serialize a value to its canonical JSON bytes
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.extend_from_slice(i.to_string().as_bytes());
            } else if let Some(u) = n.as_u64() {
                out.extend_from_slice(u.to_string().as_bytes());
            } else {
                return Err(Error::Canonical(format!(
                    "floating point number {} has no canonical form",
                    n
                )));
            }
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for byte in s.bytes() {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0c => out.extend_from_slice(b"\\f"),
            0x00..=0x1f => out.extend_from_slice(format!("\\u{:04x}", byte).as_bytes()),
            _ => out.push(byte),
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_keys_are_sorted() {
        let value = json!({"b": 1, "a": [true, null], "c": {"z": "x", "y": -2}});
        let bytes = to_canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":[true,null],"b":1,"c":{"y":-2,"z":"x"}}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("role{}", i), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("role{}", i), i);
        }
        assert_eq!(
            to_canonical_bytes(&first).unwrap(),
            to_canonical_bytes(&second).unwrap()
        );
    }

    #[test]
    fn test_string_escaping() {
        let bytes = to_canonical_bytes(&json!("a\"b\\c\nd")).unwrap();
        assert_eq!(bytes, b"\"a\\\"b\\\\c\\nd\"".to_vec());
    }

    #[test]
    fn test_control_characters_parse_back() {
        let original = "tab\there\r\n\u{0}\u{1f}\u{8}\u{c} caf\u{e9}";
        let bytes = to_canonical_bytes(&json!({ "note": original })).unwrap();
        assert!(bytes.iter().all(|b| *b >= 0x20));
        assert!(String::from_utf8_lossy(&bytes).contains("\\u0000"));

        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["note"], original);
        assert_eq!(to_canonical_bytes(&parsed).unwrap(), bytes);
    }

    #[test]
    fn test_floats_rejected() {
        let result = to_canonical_bytes(&json!({"length": 1.5}));
        assert!(matches!(result, Err(Error::Canonical(_))));
    }
}
