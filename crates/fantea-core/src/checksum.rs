//! Change-detection checksum.
//!
//! A 32-bit rolling string hash (`h = 31·h + unit`, wrapping) over the
//! canonical JSON form of a document: object keys sorted at every depth, no
//! whitespace. Not cryptographic; it only has to tell "same" from "changed"
//! between two polls. Hashing runs over UTF-16 code units so browser clients
//! computing the same function get the same value.

use serde_json::Value;

use crate::document::ContentDocument;

/// Serialize a JSON value with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Rolling hash of a string as a signed 32-bit value.
#[must_use]
pub fn rolling_hash(text: &str) -> i32 {
    text.encode_utf16().fold(0i32, |h, unit| {
        h.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

/// Checksum of a JSON value, rendered as eight lowercase hex digits.
#[must_use]
pub fn checksum_value(value: &Value) -> String {
    let hash = rolling_hash(&canonical_json(value));
    format!("{:08x}", u32::from_ne_bytes(hash.to_ne_bytes()))
}

/// Checksum of a whole content document.
#[must_use]
pub fn checksum(document: &ContentDocument) -> String {
    checksum_value(&document.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_java_style_string_hash() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("hello"), 99_162_322);
        // Overflow wraps like `hash |= 0` in a browser.
        assert_eq!(rolling_hash("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [true, null]}, "a": "x"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"x","b":{"a":[true,null],"z":1}}"#
        );
    }

    #[test]
    fn key_order_does_not_change_checksum() {
        let a = json!({"hero": {"title": "X", "subtitle": "Y"}});
        let b = json!({"hero": {"subtitle": "Y", "title": "X"}});
        assert_eq!(checksum_value(&a), checksum_value(&b));
    }

    #[test]
    fn content_change_changes_checksum() {
        let a = json!({"hero": {"title": "X"}});
        let b = json!({"hero": {"title": "Y"}});
        assert_ne!(checksum_value(&a), checksum_value(&b));
        assert_eq!(checksum_value(&a).len(), 8);
    }
}
