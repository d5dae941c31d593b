// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dotted-path lookup into `serde_json::Value` trees.
//!
//! Used by [`crate::validate::validate_receipt`] to resolve
//! `tool.receipt_fields` and by the Idempotency Engine to read
//! `input[key_field]`.

use serde_json::Value;

/// Resolve a dotted path (e.g. `"lead.id"`) against a JSON value.
///
/// Returns `None` if any segment is missing, the path walks into a
/// non-object, or the final value is JSON `null` — all three count as
/// "not present" for invariant RC2 purposes.
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        let v = json!({"lead": {"id": "abc"}});
        assert_eq!(get_path(&v, "lead.id"), Some(&json!("abc")));
    }

    #[test]
    fn missing_segment_is_none() {
        let v = json!({"lead": {}});
        assert_eq!(get_path(&v, "lead.id"), None);
    }

    #[test]
    fn null_leaf_is_none() {
        let v = json!({"lead": {"id": null}});
        assert_eq!(get_path(&v, "lead.id"), None);
    }

    #[test]
    fn top_level_field() {
        let v = json!({"id": 42});
        assert_eq!(get_path(&v, "id"), Some(&json!(42)));
    }
}
