//! Deep merge and normalization for schema fragments.
//!
//! Mapping fragments are merged in evaluation order: maps merge
//! recursively, everything else (scalars, arrays) is replaced by the
//! later value.  Normalization strips nulls so that "absent" and
//! "explicitly null" compare equal during diffing.

use serde_json::Value;

/// Merge `patch` into `base`, recursing into objects.
///
/// Later (patch) keys win; nested objects merge key by key; arrays and
/// scalars are replaced wholesale.
pub fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key, patch_value);
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

/// Strip null values recursively from objects.
///
/// Top-level nulls and nulls inside arrays are preserved (an array of
/// nulls is a deliberate value); only object entries are dropped.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(key.clone(), normalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = json!({"name": {"givenName": "Jane"}, "active": true});
        deep_merge(
            &mut base,
            json!({"name": {"familyName": "Doe"}, "userName": "jdoe"}),
        );
        assert_eq!(
            base,
            json!({
                "name": {"givenName": "Jane", "familyName": "Doe"},
                "active": true,
                "userName": "jdoe"
            })
        );
    }

    #[test]
    fn test_deep_merge_later_wins() {
        let mut base = json!({"displayName": "Old"});
        deep_merge(&mut base, json!({"displayName": "New"}));
        assert_eq!(base, json!({"displayName": "New"}));
    }

    #[test]
    fn test_deep_merge_arrays_replaced() {
        let mut base = json!({"emails": [{"value": "a@example.com"}]});
        deep_merge(&mut base, json!({"emails": [{"value": "b@example.com"}]}));
        assert_eq!(base, json!({"emails": [{"value": "b@example.com"}]}));
    }

    #[test]
    fn test_normalize_strips_object_nulls() {
        let value = json!({"a": null, "b": {"c": null, "d": 1}});
        assert_eq!(normalize(&value), json!({"b": {"d": 1}}));
    }
}
