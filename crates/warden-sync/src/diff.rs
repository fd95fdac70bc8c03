//! Diff-before-write.
//!
//! A freshly computed record is compared against the connection's
//! stored snapshot before any remote write.  Both sides are
//! normalized (nulls stripped) and the fresh record is deep-merged
//! into the snapshot: if the merge changes nothing, the remote system
//! already has everything we would send and the write is skipped.

use serde_json::Value;

use warden_mapping::{deep_merge, normalize};

/// Whether writing `fresh` to a remote currently described by
/// `snapshot` would change anything.
pub fn needs_update(snapshot: &Value, fresh: &Value) -> bool {
    let snapshot = normalize(snapshot);
    let fresh = normalize(fresh);
    let mut merged = snapshot.clone();
    deep_merge(&mut merged, fresh);
    merged != snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_record_needs_no_update() {
        let snapshot = json!({
            "id": "ext-1",
            "userName": "jdoe",
            "emails": [{"value": "a@example.com", "primary": true}],
            "active": true
        });
        let fresh = json!({
            "userName": "jdoe",
            "emails": [{"value": "a@example.com", "primary": true}],
            "active": true
        });
        assert!(!needs_update(&snapshot, &fresh));
    }

    #[test]
    fn test_changed_value_needs_update() {
        let snapshot = json!({"userName": "jdoe", "displayName": "Jane"});
        let fresh = json!({"userName": "jdoe", "displayName": "Jane Doe"});
        assert!(needs_update(&snapshot, &fresh));
    }

    #[test]
    fn test_new_key_needs_update() {
        let snapshot = json!({"userName": "jdoe"});
        let fresh = json!({"userName": "jdoe", "title": "Engineer"});
        assert!(needs_update(&snapshot, &fresh));
    }

    #[test]
    fn test_null_values_compare_as_absent() {
        let snapshot = json!({"userName": "jdoe", "displayName": null});
        let fresh = json!({"userName": "jdoe"});
        assert!(!needs_update(&snapshot, &fresh));
    }

    #[test]
    fn test_remote_extra_keys_ignored() {
        // The remote snapshot carries server-assigned fields we never
        // send; they must not force writes.
        let snapshot = json!({
            "id": "ext-1",
            "meta": {"version": "W/\"1\""},
            "userName": "jdoe"
        });
        let fresh = json!({"userName": "jdoe"});
        assert!(!needs_update(&snapshot, &fresh));
    }
}
