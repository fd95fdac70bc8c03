//! SCIM 2.0 resource schemas (RFC 7643 subset).
//!
//! Mapping output is free-form JSON; these types exist to validate
//! that a merged record is structurally a SCIM resource before it is
//! sent, and to read typed fields out of remote responses.  Unknown
//! attributes (extension schemas) pass through untouched.

use serde::{Deserialize, Serialize};

/// SCIM User name component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
}

/// SCIM Email value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimEmail {
    pub value: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub email_type: Option<String>,

    #[serde(default)]
    pub primary: bool,
}

/// SCIM User resource (RFC 7643 Section 4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    #[serde(default)]
    pub schemas: Vec<String>,

    /// Identifier assigned by the remote system; opaque, not
    /// necessarily a UUID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub user_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<ScimName>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<ScimEmail>,

    /// Extension schema data, flattened into top-level keys.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

fn default_active() -> bool {
    true
}

impl ScimUser {
    /// SCIM Core User schema URI.
    pub const SCHEMA: &'static str = "urn:ietf:params:scim:schemas:core:2.0:User";
}

/// SCIM Group member reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroupMember {
    /// Remote id of the member resource.
    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
}

/// SCIM Group resource (RFC 7643 Section 4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroup {
    #[serde(default)]
    pub schemas: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ScimGroupMember>,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl ScimGroup {
    /// SCIM Core Group schema URI.
    pub const SCHEMA: &'static str = "urn:ietf:params:scim:schemas:core:2.0:Group";
}

/// Single SCIM PATCH operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimPatchOp {
    pub op: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// SCIM PATCH request (RFC 7644 Section 3.5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimPatchRequest {
    pub schemas: Vec<String>,

    #[serde(rename = "Operations")]
    pub operations: Vec<ScimPatchOp>,
}

impl ScimPatchRequest {
    /// SCIM PatchOp message schema URI.
    pub const SCHEMA: &'static str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

    /// A PATCH request from the given operations.
    pub fn new(operations: Vec<ScimPatchOp>) -> Self {
        Self {
            schemas: vec![Self::SCHEMA.to_string()],
            operations,
        }
    }
}

/// SCIM list response (RFC 7644 Section 3.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimListResponse {
    #[serde(default)]
    pub schemas: Vec<String>,

    #[serde(default)]
    pub total_results: i64,

    #[serde(default)]
    pub start_index: i64,

    #[serde(default)]
    pub items_per_page: i64,

    #[serde(rename = "Resources", default)]
    pub resources: Vec<serde_json::Value>,
}

/// Simple feature support flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSupport {
    #[serde(default)]
    pub supported: bool,
}

/// SCIM `ServiceProviderConfig` (RFC 7643 Section 5 subset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderConfig {
    #[serde(default)]
    pub schemas: Vec<String>,

    /// PATCH operation support; the capability probe the group client
    /// keys its membership strategy on.
    #[serde(default)]
    pub patch: FeatureSupport,

    #[serde(default)]
    pub filter: FeatureSupport,

    #[serde(default)]
    pub sort: FeatureSupport,

    #[serde(default)]
    pub etag: FeatureSupport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_validation_requires_user_name() {
        let valid = json!({"userName": "jdoe", "active": true});
        assert!(serde_json::from_value::<ScimUser>(valid).is_ok());

        let invalid = json!({"displayName": "no userName"});
        assert!(serde_json::from_value::<ScimUser>(invalid).is_err());
    }

    #[test]
    fn test_user_extensions_preserved() {
        let value = json!({
            "userName": "jdoe",
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                "department": "Engineering"
            }
        });
        let user: ScimUser = serde_json::from_value(value).unwrap();
        assert_eq!(user.extensions.len(), 1);
    }

    #[test]
    fn test_group_validation_requires_display_name() {
        let invalid = json!({"members": []});
        assert!(serde_json::from_value::<ScimGroup>(invalid).is_err());
    }

    #[test]
    fn test_patch_request_shape() {
        let patch = ScimPatchRequest::new(vec![ScimPatchOp {
            op: "replace".into(),
            path: Some("active".into()),
            value: Some(json!(false)),
        }]);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["schemas"][0], ScimPatchRequest::SCHEMA);
        assert_eq!(value["Operations"][0]["op"], "replace");
    }

    #[test]
    fn test_list_response_resources_key() {
        let value = json!({
            "totalResults": 2,
            "startIndex": 1,
            "itemsPerPage": 2,
            "Resources": [{"id": "a"}, {"id": "b"}]
        });
        let list: ScimListResponse = serde_json::from_value(value).unwrap();
        assert_eq!(list.resources.len(), 2);
        assert_eq!(list.total_results, 2);
    }
}
