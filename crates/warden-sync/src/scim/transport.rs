//! SCIM wire transport.
//!
//! The single "issue request, get typed result" seam: every remote
//! interaction goes through [`ScimTransport::send`], which normalizes
//! transport outcomes into the sync error taxonomy and enforces the
//! provider's dry-run setting for mutating verbs.

use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use warden_store::Provider;

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::scim::schema::{ScimListResponse, ScimPatchOp, ScimPatchRequest, ServiceProviderConfig};

/// Page size used when enumerating remote resources.
pub const DISCOVERY_PAGE_SIZE: i64 = 100;

/// HTTP client for one SCIM provider.
pub struct ScimTransport {
    base_url: String,
    token: String,
    http: reqwest::Client,
    dry_run: bool,
    retry: RetryPolicy,
    /// Cached `ServiceProviderConfig`, fetched once per transport.
    spc: RwLock<Option<ServiceProviderConfig>>,
    /// Set when a capability-advertised PATCH was rejected at request
    /// time; stays set for the life of this transport.
    patch_downgraded: AtomicBool,
}

impl ScimTransport {
    /// Build a transport from provider settings.  `dry_run_override`
    /// replaces the provider's own flag when given (manual resync).
    pub fn new(provider: &Provider, dry_run_override: Option<bool>) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .danger_accept_invalid_certs(!provider.tls_verify)
            .user_agent("warden-sync/0.1")
            .build()
            .map_err(|e| SyncError::stop(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            token: provider.token.clone(),
            http,
            dry_run: dry_run_override.unwrap_or(provider.dry_run),
            retry: RetryPolicy::new(provider.max_retries, 1),
            spc: RwLock::new(None),
            patch_downgraded: AtomicBool::new(false),
        })
    }

    /// Whether mutating requests are suppressed.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    // ── Capability probe ──────────────────────────────────────────────

    /// The target's `ServiceProviderConfig`, fetched once and cached.
    ///
    /// A probe failure is logged and treated as "no optional features";
    /// the failure is not cached, so a later call may succeed.
    pub async fn service_provider_config(&self) -> ServiceProviderConfig {
        if let Some(config) = self.spc.read().await.clone() {
            return config;
        }
        let url = format!("{}/ServiceProviderConfig", self.base_url);
        match self.send(Method::GET, &url, None).await {
            Ok(body) => {
                let config: ServiceProviderConfig =
                    serde_json::from_value(body).unwrap_or_default();
                *self.spc.write().await = Some(config.clone());
                config
            }
            Err(e) => {
                warn!(error = %e, "ServiceProviderConfig probe failed, assuming minimal features");
                ServiceProviderConfig::default()
            }
        }
    }

    /// Whether membership edits may use the PATCH primitive.
    pub async fn patch_supported(&self) -> bool {
        if self.patch_downgraded.load(Ordering::Relaxed) {
            return false;
        }
        self.service_provider_config().await.patch.supported
    }

    /// Record that a capability-advertised PATCH was rejected at
    /// request time.  The downgrade holds for the rest of this
    /// transport's life.
    pub fn downgrade_patch(&self) {
        self.patch_downgraded.store(true, Ordering::Relaxed);
    }

    // ── User operations ───────────────────────────────────────────────

    pub async fn create_user(&self, record: &Value) -> SyncResult<Value> {
        let url = format!("{}/Users", self.base_url);
        self.send_mutating(Method::POST, &url, Some(record)).await
    }

    pub async fn get_user(&self, id: &str) -> SyncResult<Value> {
        let url = format!("{}/Users/{id}", self.base_url);
        self.send(Method::GET, &url, None).await
    }

    pub async fn replace_user(&self, id: &str, record: &Value) -> SyncResult<Value> {
        let url = format!("{}/Users/{id}", self.base_url);
        self.send_mutating(Method::PUT, &url, Some(record)).await
    }

    pub async fn patch_user(&self, id: &str, patch: &ScimPatchRequest) -> SyncResult<Value> {
        let url = format!("{}/Users/{id}", self.base_url);
        let body = serde_json::to_value(patch)
            .map_err(|e| SyncError::stop(format!("failed to serialize patch: {e}")))?;
        self.send_mutating(Method::PATCH, &url, Some(&body)).await
    }

    pub async fn delete_user(&self, id: &str) -> SyncResult<()> {
        let url = format!("{}/Users/{id}", self.base_url);
        self.send_mutating(Method::DELETE, &url, None).await?;
        Ok(())
    }

    /// Deactivate a user by setting `active=false`.
    pub async fn deactivate_user(&self, id: &str) -> SyncResult<Value> {
        let patch = ScimPatchRequest::new(vec![ScimPatchOp {
            op: "replace".to_string(),
            path: Some("active".to_string()),
            value: Some(Value::Bool(false)),
        }]);
        self.patch_user(id, &patch).await
    }

    pub async fn list_users(
        &self,
        filter: Option<&str>,
        start_index: Option<i64>,
        count: Option<i64>,
    ) -> SyncResult<ScimListResponse> {
        let url = format!("{}/Users", self.base_url);
        self.list(&url, filter, start_index, count).await
    }

    /// Find users whose `userName` equals `username`.  Up to two
    /// results are requested so ambiguity is observable.
    pub async fn find_users_by_username(&self, username: &str) -> SyncResult<Vec<Value>> {
        let filter = format!(
            "userName eq \"{}\"",
            escape_scim_filter_value(username)
        );
        let response = self.list_users(Some(&filter), None, Some(2)).await?;
        Ok(response.resources)
    }

    // ── Group operations ──────────────────────────────────────────────

    pub async fn create_group(&self, record: &Value) -> SyncResult<Value> {
        let url = format!("{}/Groups", self.base_url);
        self.send_mutating(Method::POST, &url, Some(record)).await
    }

    pub async fn get_group(&self, id: &str) -> SyncResult<Value> {
        let url = format!("{}/Groups/{id}", self.base_url);
        self.send(Method::GET, &url, None).await
    }

    pub async fn replace_group(&self, id: &str, record: &Value) -> SyncResult<Value> {
        let url = format!("{}/Groups/{id}", self.base_url);
        self.send_mutating(Method::PUT, &url, Some(record)).await
    }

    pub async fn delete_group(&self, id: &str) -> SyncResult<()> {
        let url = format!("{}/Groups/{id}", self.base_url);
        self.send_mutating(Method::DELETE, &url, None).await?;
        Ok(())
    }

    pub async fn list_groups(
        &self,
        filter: Option<&str>,
        start_index: Option<i64>,
        count: Option<i64>,
    ) -> SyncResult<ScimListResponse> {
        let url = format!("{}/Groups", self.base_url);
        self.list(&url, filter, start_index, count).await
    }

    /// Find groups whose `displayName` equals `name`.
    pub async fn find_groups_by_display_name(&self, name: &str) -> SyncResult<Vec<Value>> {
        let filter = format!(
            "displayName eq \"{}\"",
            escape_scim_filter_value(name)
        );
        let response = self.list_groups(Some(&filter), None, Some(2)).await?;
        Ok(response.resources)
    }

    /// Patch group membership: add and/or remove member ids.
    pub async fn patch_group_members(
        &self,
        group_id: &str,
        add_member_ids: &[String],
        remove_member_ids: &[String],
    ) -> SyncResult<()> {
        let mut operations = Vec::new();

        if !add_member_ids.is_empty() {
            let members: Vec<Value> = add_member_ids
                .iter()
                .map(|id| serde_json::json!({ "value": id }))
                .collect();
            operations.push(ScimPatchOp {
                op: "add".to_string(),
                path: Some("members".to_string()),
                value: Some(Value::Array(members)),
            });
        }

        for id in remove_member_ids {
            operations.push(ScimPatchOp {
                op: "remove".to_string(),
                path: Some(format!(
                    "members[value eq \"{}\"]",
                    escape_scim_filter_value(id)
                )),
                value: None,
            });
        }

        if operations.is_empty() {
            return Ok(());
        }

        let patch = ScimPatchRequest::new(operations);
        let url = format!("{}/Groups/{group_id}", self.base_url);
        let body = serde_json::to_value(&patch)
            .map_err(|e| SyncError::stop(format!("failed to serialize patch: {e}")))?;
        self.send_mutating(Method::PATCH, &url, Some(&body)).await?;
        Ok(())
    }

    // ── Request plumbing ──────────────────────────────────────────────

    async fn list(
        &self,
        url: &str,
        filter: Option<&str>,
        start_index: Option<i64>,
        count: Option<i64>,
    ) -> SyncResult<ScimListResponse> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(f) = filter {
            query.push(("filter", f.to_string()));
        }
        if let Some(si) = start_index {
            query.push(("startIndex", si.to_string()));
        }
        if let Some(c) = count {
            query.push(("count", c.to_string()));
        }

        let url = if query.is_empty() {
            url.to_string()
        } else {
            let params = query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{url}?{params}")
        };

        let body = self.send(Method::GET, &url, None).await?;
        serde_json::from_value(body)
            .map_err(|e| SyncError::stop(format!("invalid SCIM list response: {e}")))
    }

    /// Issue a mutating request, honoring dry-run.
    async fn send_mutating(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> SyncResult<Value> {
        if self.dry_run {
            debug!(method = %method, url = %url, "Dry run, suppressing request");
            return Err(SyncError::DryRun {
                message: format!("would have sent {method} {url}"),
            });
        }
        self.send(method, url, body).await
    }

    /// Issue a request with transient-failure retry and normalize the
    /// outcome into the error taxonomy.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> SyncResult<Value> {
        let operation = format!("{method} {url}");
        self.retry
            .execute(&operation, || self.send_once(method.clone(), url, body))
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> SyncResult<Value> {
        debug!(method = %method, url = %url, "SCIM request");
        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/scim+json");
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/scim+json")
                .json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text)
                .map_err(|e| SyncError::stop(format!("failed to parse SCIM response: {e}")))
        } else {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_else(|_| String::new());
            let detail = if body.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {body}")
            };

            match status {
                StatusCode::NOT_FOUND => Err(SyncError::NotFound { message: detail }),
                StatusCode::CONFLICT => Err(SyncError::ObjectExists { message: detail }),
                StatusCode::TOO_MANY_REQUESTS => Err(SyncError::Transient {
                    message: detail,
                    retry_after_secs: retry_after,
                }),
                s if s.is_server_error() => Err(SyncError::Transient {
                    message: detail,
                    retry_after_secs: None,
                }),
                // Remaining 4xx responses are configuration-level: bad
                // credentials, malformed payloads, unsupported verbs.
                _ => Err(SyncError::StopSync { message: detail }),
            }
        }
    }
}

/// Escape a value for use inside a SCIM filter string literal
/// (RFC 7644 Section 3.4.2.2); prevents filter injection.
fn escape_scim_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Minimal percent-encoding for query parameter values.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_scim_filter_value("plain"), "plain");
        assert_eq!(
            escape_scim_filter_value("a\"b\\c"),
            "a\\\"b\\\\c"
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("userName eq \"jdoe\""), "userName%20eq%20%22jdoe%22");
        assert_eq!(urlencode("plain-value_1.0~x"), "plain-value_1.0~x");
    }
}
