//! Mock SCIM server and test environment built on wiremock.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use warden_core::{Group, User};
use warden_store::{
    ConnectionStore, Directory, MemoryConnectionStore, MemoryDirectory, MemorySyncLock,
    MemoryTaskStore, NewConnection, Provider, SyncLock, TaskStore,
};
use warden_sync::{default_group_mapping, default_user_mapping, ScimClients};

/// A mock SCIM endpoint plus the in-memory stores and clients wired to
/// talk to it.
pub struct TestEnv {
    pub server: MockServer,
    pub provider: Arc<Provider>,
    pub directory: Arc<MemoryDirectory>,
    pub connections: Arc<MemoryConnectionStore>,
    pub tasks: Arc<MemoryTaskStore>,
    pub lock: Arc<MemorySyncLock>,
    pub clients: Arc<ScimClients>,
}

impl TestEnv {
    /// Build an environment against a fresh mock server.  The
    /// provider starts with the built-in default mappings, retries
    /// disabled, and whatever `configure` changes on top.
    pub async fn new(configure: impl FnOnce(&mut Provider)) -> Self {
        let server = MockServer::start().await;

        let mut provider = Provider::new("test-provider", server.uri(), "test-token");
        provider.max_retries = 0;
        provider.user_mappings = vec![default_user_mapping()];
        provider.group_mappings = vec![default_group_mapping()];
        configure(&mut provider);
        let provider = Arc::new(provider);

        let directory = Arc::new(MemoryDirectory::new());
        let connections = Arc::new(MemoryConnectionStore::new());
        let tasks = Arc::new(MemoryTaskStore::new());
        let lock = Arc::new(MemorySyncLock::new());

        let connections_dyn: Arc<dyn ConnectionStore> = connections.clone();
        let directory_dyn: Arc<dyn Directory> = directory.clone();
        let clients = Arc::new(
            ScimClients::new(provider.clone(), connections_dyn, directory_dyn, None)
                .expect("failed to build clients"),
        );

        Self {
            server,
            provider,
            directory,
            connections,
            tasks,
            lock,
            clients,
        }
    }

    pub fn connections_dyn(&self) -> Arc<dyn ConnectionStore> {
        self.connections.clone()
    }

    pub fn directory_dyn(&self) -> Arc<dyn Directory> {
        self.directory.clone()
    }

    pub fn tasks_dyn(&self) -> Arc<dyn TaskStore> {
        self.tasks.clone()
    }

    pub fn lock_dyn(&self) -> Arc<dyn SyncLock> {
        self.lock.clone()
    }

    /// Orchestrator over this environment's stores and clients.
    pub fn orchestrator(&self) -> warden_sync::SyncOrchestrator {
        warden_sync::SyncOrchestrator::new(
            self.provider.clone(),
            self.directory_dyn(),
            self.connections_dyn(),
            self.tasks_dyn(),
            self.lock_dyn(),
            self.clients.clone(),
        )
    }

    /// Dispatcher over this environment's stores and clients.
    pub fn dispatcher(&self) -> warden_sync::ChangeDispatcher {
        warden_sync::ChangeDispatcher::new(
            self.provider.clone(),
            self.directory_dyn(),
            self.tasks_dyn(),
            self.clients.clone(),
        )
    }

    /// Pre-link a user connection, as if previously provisioned.
    pub async fn link_user(&self, user: &User, external_id: &str, attributes: Value) {
        self.connections
            .link(NewConnection {
                provider_id: self.provider.id,
                kind: warden_core::EntityKind::User,
                local_id: user.id,
                external_id: external_id.to_string(),
                attributes,
            })
            .await
            .expect("link failed");
    }

    /// Pre-link a group connection.
    pub async fn link_group(&self, group: &Group, external_id: &str, attributes: Value) {
        self.connections
            .link(NewConnection {
                provider_id: self.provider.id,
                kind: warden_core::EntityKind::Group,
                local_id: group.id,
                external_id: external_id.to_string(),
                attributes,
            })
            .await
            .expect("link failed");
    }

    // ── Mock mounting ─────────────────────────────────────────────────

    /// Mount a `ServiceProviderConfig` advertising PATCH support (or
    /// not).
    pub async fn mock_service_provider_config(&self, patch_supported: bool) {
        Mock::given(method("GET"))
            .and(path("/ServiceProviderConfig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"],
                "patch": { "supported": patch_supported },
                "filter": { "supported": true },
                "sort": { "supported": false },
                "etag": { "supported": false }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a generic JSON responder.
    pub async fn mock(&self, http_method: &str, url_path: &str, status: u16, body: Value) {
        Mock::given(method(http_method))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    // ── Request inspection ────────────────────────────────────────────

    /// Requests received so far matching method and exact path.
    pub async fn requests(&self, http_method: &str, url_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| {
                r.method.to_string().eq_ignore_ascii_case(http_method)
                    && r.url.path() == url_path
            })
            .collect()
    }

    /// Number of requests matching method and exact path.
    pub async fn request_count(&self, http_method: &str, url_path: &str) -> usize {
        self.requests(http_method, url_path).await.len()
    }

    /// JSON body of the nth matching request.
    pub async fn request_body(&self, http_method: &str, url_path: &str, index: usize) -> Value {
        let requests = self.requests(http_method, url_path).await;
        let request = requests
            .get(index)
            .unwrap_or_else(|| panic!("no request #{index} for {http_method} {url_path}"));
        serde_json::from_slice(&request.body).expect("request body is not JSON")
    }
}

/// A SCIM user response echoing what the engine sends for `user`,
/// extended with a remote id; used so diff-before-write sees the
/// remote as up to date after a create.
pub fn scim_user_echo(user: &User, remote_id: &str) -> Value {
    let mut body = json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
        "id": remote_id,
        "userName": user.username,
        "externalId": user.id.to_string(),
        "active": user.active,
    });
    if let Some(email) = &user.email {
        body["emails"] = json!([{ "value": email, "type": "work", "primary": true }]);
    }
    if let Some(display_name) = &user.display_name {
        body["displayName"] = json!(display_name);
    }
    if user.first_name.is_some() || user.last_name.is_some() {
        let mut name = json!({});
        if let Some(first) = &user.first_name {
            name["givenName"] = json!(first);
        }
        if let Some(last) = &user.last_name {
            name["familyName"] = json!(last);
        }
        body["name"] = name;
    }
    body
}

/// A SCIM group response echoing what the engine sends for `group`.
pub fn scim_group_echo(group: &Group, remote_id: &str) -> Value {
    json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
        "id": remote_id,
        "displayName": group.name,
        "externalId": group.id.to_string(),
    })
}

/// A SCIM list response wrapping the given resources.
pub fn scim_list(resources: Vec<Value>) -> Value {
    json!({
        "schemas": ["urn:ietf:params:scim:api:messages:2.0:ListResponse"],
        "totalResults": resources.len(),
        "startIndex": 1,
        "itemsPerPage": resources.len(),
        "Resources": resources,
    })
}
