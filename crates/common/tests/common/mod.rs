//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use httpmock::MockServer;
use serde_json::{json, Value};
use tempfile::TempDir;

use ::common::auth::{AuthConfig, AuthSession, Credential, EndpointSet, Token};
use ::common::cache::MetadataCache;
use ::common::client::{ApiClient, RetryPolicy};
use ::common::tree::Tree;

pub const ACCESS_TOKEN: &str = "test-access-token";
pub const METADATA_PREFIX: &str = "/drive/v1";
pub const CONTENT_PREFIX: &str = "/cdproxy";

/// httpmock needs a loopback socket; some sandboxes forbid it
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

pub fn auth_config(server: &MockServer) -> AuthConfig {
    AuthConfig::new(
        "amzn1.application-oa2-client.test",
        "clouddrive:read_all clouddrive:write",
        "http://localhost:8080/signin.html",
    )
    .with_urls(
        server.url("/ap/oa"),
        server.url("/auth/o2/token"),
        server.url("/drive/v1/account/endpoint"),
    )
}

pub fn endpoint_for(server: &MockServer, fetched_at: DateTime<Utc>) -> EndpointSet {
    EndpointSet::new(
        server.url(format!("{}/", METADATA_PREFIX)),
        server.url(format!("{}/", CONTENT_PREFIX)),
        fetched_at,
    )
}

/// A session holding a valid token and a fresh endpoint set for `server`
pub fn ready_session(server: &MockServer) -> Arc<AuthSession> {
    let credential = Credential {
        token: Some(Token::new(ACCESS_TOKEN, 3600).with_refresh_token("test-refresh-token")),
        token_issued_at: Some(Utc::now()),
        endpoint: Some(endpoint_for(server, Utc::now())),
    };
    Arc::new(AuthSession::restore(auth_config(server), credential).unwrap())
}

/// Retries without meaningful sleeps
pub fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1))
}

pub fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(ready_session(server))
        .unwrap()
        .with_retry_policy(fast_retries(2))
}

pub async fn cache() -> (Arc<MetadataCache>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MetadataCache::open(dir.path()).await.unwrap());
    (cache, dir)
}

pub async fn tree_for(server: &MockServer, base_path: &str) -> (Tree, Arc<MetadataCache>, TempDir) {
    let (cache, dir) = cache().await;
    let tree = Tree::new(client_for(server), cache.clone(), base_path);
    (tree, cache, dir)
}

pub fn metadata_path(path: &str) -> String {
    format!("{}/{}", METADATA_PREFIX, path.trim_start_matches('/'))
}

pub fn content_path(path: &str) -> String {
    format!("{}/{}", CONTENT_PREFIX, path.trim_start_matches('/'))
}

pub fn folder_json(id: &str, name: &str, parents: &[&str]) -> Value {
    json!({
        "id": id,
        "kind": "FOLDER",
        "name": name,
        "parents": parents,
        "status": "AVAILABLE",
    })
}

pub fn root_json(id: &str) -> Value {
    json!({
        "id": id,
        "kind": "FOLDER",
        "isRoot": true,
        "parents": [],
        "status": "AVAILABLE",
    })
}

pub fn file_json(id: &str, name: &str, parents: &[&str], size: u64) -> Value {
    json!({
        "id": id,
        "kind": "FILE",
        "name": name,
        "parents": parents,
        "status": "AVAILABLE",
        "eTagResponse": format!("etag-{}", id),
        "contentProperties": {
            "size": size,
            "contentType": "text/plain",
            "md5": "d41d8cd98f00b204e9800998ecf8427e",
        },
    })
}

pub fn list_json(nodes: Vec<Value>) -> Value {
    json!({ "count": nodes.len(), "data": nodes })
}
