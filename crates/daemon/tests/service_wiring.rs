//! Service wiring from an initialized app directory against a mock drive

use std::net::TcpListener;
use std::path::Path;

use chrono::Utc;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use clouddav_daemon::{AppConfig, AppState, CredentialStore, ServiceState};
use common::auth::{AuthConfig, AuthGrant, Credential, EndpointSet, Token};
use common::tree::ErrorClass;

const ROOT_FILTER: &str = "kind:(FILE OR FOLDER) AND status:AVAILABLE AND isRoot:true";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn auth_config(server: &MockServer) -> AuthConfig {
    AuthConfig::new("client", "clouddrive:read_all", "http://localhost:8080/signin.html")
        .with_urls(
            server.url("/ap/oa"),
            server.url("/auth/o2/token"),
            server.url("/drive/v1/account/endpoint"),
        )
}

fn init_state(server: &MockServer, dir: &Path) -> AppState {
    let config = AppConfig {
        auth: auth_config(server),
        ..AppConfig::default()
    };
    AppState::init(Some(dir.join("app")), Some(config)).unwrap()
}

async fn store_credential(state: &AppState, server: &MockServer, access_token: &str) {
    let credential = Credential {
        token: Some(Token::new(access_token, 3600).with_refresh_token("refresh")),
        token_issued_at: Some(Utc::now()),
        endpoint: Some(EndpointSet::new(
            server.url("/drive/v1/"),
            server.url("/cdproxy/"),
            Utc::now(),
        )),
    };
    CredentialStore::new(&state.credentials_path)
        .save(&credential)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_services_use_stored_credentials() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let root = server.mock(|when, then| {
        when.method(GET)
            .path("/drive/v1/nodes")
            .query_param("filters", ROOT_FILTER)
            .header("authorization", "Bearer stored-token");
        then.status(200).json_body(json!({
            "count": 1,
            "data": [{
                "id": "rootid",
                "kind": "FOLDER",
                "isRoot": true,
                "parents": [],
                "status": "AVAILABLE",
            }],
        }));
    });

    let dir = tempfile::tempdir().unwrap();
    let state = init_state(&server, dir.path());
    store_credential(&state, &server, "stored-token").await;

    let services = ServiceState::from_state(&state).await.unwrap();
    let node = services.tree().resolve("/").await.unwrap();
    assert_eq!(node.id(), "rootid");
    root.assert_hits(1);
    assert!(services.cache().get_by_id("rootid").await.is_ok());

    services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_session_changes() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    let state = init_state(&server, dir.path());
    store_credential(&state, &server, "old-token").await;

    let services = ServiceState::from_state(&state).await.unwrap();
    services.session().set_token(Token::new("new-token", 3600));
    services.shutdown().await.unwrap();

    let saved = CredentialStore::new(&state.credentials_path)
        .load()
        .await
        .unwrap();
    assert_eq!(saved.token.unwrap().access_token, "new-token");
    assert!(saved.endpoint.is_some());
}

#[tokio::test]
async fn test_login_flow_is_persisted() {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/o2/token")
            .body_contains("grant_type=authorization_code")
            .body_contains("code=login-code");
        then.status(200).json_body(json!({
            "access_token": "granted-token",
            "refresh_token": "granted-refresh",
            "expires_in": 3600,
            "token_type": "bearer",
        }));
    });
    let endpoint = server.mock(|when, then| {
        when.method(GET)
            .path("/drive/v1/account/endpoint")
            .header("authorization", "Bearer granted-token");
        then.status(200).json_body(json!({
            "metadataUrl": server.url("/drive/v1/"),
            "contentUrl": server.url("/cdproxy/"),
            "customerExists": true,
        }));
    });

    let dir = tempfile::tempdir().unwrap();
    let state = init_state(&server, dir.path());

    let services = ServiceState::from_state(&state).await.unwrap();
    services
        .session()
        .process_token_response(AuthGrant::Code("login-code".to_string()))
        .await
        .unwrap();
    services.session().get_endpoint().await.unwrap();
    services.shutdown().await.unwrap();

    token.assert_hits(1);
    assert!(endpoint.hits() >= 1);

    let saved = CredentialStore::new(&state.credentials_path)
        .load()
        .await
        .unwrap();
    let saved_token = saved.token.unwrap();
    assert_eq!(saved_token.access_token, "granted-token");
    assert_eq!(saved_token.refresh_token.as_deref(), Some("granted-refresh"));
    assert_eq!(
        saved.endpoint.unwrap().metadata_url,
        server.url("/drive/v1/")
    );
}

#[tokio::test]
async fn test_missing_credentials_surface_as_auth_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::default();
    let state = AppState::init(Some(dir.path().join("app")), Some(config)).unwrap();

    let services = ServiceState::from_state(&state).await.unwrap();
    let err = services.tree().resolve("/").await.unwrap_err();
    assert_eq!(err.classify(), ErrorClass::Auth);

    services.shutdown().await.unwrap();
    assert!(state.credentials_path.exists());
}
