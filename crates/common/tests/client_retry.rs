//! Request execution: authorization, retry classification and URL composition

mod common;

use std::sync::Arc;

use chrono::Utc;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use reqwest::StatusCode;
use serde_json::json;

use ::common::auth::{AuthError, AuthSession, Credential, EndpointKind, EndpointSet, Token};
use ::common::client::{ApiClient, ClientError, RequestSpec};

#[tokio::test]
async fn test_retryable_status_exhausts_attempts() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(common::metadata_path("account/info"));
        then.status(429).body("slow down");
    });

    let client = ApiClient::new(common::ready_session(&server))
        .unwrap()
        .with_retry_policy(common::fast_retries(3));

    let response = client
        .execute(EndpointKind::Metadata, &RequestSpec::get("account/info"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.text(), "slow down");
    mock.assert_hits(3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(common::metadata_path("nodes/missing"));
        then.status(404).json_body(json!({ "message": "not found" }));
    });

    let client = ApiClient::new(common::ready_session(&server))
        .unwrap()
        .with_retry_policy(common::fast_retries(5));

    let response = client
        .execute(EndpointKind::Metadata, &RequestSpec::get("nodes/missing"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.is_success());
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_request_carries_bearer_query_and_json() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(common::metadata_path("nodes"))
            .header("authorization", format!("Bearer {}", common::ACCESS_TOKEN))
            .query_param("localId", "abc")
            .json_body(json!({ "name": "docs", "kind": "FOLDER" }));
        then.status(201)
            .json_body(common::folder_json("f1", "docs", &["root"]));
    });

    let client = common::client_for(&server);
    let spec = RequestSpec::post("nodes")
        .query("localId", "abc")
        .json(json!({ "name": "docs", "kind": "FOLDER" }));
    let response = client.execute(EndpointKind::Metadata, &spec).await.unwrap();

    assert_eq!(response.status, StatusCode::CREATED);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], "f1");
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_content_requests_use_content_endpoint() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(common::content_path("nodes/f1/content"));
        then.status(200).body("file bytes");
    });

    let client = common::client_for(&server);
    let response = client
        .execute_streaming(EndpointKind::Content, &RequestSpec::get("nodes/f1/content"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"file bytes");
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_absolute_url_bypasses_endpoint() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/elsewhere/thing");
        then.status(200).body("ok");
    });

    let client = common::client_for(&server);
    let response = client
        .execute(
            EndpointKind::Metadata,
            &RequestSpec::get(server.url("/elsewhere/thing")),
        )
        .await
        .unwrap();

    assert_eq!(response.text(), "ok");
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_before_retry() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(GET)
            .path(common::metadata_path("account/info"))
            .header("authorization", format!("Bearer {}", common::ACCESS_TOKEN));
        then.status(401);
    });
    let accepted = server.mock(|when, then| {
        when.method(GET)
            .path(common::metadata_path("account/info"))
            .header("authorization", "Bearer rotated-token");
        then.status(200).json_body(json!({ "status": "ACTIVE" }));
    });
    let token_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/o2/token")
            .body_contains("grant_type=refresh_token");
        then.status(200).json_body(json!({
            "access_token": "rotated-token",
            "expires_in": 3600,
        }));
    });

    let client = ApiClient::new(common::ready_session(&server))
        .unwrap()
        .with_retry_policy(common::fast_retries(3));

    let response = client
        .execute(EndpointKind::Metadata, &RequestSpec::get("account/info"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    rejected.assert_hits(1);
    token_mock.assert_hits(1);
    accepted.assert_hits(1);
}

#[tokio::test]
async fn test_missing_token_fails_without_sending() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(common::metadata_path("account/info"));
        then.status(200);
    });

    let session = Arc::new(AuthSession::new(common::auth_config(&server)).unwrap());
    let client = ApiClient::new(session)
        .unwrap()
        .with_retry_policy(common::fast_retries(4));

    let result = client
        .execute(EndpointKind::Metadata, &RequestSpec::get("account/info"))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Auth(AuthError::NoToken))
    ));
    mock.assert_hits(0);
}

#[tokio::test]
async fn test_connection_failure_is_transient() {
    let credential = Credential {
        token: Some(Token::new(common::ACCESS_TOKEN, 3600)),
        token_issued_at: Some(Utc::now()),
        // nothing listens on port 1
        endpoint: Some(EndpointSet::new(
            "http://127.0.0.1:1/drive/v1/",
            "http://127.0.0.1:1/cdproxy/",
            Utc::now(),
        )),
    };
    let config = ::common::auth::AuthConfig::new("client", "scope", "http://localhost/");
    let session = Arc::new(AuthSession::restore(config, credential).unwrap());
    let client = ApiClient::new(session)
        .unwrap()
        .with_retry_policy(common::fast_retries(2));

    let result = client
        .execute(EndpointKind::Metadata, &RequestSpec::get("account/info"))
        .await;

    assert!(matches!(result, Err(ClientError::Transient(_))));
}
