//! Token refresh and endpoint discovery against a mock authorization server

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use ::common::auth::{AuthError, AuthGrant, AuthSession, Credential, Token, TokenResponse};
use ::common::events::AuthEvent;

fn expired_session(server: &MockServer) -> Arc<AuthSession> {
    let credential = Credential {
        token: Some(Token::new("stale-token", 3600).with_refresh_token("test-refresh-token")),
        token_issued_at: Some(Utc::now() - chrono::Duration::hours(2)),
        endpoint: Some(common::endpoint_for(server, Utc::now())),
    };
    Arc::new(AuthSession::restore(common::auth_config(server), credential).unwrap())
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let token_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/o2/token")
            .body_contains("grant_type=refresh_token")
            .body_contains("refresh_token=test-refresh-token");
        then.status(200).json_body(json!({
            "access_token": "fresh-token",
            "token_type": "bearer",
            "expires_in": 3600,
        }));
    });

    let session = expired_session(&server);
    let (a, b, c) = tokio::join!(session.get_token(), session.get_token(), session.get_token());

    for token in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert_eq!(token.access_token, "fresh-token");
        // refresh token survives a response that omits it
        assert_eq!(token.refresh_token.as_deref(), Some("test-refresh-token"));
    }
    token_mock.assert_hits(1);

    // still valid, so no further refresh
    session.get_token().await.unwrap();
    token_mock.assert_hits(1);
}

#[tokio::test]
async fn test_failed_refresh_clears_token() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let token_mock = server.mock(|when, then| {
        when.method(POST).path("/auth/o2/token");
        then.status(400).json_body(json!({ "error": "invalid_grant" }));
    });

    let session = expired_session(&server);
    let events = session.subscribe();

    let result = session.get_token().await;
    assert!(matches!(result, Err(AuthError::ExpiredAndUnrefreshable(_))));
    assert!(session.credential().token.is_none());
    assert_eq!(events.try_recv().unwrap(), AuthEvent::TokenCleared);

    assert!(matches!(session.get_token().await, Err(AuthError::NoToken)));
    token_mock.assert_hits(1);
}

#[tokio::test]
async fn test_endpoint_is_fetched_and_cached() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let endpoint_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/drive/v1/account/endpoint")
            .header("authorization", format!("Bearer {}", common::ACCESS_TOKEN));
        then.status(200).json_body(json!({
            "customerExists": true,
            "metadataUrl": "https://drive.example.com/drive/v1/",
            "contentUrl": "https://content.example.com/cdproxy/",
        }));
    });

    let credential = Credential {
        token: Some(Token::new(common::ACCESS_TOKEN, 3600)),
        token_issued_at: Some(Utc::now()),
        endpoint: None,
    };
    let session = AuthSession::restore(common::auth_config(&server), credential).unwrap();
    let events = session.subscribe();

    let endpoint = session.get_endpoint().await.unwrap();
    assert_eq!(endpoint.metadata_url, "https://drive.example.com/drive/v1/");
    assert_eq!(endpoint.content_url, "https://content.example.com/cdproxy/");
    assert!(matches!(
        events.try_recv().unwrap(),
        AuthEvent::EndpointChanged(_)
    ));

    session.get_endpoint().await.unwrap();
    endpoint_mock.assert_hits(1);
}

#[tokio::test]
async fn test_stale_endpoint_is_refetched() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let endpoint_mock = server.mock(|when, then| {
        when.method(GET).path("/drive/v1/account/endpoint");
        then.status(200).json_body(json!({
            "metadataUrl": "https://drive.example.com/drive/v1/",
            "contentUrl": "https://content.example.com/cdproxy/",
        }));
    });

    let credential = Credential {
        token: Some(Token::new(common::ACCESS_TOKEN, 3600)),
        token_issued_at: Some(Utc::now()),
        endpoint: Some(common::endpoint_for(
            &server,
            Utc::now() - chrono::Duration::days(5),
        )),
    };
    let session = AuthSession::restore(common::auth_config(&server), credential).unwrap();

    let endpoint = session.get_endpoint().await.unwrap();
    assert_eq!(endpoint.metadata_url, "https://drive.example.com/drive/v1/");
    endpoint_mock.assert_hits(1);
}

#[tokio::test]
async fn test_bad_endpoint_response_clears_endpoint() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/drive/v1/account/endpoint");
        then.status(200)
            .json_body(json!({ "metadataUrl": "https://drive.example.com/drive/v1/" }));
    });

    let credential = Credential {
        token: Some(Token::new(common::ACCESS_TOKEN, 3600)),
        token_issued_at: Some(Utc::now()),
        endpoint: Some(common::endpoint_for(
            &server,
            Utc::now() - chrono::Duration::days(30),
        )),
    };
    let session = AuthSession::restore(common::auth_config(&server), credential).unwrap();

    assert!(matches!(
        session.get_endpoint().await,
        Err(AuthError::BadEndpoint(_))
    ));
    assert!(session.credential().endpoint.is_none());
}

#[tokio::test]
async fn test_authorization_code_is_exchanged() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let token_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/o2/token")
            .body_contains("grant_type=authorization_code")
            .body_contains("code=the-code");
        then.status(200).json_body(json!({
            "access_token": common::ACCESS_TOKEN,
            "refresh_token": "issued-refresh",
            "token_type": "bearer",
            "expires_in": 3600,
        }));
    });
    let endpoint_mock = server.mock(|when, then| {
        when.method(GET).path("/drive/v1/account/endpoint");
        then.status(200).json_body(json!({
            "metadataUrl": server.url("/drive/v1/"),
            "contentUrl": server.url("/cdproxy/"),
        }));
    });

    let session = Arc::new(AuthSession::new(common::auth_config(&server)).unwrap());
    let events = session.subscribe();

    let token = session
        .process_token_response(AuthGrant::Code("the-code".to_string()))
        .await
        .unwrap();
    assert_eq!(token.access_token, common::ACCESS_TOKEN);
    assert_eq!(token.refresh_token.as_deref(), Some("issued-refresh"));
    assert!(matches!(
        events.try_recv().unwrap(),
        AuthEvent::TokenChanged(_)
    ));
    token_mock.assert_hits(1);

    // endpoint discovery runs in the background
    let mut waited = Duration::ZERO;
    while session.credential().endpoint.is_none() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(session.credential().endpoint.is_some());
    endpoint_mock.assert_hits(1);
}

#[tokio::test]
async fn test_implicit_grant_without_token_is_rejected() {
    if !common::can_bind_localhost() {
        eprintln!("Skipping test: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let session = Arc::new(AuthSession::new(common::auth_config(&server)).unwrap());
    session.set_token(Token::new("previous", 3600));

    let response = TokenResponse {
        expires_in: Some(3600),
        ..Default::default()
    };
    let result = session
        .process_token_response(AuthGrant::Token(response))
        .await;

    assert!(matches!(result, Err(AuthError::Exchange(_))));
    assert!(session.credential().token.is_none());
}
