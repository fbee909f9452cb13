//! Resilient request execution against the remote API
//!
//! # Architecture
//!
//! Every remote call made by the tree and the change-feed poller goes through
//! [`ApiClient`]. A call is described by a rebuildable [`RequestSpec`] and one of
//! the two endpoint bases ([`EndpointKind`]). For each attempt the client:
//!
//! 1. asks the [`AuthSession`] for a bearer header and the current endpoint set,
//! 2. composes the absolute URL and builds a fresh request from the spec,
//! 3. sends it and classifies the outcome.
//!
//! Transport failures, auth failures that may clear up on their own, and the
//! statuses in [`is_retryable`] are retried with [`RetryPolicy`]. Everything
//! else (including 4xx) is handed back for the caller to interpret.

mod request;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::Span;
use url::Url;

use crate::auth::{AuthError, AuthSession, EndpointKind};

pub use request::{MultipartField, RequestBody, RequestSpec};
pub use retry::{Attempt, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("transient network error: {0}")]
    Transient(#[from] reqwest::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Statuses that are retried rather than handed back
pub fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn is_retryable_auth(error: &AuthError) -> bool {
    // A missing token or broken config will not fix itself between attempts
    matches!(
        error,
        AuthError::BadEndpoint(_) | AuthError::Exchange(_) | AuthError::Http(_)
    )
}

/// Prefix `path` with `base` unless it is already absolute
pub fn compose_url(base: &str, path: &str) -> Result<Url, ClientError> {
    let joined = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|e| ClientError::InvalidRequest(format!("{}: {}", joined, e)))
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    auth: Arc<AuthSession>,
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
    span: Span,
}

impl ApiClient {
    pub fn new(auth: Arc<AuthSession>) -> Result<Self, ClientError> {
        let client = Client::builder().build()?;
        Ok(Self {
            auth,
            client,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            span: tracing::info_span!("client"),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Timeout applied to requests that do not set their own
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute a request and buffer the response body
    pub async fn execute(
        &self,
        kind: EndpointKind,
        spec: &RequestSpec,
    ) -> Result<ApiResponse, ClientError> {
        self.policy
            .run(move |attempt| async move {
                match self.attempt(kind, spec, attempt).await {
                    Attempt::Complete(Ok(response)) => match buffer(response).await {
                        Ok(response) => Attempt::Complete(Ok(response)),
                        Err(e) => Attempt::Retry(Err(e)),
                    },
                    Attempt::Retry(Ok(response)) => Attempt::Retry(buffer(response).await),
                    Attempt::Complete(Err(e)) => Attempt::Complete(Err(e)),
                    Attempt::Retry(Err(e)) => Attempt::Retry(Err(e)),
                }
            })
            .await
    }

    /// Execute a request and hand back the live response
    ///
    /// Responses that are going to be retried are dropped, aborting the
    /// transfer, before the next attempt starts.
    pub async fn execute_streaming(
        &self,
        kind: EndpointKind,
        spec: &RequestSpec,
    ) -> Result<reqwest::Response, ClientError> {
        self.policy
            .run(move |attempt| self.attempt(kind, spec, attempt))
            .await
    }

    async fn attempt(
        &self,
        kind: EndpointKind,
        spec: &RequestSpec,
        attempt: u32,
    ) -> Attempt<Result<reqwest::Response, ClientError>> {
        let auth = match self.auth.get_headers_and_endpoint().await {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(parent: &self.span, attempt, error = %e, "could not authorize request");
                return if is_retryable_auth(&e) {
                    Attempt::Retry(Err(e.into()))
                } else {
                    Attempt::Complete(Err(e.into()))
                };
            }
        };

        let request = compose_url(auth.endpoint.base_url(kind), &spec.path)
            .and_then(|url| spec.build(&self.client, url, &auth.authorization, self.timeout));
        let request = match request {
            Ok(request) => request,
            Err(e) => return Attempt::Complete(Err(e)),
        };

        tracing::debug!(
            parent: &self.span,
            method = %spec.method,
            path = %spec.path,
            endpoint = %kind,
            attempt,
            "sending request"
        );

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if !is_retryable(status) {
                    return Attempt::Complete(Ok(response));
                }
                tracing::warn!(
                    parent: &self.span,
                    method = %spec.method,
                    path = %spec.path,
                    status = status.as_u16(),
                    attempt,
                    "retryable response"
                );
                if status == StatusCode::UNAUTHORIZED {
                    self.auth.expire_token();
                }
                Attempt::Retry(Ok(response))
            }
            Err(e) => {
                tracing::warn!(
                    parent: &self.span,
                    method = %spec.method,
                    path = %spec.path,
                    attempt,
                    error = %e,
                    "request failed"
                );
                Attempt::Retry(Err(ClientError::Transient(e)))
            }
        }
    }
}

async fn buffer(response: reqwest::Response) -> Result<ApiResponse, ClientError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok(ApiResponse {
        status,
        headers,
        body,
    })
}
