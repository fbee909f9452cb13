//! OAuth2 credential and service-endpoint lifecycle
//!
//! [`AuthSession`] owns the client configuration, the current token, and the
//! cached endpoint set. Tokens are refreshed transparently once they are within
//! [`TOKEN_EXPIRY_SKEW_SECS`] of expiring; endpoints are re-fetched lazily once
//! they are older than [`ENDPOINT_FRESHNESS_DAYS`].
//!
//! No retrying happens here. A failed exchange clears the token (or endpoint)
//! instead of leaving it half set, and the caller decides whether to try again.

mod types;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tracing::{Instrument, Span};
use url::Url;

use crate::events::{AuthEvent, EventBus};

pub use types::{
    AuthConfig, AuthGrant, Credential, EndpointKind, EndpointSet, Token, TokenResponse,
    DEFAULT_AUTHORIZE_URL, DEFAULT_ENDPOINT_URL, DEFAULT_TOKEN_URL, ENDPOINT_FRESHNESS_DAYS,
    TOKEN_EXPIRY_SKEW_SECS,
};

use types::EndpointResponse;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token available")]
    NoToken,
    #[error("token expired and could not be refreshed: {0}")]
    ExpiredAndUnrefreshable(String),
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("bad endpoint response: {0}")]
    BadEndpoint(String),
    #[error("invalid auth configuration: {0}")]
    InvalidConfig(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A ready-to-use authorization header plus the endpoint to send it to
#[derive(Debug, Clone)]
pub struct RequestAuth {
    pub authorization: String,
    pub endpoint: EndpointSet,
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<Token>,
    token_issued_at: Option<chrono::DateTime<Utc>>,
    endpoint: Option<EndpointSet>,
}

/// OAuth2 session shared by every component that talks to the remote
#[derive(Debug)]
pub struct AuthSession {
    config: AuthConfig,
    http: Client,
    state: Mutex<SessionState>,
    // Held across the network exchange so concurrent callers share one refresh
    refresh_lock: tokio::sync::Mutex<()>,
    endpoint_lock: tokio::sync::Mutex<()>,
    events: EventBus,
    span: Span,
}

impl AuthSession {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder().build()?;
        let span = tracing::info_span!("auth", client_id = %config.client_id);
        Ok(Self {
            config,
            http,
            state: Mutex::new(SessionState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            endpoint_lock: tokio::sync::Mutex::new(()),
            events: EventBus::new(),
            span,
        })
    }

    /// Rebuild a session from a persisted credential
    pub fn restore(config: AuthConfig, credential: Credential) -> Result<Self, AuthError> {
        let session = Self::new(config)?;
        {
            let mut state = session.state.lock();
            state.token = credential.token;
            state.token_issued_at = credential.token_issued_at;
            state.endpoint = credential.endpoint;
        }
        Ok(session)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Snapshot the session for persistence
    pub fn credential(&self) -> Credential {
        let state = self.state.lock();
        Credential {
            token: state.token.clone(),
            token_issued_at: state.token_issued_at,
            endpoint: state.endpoint.clone(),
        }
    }

    /// Subscribe to token and endpoint changes
    pub fn subscribe(&self) -> flume::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /* Token */

    fn current_valid_token(&self) -> Option<Token> {
        let state = self.state.lock();
        state
            .token
            .as_ref()
            .filter(|token| token.is_valid_at(state.token_issued_at, Utc::now()))
            .cloned()
    }

    /// Current token, refreshing it first if it has (nearly) expired
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        if let Some(token) = self.current_valid_token() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited for the lock
        if let Some(token) = self.current_valid_token() {
            return Ok(token);
        }

        let refresh_token = {
            let state = self.state.lock();
            match &state.token {
                None => return Err(AuthError::NoToken),
                Some(token) => token.refresh_token.clone(),
            }
        };
        let Some(refresh_token) = refresh_token else {
            return Err(AuthError::ExpiredAndUnrefreshable(
                "no refresh token".to_string(),
            ));
        };

        tracing::debug!(parent: &self.span, "access token expired, refreshing");

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        match self.exchange(&form).await {
            Ok(mut token) => {
                if token.refresh_token.is_none() {
                    token.refresh_token = Some(refresh_token);
                }
                self.set_token(token.clone());
                tracing::info!(parent: &self.span, "access token refreshed");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "token refresh failed");
                self.clear_token();
                Err(AuthError::ExpiredAndUnrefreshable(e.to_string()))
            }
        }
    }

    /// Install a new token, stamped as issued now
    pub fn set_token(&self, token: Token) {
        {
            let mut state = self.state.lock();
            state.token = Some(token.clone());
            state.token_issued_at = Some(Utc::now());
        }
        self.events.emit(AuthEvent::TokenChanged(token));
    }

    /// Forget the token; `get_token` fails until a new one is supplied
    pub fn clear_token(&self) {
        {
            let mut state = self.state.lock();
            state.token = None;
            state.token_issued_at = None;
        }
        self.events.emit(AuthEvent::TokenCleared);
    }

    /// Mark the current token as expired so the next `get_token` refreshes it
    ///
    /// Used when the remote rejects a token the local clock still considers valid.
    pub fn expire_token(&self) {
        let mut state = self.state.lock();
        if state.token.is_some() {
            state.token_issued_at = None;
        }
    }

    async fn exchange(&self, form: &[(&str, String)]) -> Result<Token, AuthError> {
        let url = Url::parse(&self.config.token_url)
            .map_err(|e| AuthError::InvalidConfig(format!("token_url: {}", e)))?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Exchange(format!("malformed token response: {}", e)))?;
        body.into_token()
    }

    /* Endpoint */

    fn fresh_endpoint(&self) -> Option<EndpointSet> {
        let state = self.state.lock();
        state
            .endpoint
            .as_ref()
            .filter(|endpoint| endpoint.is_fresh_at(Utc::now()))
            .cloned()
    }

    /// Cached endpoint set, fetched again when stale or absent
    pub async fn get_endpoint(&self) -> Result<EndpointSet, AuthError> {
        if let Some(endpoint) = self.fresh_endpoint() {
            return Ok(endpoint);
        }

        let _guard = self.endpoint_lock.lock().await;
        if let Some(endpoint) = self.fresh_endpoint() {
            return Ok(endpoint);
        }

        let token = self.get_token().await?;
        match self.fetch_endpoint(&token).await {
            Ok(endpoint) => {
                tracing::info!(
                    parent: &self.span,
                    metadata_url = %endpoint.metadata_url,
                    content_url = %endpoint.content_url,
                    "endpoint refreshed"
                );
                self.set_endpoint(endpoint.clone());
                Ok(endpoint)
            }
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "endpoint fetch failed");
                self.clear_endpoint();
                Err(e)
            }
        }
    }

    async fn fetch_endpoint(&self, token: &Token) -> Result<EndpointSet, AuthError> {
        let url = Url::parse(&self.config.endpoint_url)
            .map_err(|e| AuthError::InvalidConfig(format!("endpoint_url: {}", e)))?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.authorization_header())
            .send()
            .await
            .map_err(|e| AuthError::BadEndpoint(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthError::BadEndpoint(format!(
                "endpoint resource returned {}",
                status
            )));
        }

        let body = response
            .json::<EndpointResponse>()
            .await
            .map_err(|e| AuthError::BadEndpoint(format!("malformed endpoint response: {}", e)))?;
        body.into_endpoint(Utc::now())
    }

    pub fn set_endpoint(&self, endpoint: EndpointSet) {
        self.state.lock().endpoint = Some(endpoint.clone());
        self.events.emit(AuthEvent::EndpointChanged(endpoint));
    }

    pub fn clear_endpoint(&self) {
        self.state.lock().endpoint = None;
        self.events.emit(AuthEvent::EndpointCleared);
    }

    /// Authorization header and endpoint in one step
    pub async fn get_headers_and_endpoint(&self) -> Result<RequestAuth, AuthError> {
        let token = self.get_token().await?;
        let endpoint = self.get_endpoint().await?;
        Ok(RequestAuth {
            authorization: token.authorization_header(),
            endpoint,
        })
    }

    /* Authorization grant */

    /// URL the user must visit to authorize this client
    ///
    /// Returns `None` if the client id, scope, or redirect URI is missing.
    pub fn generate_auth_url(&self) -> Option<Url> {
        let config = &self.config;
        if config.client_id.is_empty() || config.scope.is_empty() || config.redirect_uri.is_empty()
        {
            return None;
        }

        Url::parse_with_params(
            &config.authorize_url,
            &[
                ("client_id", config.client_id.as_str()),
                ("scope", config.scope.as_str()),
                ("response_type", config.response_type()),
                ("redirect_uri", config.redirect_uri.as_str()),
            ],
        )
        .ok()
    }

    /// Install the token carried by (or exchanged for) an authorization grant
    ///
    /// On success the endpoint set is refreshed in the background.
    pub async fn process_token_response(
        self: &Arc<Self>,
        grant: AuthGrant,
    ) -> Result<Token, AuthError> {
        let result = match grant {
            AuthGrant::Code(code) => {
                let mut form = vec![
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code),
                    ("client_id", self.config.client_id.clone()),
                    ("redirect_uri", self.config.redirect_uri.clone()),
                ];
                if let Some(secret) = &self.config.client_secret {
                    form.push(("client_secret", secret.clone()));
                }
                self.exchange(&form).await
            }
            AuthGrant::Token(response) => response.into_token(),
        };

        let token = match result {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "authorization grant rejected");
                self.clear_token();
                return Err(e);
            }
        };

        self.set_token(token.clone());

        let session = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(e) = session.get_endpoint().await {
                    tracing::warn!(error = %e, "background endpoint refresh failed");
                }
            }
            .instrument(self.span.clone()),
        );

        Ok(token)
    }
}
