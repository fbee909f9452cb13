//! OAuth2 client configuration, tokens, and service endpoints

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://www.amazon.com/ap/oa";
pub const DEFAULT_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";
pub const DEFAULT_ENDPOINT_URL: &str = "https://drive.amazonaws.com/drive/v1/account/endpoint";

/// Tokens are treated as expired this long before their stated expiry
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 30;

/// How long a fetched endpoint set stays fresh (the service asks for 3 to 5 days)
pub const ENDPOINT_FRESHNESS_DAYS: i64 = 5;

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_endpoint_url() -> String {
    DEFAULT_ENDPOINT_URL.to_string()
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// OAuth2 client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    /// When set, the authorization code grant is used instead of the implicit grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub scope: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        scope: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            scope: scope.into(),
            redirect_uri: redirect_uri.into(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            endpoint_url: default_endpoint_url(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Point every remote auth URL at another host (used against test servers)
    pub fn with_urls(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self.endpoint_url = endpoint_url.into();
        self
    }

    /// `code` when a client secret is configured, `token` otherwise
    pub fn response_type(&self) -> &'static str {
        if self.client_secret.is_some() {
            "code"
        } else {
            "token"
        }
    }
}

/// An OAuth2 bearer token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_in: Some(expires_in),
            scope: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Whether a token issued at `issued_at` can still be used at `now`
    ///
    /// Missing expiry information counts as expired.
    pub fn is_valid_at(&self, issued_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let (Some(expires_in), Some(issued_at)) = (self.expires_in, issued_at) else {
            return false;
        };
        // Lifetimes too large to represent never run out
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(|secs| Duration::try_seconds(secs - TOKEN_EXPIRY_SKEW_SECS))
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime));
        match expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Raw token payload, either from the token endpoint or from an implicit-grant redirect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Validate the payload into a usable token
    pub fn into_token(self) -> Result<Token, AuthError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Exchange("response is missing access_token".to_string()))?;
        let expires_in = self
            .expires_in
            .ok_or_else(|| AuthError::Exchange("response is missing expires_in".to_string()))?;

        Ok(Token {
            access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(default_token_type),
            expires_in: Some(expires_in),
            scope: self.scope,
        })
    }
}

/// What the user brought back from the authorization page
#[derive(Debug, Clone)]
pub enum AuthGrant {
    /// Authorization code grant; exchanged at the token endpoint
    Code(String),
    /// Implicit grant; the token itself
    Token(TokenResponse),
}

/// Which of the two service base URLs a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Metadata,
    Content,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Metadata => write!(f, "metadataUrl"),
            EndpointKind::Content => write!(f, "contentUrl"),
        }
    }
}

/// Per-account service base URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    pub metadata_url: String,
    pub content_url: String,
    pub fetched_at: DateTime<Utc>,
}

impl EndpointSet {
    pub fn new(
        metadata_url: impl Into<String>,
        content_url: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            content_url: content_url.into(),
            fetched_at,
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.fetched_at + Duration::days(ENDPOINT_FRESHNESS_DAYS) > now
    }

    pub fn base_url(&self, kind: EndpointKind) -> &str {
        match kind {
            EndpointKind::Metadata => &self.metadata_url,
            EndpointKind::Content => &self.content_url,
        }
    }
}

/// Wire shape of the account endpoint resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EndpointResponse {
    #[serde(default)]
    pub metadata_url: Option<String>,
    #[serde(default)]
    pub content_url: Option<String>,
}

impl EndpointResponse {
    pub(crate) fn into_endpoint(self, now: DateTime<Utc>) -> Result<EndpointSet, AuthError> {
        match (self.metadata_url, self.content_url) {
            (Some(metadata_url), Some(content_url))
                if !metadata_url.is_empty() && !content_url.is_empty() =>
            {
                Ok(EndpointSet::new(metadata_url, content_url, now))
            }
            _ => Err(AuthError::BadEndpoint(
                "response is missing metadataUrl or contentUrl".to_string(),
            )),
        }
    }
}

/// Serializable snapshot of a session, for persistence between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointSet>,
}
