//! Wiring of the synchronization core from application state

use std::sync::Arc;

use tokio::task::JoinHandle;

use common::auth::{AuthError, AuthSession};
use common::cache::{CacheError, MetadataCache};
use common::changes::ChangeFeedPoller;
use common::client::{ApiClient, ClientError, RetryPolicy, DEFAULT_BASE_DELAY};
use common::tree::Tree;

use crate::credentials::{CredentialError, CredentialStore};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServiceSetupError {
    #[error("credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("auth session: {0}")]
    Auth(#[from] AuthError),
    #[error("request client: {0}")]
    Client(#[from] ClientError),
    #[error("metadata cache: {0}")]
    Cache(#[from] CacheError),
}

/// Every core component, sharing one session and one cache
#[derive(Debug)]
pub struct ServiceState {
    session: Arc<AuthSession>,
    client: ApiClient,
    cache: Arc<MetadataCache>,
    tree: Tree,
    poller: ChangeFeedPoller,
    store: CredentialStore,
    persistence: JoinHandle<()>,
}

impl ServiceState {
    pub async fn from_state(state: &AppState) -> Result<Self, ServiceSetupError> {
        let config = &state.config;

        let store = CredentialStore::new(&state.credentials_path);
        let credential = store.load().await?;
        tracing::debug!(
            path = %store.path().display(),
            has_token = credential.token.is_some(),
            has_endpoint = credential.endpoint.is_some(),
            "loaded credentials"
        );
        let session = Arc::new(AuthSession::restore(config.auth.clone(), credential)?);
        let persistence = store.spawn_persistence(&session);

        let client = ApiClient::new(Arc::clone(&session))?
            .with_retry_policy(RetryPolicy::new(config.max_attempts, DEFAULT_BASE_DELAY))
            .with_timeout(config.request_timeout());

        let cache = Arc::new(MetadataCache::open(&state.cache_dir).await?);
        let tree = Tree::new(client.clone(), Arc::clone(&cache), &config.base_path);
        let poller =
            ChangeFeedPoller::with_delay(client.clone(), Arc::clone(&cache), config.poll_delay());

        Ok(Self {
            session,
            client,
            cache,
            tree,
            poller,
            store,
            persistence,
        })
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn poller(&self) -> &ChangeFeedPoller {
        &self.poller
    }

    /// Stop polling and write the final credential snapshot
    pub async fn shutdown(self) -> Result<(), ServiceSetupError> {
        self.poller.shutdown().await;
        self.store.save(&self.session.credential()).await?;
        self.persistence.abort();
        tracing::debug!("services shut down");
        Ok(())
    }
}
