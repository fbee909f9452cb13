//! Persisted OAuth credentials
//!
//! The auth session only keeps its token and endpoint in memory. The store
//! writes a snapshot to disk whenever the session reports a change, so the
//! next run can pick up where this one left off.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use common::auth::{AuthSession, Credential};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed credentials in {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored credential; a missing file is an empty credential
    pub async fn load(&self) -> Result<Credential, CredentialError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credential::default())
            }
            Err(source) => {
                return Err(CredentialError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|source| CredentialError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let data = serde_json::to_vec_pretty(credential)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Write the session's credential after every auth event
    ///
    /// The task ends once the session (and with it the event sender) is dropped.
    pub fn spawn_persistence(&self, session: &Arc<AuthSession>) -> JoinHandle<()> {
        let events = session.subscribe();
        let session = Arc::downgrade(session);
        let store = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                let credential = session.credential();
                drop(session);

                tracing::debug!(?event, path = %store.path.display(), "persisting credentials");
                if let Err(e) = store.save(&credential).await {
                    tracing::error!(error = %e, "failed to persist credentials");
                }
            }
            tracing::debug!("credential persistence stopped");
        })
    }
}
