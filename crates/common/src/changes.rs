//! Change-feed poller
//!
//! Keeps the metadata cache in step with remote changes made elsewhere by
//! repeatedly posting the last checkpoint to the `changes` resource and
//! applying the returned nodes.
//!
//! # Scheduling
//!
//! - a failed poll (transport, status, malformed body, cache error) is retried
//!   after the steady delay without advancing the checkpoint,
//! - an empty page means the feed is drained, so catch-up mode ends,
//! - a non-empty page is applied together with its checkpoint; in catch-up
//!   mode the next page is requested immediately, otherwise after the delay.
//!
//! Only one poll runs at a time. A poll started while another is in flight
//! returns [`PollOutcome::Skipped`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::auth::EndpointKind;
use crate::cache::{CacheError, MetadataCache, UpdateErrors};
use crate::client::{ApiClient, ClientError, RequestSpec};
use crate::node::{Checkpoint, NodeMetadata};

pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("changes returned {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("malformed changes page: {0}")]
    Decode(String),
    #[error(transparent)]
    Cache(#[from] UpdateErrors),
    #[error("failed to load checkpoint: {0}")]
    Checkpoint(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Polling { catch_up: bool },
}

#[derive(Debug)]
pub enum PollOutcome {
    /// Another poll was already in flight
    Skipped,
    Failed(PollerError),
    /// The feed had nothing new
    Empty,
    Applied { nodes: usize },
}

/// What to do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub catch_up: bool,
    pub delay: Duration,
}

/// Decide the next poll from the current mode and the last outcome
pub fn schedule(catch_up: bool, outcome: &PollOutcome, steady_delay: Duration) -> Schedule {
    match outcome {
        PollOutcome::Applied { .. } if catch_up => Schedule {
            catch_up: true,
            delay: Duration::ZERO,
        },
        PollOutcome::Empty => Schedule {
            catch_up: false,
            delay: steady_delay,
        },
        _ => Schedule {
            catch_up,
            delay: steady_delay,
        },
    }
}

/// One page of the change feed
#[derive(Debug, Deserialize)]
pub struct ChangesPage {
    pub nodes: Vec<NodeMetadata>,
    pub checkpoint: Checkpoint,
}

/// Parse the first line of a newline-delimited changes response
pub fn parse_changes(body: &[u8]) -> Result<ChangesPage, PollerError> {
    let first_line = match body.iter().position(|b| *b == b'\n') {
        Some(end) => &body[..end],
        None => body,
    };
    serde_json::from_slice(first_line).map_err(|e| PollerError::Decode(e.to_string()))
}

#[derive(Debug)]
struct PollerInner {
    client: ApiClient,
    cache: Arc<MetadataCache>,
    delay: Duration,
    checkpoint: Mutex<Option<Checkpoint>>,
    state: Mutex<PollerState>,
    in_flight: AtomicBool,
    span: Span,
}

#[derive(Debug)]
struct PollerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ChangeFeedPoller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<PollerTask>>,
}

impl ChangeFeedPoller {
    pub fn new(client: ApiClient, cache: Arc<MetadataCache>) -> Self {
        Self::with_delay(client, cache, DEFAULT_POLL_DELAY)
    }

    pub fn with_delay(client: ApiClient, cache: Arc<MetadataCache>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                client,
                cache,
                delay,
                checkpoint: Mutex::new(None),
                state: Mutex::new(PollerState::Stopped),
                in_flight: AtomicBool::new(false),
                span: tracing::info_span!("changes"),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.inner.state.lock()
    }

    /// Checkpoint of the last page that was applied
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.inner.checkpoint.lock().clone()
    }

    /// Replace the in-memory checkpoint with the one stored in the cache
    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, PollerError> {
        let checkpoint = self.inner.cache.get_checkpoint().await?;
        *self.inner.checkpoint.lock() = checkpoint.clone();
        Ok(checkpoint)
    }

    /// Load the stored checkpoint and start polling in the background
    ///
    /// A poller that is already running is stopped first.
    pub async fn start(&self, catch_up: bool) -> Result<(), PollerError> {
        self.stop();

        let checkpoint = self.load_checkpoint().await?;
        tracing::info!(
            parent: &self.inner.span,
            catch_up,
            checkpoint = ?checkpoint.as_ref().map(Checkpoint::as_str),
            "starting change feed"
        );
        *self.inner.state.lock() = PollerState::Polling { catch_up };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let span = self.inner.span.clone();
        let handle = tokio::spawn(run(inner, catch_up, shutdown_rx).instrument(span));

        *self.task.lock() = Some(PollerTask { shutdown, handle });
        Ok(())
    }

    /// Stop polling and cancel any scheduled poll
    ///
    /// A poll that is already in flight is allowed to finish.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        *self.inner.state.lock() = PollerState::Stopped;
        let task = self.task.lock().take()?;
        let _ = task.shutdown.send(true);
        tracing::info!(parent: &self.inner.span, "change feed stopped");
        Some(task.handle)
    }

    /// Stop and wait for the background task to exit
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop() {
            if let Err(e) = handle.await {
                tracing::warn!(parent: &self.inner.span, error = %e, "poller task ended abnormally");
            }
        }
    }

    /// Run a single poll now
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }
}

impl Drop for ChangeFeedPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}

impl PollerInner {
    async fn poll_once(&self) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return PollOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        match self.fetch_and_apply().await {
            Ok(0) => PollOutcome::Empty,
            Ok(nodes) => PollOutcome::Applied { nodes },
            Err(e) => PollOutcome::Failed(e),
        }
    }

    async fn fetch_and_apply(&self) -> Result<usize, PollerError> {
        let checkpoint = self.checkpoint.lock().clone();
        let body = match &checkpoint {
            Some(checkpoint) => json!({ "checkpoint": checkpoint }),
            None => json!({}),
        };

        let spec = RequestSpec::post("changes").json(body);
        let response = self.client.execute(EndpointKind::Metadata, &spec).await?;
        if response.status != StatusCode::OK {
            return Err(PollerError::UnexpectedStatus {
                status: response.status,
                body: response.text(),
            });
        }

        let page = parse_changes(&response.body)?;
        let count = page.nodes.len();
        self.cache
            .update(page.nodes, Some(page.checkpoint.clone()))
            .await?;

        tracing::debug!(nodes = count, checkpoint = %page.checkpoint, "changes applied");
        *self.checkpoint.lock() = Some(page.checkpoint);
        Ok(count)
    }
}

async fn run(inner: Arc<PollerInner>, mut catch_up: bool, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = inner.poll_once().await;
        match &outcome {
            PollOutcome::Failed(e) => tracing::warn!(error = %e, "change poll failed"),
            PollOutcome::Applied { nodes } => tracing::info!(nodes, "applied remote changes"),
            PollOutcome::Empty if catch_up => tracing::info!("caught up with change feed"),
            PollOutcome::Empty | PollOutcome::Skipped => {}
        }

        let next = schedule(catch_up, &outcome, inner.delay);
        catch_up = next.catch_up;
        {
            let mut state = inner.state.lock();
            if *state == PollerState::Stopped {
                break;
            }
            *state = PollerState::Polling { catch_up };
        }

        if next.delay.is_zero() {
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(next.delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("change feed task exited");
}
