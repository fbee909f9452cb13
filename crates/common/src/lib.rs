//! Synchronization core for a remote cloud drive
//!
//! Leaf first:
//!
//! - [`auth`]: OAuth2 token and service-endpoint lifecycle
//! - [`client`]: request execution with auth refresh and backoff
//! - [`cache`]: persistent node metadata with parent/child link maintenance
//! - [`tree`]: path resolution and path-based mutations
//! - [`changes`]: checkpointed change-feed poller

pub mod auth;
pub mod cache;
pub mod changes;
pub mod client;
pub mod events;
pub mod node;
pub mod tree;

pub mod prelude {
    pub use crate::auth::{AuthConfig, AuthError, AuthGrant, AuthSession, Credential, Token};
    pub use crate::cache::{CacheError, MetadataCache, UpdateErrors};
    pub use crate::changes::{ChangeFeedPoller, PollOutcome, PollerError, PollerState};
    pub use crate::client::{ApiClient, ClientError, RequestSpec, RetryPolicy};
    pub use crate::events::AuthEvent;
    pub use crate::node::{Checkpoint, NodeId, NodeKind, NodeMetadata, NodeStatus};
    pub use crate::tree::{ByteRange, ErrorClass, Node, Tree, TreeError};
}
