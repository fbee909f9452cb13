// App state (configuration, paths)
pub mod config;
pub mod state;

// Service wiring
pub mod credentials;
pub mod logging;
pub mod service;

pub use config::{AppConfig, ConfigError};
pub use credentials::{CredentialError, CredentialStore};
pub use service::{ServiceSetupError, ServiceState};
pub use state::{AppState, StateError};
