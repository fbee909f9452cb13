use std::path::PathBuf;

use clouddav_daemon::{AppState, ServiceSetupError, ServiceState, StateError};

/// A single CLI operation
#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: std::fmt::Display + std::fmt::Debug + Send;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct OpContext {
    /// App directory override (`--config-dir` / `CLOUDDAV_DIR`)
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Setup(#[from] ServiceSetupError),
}

impl OpContext {
    pub fn new(config_dir: Option<PathBuf>) -> Self {
        Self { config_dir }
    }

    pub fn state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_dir.clone())
    }

    /// Load the app state and bring up the core services
    pub async fn services(&self) -> Result<ServiceState, ContextError> {
        let state = self.state()?;
        Ok(ServiceState::from_state(&state).await?)
    }
}

/// Generate a clap `Command` enum over a set of ops, plus matching
/// `OpError` / `OpOutput` enums and an `Op` impl that dispatches to the variant.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $op:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($op),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$op as $crate::cli::op::Op>::Error),
            )*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$op as $crate::cli::op::Op>::Output),)*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{}", output),)*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
