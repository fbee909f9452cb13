use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::changes::{PollOutcome, PollerError};

use crate::cli::op::ContextError;

/// Follow the remote change feed into the metadata cache
#[derive(Args, Debug, Clone)]
pub struct Sync {
    /// Request pages back to back until the feed is drained
    #[arg(long)]
    pub catch_up: bool,

    /// Poll in the foreground and exit instead of following the feed
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug)]
pub struct SyncOutput {
    pub polls: usize,
    pub nodes: usize,
    pub checkpoint: Option<String>,
}

impl fmt::Display for SyncOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} changes in {} polls",
            "Synced".green().bold(),
            self.nodes,
            self.polls
        )?;
        write!(
            f,
            "  {} {}",
            "Checkpoint:".dimmed(),
            self.checkpoint.as_deref().unwrap_or("none")
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Poller(#[from] PollerError),
    #[error("failed to wait for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Sync {
    type Error = SyncError;
    type Output = SyncOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let poller = services.poller();

        let mut polls = 0;
        let mut nodes = 0;
        if self.once {
            poller.load_checkpoint().await?;
            loop {
                polls += 1;
                match poller.poll_once().await {
                    PollOutcome::Applied { nodes: n } => {
                        nodes += n;
                        if !self.catch_up {
                            break;
                        }
                    }
                    PollOutcome::Empty | PollOutcome::Skipped => break,
                    PollOutcome::Failed(e) => return Err(e.into()),
                }
            }
        } else {
            poller.start(self.catch_up).await?;
            println!("{} (ctrl-c to stop)", "Following change feed".bold());
            tokio::signal::ctrl_c().await?;
            poller.shutdown().await;
        }

        let checkpoint = poller.checkpoint().map(|c| c.as_str().to_string());
        services.shutdown().await.map_err(ContextError::from)?;

        Ok(SyncOutput {
            polls,
            nodes,
            checkpoint,
        })
    }
}
