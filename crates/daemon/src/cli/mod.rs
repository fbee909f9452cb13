use std::path::PathBuf;

use clap::Parser;

pub mod op;
pub mod ops;

#[derive(Parser, Debug)]
#[command(name = "clouddav", version, about = "Cloud drive access with a local metadata cache")]
pub struct Cli {
    /// App directory holding config.toml, credentials and the metadata cache
    #[arg(long, global = true, env = "CLOUDDAV_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write logs to daily rolling files in this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: ops::Command,
}
