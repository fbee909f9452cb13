use clap::Parser;
use owo_colors::OwoColorize;

mod cli;

use cli::op::{Op, OpContext};
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let _log_guard = clouddav_daemon::logging::init(&args.log_level, args.log_dir.as_deref())?;

    let ctx = OpContext::new(args.config_dir.clone());
    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
