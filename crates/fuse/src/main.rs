use clap::Parser;
use tracing_subscriber::EnvFilter;

use emporous_fuse::config::{LogLevel, RootConfig};

mod cli;

use cli::{Cli, OpContext};

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.loglevel);

    let config = RootConfig::new(cli.cache_dir.clone(), cli.loglevel)?;
    let ctx = OpContext::new(config);

    match cli.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            Err(e.into())
        }
    }
}
