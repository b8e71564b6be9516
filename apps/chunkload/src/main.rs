//! chunkload entry point.

mod cli;
mod commands;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Serve { listen, storage } => {
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(storage) = storage {
                config.storage.root = storage;
            }
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                listen = %config.listen_addr,
                storage = %config.storage.root.display(),
                "starting chunkload server"
            );
            rt.block_on(commands::serve(config))?;
        }
        Command::Upload {
            file,
            server,
            chunk_size,
            concurrency,
        } => {
            if let Some(server) = server {
                config.server_addr = server;
            }
            if let Some(chunk_size) = chunk_size {
                config.upload.chunk_size = chunk_size;
            }
            if let Some(concurrency) = concurrency {
                config.upload.concurrency = concurrency;
            }
            config.validate()?;
            rt.block_on(commands::upload(config, &file))?;
        }
        Command::Hash { file, chunk_size } => {
            if let Some(chunk_size) = chunk_size {
                config.upload.chunk_size = chunk_size;
            }
            config.validate()?;
            rt.block_on(commands::hash(&file, config.upload.chunk_size))?;
        }
    }

    Ok(())
}
