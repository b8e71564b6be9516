use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Resumable chunked file upload", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the chunk server
    Serve {
        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,
        /// Directory for chunks and merged files
        #[arg(long)]
        storage: Option<PathBuf>,
    },
    /// Upload a file, resuming from chunks the server already has
    Upload {
        file: PathBuf,
        /// Server address
        #[arg(long)]
        server: Option<String>,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Chunk uploads in flight
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the fingerprint of a file
    Hash {
        file: PathBuf,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },
}
