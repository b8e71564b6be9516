//! Configuration management.
//!
//! Configuration is read from TOML:
//! - `--config <path>` if given
//! - Linux: `~/.config/chunkload/chunkload.toml`
//! - Windows: `%APPDATA%/chunkload/chunkload.toml`
//!
//! A missing file means defaults. Command-line flags override file values.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chunkload_chunk_store::StoreConfig;
use chunkload_uploader::UploadConfig;

/// Combined server and client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the server listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Address the client uploads to.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    #[serde(default)]
    pub storage: StoreConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9400".into()
}

fn default_server_addr() -> String {
    "127.0.0.1:9400".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
            storage: StoreConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform default location.
    ///
    /// An explicitly given path must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::read(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                    Ok(Config::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects values no command can run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upload.chunk_size == 0 {
            anyhow::bail!("chunk size must be positive");
        }
        if self.upload.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.storage.max_chunks == 0 {
            anyhow::bail!("max_chunks must be at least 1");
        }
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
            .join("chunkload")
            .join("chunkload.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkload")
            .join("chunkload.toml")
    }
}
