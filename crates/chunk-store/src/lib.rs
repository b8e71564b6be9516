//! Server side of the chunked upload protocol.
//!
//! [`ChunkStore`] keeps one namespace directory per file fingerprint holding
//! the received chunk blobs and a session manifest. [`MergeEngine`] turns a
//! complete namespace into the final file and retires it.
//!
//! # Layout
//!
//! ```text
//! <root>/chunkDir_<fingerprint>/session.json
//! <root>/chunkDir_<fingerprint>/<fingerprint>-<index>
//! <root>/<fingerprint><extension>
//! ```

mod error;
mod layout;
mod locks;
mod manifest;
mod merge;
mod store;
mod validation;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use error::StoreError;
pub use layout::StoreLayout;
pub use manifest::SessionManifest;
pub use merge::{MergeEngine, MergeOutcome, MAX_REPORTED_MISSING};
pub use store::ChunkStore;
pub use validation::{validate_extension, validate_fingerprint};

/// Storage settings for the chunk server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding chunk namespaces and merged files.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Re-hash the assembled file and compare it with the fingerprint
    /// before publishing it.
    #[serde(default = "default_true")]
    pub verify_on_merge: bool,

    /// Largest chunk count a session may declare. Bounds the work and
    /// memory a merge can be made to spend on one file.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
}

fn default_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_true() -> bool {
    true
}

/// 4 TiB at the default 4 MiB chunk size.
fn default_max_chunks() -> u32 {
    1 << 20
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            verify_on_merge: default_true(),
            max_chunks: default_max_chunks(),
        }
    }
}

impl StoreConfig {
    /// Config rooted at `root` with default settings.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}
