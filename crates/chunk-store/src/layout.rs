use std::path::{Path, PathBuf};

use chunkload_protocol::identity::ChunkIdentity;

/// Prefix of each per-fingerprint chunk namespace directory.
pub const NAMESPACE_PREFIX: &str = "chunkDir_";

/// Name of the session manifest inside a namespace.
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// Suffix of the file a merge assembles before publishing it.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Maps fingerprints and chunk identities to paths under the storage root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the chunks of one file.
    pub fn namespace_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(format!("{NAMESPACE_PREFIX}{fingerprint}"))
    }

    pub fn manifest_path(&self, fingerprint: &str) -> PathBuf {
        self.namespace_dir(fingerprint).join(MANIFEST_FILE_NAME)
    }

    pub fn chunk_path(&self, identity: &ChunkIdentity) -> PathBuf {
        self.namespace_dir(identity.fingerprint())
            .join(identity.to_string())
    }

    /// Unique scratch path for an in-flight chunk write. Starts with `.` so
    /// listings skip it.
    pub fn temp_chunk_path(&self, identity: &ChunkIdentity) -> PathBuf {
        self.namespace_dir(identity.fingerprint())
            .join(format!(".{identity}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }

    /// Final merged file.
    pub fn output_path(&self, fingerprint: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{fingerprint}{extension}"))
    }

    /// File a merge writes into before the atomic rename.
    pub fn partial_path(&self, fingerprint: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{fingerprint}{extension}{PARTIAL_SUFFIX}"))
    }
}
