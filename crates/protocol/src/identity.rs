//! Chunk identities: `<fingerprint>-<index>`.
//!
//! The identity is both the on-wire chunk key and the blob name in the
//! server's per-fingerprint namespace. The index is recovered by splitting
//! on the last `-`.

use std::fmt;
use std::str::FromStr;

/// Separator between fingerprint and chunk index.
pub const IDENTITY_SEPARATOR: char = '-';

/// Errors produced when parsing a chunk identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("missing '-' separator in chunk identity: {0}")]
    MissingSeparator(String),

    #[error("invalid chunk index in identity: {0}")]
    InvalidIndex(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

/// Returns `true` if `fingerprint` is a non-empty ASCII hex string.
///
/// Fingerprints double as directory and file names on the server, so this
/// also rules out separators and traversal.
pub fn is_valid_fingerprint(fingerprint: &str) -> bool {
    !fingerprint.is_empty() && fingerprint.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Extracts the extension (including the leading `.`) from a file name.
///
/// Returns an empty string when the name has no `.`.
pub fn extract_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) => &file_name[idx..],
        None => "",
    }
}

/// The key naming one stored chunk of one file.
///
/// Ordering compares the fingerprint first, then the index numerically, so
/// `fp-2` sorts before `fp-10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkIdentity {
    fingerprint: String,
    index: u32,
}

impl ChunkIdentity {
    /// Builds an identity, validating the fingerprint.
    pub fn new(fingerprint: impl Into<String>, index: u32) -> Result<Self, IdentityError> {
        let fingerprint = fingerprint.into();
        if !is_valid_fingerprint(&fingerprint) {
            return Err(IdentityError::InvalidFingerprint(fingerprint));
        }
        Ok(Self { fingerprint, index })
    }

    /// Parses `<fingerprint>-<index>`.
    pub fn parse(identity: &str) -> Result<Self, IdentityError> {
        let (fingerprint, index) = identity
            .rsplit_once(IDENTITY_SEPARATOR)
            .ok_or_else(|| IdentityError::MissingSeparator(identity.to_string()))?;

        // u32::from_str accepts a leading '+', which would make two
        // spellings name the same chunk.
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::InvalidIndex(identity.to_string()));
        }
        let index = index
            .parse::<u32>()
            .map_err(|_| IdentityError::InvalidIndex(identity.to_string()))?;

        Self::new(fingerprint, index)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for ChunkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.fingerprint, IDENTITY_SEPARATOR, self.index)
    }
}

impl FromStr for ChunkIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
