use std::path::{Component, Path};

use chunkload_protocol::identity::is_valid_fingerprint;

use crate::StoreError;

/// Validates a fingerprint used as a namespace and file name.
pub fn validate_fingerprint(fingerprint: &str) -> Result<(), StoreError> {
    if !is_valid_fingerprint(fingerprint) {
        return Err(StoreError::InvalidArgument(format!(
            "fingerprint must be a non-empty hex string: {fingerprint:?}"
        )));
    }
    Ok(())
}

/// Validates an output extension (empty, or `.` followed by a file-name
/// suffix).
///
/// `<fingerprint><extension>` must stay a single plain file name inside the
/// storage root, so separators, prefixes and traversal are rejected.
pub fn validate_extension(extension: &str) -> Result<(), StoreError> {
    if extension.is_empty() {
        return Ok(());
    }

    if !extension.starts_with('.') {
        return Err(StoreError::InvalidArgument(format!(
            "extension must start with '.': {extension:?}"
        )));
    }

    if extension.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidArgument(format!(
            "extension contains a path separator: {extension:?}"
        )));
    }

    // "x" stands in for the fingerprint prefix.
    let name = format!("x{extension}");
    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidArgument(format!(
            "extension is not a plain file name suffix: {extension:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hex_fingerprint() {
        assert!(validate_fingerprint("d41d8cd98f00b204e9800998ecf8427e").is_ok());
    }

    #[test]
    fn rejects_empty_fingerprint() {
        assert!(validate_fingerprint("").is_err());
    }

    #[test]
    fn rejects_traversal_fingerprint() {
        assert!(validate_fingerprint("../../../etc").is_err());
        assert!(validate_fingerprint("abc/def").is_err());
    }

    #[test]
    fn rejects_file_name_as_fingerprint() {
        assert!(validate_fingerprint("movie.mkv").is_err());
    }

    #[test]
    fn accepts_common_extensions() {
        for ext in ["", ".mp4", ".gz", ".bashrc", "."] {
            assert!(validate_extension(ext).is_ok(), "rejected {ext:?}");
        }
    }

    #[test]
    fn rejects_separator_in_extension() {
        assert!(validate_extension("./../../etc/passwd").is_err());
        assert!(validate_extension(".d\\evil").is_err());
        assert!(validate_extension(".d/evil").is_err());
    }

    #[test]
    fn rejects_extension_without_dot() {
        assert!(validate_extension("mp4").is_err());
    }

    #[test]
    fn rejects_nul_in_extension() {
        assert!(validate_extension(".mp\04").is_err());
    }
}
