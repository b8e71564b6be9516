use serde::{Deserialize, Serialize};

use crate::envelope::BodyPayload;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks whether a file is already merged, and which chunks are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub file_hash: String,
    pub file_name: String,
}

/// Header for a chunk upload. The chunk bytes follow as the frame body.
///
/// `file_size` and `chunk_size` are recorded in the session manifest when
/// the first chunk of a file arrives, so merge can check completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChunkHeader {
    pub file_hash: String,
    pub chunk_index: u32,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    /// SHA-256 hex of the chunk bytes (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Requests assembly of all stored chunks into the final file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_hash: String,
    pub file_name: String,
    pub chunk_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to [`VerifyRequest`].
///
/// On the wire `uploaded_list` travels in the frame body as a JSON array,
/// since a large file can have more identities than a header holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// `false` when the merged file already exists.
    pub should_upload: bool,
    /// Identities (`<fileHash>-<index>`) already stored for this file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_list: Vec<String>,
}

impl VerifyResponse {
    /// Returns `true` if the merged file is already present.
    pub fn exists(&self) -> bool {
        !self.should_upload
    }
}

impl BodyPayload for VerifyResponse {
    fn detach_body(&mut self) -> Result<Vec<u8>, serde_json::Error> {
        detach_list(&mut self.uploaded_list)
    }

    fn attach_body(&mut self, body: &[u8]) -> Result<(), serde_json::Error> {
        attach_list(&mut self.uploaded_list, body)
    }
}

/// Acknowledges a stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChunkAck {
    pub chunk_hash: String,
    /// `false` if the file was already merged and the chunk was discarded.
    pub stored: bool,
}

impl BodyPayload for StoreChunkAck {}

/// Response to [`MergeRequest`].
///
/// `missing_chunks` travels in the frame body, like
/// [`VerifyResponse::uploaded_list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Indices the server is still missing (incomplete upload).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u32>,
    /// Index of the chunk whose write failed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_chunk: Option<u32>,
    /// `true` if the file had already been merged by an earlier request.
    #[serde(default)]
    pub already_merged: bool,
}

impl MergeResponse {
    /// Creates a success response.
    pub fn merged(path: impl Into<String>, already_merged: bool) -> Self {
        Self {
            success: true,
            path: Some(path.into()),
            error: None,
            missing_chunks: Vec::new(),
            failed_chunk: None,
            already_merged,
        }
    }

    /// Creates a failure response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            error: Some(error.into()),
            missing_chunks: Vec::new(),
            failed_chunk: None,
            already_merged: false,
        }
    }
}

impl BodyPayload for MergeResponse {
    fn detach_body(&mut self) -> Result<Vec<u8>, serde_json::Error> {
        detach_list(&mut self.missing_chunks)
    }

    fn attach_body(&mut self, body: &[u8]) -> Result<(), serde_json::Error> {
        attach_list(&mut self.missing_chunks, body)
    }
}

fn detach_list<T: Serialize>(list: &mut Vec<T>) -> Result<Vec<u8>, serde_json::Error> {
    if list.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::to_vec(&std::mem::take(list))
}

fn attach_list<T: for<'de> Deserialize<'de>>(
    list: &mut Vec<T>,
    body: &[u8],
) -> Result<(), serde_json::Error> {
    if !body.is_empty() {
        *list = serde_json::from_slice(body)?;
    }
    Ok(())
}
