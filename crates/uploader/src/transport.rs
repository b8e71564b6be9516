//! Server operations the coordinator depends on.

use std::future::Future;
use std::pin::Pin;

use chunkload_protocol::messages::{
    MergeRequest, MergeResponse, StoreChunkAck, StoreChunkHeader, VerifyResponse,
};
use chunkload_upload_channel::{ChannelError, UploadClient};

use crate::error::UploadError;

/// Abstract connection to a chunk server.
///
/// [`UploadClient`] implements this over TCP; tests implement it on top of
/// an in-process chunk store.
pub trait UploadTransport: Send + Sync {
    /// Whether the file is merged, and which chunk identities are stored.
    fn check_exists<'a>(
        &'a self,
        fingerprint: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<VerifyResponse, UploadError>> + Send + 'a>>;

    /// Uploads one chunk.
    fn store_chunk<'a>(
        &'a self,
        header: &'a StoreChunkHeader,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<StoreChunkAck, UploadError>> + Send + 'a>>;

    /// Asks the server to assemble the file.
    fn request_merge<'a>(
        &'a self,
        request: &'a MergeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<MergeResponse, UploadError>> + Send + 'a>>;
}

impl From<ChannelError> for UploadError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Cancelled => UploadError::Cancelled,
            other => UploadError::Transport(other.to_string()),
        }
    }
}

impl UploadTransport for UploadClient {
    fn check_exists<'a>(
        &'a self,
        fingerprint: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<VerifyResponse, UploadError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.verify(fingerprint, file_name).await?) })
    }

    fn store_chunk<'a>(
        &'a self,
        header: &'a StoreChunkHeader,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<StoreChunkAck, UploadError>> + Send + 'a>> {
        Box::pin(async move { Ok(UploadClient::store_chunk(self, header, data).await?) })
    }

    fn request_merge<'a>(
        &'a self,
        request: &'a MergeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<MergeResponse, UploadError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.merge(request).await?) })
    }
}
