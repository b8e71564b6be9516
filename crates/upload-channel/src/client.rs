//! Upload client.
//!
//! Keeps a small pool of idle connections. Each request checks one out (or
//! dials a new one), so concurrent chunk uploads travel on separate
//! connections and never interleave frames.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::BufWriter;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use chunkload_protocol::constants::{CHUNK_REQUEST_TIMEOUT, REQUEST_TIMEOUT};
use chunkload_protocol::messages::{
    MergeRequest, MergeResponse, StoreChunkAck, StoreChunkHeader, VerifyRequest, VerifyResponse,
};
use chunkload_protocol::{BodyPayload, Message, MessageType, ReplyError};

use crate::error::ChannelError;
use crate::wire::{Frame, read_frame, write_frame};
use crate::{MAX_IDLE_CONNECTIONS, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// Client side of the upload channel.
pub struct UploadClient {
    addr: String,
    idle: Mutex<Vec<TcpStream>>,
    cancel: CancellationToken,
}

impl UploadClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts in-flight and future requests when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn ping(&self) -> Result<(), ChannelError> {
        self.request::<(), ()>(MessageType::Ping, None, &[], REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// `checkExists`: is the file merged, and which chunks are stored.
    pub async fn verify(
        &self,
        file_hash: &str,
        file_name: &str,
    ) -> Result<VerifyResponse, ChannelError> {
        let req = VerifyRequest {
            file_hash: file_hash.to_string(),
            file_name: file_name.to_string(),
        };
        self.request(MessageType::Verify, Some(&req), &[], REQUEST_TIMEOUT)
            .await?
            .ok_or_else(|| ChannelError::Protocol("verify response without payload".into()))
    }

    /// `storeChunk`: uploads one chunk.
    pub async fn store_chunk(
        &self,
        header: &StoreChunkHeader,
        data: &[u8],
    ) -> Result<StoreChunkAck, ChannelError> {
        self.request(MessageType::StoreChunk, Some(header), data, CHUNK_REQUEST_TIMEOUT)
            .await?
            .ok_or_else(|| ChannelError::Protocol("chunk ack without payload".into()))
    }

    /// `requestMerge`: asks the server to assemble the file.
    pub async fn merge(&self, req: &MergeRequest) -> Result<MergeResponse, ChannelError> {
        self.request(MessageType::Merge, Some(req), &[], REQUEST_TIMEOUT)
            .await?
            .ok_or_else(|| ChannelError::Protocol("merge response without payload".into()))
    }

    async fn request<Req: Serialize, Resp: DeserializeOwned + BodyPayload>(
        &self,
        msg_type: MessageType,
        payload: Option<&Req>,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Option<Resp>, ChannelError> {
        let message = Message::request(uuid::Uuid::new_v4().to_string(), msg_type, payload)?;
        let mut stream = self.checkout().await?;

        // On any failure the stream is dropped, never returned to the pool.
        let reply = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ChannelError::Cancelled),
            result = tokio::time::timeout(timeout, exchange(&mut stream, &message, body)) => match result {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ChannelError::Timeout),
            },
        };

        let accepted = message.accept(&reply.message, &reply.body);
        // A reply to some other request means the stream is out of step.
        if !matches!(accepted, Err(ReplyError::IdMismatch { .. })) {
            self.checkin(stream);
        }

        let payload = accepted?;
        trace!(id = %message.id, ?msg_type, body = reply.body.len(), "request complete");
        Ok(payload)
    }

    async fn checkout(&self) -> Result<TcpStream, ChannelError> {
        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        if let Some(stream) = pooled {
            return Ok(stream);
        }

        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ChannelError::Cancelled),
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(&self.addr)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        };
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "upload connection opened");
        Ok(stream)
    }

    fn checkin(&self, stream: TcpStream) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(stream);
        }
    }

    #[cfg(test)]
    fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Sends one request frame and reads the reply frame.
async fn exchange(
    stream: &mut TcpStream,
    message: &Message,
    body: &[u8],
) -> Result<Frame, ChannelError> {
    {
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, &mut *stream);
        write_frame(&mut writer, message, body).await?;
    }
    read_frame(stream)
        .await?
        .ok_or_else(|| ChannelError::Protocol("connection closed before response".into()))
}
