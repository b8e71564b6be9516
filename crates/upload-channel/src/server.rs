//! Chunk server.
//!
//! Accepts any number of connections, one task each. Requests on a
//! connection are handled in order; concurrent uploads use separate
//! connections.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkload_chunk_store::{ChunkStore, MergeEngine, StoreError};
use chunkload_protocol::constants::{ERR_INTERNAL, ERR_INVALID_ARGUMENT};
use chunkload_protocol::messages::{MergeRequest, MergeResponse, StoreChunkHeader, VerifyRequest};
use chunkload_protocol::{Message, MessageType};

use crate::TCP_BUFFER_SIZE;
use crate::error::ChannelError;
use crate::wire::{Frame, read_frame, write_frame};

/// Serves `verify`, `store_chunk` and `merge` over TCP.
pub struct UploadServer {
    store: Arc<ChunkStore>,
    engine: Arc<MergeEngine>,
    cancel: CancellationToken,
}

impl UploadServer {
    pub fn new(store: Arc<ChunkStore>, engine: Arc<MergeEngine>, cancel: CancellationToken) -> Self {
        Self {
            store,
            engine,
            cancel,
        }
    }

    /// Binds the listener.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<TcpListener, ChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "upload server listening");
        Ok(listener)
    }

    /// Accepts connections until cancelled, then waits for open connections
    /// to finish their current request.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ChannelError> {
        let mut connections = JoinSet::new();

        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            // Reap finished connection tasks.
            while connections.try_join_next().is_some() {}

            debug!(%addr, "connection accepted");
            let server = Arc::clone(&self);
            connections.spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    warn!(%addr, error = %e, "connection closed with error");
                }
            });
        }

        drop(listener);
        info!(open = connections.len(), "upload server shutting down");
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), ChannelError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                result = read_frame(&mut reader) => match result? {
                    Some(frame) => frame,
                    None => {
                        debug!(%addr, "connection closed by peer");
                        return Ok(());
                    }
                },
            };

            let reply = self.dispatch(frame).await;
            match write_frame(&mut writer, &reply.message, &reply.body).await {
                Ok(()) => {}
                // Limits are checked before any byte is written, so the
                // stream is still in sync.
                Err(ChannelError::Protocol(reason)) => {
                    warn!(%addr, id = %reply.message.id, %reason, "reply exceeds frame limits");
                    let fallback = reply.message.reply_error(ERR_INTERNAL, reason);
                    write_frame(&mut writer, &fallback, &[]).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Handles one request and builds its reply frame.
    pub async fn dispatch(&self, frame: Frame) -> Frame {
        let Frame { message, body } = frame;

        let result = match message.msg_type {
            MessageType::Ping => message.reply(MessageType::Pong, ()),
            MessageType::Verify => {
                let req: VerifyRequest = match required_payload(&message) {
                    Ok(req) => req,
                    Err(reply) => return reply,
                };
                match self.store.verify(&req.file_hash, &req.file_name).await {
                    Ok(resp) => message.reply(MessageType::VerifyResponse, resp),
                    Err(e) => return store_error(&message, &e),
                }
            }
            MessageType::StoreChunk => {
                let header: StoreChunkHeader = match required_payload(&message) {
                    Ok(header) => header,
                    Err(reply) => return reply,
                };
                match self.store.put_chunk(&header, &body).await {
                    Ok(ack) => message.reply(MessageType::ChunkStored, ack),
                    Err(e) => return store_error(&message, &e),
                }
            }
            MessageType::Merge => {
                let req: MergeRequest = match required_payload(&message) {
                    Ok(req) => req,
                    Err(reply) => return reply,
                };
                let resp = self.merge(&req).await;
                message.reply(MessageType::MergeResponse, resp)
            }
            other => {
                return error_frame(message.reply_error(
                    ERR_INVALID_ARGUMENT,
                    format!("unexpected message type: {other:?}"),
                ));
            }
        };

        match result {
            Ok((message, body)) => Frame { message, body },
            Err(e) => error_frame(message.reply_error(ERR_INTERNAL, e.to_string())),
        }
    }

    async fn merge(&self, req: &MergeRequest) -> MergeResponse {
        match self
            .engine
            .merge_file(&req.file_hash, &req.file_name, req.chunk_size)
            .await
        {
            Ok(outcome) => MergeResponse::merged(
                outcome.path.display().to_string(),
                outcome.already_merged,
            ),
            Err(e) => {
                let mut resp = MergeResponse::failed(e.to_string());
                match e {
                    StoreError::IncompleteUpload { missing, .. } => resp.missing_chunks = missing,
                    StoreError::MergeFailed { index, .. } => resp.failed_chunk = index,
                    _ => {}
                }
                resp
            }
        }
    }
}

fn error_frame(message: Message) -> Frame {
    Frame {
        message,
        body: Vec::new(),
    }
}

fn required_payload<T: DeserializeOwned>(message: &Message) -> Result<T, Frame> {
    let reply = match message.payload_as() {
        Ok(Some(payload)) => return Ok(payload),
        Ok(None) => message.reply_error(ERR_INVALID_ARGUMENT, "missing payload"),
        Err(e) => message.reply_error(ERR_INVALID_ARGUMENT, format!("invalid payload: {e}")),
    };
    Err(error_frame(reply))
}

fn store_error(message: &Message, err: &StoreError) -> Frame {
    debug!(id = %message.id, code = err.code(), error = %err, "request failed");
    error_frame(message.reply_error(err.code(), err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkload_chunk_store::StoreConfig;
    use chunkload_protocol::BodyPayload;
    use chunkload_protocol::constants::{ERR_INTEGRITY, MAX_HEADER_SIZE};
    use chunkload_protocol::messages::{StoreChunkAck, VerifyResponse};
    use std::time::Duration;

    const FP: &str = "00112233445566778899aabbccddeeff";

    async fn server(dir: &tempfile::TempDir) -> UploadServer {
        let store = Arc::new(
            ChunkStore::open(&StoreConfig::with_root(dir.path()))
                .await
                .unwrap(),
        );
        let engine = Arc::new(MergeEngine::new(Arc::clone(&store), false));
        UploadServer::new(store, engine, CancellationToken::new())
    }

    fn frame<T: serde::Serialize>(msg_type: MessageType, payload: &T, body: &[u8]) -> Frame {
        Frame {
            message: Message::request("req", msg_type, Some(payload)).unwrap(),
            body: body.to_vec(),
        }
    }

    /// Sends `request` and decodes the reply the way a client would.
    async fn call<T: DeserializeOwned + BodyPayload>(server: &UploadServer, request: Frame) -> T {
        let message = request.message.clone();
        let reply = server.dispatch(request).await;
        message
            .accept(&reply.message, &reply.body)
            .unwrap()
            .expect("reply without payload")
    }

    fn chunk(index: u32, checksum: &str) -> StoreChunkHeader {
        StoreChunkHeader {
            file_hash: FP.into(),
            chunk_index: index,
            file_name: "notes.txt".into(),
            file_size: 8,
            chunk_size: 4,
            checksum: checksum.into(),
        }
    }

    #[tokio::test]
    async fn ping_pong() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;
        let reply = server
            .dispatch(Frame {
                message: Message::request::<()>("p1", MessageType::Ping, None).unwrap(),
                body: Vec::new(),
            })
            .await;
        assert_eq!(reply.message.msg_type, MessageType::Pong);
        assert_eq!(reply.message.id, "p1");
        assert!(reply.body.is_empty());
    }

    #[tokio::test]
    async fn store_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;

        let ack: StoreChunkAck = call(
            &server,
            frame(MessageType::StoreChunk, &chunk(1, ""), b"efgh"),
        )
        .await;
        assert!(ack.stored);

        let req = VerifyRequest {
            file_hash: FP.into(),
            file_name: "notes.txt".into(),
        };
        let resp: VerifyResponse = call(&server, frame(MessageType::Verify, &req, &[])).await;
        assert!(resp.should_upload);
        assert_eq!(resp.uploaded_list, vec![format!("{FP}-1")]);
    }

    #[tokio::test]
    async fn verify_list_travels_in_body() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;

        // 3000 identities of ~40 bytes each would not fit a 64 KiB header.
        let total = 6000u64;
        for index in (0..total as u32).step_by(2) {
            let header = StoreChunkHeader {
                file_hash: FP.into(),
                chunk_index: index,
                file_name: "big.bin".into(),
                file_size: total,
                chunk_size: 1,
                checksum: String::new(),
            };
            server
                .store
                .put_chunk(&header, &[index as u8])
                .await
                .unwrap();
        }

        let req = VerifyRequest {
            file_hash: FP.into(),
            file_name: "big.bin".into(),
        };
        let request = frame(MessageType::Verify, &req, &[]);
        let message = request.message.clone();
        let reply = server.dispatch(request).await;

        let header = serde_json::to_vec(&reply.message).unwrap();
        assert!(header.len() < 1024);
        assert!(reply.body.len() > MAX_HEADER_SIZE);

        let resp: VerifyResponse = message.accept(&reply.message, &reply.body).unwrap().unwrap();
        assert_eq!(resp.uploaded_list.len(), 3000);
    }

    #[tokio::test]
    async fn store_errors_carry_codes() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;

        let reply = server
            .dispatch(frame(MessageType::StoreChunk, &chunk(0, "deadbeef"), b"abcd"))
            .await;
        assert_eq!(reply.message.msg_type, MessageType::Error);
        assert_eq!(reply.message.error.unwrap().code, ERR_INTEGRITY);

        let mut bad = chunk(0, "");
        bad.file_hash = "../x".into();
        let reply = server.dispatch(frame(MessageType::StoreChunk, &bad, b"abcd")).await;
        assert_eq!(reply.message.error.unwrap().code, ERR_INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn missing_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;
        let reply = server
            .dispatch(Frame {
                message: Message::request::<()>("m", MessageType::Merge, None).unwrap(),
                body: Vec::new(),
            })
            .await;
        assert_eq!(reply.message.error.unwrap().code, ERR_INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn response_types_rejected_as_requests() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;
        let reply = server
            .dispatch(Frame {
                message: Message::request::<()>("x", MessageType::Pong, None).unwrap(),
                body: Vec::new(),
            })
            .await;
        assert_eq!(reply.message.msg_type, MessageType::Error);
    }

    #[tokio::test]
    async fn incomplete_merge_lists_missing() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;
        server
            .dispatch(frame(MessageType::StoreChunk, &chunk(1, ""), b"efgh"))
            .await;

        let req = MergeRequest {
            file_hash: FP.into(),
            file_name: "notes.txt".into(),
            chunk_size: 4,
        };
        let resp: MergeResponse = call(&server, frame(MessageType::Merge, &req, &[])).await;
        assert!(!resp.success);
        assert_eq!(resp.missing_chunks, vec![0]);
        assert!(resp.path.is_none());
    }

    #[tokio::test]
    async fn merge_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir).await;
        let req = MergeRequest {
            file_hash: FP.into(),
            file_name: "notes.txt".into(),
            chunk_size: 4,
        };
        let resp: MergeResponse = call(&server, frame(MessageType::Merge, &req, &[])).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("no upload session"));
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server(&dir).await);
        let cancel = server.cancel.clone();

        let listener = UploadServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(Arc::clone(&server).serve(listener));

        // An idle connection must not block shutdown.
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
