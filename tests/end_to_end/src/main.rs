fn main() {
    println!("Run `cargo test -p end-to-end` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use chunkload_chunk_store::{ChunkStore, MergeEngine, StoreConfig, MAX_REPORTED_MISSING};
    use chunkload_protocol::messages::{MergeRequest, StoreChunkHeader};
    use chunkload_transfer::{checksum_bytes, fingerprint_bytes, fingerprint_file, split};
    use chunkload_upload_channel::{UploadClient, UploadServer};
    use chunkload_uploader::{UploadConfig, UploadCoordinator, UploadEvent, UploadOutcome};
    use tokio_util::sync::CancellationToken;

    const MIB: u64 = 1024 * 1024;

    /// A chunk server on an ephemeral port, stopped on drop.
    struct TestServer {
        root: tempfile::TempDir,
        addr: String,
        cancel: CancellationToken,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    impl TestServer {
        async fn start() -> Self {
            let root = tempfile::tempdir().unwrap();
            let config = StoreConfig::with_root(root.path());
            let store = Arc::new(ChunkStore::open(&config).await.unwrap());
            let engine = Arc::new(MergeEngine::from_config(Arc::clone(&store), &config));
            let cancel = CancellationToken::new();

            let listener = UploadServer::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            let server = Arc::new(UploadServer::new(store, engine, cancel.clone()));
            tokio::spawn(server.serve(listener));

            Self { root, addr, cancel }
        }

        fn output(&self, fingerprint: &str, extension: &str) -> PathBuf {
            self.root.path().join(format!("{fingerprint}{extension}"))
        }

        fn namespace(&self, fingerprint: &str) -> PathBuf {
            self.root.path().join(format!("chunkDir_{fingerprint}"))
        }
    }

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 33) as u8
            })
            .collect()
    }

    fn chunk_header(
        fingerprint: &str,
        file_name: &str,
        content: &[u8],
        chunk_size: u64,
        index: u32,
    ) -> (StoreChunkHeader, Vec<u8>) {
        let start = (u64::from(index) * chunk_size) as usize;
        let end = (start + chunk_size as usize).min(content.len());
        let data = content[start..end].to_vec();
        let header = StoreChunkHeader {
            file_hash: fingerprint.to_string(),
            chunk_index: index,
            file_name: file_name.to_string(),
            file_size: content.len() as u64,
            chunk_size,
            checksum: checksum_bytes(&data),
        };
        (header, data)
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ten_megabytes_reverse_order_concurrent() {
        let server = TestServer::start().await;
        let client = Arc::new(UploadClient::new(&server.addr));

        let content = pseudo_random(10 * MIB as usize, 7);
        let fingerprint = fingerprint_bytes(&content);
        let specs = split(content.len() as u64, MIB).unwrap();
        assert_eq!(specs.len(), 10);

        let content = Arc::new(content);
        let mut uploads = Vec::new();
        for spec in specs.iter().rev() {
            let client = Arc::clone(&client);
            let content = Arc::clone(&content);
            let fingerprint = fingerprint.clone();
            let index = spec.index;
            uploads.push(tokio::spawn(async move {
                let (header, data) = chunk_header(&fingerprint, "video.mp4", &content, MIB, index);
                client.store_chunk(&header, &data).await
            }));
        }
        for upload in uploads {
            assert!(upload.await.unwrap().unwrap().stored);
        }

        let response = client
            .merge(&MergeRequest {
                file_hash: fingerprint.clone(),
                file_name: "video.mp4".into(),
                chunk_size: MIB,
            })
            .await
            .unwrap();
        assert!(response.success, "{:?}", response.error);

        let output = server.output(&fingerprint, ".mp4");
        let merged = fs::read(&output).unwrap();
        assert_eq!(merged.len(), content.len());
        assert_eq!(merged, *content);
        assert_eq!(fingerprint_file(&output, MIB).await.unwrap(), fingerprint);
        assert!(!server.namespace(&fingerprint).exists());
    }

    #[tokio::test]
    async fn coordinator_resumes_partial_upload() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);
        let src = tempfile::tempdir().unwrap();

        let content = pseudo_random(4 * 1000, 11);
        let path = write_file(src.path(), "backup.tar", &content);
        let fingerprint = fingerprint_bytes(&content);

        for index in [0, 1, 3] {
            let (header, data) = chunk_header(&fingerprint, "backup.tar", &content, 1000, index);
            client.store_chunk(&header, &data).await.unwrap();
        }

        let verify = client.verify(&fingerprint, "backup.tar").await.unwrap();
        assert_eq!(verify.uploaded_list.len(), 3);

        let mut coordinator = UploadCoordinator::new(UploadConfig {
            chunk_size: 1000,
            concurrency: 4,
        });
        let mut events = coordinator.take_events().unwrap();
        let outcome = coordinator.upload(&client, &path).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Merged { .. }));

        let mut stored = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::ChunkStored { index, .. } = event {
                stored.push(index);
            }
        }
        assert_eq!(stored, vec![2]);
        assert_eq!(fs::read(server.output(&fingerprint, ".tar")).unwrap(), content);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resume_with_thousands_of_stored_chunks() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);
        let src = tempfile::tempdir().unwrap();

        // 4000 chunks of 16 bytes; the even half is already on the server.
        let content = pseudo_random(64_000, 17);
        let path = write_file(src.path(), "archive.bin", &content);
        let fingerprint = fingerprint_bytes(&content);
        for index in (0..4000).step_by(2) {
            let (header, data) = chunk_header(&fingerprint, "archive.bin", &content, 16, index);
            assert!(client.store_chunk(&header, &data).await.unwrap().stored);
        }

        let verify = client.verify(&fingerprint, "archive.bin").await.unwrap();
        assert!(verify.should_upload);
        assert_eq!(verify.uploaded_list.len(), 2000);

        let mut coordinator = UploadCoordinator::new(UploadConfig {
            chunk_size: 16,
            concurrency: 8,
        });
        let mut events = coordinator.take_events().unwrap();
        let collector = tokio::spawn(async move {
            let mut stored = Vec::new();
            while let Some(event) = events.recv().await {
                if let UploadEvent::ChunkStored { index, .. } = event {
                    stored.push(index);
                }
            }
            stored
        });

        let outcome = coordinator.upload(&client, &path).await.unwrap();
        drop(coordinator);
        assert!(matches!(outcome, UploadOutcome::Merged { already_merged: false, .. }));

        let mut stored = collector.await.unwrap();
        stored.sort_unstable();
        let odd: Vec<u32> = (1..4000).step_by(2).collect();
        assert_eq!(stored, odd);

        assert_eq!(fs::read(server.output(&fingerprint, ".bin")).unwrap(), content);
        assert!(!server.namespace(&fingerprint).exists());
    }

    #[tokio::test]
    async fn incomplete_merge_of_large_session_reports_capped_gaps() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);

        // 20000 one-byte chunks with only the first and last stored.
        let content = pseudo_random(20_000, 19);
        let fingerprint = fingerprint_bytes(&content);
        for index in [0, 19_999] {
            let (header, data) = chunk_header(&fingerprint, "sparse.img", &content, 1, index);
            client.store_chunk(&header, &data).await.unwrap();
        }

        let response = client
            .merge(&MergeRequest {
                file_hash: fingerprint.clone(),
                file_name: "sparse.img".into(),
                chunk_size: 1,
            })
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.missing_chunks.len(), MAX_REPORTED_MISSING);
        assert_eq!(response.missing_chunks[0], 1);
        assert!(server.namespace(&fingerprint).exists());
    }

    #[tokio::test]
    async fn second_upload_short_circuits() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);
        let src = tempfile::tempdir().unwrap();

        let content = pseudo_random(300_000, 3);
        let path = write_file(src.path(), "photo.raw", &content);
        let config = UploadConfig {
            chunk_size: 64 * 1024,
            concurrency: 3,
        };

        let first = UploadCoordinator::new(config.clone())
            .upload(&client, &path)
            .await
            .unwrap();
        assert!(matches!(first, UploadOutcome::Merged { already_merged: false, .. }));

        let mut coordinator = UploadCoordinator::new(config);
        let mut events = coordinator.take_events().unwrap();
        let second = coordinator.upload(&client, &path).await.unwrap();
        assert_eq!(
            second,
            UploadOutcome::AlreadyUploaded {
                fingerprint: fingerprint_bytes(&content)
            }
        );
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, UploadEvent::ChunkStored { .. }));
        }
    }

    #[tokio::test]
    async fn merge_twice_is_idempotent() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);

        let content = pseudo_random(5000, 5);
        let fingerprint = fingerprint_bytes(&content);
        for index in 0..5 {
            let (header, data) = chunk_header(&fingerprint, "log.txt", &content, 1000, index);
            client.store_chunk(&header, &data).await.unwrap();
        }

        let request = MergeRequest {
            file_hash: fingerprint.clone(),
            file_name: "log.txt".into(),
            chunk_size: 1000,
        };
        let first = client.merge(&request).await.unwrap();
        let second = client.merge(&request).await.unwrap();
        assert!(first.success && !first.already_merged);
        assert!(second.success && second.already_merged);
        assert_eq!(first.path, second.path);
        assert_eq!(fs::read(server.output(&fingerprint, ".txt")).unwrap(), content);
    }

    #[tokio::test]
    async fn incomplete_merge_rejected() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);

        let content = pseudo_random(4000, 9);
        let fingerprint = fingerprint_bytes(&content);
        for index in [0, 1, 3] {
            let (header, data) = chunk_header(&fingerprint, "db.sqlite", &content, 1000, index);
            client.store_chunk(&header, &data).await.unwrap();
        }

        let response = client
            .merge(&MergeRequest {
                file_hash: fingerprint.clone(),
                file_name: "db.sqlite".into(),
                chunk_size: 1000,
            })
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.missing_chunks, vec![2]);
        assert!(!server.output(&fingerprint, ".sqlite").exists());
        assert!(server.namespace(&fingerprint).exists());
    }

    #[tokio::test]
    async fn redundant_chunk_uploads_are_harmless() {
        let server = TestServer::start().await;
        let client = UploadClient::new(&server.addr);

        let content = pseudo_random(2500, 13);
        let fingerprint = fingerprint_bytes(&content);
        for index in [2, 0, 1, 0, 2] {
            let (header, data) = chunk_header(&fingerprint, "blob", &content, 1000, index);
            client.store_chunk(&header, &data).await.unwrap();
        }

        let verify = client.verify(&fingerprint, "blob").await.unwrap();
        assert_eq!(verify.uploaded_list.len(), 3);

        let response = client
            .merge(&MergeRequest {
                file_hash: fingerprint.clone(),
                file_name: "blob".into(),
                chunk_size: 1000,
            })
            .await
            .unwrap();
        assert!(response.success);
        // No extension: the output is named by the fingerprint alone.
        assert_eq!(fs::read(server.output(&fingerprint, "")).unwrap(), content);
    }

    // -----------------------------------------------------------------------
    // Wire fixtures
    // -----------------------------------------------------------------------

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON.
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(fixture, reserialized, "wire mismatch for {name}");
    }

    #[test]
    fn wire_verify_request() {
        roundtrip_test::<chunkload_protocol::VerifyRequest>("verify_request.json");
    }

    #[test]
    fn wire_verify_response() {
        roundtrip_test::<chunkload_protocol::VerifyResponse>("verify_response.json");
    }

    #[test]
    fn wire_store_chunk_header() {
        roundtrip_test::<chunkload_protocol::StoreChunkHeader>("store_chunk_header.json");
    }

    #[test]
    fn wire_store_chunk_ack() {
        roundtrip_test::<chunkload_protocol::StoreChunkAck>("store_chunk_ack.json");
    }

    #[test]
    fn wire_merge_request() {
        roundtrip_test::<chunkload_protocol::MergeRequest>("merge_request.json");
    }

    #[test]
    fn wire_merge_response_incomplete() {
        roundtrip_test::<chunkload_protocol::MergeResponse>("merge_response_incomplete.json");
    }

    #[test]
    fn wire_error_envelope() {
        roundtrip_test::<chunkload_protocol::Message>("error_envelope.json");
    }
}
