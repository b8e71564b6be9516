//! Client-side upload flow.
//!
//! # Pipeline
//!
//! 1. **Hash** - fingerprint the file chunk by chunk on a background task
//! 2. **Verify** - ask the server whether the file exists and which chunks
//!    it already holds
//! 3. **Upload** - send only the missing chunks, several at a time
//! 4. **Merge** - ask the server to assemble the file
//!
//! The coordinator talks to the server through [`UploadTransport`], so the
//! flow is independent of the wire and testable in-process.

pub mod coordinator;
pub mod error;
pub mod transport;
pub mod types;

pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use transport::UploadTransport;
pub use types::{UploadConfig, UploadEvent, UploadOutcome, UploadState};
