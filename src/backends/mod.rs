//! Recognition backends for the windowed batch path.
//!
//! The streaming path talks through `session::SessionClient`; when a
//! deployment substitutes a batch HTTP service, chunks flow through a
//! `RecognitionBackend` instead and the overlap processor reconciles the
//! redundant windows.

mod batch;

pub use batch::HttpBatchBackend;

use async_trait::async_trait;

use crate::audio::AudioChunk;
use crate::error::SessionError;
use crate::session::Transcript;

/// Recognition result for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_index: u64,
    pub chunk_start_sec: f64,
    pub chunk_duration_sec: f64,
    pub transcript: Transcript,
}

/// A backend that accepts windowed chunks and yields per-chunk results.
#[async_trait]
pub trait RecognitionBackend: Send {
    /// Submit one chunk. Implementations may process in the background.
    async fn submit_chunk(&mut self, chunk: AudioChunk) -> Result<(), SessionError>;

    /// Receive the next result. Returns None once the backend is done.
    async fn next_result(&mut self) -> Option<ChunkResult>;
}
