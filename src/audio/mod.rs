//! Audio acquisition and normalization.
//!
//! From the tab's capture graph this module produces either a lazy
//! sequence of fixed-size PCM frames for the streaming backend, or a
//! sequence of container-wrapped windows with fixed overlap for the batch
//! backend. Exactly one mode is active per session.

mod chunker;
mod framer;
mod resampler;

pub use chunker::{repair_with_header, wav_header, AudioChunker, WAV_HEADER_LEN};
pub use framer::{AudioPipeline, PcmFramer, PipelineStats};
pub use resampler::LinearResampler;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The recognition service expects 16 kHz, mono, S16_LE PCM.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Frame duration shipped to the streaming backend.
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per frame: 20 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 320;

/// One fixed-duration block of PCM audio.
///
/// Produced by the pipeline in strictly increasing index order and
/// consumed exactly once by the session client.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonic frame index within the session.
    pub index: u64,
    /// 16 kHz mono samples.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Wire form: little-endian bytes, two per sample.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&sample| sample.to_le_bytes())
            .collect()
    }
}

/// One windowed chunk for the batch backend.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Monotonic chunk index within the session.
    pub index: u64,
    /// Window start relative to session start, seconds.
    pub start_offset_sec: f64,
    /// Window end relative to session start, seconds.
    pub end_offset_sec: f64,
    /// Container MIME type; continuation chunks keep the type of the
    /// header they will be repaired with.
    pub mime_type: String,
    /// Container bytes. Chunk 0 carries a full header; later chunks are
    /// continuation data until repaired.
    pub bytes: Vec<u8>,
}

impl AudioChunk {
    pub fn duration_sec(&self) -> f64 {
        self.end_offset_sec - self.start_offset_sec
    }
}

/// Serializable transport form for a chunk crossing an execution-context
/// boundary. Structured cloning of opaque binary objects is not assumed;
/// the payload travels as base64 next to its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub index: u64,
    pub start_offset_sec: f64,
    pub end_offset_sec: f64,
    pub mime_type: String,
    pub byte_length: usize,
    pub data: String,
}

impl ChunkEnvelope {
    pub fn from_chunk(chunk: &AudioChunk) -> Self {
        Self {
            index: chunk.index,
            start_offset_sec: chunk.start_offset_sec,
            end_offset_sec: chunk.end_offset_sec,
            mime_type: chunk.mime_type.clone(),
            byte_length: chunk.bytes.len(),
            data: BASE64.encode(&chunk.bytes),
        }
    }

    pub fn into_chunk(self) -> Result<AudioChunk, PipelineError> {
        let bytes = BASE64
            .decode(&self.data)
            .map_err(|e| PipelineError::InvalidInput(format!("bad chunk payload: {}", e)))?;
        if bytes.len() != self.byte_length {
            return Err(PipelineError::InvalidInput(format!(
                "chunk length mismatch: declared {}, decoded {}",
                self.byte_length,
                bytes.len()
            )));
        }
        Ok(AudioChunk {
            index: self.index,
            start_offset_sec: self.start_offset_sec,
            end_offset_sec: self.end_offset_sec,
            mime_type: self.mime_type,
            bytes,
        })
    }
}
