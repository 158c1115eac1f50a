//! Windowed chunk production for the batch backend.
//!
//! Windows are 3 s long with a 2 s step, so adjacent chunks share 1 s of
//! audio for the overlap processor to reconcile. The first chunk is a
//! complete WAV file; later chunks are continuation sample data and get a
//! valid header spliced in by `repair_with_header` before upload.

use log::debug;

use super::AudioChunk;

/// Bytes in a canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Default window length in seconds.
pub const WINDOW_SEC: f64 = 3.0;

/// Default window step in seconds; window minus step is the overlap.
pub const STEP_SEC: f64 = 2.0;

const WAV_MIME: &str = "audio/wav";

/// Build a PCM WAV header for `data_len` bytes of sample data.
pub fn wav_header(data_len: usize, sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut header = Vec::with_capacity(WAV_HEADER_LEN);
    let data_len = data_len as u32;
    let total_len = 36 + data_len;

    // RIFF header
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&total_len.to_le_bytes());
    header.extend_from_slice(b"WAVE");

    // fmt chunk
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&(sample_rate * 2 * channels as u32).to_le_bytes());
    header.extend_from_slice(&(2 * channels).to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());

    // data chunk
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());

    header
}

/// Prepend a header taken from chunk 0 onto continuation data, patching
/// the RIFF and data lengths for the new body.
pub fn repair_with_header(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut repaired = Vec::with_capacity(WAV_HEADER_LEN + body.len());
    repaired.extend_from_slice(&header[..WAV_HEADER_LEN.min(header.len())]);

    if repaired.len() == WAV_HEADER_LEN {
        let data_len = body.len() as u32;
        repaired[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
        repaired[40..44].copy_from_slice(&data_len.to_le_bytes());
    }

    repaired.extend_from_slice(body);
    repaired
}

/// Slices a continuous 16 kHz mono stream into overlapping windows.
pub struct AudioChunker {
    sample_rate: u32,
    window_samples: usize,
    step_samples: usize,
    buffer: Vec<i16>,
    next_index: u64,
    /// Header bytes captured from chunk 0, kept for repair.
    header: Option<Vec<u8>>,
}

impl AudioChunker {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_window(sample_rate, WINDOW_SEC, STEP_SEC)
    }

    pub fn with_window(sample_rate: u32, window_sec: f64, step_sec: f64) -> Self {
        Self {
            sample_rate,
            window_samples: (sample_rate as f64 * window_sec) as usize,
            step_samples: (sample_rate as f64 * step_sec) as usize,
            buffer: Vec::new(),
            next_index: 0,
            header: None,
        }
    }

    /// The header of chunk 0, once produced.
    pub fn header(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    pub fn overlap_sec(&self) -> f64 {
        (self.window_samples - self.step_samples) as f64 / self.sample_rate as f64
    }

    /// Feed samples; returns every chunk completed by this call.
    pub fn push_samples(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.buffer.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.window_samples {
            chunks.push(self.emit(self.window_samples));
            // Keep the overlap tail for the next window.
            self.buffer.drain(..self.step_samples);
        }
        chunks
    }

    /// Emit whatever is buffered as a final short chunk.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let len = self.buffer.len();
        let chunk = self.emit(len);
        self.buffer.clear();
        Some(chunk)
    }

    fn emit(&mut self, sample_len: usize) -> AudioChunk {
        let index = self.next_index;
        self.next_index += 1;

        let start_offset_sec =
            (index * self.step_samples as u64) as f64 / self.sample_rate as f64;
        let end_offset_sec = start_offset_sec + sample_len as f64 / self.sample_rate as f64;

        let data: Vec<u8> = self.buffer[..sample_len]
            .iter()
            .flat_map(|&sample| sample.to_le_bytes())
            .collect();

        let bytes = if index == 0 {
            let mut wav = wav_header(data.len(), self.sample_rate, 1);
            self.header = Some(wav.clone());
            wav.extend_from_slice(&data);
            wav
        } else {
            // Continuation data; a receiver splices in the stored header.
            data
        };

        debug!(
            "chunk {} [{:.2}s .. {:.2}s], {} bytes",
            index,
            start_offset_sec,
            end_offset_sec,
            bytes.len()
        );

        AudioChunk {
            index,
            start_offset_sec,
            end_offset_sec,
            mime_type: WAV_MIME.to_string(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    #[test]
    fn test_window_and_overlap() {
        let mut chunker = AudioChunker::new(RATE);
        assert!((chunker.overlap_sec() - 1.0).abs() < 1e-9);

        // 7 seconds of audio: windows at [0,3), [2,5), [4,7).
        let chunks = chunker.push_samples(&vec![0i16; RATE as usize * 7]);
        assert_eq!(chunks.len(), 3);

        assert_eq!(chunks[0].start_offset_sec, 0.0);
        assert_eq!(chunks[0].end_offset_sec, 3.0);
        assert_eq!(chunks[1].start_offset_sec, 2.0);
        assert_eq!(chunks[1].end_offset_sec, 5.0);
        assert_eq!(chunks[2].start_offset_sec, 4.0);
        assert_eq!(chunks[2].end_offset_sec, 7.0);
    }

    #[test]
    fn test_chunk_zero_carries_header() {
        let mut chunker = AudioChunker::new(RATE);
        let chunks = chunker.push_samples(&vec![0i16; RATE as usize * 5]);

        let first = &chunks[0];
        assert_eq!(&first.bytes[..4], b"RIFF");
        assert_eq!(&first.bytes[8..12], b"WAVE");
        assert_eq!(first.bytes.len(), WAV_HEADER_LEN + RATE as usize * 3 * 2);

        // Continuation chunks are raw data.
        let second = &chunks[1];
        assert_ne!(&second.bytes[..4], b"RIFF");
        assert_eq!(second.bytes.len(), RATE as usize * 3 * 2);
    }

    #[test]
    fn test_repair_patches_lengths() {
        let mut chunker = AudioChunker::new(RATE);
        let chunks = chunker.push_samples(&vec![100i16; RATE as usize * 5]);
        let header = chunker.header().expect("header captured").to_vec();

        let repaired = repair_with_header(&header, &chunks[1].bytes);
        assert_eq!(&repaired[..4], b"RIFF");
        let body_len = chunks[1].bytes.len() as u32;
        assert_eq!(
            u32::from_le_bytes(repaired[4..8].try_into().unwrap()),
            36 + body_len
        );
        assert_eq!(
            u32::from_le_bytes(repaired[40..44].try_into().unwrap()),
            body_len
        );
        assert_eq!(repaired.len(), WAV_HEADER_LEN + chunks[1].bytes.len());
    }

    #[test]
    fn test_flush_emits_partial_window() {
        let mut chunker = AudioChunker::new(RATE);
        let chunks = chunker.push_samples(&vec![0i16; RATE as usize]);
        assert!(chunks.is_empty());

        let tail = chunker.flush().expect("partial chunk");
        assert_eq!(tail.index, 0);
        assert_eq!(tail.start_offset_sec, 0.0);
        assert!((tail.end_offset_sec - 1.0).abs() < 1e-9);
        assert_eq!(&tail.bytes[..4], b"RIFF");
    }
}
