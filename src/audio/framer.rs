//! PCM framing for the streaming backend.
//!
//! `PcmFramer` lives in the capture callback: it downmixes, resamples,
//! converts to 16-bit and posts whole frames to a bounded channel without
//! ever blocking the capture thread. When the consumer falls behind,
//! whole frames are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;

use super::resampler::LinearResampler;
use super::{AudioFrame, FRAME_SAMPLES, TARGET_SAMPLE_RATE};
use crate::error::AudioError;
use crate::host::AudioSource;

/// Shared counters for the capture path.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_emitted: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub samples_in: AtomicU64,
    pub samples_out: AtomicU64,
}

impl PipelineStats {
    /// Seconds of 16 kHz audio emitted so far.
    pub fn emitted_sec(&self) -> f64 {
        self.samples_out.load(Ordering::Relaxed) as f64 / TARGET_SAMPLE_RATE as f64
    }

    pub fn dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Converts interleaved capture blocks into 20 ms PCM frames.
pub struct PcmFramer {
    resampler: LinearResampler,
    channels: usize,
    mono: Vec<f32>,
    accum: Vec<i16>,
    next_index: u64,
    tx: mpsc::Sender<AudioFrame>,
    stats: Arc<PipelineStats>,
}

impl PcmFramer {
    /// Create a framer and the receiving end of its frame queue.
    pub fn new(
        input_rate: u32,
        channels: u16,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<AudioFrame>, Arc<PipelineStats>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let stats = Arc::new(PipelineStats::default());
        let framer = Self {
            resampler: LinearResampler::new(input_rate, TARGET_SAMPLE_RATE),
            channels: channels.max(1) as usize,
            mono: Vec::new(),
            accum: Vec::with_capacity(FRAME_SAMPLES),
            next_index: 0,
            tx,
            stats: Arc::clone(&stats),
        };
        (framer, rx, stats)
    }

    /// Process one interleaved block from the capture thread.
    ///
    /// Downmix policy is "select channel 0"; averaging channels is a known
    /// regression with tab capture sources.
    pub fn push_block(&mut self, interleaved: &[f32]) {
        self.stats
            .samples_in
            .fetch_add((interleaved.len() / self.channels) as u64, Ordering::Relaxed);

        self.mono.clear();
        self.mono
            .extend(interleaved.iter().step_by(self.channels).copied());

        let resampled = self.resampler.resample(&self.mono);
        for &sample in &resampled {
            self.accum.push(convert_sample(sample));
            if self.accum.len() == FRAME_SAMPLES {
                self.emit_frame();
            }
        }
    }

    fn emit_frame(&mut self) {
        let frame = AudioFrame {
            index: self.next_index,
            samples: std::mem::replace(&mut self.accum, Vec::with_capacity(FRAME_SAMPLES)),
        };
        self.next_index += 1;

        match self.tx.try_send(frame) {
            Ok(()) => {
                self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .samples_out
                    .fetch_add(FRAME_SAMPLES as u64, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 50 == 1 {
                    warn!("frame queue saturated, {} frames dropped so far", dropped);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer gone; the session is shutting down.
            }
        }
    }
}

fn convert_sample(x: f32) -> i16 {
    let clamped = x.clamp(-1.0, 1.0);
    (clamped as f64 * 32767.0).floor() as i16
}

/// Owns the capture source and its framer for the lifetime of a session.
pub struct AudioPipeline {
    source: Box<dyn AudioSource>,
    stats: Arc<PipelineStats>,
    running: bool,
}

impl AudioPipeline {
    /// Attach to a capture source and begin producing frames.
    ///
    /// The returned receiver yields frames in strictly increasing index
    /// order until `stop` is called.
    pub fn start(
        mut source: Box<dyn AudioSource>,
        queue_depth: usize,
    ) -> Result<(Self, mpsc::Receiver<AudioFrame>), AudioError> {
        let (mut framer, rx, stats) =
            PcmFramer::new(source.sample_rate(), source.channels(), queue_depth);

        debug!(
            "starting audio pipeline ({} Hz, {} ch -> {} Hz mono)",
            source.sample_rate(),
            source.channels(),
            TARGET_SAMPLE_RATE
        );

        source.start(Box::new(move |block| framer.push_block(block)))?;

        Ok((
            Self {
                source,
                stats,
                running: true,
            },
            rx,
        ))
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Stop capture. Idempotent.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.source.stop()
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(convert_sample(0.0), 0);
        assert_eq!(convert_sample(1.0), 32767);
        assert_eq!(convert_sample(2.0), 32767);
        assert_eq!(convert_sample(-1.0), -32767);
        assert_eq!(convert_sample(-2.0), -32767);
        assert_eq!(convert_sample(0.5), 16383);
    }

    #[test]
    fn test_frame_rate_property() {
        // 2 seconds of continuous 48 kHz stereo input must produce
        // 2 * 16000 samples of output within one frame.
        let (mut framer, mut rx, stats) = PcmFramer::new(48000, 2, 1024);

        let block = vec![0.1f32; 960 * 2];
        for _ in 0..100 {
            framer.push_block(&block);
        }

        let mut total = 0usize;
        let mut last_index = None;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.sample_count(), FRAME_SAMPLES);
            if let Some(prev) = last_index {
                assert_eq!(frame.index, prev + 1);
            }
            last_index = Some(frame.index);
            total += frame.sample_count();
        }

        assert!(
            (total as i64 - 32000).unsigned_abs() <= FRAME_SAMPLES as u64,
            "expected ~32000 samples, got {}",
            total
        );
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_channel_zero_selected() {
        let (mut framer, mut rx, _) = PcmFramer::new(16000, 2, 64);

        // Channel 0 carries a constant, channel 1 carries garbage.
        let mut block = Vec::new();
        for _ in 0..FRAME_SAMPLES + 16 {
            block.push(0.5f32);
            block.push(-0.9f32);
        }
        framer.push_block(&block);

        let frame = rx.try_recv().expect("one frame");
        for &sample in &frame.samples {
            assert_eq!(sample, 16383, "channel 1 leaked into the downmix");
        }
    }

    #[test]
    fn test_backpressure_drops_whole_frames() {
        let (mut framer, mut rx, stats) = PcmFramer::new(16000, 1, 2);

        // 10 frames into a queue of depth 2.
        framer.push_block(&vec![0.0f32; FRAME_SAMPLES * 10 + 8]);

        assert_eq!(stats.dropped(), 8);
        let mut received = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.sample_count(), FRAME_SAMPLES);
            received.push(frame.index);
        }
        // Whole frames only, in order.
        assert_eq!(received, vec![0, 1]);
    }
}
