//! Video-timeline alignment.
//!
//! Transcript word times are relative to the session's audio start; the
//! renderer needs absolute video-player times. The streaming path anchors
//! once at connect and stays drift-free until a seek; the batch path
//! re-derives the offset from the player clock on every chunk, which
//! absorbs pauses and seeks between chunks.

use std::collections::VecDeque;

use log::debug;

use crate::session::{now_ms, Transcript};

/// Window used when a transcript carries no word-level times.
const FALLBACK_WINDOW_SEC: f64 = 3.0;

/// A caption-ready piece of text with absolute video times.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    pub language: Option<String>,
    pub confidence: Option<f64>,
    /// Arrival wall-clock time, epoch milliseconds. Lets the renderer
    /// extend stale arrivals instead of discarding them.
    pub arrival_ms: u64,
}

impl Segment {
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.into(),
            language: None,
            confidence: None,
            arrival_ms: now_ms(),
        }
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    /// Whether the time ranges intersect.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start_sec < other.end_sec && other.start_sec < self.end_sec
    }
}

/// Maps recognition-time coordinates onto the video timeline.
pub struct TimelineAligner {
    /// Video time captured when the session reached Connected.
    anchor: Option<f64>,
    /// Seconds of session audio shipped so far.
    audio_elapsed_sec: f64,
    retention_sec: f64,
    /// Floor applied to emitted start times so output stays
    /// non-decreasing within a session.
    last_emitted_start: f64,
    recent: VecDeque<Segment>,
}

impl TimelineAligner {
    pub fn new(retention_sec: f64) -> Self {
        Self {
            anchor: None,
            audio_elapsed_sec: 0.0,
            retention_sec,
            last_emitted_start: 0.0,
            recent: VecDeque::new(),
        }
    }

    /// Record the anchor at the moment the session connects.
    pub fn set_anchor(&mut self, video_time_sec: f64) {
        debug!("timeline anchor set at {:.3}s", video_time_sec);
        self.anchor = Some(video_time_sec);
        self.audio_elapsed_sec = 0.0;
        self.last_emitted_start = video_time_sec;
    }

    pub fn anchor(&self) -> Option<f64> {
        self.anchor
    }

    /// Track audio progress for the no-word-times fallback.
    pub fn note_audio_elapsed(&mut self, elapsed_sec: f64) {
        self.audio_elapsed_sec = elapsed_sec;
    }

    /// Drop all session state. Called on disable and on seek; the next
    /// session records a fresh anchor.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.audio_elapsed_sec = 0.0;
        self.last_emitted_start = 0.0;
        self.recent.clear();
    }

    /// Align a streaming transcript against the session anchor.
    pub fn align_streaming(&mut self, transcript: &Transcript) -> Option<Segment> {
        let anchor = self.anchor?;

        let (start, end) = if transcript.words.is_empty() {
            let end = anchor + self.audio_elapsed_sec;
            let start = (end - FALLBACK_WINDOW_SEC).max(anchor);
            (start, end)
        } else {
            let first = transcript.words.first().map(|w| w.start_sec).unwrap_or(0.0);
            let last = transcript
                .words
                .iter()
                .map(|w| w.end_sec)
                .fold(first, f64::max);
            (anchor + first, anchor + last)
        };

        Some(self.emit(transcript, start, end))
    }

    /// Batch drift correction: the chunk just finished playing, so its
    /// start in video time is the current player position minus the
    /// chunk duration. Chunk-relative times map through this offset,
    /// which re-anchors after every pause or seek with no state change.
    pub fn correct_chunk_start(&self, chunk_duration_sec: f64, video_now_sec: f64) -> f64 {
        video_now_sec - chunk_duration_sec
    }

    /// Remember a segment emitted outside the streaming path so the
    /// retention ring covers both backends.
    pub fn retain(&mut self, segment: &Segment) {
        self.recent.push_back(segment.clone());
        self.prune();
    }

    /// Recent output, newest last, bounded by the retention window.
    pub fn recent(&self) -> impl Iterator<Item = &Segment> {
        self.recent.iter()
    }

    fn emit(&mut self, transcript: &Transcript, start: f64, end: f64) -> Segment {
        // Output order is non-decreasing in start time per session.
        let start = start.max(self.last_emitted_start);
        let end = end.max(start);
        self.last_emitted_start = start;

        let segment = Segment {
            start_sec: start,
            end_sec: end,
            text: transcript.text.clone(),
            language: None,
            confidence: Some(transcript.confidence),
            arrival_ms: transcript.recv_timestamp_ms,
        };

        if transcript.is_final {
            self.recent.push_back(segment.clone());
            self.prune();
        }
        segment
    }

    fn prune(&mut self) {
        let horizon = self
            .recent
            .back()
            .map(|s| s.end_sec - self.retention_sec)
            .unwrap_or(0.0);
        while let Some(front) = self.recent.front() {
            if front.end_sec < horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WordTiming;

    fn transcript(text: &str, words: &[(&str, f64, f64)], is_final: bool) -> Transcript {
        Transcript {
            text: text.to_string(),
            is_final,
            confidence: 0.9,
            words: words
                .iter()
                .map(|&(w, s, e)| WordTiming {
                    text: w.to_string(),
                    start_sec: s,
                    end_sec: e,
                })
                .collect(),
            recv_timestamp_ms: now_ms(),
        }
    }

    #[test]
    fn test_streaming_word_alignment() {
        let mut aligner = TimelineAligner::new(30.0);
        aligner.set_anchor(60.0);

        let t = transcript("hello world", &[("hello", 0.2, 0.6), ("world", 0.7, 1.1)], true);
        let segment = aligner.align_streaming(&t).unwrap();

        assert!((segment.start_sec - 60.2).abs() < 1e-9);
        assert!((segment.end_sec - 61.1).abs() < 1e-9);
        assert_eq!(segment.text, "hello world");
    }

    #[test]
    fn test_streaming_fallback_window() {
        let mut aligner = TimelineAligner::new(30.0);
        aligner.set_anchor(10.0);
        aligner.note_audio_elapsed(8.0);

        let t = transcript("no timings here", &[], true);
        let segment = aligner.align_streaming(&t).unwrap();

        assert!((segment.end_sec - 18.0).abs() < 1e-9);
        assert!((segment.start_sec - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_clamped_to_anchor() {
        let mut aligner = TimelineAligner::new(30.0);
        aligner.set_anchor(10.0);
        aligner.note_audio_elapsed(1.0);

        let t = transcript("early", &[], false);
        let segment = aligner.align_streaming(&t).unwrap();
        assert!(segment.start_sec >= 10.0);
        assert!(segment.start_sec <= segment.end_sec);
    }

    #[test]
    fn test_no_anchor_no_output() {
        let mut aligner = TimelineAligner::new(30.0);
        let t = transcript("orphan", &[], true);
        assert!(aligner.align_streaming(&t).is_none());
    }

    #[test]
    fn test_batch_drift_correction() {
        let aligner = TimelineAligner::new(30.0);

        // A 3-second chunk finishing while the player sits at 45s: the
        // user seeked between chunks, and the correction absorbs it.
        let corrected = aligner.correct_chunk_start(3.0, 45.0);
        assert!((corrected - 42.0).abs() < 1e-9);

        // Chunk-relative word times map through the corrected offset.
        assert!((corrected + 0.5 - 42.5).abs() < 1e-9);
        assert!((corrected + 2.5 - 44.5).abs() < 1e-9);
    }

    #[test]
    fn test_retain_feeds_retention_ring() {
        let mut aligner = TimelineAligner::new(10.0);
        for i in 0..20 {
            let s = Segment::new(i as f64, i as f64 + 0.5, "x");
            aligner.retain(&s);
        }
        let oldest = aligner.recent().next().unwrap().end_sec;
        let newest = aligner.recent().last().unwrap().end_sec;
        assert!(newest - oldest <= 10.0 + 1.0);
    }

    #[test]
    fn test_output_start_non_decreasing() {
        let mut aligner = TimelineAligner::new(30.0);
        aligner.set_anchor(20.0);

        let a = transcript("first", &[("first", 5.0, 6.0)], true);
        let b = transcript("second", &[("second", 2.0, 3.0)], true);
        let s1 = aligner.align_streaming(&a).unwrap();
        let s2 = aligner.align_streaming(&b).unwrap();

        assert!(s2.start_sec >= s1.start_sec);
        assert!(s2.start_sec <= s2.end_sec);
    }

    #[test]
    fn test_retention_prunes_old_segments() {
        let mut aligner = TimelineAligner::new(10.0);
        aligner.set_anchor(0.0);

        for i in 0..30 {
            let t = transcript("x", &[("x", i as f64, i as f64 + 0.5)], true);
            aligner.align_streaming(&t);
        }

        let oldest = aligner.recent().next().unwrap().end_sec;
        let newest = aligner.recent().last().unwrap().end_sec;
        assert!(newest - oldest <= 10.0 + 1.0);
    }

    #[test]
    fn test_reset_clears_anchor_and_ring() {
        let mut aligner = TimelineAligner::new(30.0);
        aligner.set_anchor(5.0);
        let t = transcript("x", &[("x", 0.0, 1.0)], true);
        aligner.align_streaming(&t);

        aligner.reset();
        assert!(aligner.anchor().is_none());
        assert_eq!(aligner.recent().count(), 0);
    }
}
