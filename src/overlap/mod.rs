//! Overlap deduplication for the windowed batch backend.
//!
//! Adjacent batch windows share one second of audio, so the tail of each
//! recognition result reappears at the head of the next. The processor
//! keeps the previous window's segments and drops current segments that
//! duplicate them, judged by time overlap and text similarity, then
//! rejoins sentences the window boundary broke.

mod merge;
mod similarity;

pub use merge::{detect_script, merge_broken_sentences, resolve_language, should_merge};
pub use similarity::{jaccard_chars, levenshtein, normalize, text_similarity};

use log::debug;

use crate::align::Segment;
use crate::config::CoreConfig;
use crate::error::PipelineError;
use crate::session::Transcript;

/// Punctuation that closes a clause when splitting transcripts.
const CLAUSE_BREAKS: &[char] = &[
    '。', '！', '？', '；', '：', '，', '、', '.', '!', '?', ';', ':', ',',
];

/// Split a chunk transcript into clause-level segments with times
/// relative to the chunk start.
///
/// Word timings are interpolated when present; otherwise each clause
/// gets a share of the span proportional to its non-punctuation length.
pub fn clause_segments(transcript: &Transcript, chunk_duration_sec: f64) -> Vec<Segment> {
    let (span_start, span_end) = if transcript.words.is_empty() {
        (0.0, chunk_duration_sec)
    } else {
        let first = transcript.words.first().map(|w| w.start_sec).unwrap_or(0.0);
        let last = transcript
            .words
            .iter()
            .map(|w| w.end_sec)
            .fold(first, f64::max);
        (first, last)
    };

    let clauses = split_clauses(&transcript.text);
    if clauses.is_empty() {
        return Vec::new();
    }

    let weights: Vec<usize> = clauses
        .iter()
        .map(|c| {
            c.chars()
                .filter(|ch| ch.is_alphanumeric())
                .count()
                .max(1)
        })
        .collect();
    let total: usize = weights.iter().sum();
    let span = (span_end - span_start).max(0.0);

    let mut segments = Vec::with_capacity(clauses.len());
    let mut consumed = 0usize;
    for (clause, weight) in clauses.into_iter().zip(weights) {
        let start = span_start + span * consumed as f64 / total as f64;
        consumed += weight;
        let end = span_start + span * consumed as f64 / total as f64;
        let mut segment = Segment::new(start, end, clause);
        segment.confidence = Some(transcript.confidence);
        segment.arrival_ms = transcript.recv_timestamp_ms;
        segments.push(segment);
    }
    segments
}

fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if CLAUSE_BREAKS.contains(&c) {
            if !current.trim().is_empty() {
                clauses.push(std::mem::take(&mut current).trim().to_string());
            } else {
                current.clear();
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        clauses.push(tail.to_string());
    }
    clauses
}

/// Deduplicates and merges segments across overlapping batch windows.
pub struct OverlapProcessor {
    overlap_sec: f64,
    threshold: f64,
    gap_limit_sec: f64,
    max_compare_length: usize,
    language: String,
    /// Previous window's segments, already shifted to absolute time.
    previous: Option<Vec<Segment>>,
}

impl OverlapProcessor {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            overlap_sec: config.overlap_duration_sec(),
            threshold: config.similarity_threshold,
            gap_limit_sec: config.merge_time_gap_sec,
            max_compare_length: config.max_compare_length,
            language: config.language.clone(),
            previous: None,
        }
    }

    /// Process one window's segments (times relative to the chunk) and
    /// return the new, deduplicated, sentence-merged segments in absolute
    /// time.
    pub fn process(
        &mut self,
        segments: Vec<Segment>,
        chunk_start_sec: f64,
    ) -> Result<Vec<Segment>, PipelineError> {
        for segment in &segments {
            if !segment.start_sec.is_finite() || !segment.end_sec.is_finite() {
                return Err(PipelineError::InvalidInput(
                    "segment with non-finite time".to_string(),
                ));
            }
            if segment.start_sec > segment.end_sec {
                return Err(PipelineError::InvalidInput(format!(
                    "segment start {} after end {}",
                    segment.start_sec, segment.end_sec
                )));
            }
        }

        // 1. Shift to absolute time.
        let shifted: Vec<Segment> = segments
            .into_iter()
            .map(|mut s| {
                s.start_sec += chunk_start_sec;
                s.end_sec += chunk_start_sec;
                s
            })
            .collect();

        // 2. First window passes through whole.
        let Some(previous) = self.previous.replace(shifted.clone()) else {
            return Ok(merge_broken_sentences(
                shifted,
                &self.language,
                self.gap_limit_sec,
            ));
        };

        // 3. Slice both windows down to the shared region.
        let region_start = chunk_start_sec;
        let region_end = chunk_start_sec + self.overlap_sec;
        let region = Segment::new(region_start, region_end, "");

        let prior: Vec<&Segment> = previous.iter().filter(|p| p.overlaps(&region)).collect();

        let mut kept = Vec::with_capacity(shifted.len());
        let mut dropped = 0usize;
        for candidate in shifted {
            let in_region = candidate.overlaps(&region);
            let duplicate =
                in_region && prior.iter().any(|p| self.is_duplicate(p, &candidate));
            if duplicate {
                dropped += 1;
            } else {
                kept.push(candidate);
            }
        }

        if dropped > 0 {
            debug!("overlap dedup dropped {} segment(s)", dropped);
        }

        // 5. Rejoin sentences the window boundary broke.
        Ok(merge_broken_sentences(
            kept,
            &self.language,
            self.gap_limit_sec,
        ))
    }

    fn is_duplicate(&self, prior: &Segment, candidate: &Segment) -> bool {
        // Cheap character-set pre-filter before the quadratic distance.
        if jaccard_chars(&prior.text, &candidate.text) < 0.6 * self.threshold {
            return false;
        }

        let overlap = prior.end_sec.min(candidate.end_sec) - prior.start_sec.max(candidate.start_sec);
        let min_len = prior.duration_sec().min(candidate.duration_sec());
        let time_overlap_ratio = if min_len > 0.0 {
            (overlap / min_len).max(0.0)
        } else {
            0.0
        };

        if time_overlap_ratio > 0.8 {
            return true;
        }
        if time_overlap_ratio > 0.5 {
            let similarity =
                text_similarity(&prior.text, &candidate.text, self.max_compare_length);
            return similarity > self.threshold;
        }
        false
    }

    /// Forget the retained window. Called on disable and on seek.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::now_ms;

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            is_final: true,
            confidence: 0.9,
            words: vec![],
            recv_timestamp_ms: now_ms(),
        }
    }

    fn processor() -> OverlapProcessor {
        OverlapProcessor::new(&CoreConfig::default())
    }

    #[test]
    fn test_clause_split() {
        assert_eq!(
            split_clauses("氣很好，我們去公園"),
            vec!["氣很好，", "我們去公園"]
        );
        assert_eq!(
            split_clauses("Hello, world. Bye"),
            vec!["Hello,", "world.", "Bye"]
        );
        assert!(split_clauses("").is_empty());
    }

    #[test]
    fn test_clause_segments_proportional() {
        let segments = clause_segments(&transcript("氣很好，我們去公園"), 3.0);
        assert_eq!(segments.len(), 2);
        // 3 of 8 letters, then 5 of 8.
        assert!((segments[0].start_sec - 0.0).abs() < 1e-9);
        assert!((segments[0].end_sec - 1.125).abs() < 1e-9);
        assert!((segments[1].start_sec - 1.125).abs() < 1e-9);
        assert!((segments[1].end_sec - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_chunk_passes_through() {
        let mut op = processor();
        let segments = clause_segments(&transcript("今天天氣很好"), 3.0);
        let out = op.process(segments, 0.0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "今天天氣很好");
        assert_eq!(out[0].start_sec, 0.0);
    }

    #[test]
    fn test_overlapping_chunks_deduplicate() {
        // Chunk 0 covers [0,3): "今天天氣很好". Chunk 1 covers [2,5) and
        // re-hears the tail: "氣很好，我們去公園". Only the unheard part
        // should come back.
        let mut op = processor();
        op.process(clause_segments(&transcript("今天天氣很好"), 3.0), 0.0)
            .unwrap();

        let out = op
            .process(clause_segments(&transcript("氣很好，我們去公園"), 3.0), 2.0)
            .unwrap();

        assert_eq!(out.len(), 1, "duplicate fragment survived: {:?}", out);
        assert_eq!(out[0].text, "我們去公園");
        assert!(out[0].start_sec >= 3.0);
    }

    #[test]
    fn test_distinct_text_in_overlap_survives() {
        let mut op = processor();
        op.process(clause_segments(&transcript("completely different words"), 3.0), 0.0)
            .unwrap();

        let out = op
            .process(
                clause_segments(&transcript("nothing matches here at all"), 3.0),
                2.0,
            )
            .unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_reprocessing_same_window_drops_overlap_region() {
        // With the previous state now equal to the input, everything in
        // the shared region is an exact duplicate of itself.
        let mut op = processor();
        let segments = clause_segments(&transcript("氣很好，我們去公園"), 3.0);
        let first = op.process(segments.clone(), 2.0).unwrap();
        let second = op.process(segments, 2.0).unwrap();

        let first_texts: Vec<_> = first.iter().map(|s| s.text.clone()).collect();
        let second_texts: Vec<_> = second.iter().map(|s| s.text.clone()).collect();
        for text in &second_texts {
            assert!(
                first_texts.iter().any(|t| t.contains(text.trim_end_matches('，'))
                    || text.contains(t)),
                "second pass invented {:?}",
                text
            );
        }
        assert!(second.len() <= first.len());
    }

    #[test]
    fn test_invalid_segment_rejected() {
        let mut op = processor();
        let mut bad = Segment::new(2.0, 1.0, "backwards");
        bad.end_sec = 1.0;
        assert!(matches!(
            op.process(vec![bad], 0.0),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_reset_forgets_previous_window() {
        let mut op = processor();
        op.process(clause_segments(&transcript("今天天氣很好"), 3.0), 0.0)
            .unwrap();
        op.reset();

        // After reset the same window passes through untouched again.
        let out = op
            .process(clause_segments(&transcript("今天天氣很好"), 3.0), 0.0)
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
