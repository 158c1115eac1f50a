//! Bidirectional recognition session.
//!
//! One session per tab: PCM frames go out over a full-duplex channel, and
//! interim/final transcripts come back. The client enforces liveness
//! (keep-alive while frames pause) and reconnects on transient failure.

mod client;
mod wire;

pub use client::{reconnect_delay, SessionClient, SessionEvent};
pub use wire::{classify_server_error, listen_url, parse_server_message, ServerMessage};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Session ids are process-unique; a seek-induced reopen gets a new one.
pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1
}

/// Connection lifecycle of a session.
///
/// `Connecting -> Connected` happens on the protocol open event. Any close
/// before `Connected`, or a non-clean close after it, lands in `Errored`
/// and may be retried by the reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Errored,
}

/// One word with its timing, relative to the audio start of the session
/// (or of the chunk, for the batch backend).
#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub text: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

/// A transcript emitted by the recognition service.
///
/// Interims may arrive several times per second for the same utterance;
/// each later interim supersedes the prior one until a final arrives.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
    pub words: Vec<WordTiming>,
    /// Arrival wall-clock time, epoch milliseconds.
    pub recv_timestamp_ms: u64,
}

/// Counters for one session's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub results: u64,
    pub errors: u64,
    pub reconnects: u64,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_state_equality() {
        assert_eq!(SessionState::Connected, SessionState::Connected);
        assert_ne!(SessionState::Connecting, SessionState::Connected);
    }
}
