//! Streaming recognition core for live video captioning.
//!
//! Taps a tab's audio, streams it to a cloud speech-to-text service and
//! produces caption segments aligned to the player's timeline. The crate
//! covers:
//! - audio acquisition and normalization (16 kHz mono PCM frames, or
//!   overlapping container-wrapped windows for the batch backend)
//! - the bidirectional recognition session (keep-alive, reconnection,
//!   interim/final handling)
//! - video-timeline alignment, including the per-chunk drift correction
//!   the batch backend needs
//! - overlap deduplication and language-aware sentence merging
//! - an encrypted-at-rest store for the service API key
//!
//! The popup UI, page injection and caption styling live in the host;
//! they reach the core through the traits in [`host`] and the event
//! channel returned by [`manager::SessionManager::enable`].

pub mod align;
pub mod audio;
pub mod backends;
pub mod config;
pub mod credentials;
pub mod error;
pub mod host;
pub mod manager;
pub mod overlap;
pub mod session;

pub use align::{Segment, TimelineAligner};
pub use config::CoreConfig;
pub use credentials::CredentialStore;
pub use error::{AudioError, CoreError, CredentialError, PipelineError, SessionError};
pub use manager::{BackendMode, CoreEvent, SessionManager};
pub use overlap::OverlapProcessor;
pub use session::{SessionClient, SessionState, Transcript, WordTiming};
