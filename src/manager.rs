//! Session manager.
//!
//! The host-facing control surface: fetches the credential, starts the
//! audio pipeline against a capture source, opens the recognition
//! session, and routes transcripts through alignment (and overlap
//! deduplication in batch mode) out to the renderer event channel. Owns
//! the seek policy and teardown order.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use crate::align::{Segment, TimelineAligner};
use crate::audio::{AudioChunker, AudioPipeline, TARGET_SAMPLE_RATE};
use crate::backends::{HttpBatchBackend, RecognitionBackend};
use crate::config::CoreConfig;
use crate::credentials::CredentialStore;
use crate::error::{CoreError, PipelineError, SessionError};
use crate::host::{AudioSource, VideoClock};
use crate::overlap::{clause_segments, OverlapProcessor};
use crate::session::{SessionClient, SessionEvent, SessionState, Transcript};

/// Reopen delay after a seek-induced close. Rewriting the anchor in
/// place is not an option: interim transcripts stamped against the old
/// timeline would overlap the new captions.
const SEEK_REOPEN_DELAY: Duration = Duration::from_millis(200);

const FRAME_QUEUE_DEPTH: usize = 64;

/// Events delivered to the renderer.
#[derive(Debug)]
pub enum CoreEvent {
    /// A caption-ready segment in video time.
    Segment(Segment),
    /// A provisional transcript; superseded by the next interim or final.
    Interim(Transcript),
    SessionState(SessionState),
    Error { kind: String, message: String },
}

/// Which backend carries the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Streaming,
    Batch,
}

enum ManagerCommand {
    Seek,
    Disable,
}

struct ActiveSession {
    cmd_tx: mpsc::Sender<ManagerCommand>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns one recognition session per tab and its collaborators.
pub struct SessionManager {
    config: CoreConfig,
    credentials: CredentialStore,
    clock: Arc<dyn VideoClock>,
    mode: BackendMode,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(
        config: CoreConfig,
        credentials: CredentialStore,
        clock: Arc<dyn VideoClock>,
    ) -> Self {
        Self {
            config,
            credentials,
            clock,
            mode: BackendMode::Streaming,
            active: None,
        }
    }

    pub fn with_mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Start captioning the given capture source. Returns the renderer
    /// event channel.
    pub async fn enable(
        &mut self,
        source: Box<dyn AudioSource>,
    ) -> Result<mpsc::Receiver<CoreEvent>, CoreError> {
        if self.active.is_some() {
            return Err(PipelineError::InvalidInput(
                "a session is already active for this tab".to_string(),
            )
            .into());
        }

        let api_key = self.credentials.get().await?;
        let (pipeline, frame_rx) = AudioPipeline::start(source, FRAME_QUEUE_DEPTH)?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let task = match self.mode {
            BackendMode::Streaming => tokio::spawn(run_streaming(
                self.config.clone(),
                api_key,
                pipeline,
                frame_rx,
                Arc::clone(&self.clock),
                event_tx,
                cmd_rx,
            )),
            BackendMode::Batch => tokio::spawn(run_batch(
                self.config.clone(),
                api_key,
                pipeline,
                frame_rx,
                Arc::clone(&self.clock),
                event_tx,
                cmd_rx,
            )),
        };

        self.active = Some(ActiveSession { cmd_tx, task });
        Ok(event_rx)
    }

    /// The player seeked. Streaming sessions are recycled with a fresh
    /// anchor; the batch path only forgets its overlap state.
    pub async fn notify_seek(&self) {
        if let Some(active) = &self.active {
            let _ = active.cmd_tx.send(ManagerCommand::Seek).await;
        }
    }

    /// Stop captioning and release everything. Idempotent.
    pub async fn disable(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.cmd_tx.send(ManagerCommand::Disable).await;
            let _ = active.task.await;
        }
    }
}

async fn run_streaming(
    config: CoreConfig,
    api_key: String,
    mut pipeline: AudioPipeline,
    mut frame_rx: mpsc::Receiver<crate::audio::AudioFrame>,
    clock: Arc<dyn VideoClock>,
    events: mpsc::Sender<CoreEvent>,
    mut cmd_rx: mpsc::Receiver<ManagerCommand>,
) {
    let stats = pipeline.stats();
    let mut aligner = TimelineAligner::new(config.segment_retention_sec);
    let mut frames_done = false;

    'session: loop {
        let (client, mut session_events) = SessionClient::open(config.clone(), api_key.clone());
        let frame_tx = client.frame_sender();

        let mut last_frame = Instant::now();
        let mut silence_check = interval(Duration::from_secs(1));
        silence_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        silence_check.tick().await;

        loop {
            tokio::select! {
                maybe_frame = frame_rx.recv(), if !frames_done => {
                    match maybe_frame {
                        Some(frame) => {
                            last_frame = Instant::now();
                            aligner.note_audio_elapsed(stats.emitted_sec());
                            // Forwarding must not block; the framer's
                            // drop counter already covers saturation.
                            let _ = frame_tx.try_send(frame);
                        }
                        None => frames_done = true,
                    }
                }
                event = session_events.recv() => {
                    match event {
                        Some(SessionEvent::State { state, .. }) => {
                            if state == SessionState::Connected {
                                let video_now = clock.current_time().await;
                                aligner.set_anchor(video_now);
                            }
                            let _ = events.send(CoreEvent::SessionState(state)).await;
                        }
                        Some(SessionEvent::Transcript(transcript)) => {
                            if transcript.is_final {
                                if let Some(segment) = aligner.align_streaming(&transcript) {
                                    let _ = events.send(CoreEvent::Segment(segment)).await;
                                }
                            } else {
                                let _ = events.send(CoreEvent::Interim(transcript)).await;
                            }
                        }
                        Some(SessionEvent::Error { kind, message }) => {
                            let _ = events
                                .send(CoreEvent::Error {
                                    kind: kind.to_string(),
                                    message,
                                })
                                .await;
                        }
                        None => break 'session,
                    }
                }
                _ = silence_check.tick(), if !config.allow_keepalive => {
                    if last_frame.elapsed().as_secs() >= config.silence_close_after_sec {
                        info!(
                            "no audio for {}s with keep-alive disabled, closing session",
                            config.silence_close_after_sec
                        );
                        client.close().await;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ManagerCommand::Seek) => {
                            info!("seek: recycling the streaming session");
                            client.close().await;
                            while session_events.recv().await.is_some() {}
                            client.join().await;
                            aligner.reset();
                            sleep(SEEK_REOPEN_DELAY).await;
                            // Frames captured before the seek would be
                            // stamped against the new anchor; discard them.
                            while frame_rx.try_recv().is_ok() {}
                            continue 'session;
                        }
                        Some(ManagerCommand::Disable) | None => {
                            client.close().await;
                            while session_events.recv().await.is_some() {}
                            client.join().await;
                            break 'session;
                        }
                    }
                }
            }
        }
    }

    let _ = pipeline.stop();
}

async fn run_batch(
    config: CoreConfig,
    api_key: String,
    mut pipeline: AudioPipeline,
    mut frame_rx: mpsc::Receiver<crate::audio::AudioFrame>,
    clock: Arc<dyn VideoClock>,
    events: mpsc::Sender<CoreEvent>,
    mut cmd_rx: mpsc::Receiver<ManagerCommand>,
) {
    let mut chunker = AudioChunker::new(TARGET_SAMPLE_RATE);
    let mut backend = HttpBatchBackend::new(
        &config.service_host,
        &api_key,
        &config.model,
        &config.language,
    );
    let mut processor = OverlapProcessor::new(&config);
    let mut aligner = TimelineAligner::new(config.segment_retention_sec);
    let mut frames_done = false;

    let _ = events
        .send(CoreEvent::SessionState(SessionState::Connected))
        .await;

    'outer: loop {
        tokio::select! {
            maybe_frame = frame_rx.recv(), if !frames_done => {
                match maybe_frame {
                    Some(frame) => {
                        for chunk in chunker.push_samples(&frame.samples) {
                            if submit(&mut backend, chunk, &events).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                    None => {
                        frames_done = true;
                        if let Some(tail) = chunker.flush() {
                            let _ = submit(&mut backend, tail, &events).await;
                        }
                    }
                }
            }
            result = backend.next_result() => {
                let Some(result) = result else { break 'outer };
                let video_now = clock.current_time().await;
                let corrected_start =
                    aligner.correct_chunk_start(result.chunk_duration_sec, video_now);
                let relative = clause_segments(&result.transcript, result.chunk_duration_sec);
                match processor.process(relative, corrected_start) {
                    Ok(new_segments) => {
                        for segment in new_segments {
                            aligner.retain(&segment);
                            let _ = events.send(CoreEvent::Segment(segment)).await;
                        }
                    }
                    Err(e) => {
                        let _ = events
                            .send(CoreEvent::Error {
                                kind: e.kind().to_string(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ManagerCommand::Seek) => {
                        // Per-chunk correction re-anchors by itself; only
                        // the overlap memory must not span the seek.
                        processor.reset();
                    }
                    Some(ManagerCommand::Disable) | None => break 'outer,
                }
            }
        }
    }

    let _ = pipeline.stop();
    let _ = events
        .send(CoreEvent::SessionState(SessionState::Disconnected))
        .await;
}

/// Upload a chunk, reporting failures as renderer events. An `Err`
/// return means the session cannot continue.
async fn submit(
    backend: &mut HttpBatchBackend,
    chunk: crate::audio::AudioChunk,
    events: &mpsc::Sender<CoreEvent>,
) -> Result<(), ()> {
    match backend.submit_chunk(chunk).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("chunk upload failed: {}", e);
            let fatal = matches!(e, SessionError::AuthFailed);
            let _ = events
                .send(CoreEvent::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
                .await;
            if fatal {
                Err(())
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryKvStore;
    use async_trait::async_trait;

    struct StoppedClock;

    #[async_trait]
    impl VideoClock for StoppedClock {
        async fn current_time(&self) -> f64 {
            42.0
        }
    }

    struct SilentSource {
        started: bool,
    }

    impl crate::host::AudioSource for SilentSource {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn channels(&self) -> u16 {
            2
        }

        fn start(
            &mut self,
            _on_block: Box<dyn FnMut(&[f32]) + Send>,
        ) -> Result<(), crate::error::AudioError> {
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), crate::error::AudioError> {
            self.started = false;
            Ok(())
        }
    }

    fn manager() -> SessionManager {
        let kv = Arc::new(MemoryKvStore::new());
        let credentials = CredentialStore::new(kv, "api.deepgram.com");
        SessionManager::new(CoreConfig::default(), credentials, Arc::new(StoppedClock))
    }

    #[tokio::test]
    async fn test_enable_without_key_fails() {
        let mut manager = manager();
        let result = manager
            .enable(Box::new(SilentSource { started: false }))
            .await;
        match result {
            Err(e) => assert_eq!(e.kind(), "NotFound"),
            Ok(_) => panic!("enable succeeded without a stored key"),
        }
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_disable_is_idempotent() {
        let mut manager = manager();
        manager.disable().await;
        manager.disable().await;
        assert!(!manager.is_enabled());
    }
}
