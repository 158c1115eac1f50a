//! WebSocket session client.
//!
//! The session is one event-driven task: inbound events are audio frames,
//! wire messages, timer ticks and external commands, and the transitions
//! follow the Disconnected/Connecting/Connected/Closing/Errored machine.
//! Audio bytes double as the keep-alive while they flow; a text
//! `{"type":"KeepAlive"}` covers pauses where the deployment allows it.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};

use super::wire::{classify_server_error, listen_url, parse_server_message, ServerMessage};
use super::{SessionState, SessionStats, Transcript};
use crate::audio::AudioFrame;
use crate::config::CoreConfig;
use crate::error::SessionError;

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const KEEPALIVE_TEXT: &str = r#"{"type":"KeepAlive"}"#;

/// Events delivered to the session's consumer.
#[derive(Debug)]
pub enum SessionEvent {
    State {
        state: SessionState,
        stats: SessionStats,
    },
    Transcript(Transcript),
    Error {
        kind: &'static str,
        message: String,
    },
}

enum Command {
    Close,
}

/// Linear backoff: `base * attempt`, attempt counted from 1.
pub fn reconnect_delay(attempt: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(attempt as u64))
}

/// Handle to a running recognition session.
///
/// Owns the connection exclusively; frames are pushed through
/// `frame_sender` and results come back on the event channel returned by
/// `open`.
pub struct SessionClient {
    id: u64,
    cmd_tx: mpsc::Sender<Command>,
    frame_tx: mpsc::Sender<AudioFrame>,
    task: tokio::task::JoinHandle<()>,
}

impl SessionClient {
    /// Spawn the session task. The connection is established in the
    /// background; the first event is `State(Connecting)`.
    pub fn open(config: CoreConfig, api_key: String) -> (Self, mpsc::Receiver<SessionEvent>) {
        let id = super::next_session_id();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);

        let task = tokio::spawn(run_session(id, config, api_key, frame_rx, cmd_rx, event_tx));

        (
            Self {
                id,
                cmd_tx,
                frame_tx,
                task,
            },
            event_rx,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sender for the audio frame path.
    pub fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frame_tx.clone()
    }

    /// Request a clean shutdown. Idempotent; pending reconnects are
    /// cancelled and the socket closes with code 1000.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }

    /// Wait for the session task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

enum LoopOutcome {
    /// `close()` was requested.
    LocalClose,
    /// The server closed cleanly.
    RemoteClose,
    /// Transport died or the server reported an error.
    Lost,
}

async fn run_session(
    id: u64,
    config: CoreConfig,
    api_key: String,
    mut frame_rx: mpsc::Receiver<AudioFrame>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut stats = SessionStats::default();
    let mut attempt: u32 = 0;

    loop {
        emit_state(&events, SessionState::Connecting, &stats).await;

        let url = listen_url(&config);
        let request = match build_ws_request(&url, &config.service_host, &api_key) {
            Ok(request) => request,
            Err(e) => {
                emit_error(&events, &SessionError::WebSocketOpenFailed(e)).await;
                emit_state(&events, SessionState::Errored, &stats).await;
                return;
            }
        };

        debug!("session {}: opening {}", id, url);
        let ws_stream = tokio::select! {
            connect = timeout(OPEN_TIMEOUT, connect_async(request)) => {
                match connect {
                    Ok(Ok((stream, _response))) => stream,
                    Ok(Err(e)) => {
                        if is_auth_rejection(&e) {
                            emit_error(&events, &SessionError::AuthFailed).await;
                            emit_state(&events, SessionState::Errored, &stats).await;
                            return;
                        }
                        emit_error(&events, &SessionError::WebSocketOpenFailed(e.to_string()))
                            .await;
                        if !schedule_reconnect(&config, &mut attempt, &mut stats, &events, &mut cmd_rx)
                            .await
                        {
                            return;
                        }
                        continue;
                    }
                    Err(_) => {
                        emit_error(&events, &SessionError::Timeout("connection open")).await;
                        if !schedule_reconnect(&config, &mut attempt, &mut stats, &events, &mut cmd_rx)
                            .await
                        {
                            return;
                        }
                        continue;
                    }
                }
            }
            _ = cmd_rx.recv() => {
                emit_state(&events, SessionState::Disconnected, &stats).await;
                return;
            }
        };

        attempt = 0;
        info!("session {}: connected", id);
        emit_state(&events, SessionState::Connected, &stats).await;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut keepalive = interval(Duration::from_millis(config.keep_alive_interval_ms));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        let mut live_interim: Option<Transcript> = None;
        let mut frames_done = false;

        let outcome = loop {
            tokio::select! {
                maybe_frame = frame_rx.recv(), if !frames_done => {
                    match maybe_frame {
                        Some(frame) => {
                            let bytes = frame.to_le_bytes();
                            stats.frames_sent += 1;
                            stats.bytes_sent += bytes.len() as u64;
                            keepalive.reset();
                            if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                                break LoopOutcome::Lost;
                            }
                        }
                        None => {
                            debug!("audio pipeline finished, no more frames");
                            frames_done = true;
                        }
                    }
                }
                message = ws_rx.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match handle_text(&text, &mut stats, &mut live_interim, &events).await {
                                TextOutcome::Continue => {}
                                TextOutcome::ServerError => break LoopOutcome::Lost,
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let clean = frame
                                .as_ref()
                                .map(|f| f.code == CloseCode::Normal)
                                .unwrap_or(false);
                            info!("server closed the session (clean: {})", clean);
                            if clean {
                                break LoopOutcome::RemoteClose;
                            }
                            break LoopOutcome::Lost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("recognition socket error: {}", e);
                            break LoopOutcome::Lost;
                        }
                        None => break LoopOutcome::Lost,
                    }
                }
                _ = keepalive.tick(), if config.allow_keepalive => {
                    debug!("sending keep-alive");
                    if ws_tx
                        .send(Message::Text(KEEPALIVE_TEXT.to_string()))
                        .await
                        .is_err()
                    {
                        break LoopOutcome::Lost;
                    }
                }
                _ = cmd_rx.recv() => break LoopOutcome::LocalClose,
            }
        };

        match outcome {
            LoopOutcome::LocalClose => {
                emit_state(&events, SessionState::Closing, &stats).await;
                let close_frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
                let _ = timeout(CLOSE_DRAIN_TIMEOUT, async {
                    while let Some(message) = ws_rx.next().await {
                        if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                            break;
                        }
                    }
                })
                .await;
                emit_state(&events, SessionState::Disconnected, &stats).await;
                return;
            }
            LoopOutcome::RemoteClose => {
                emit_state(&events, SessionState::Closing, &stats).await;
                emit_state(&events, SessionState::Disconnected, &stats).await;
                return;
            }
            LoopOutcome::Lost => {
                emit_state(&events, SessionState::Errored, &stats).await;
                if !schedule_reconnect(&config, &mut attempt, &mut stats, &events, &mut cmd_rx).await
                {
                    return;
                }
            }
        }
    }
}

enum TextOutcome {
    Continue,
    ServerError,
}

async fn handle_text(
    text: &str,
    stats: &mut SessionStats,
    live_interim: &mut Option<Transcript>,
    events: &mpsc::Sender<SessionEvent>,
) -> TextOutcome {
    match parse_server_message(text) {
        Ok(ServerMessage::Results(Some(transcript))) => {
            stats.results += 1;
            if transcript.is_final {
                *live_interim = None;
            } else {
                *live_interim = Some(transcript.clone());
            }
            let _ = events.send(SessionEvent::Transcript(transcript)).await;
            TextOutcome::Continue
        }
        Ok(ServerMessage::Results(None)) => TextOutcome::Continue,
        Ok(ServerMessage::Metadata) => {
            debug!("metadata received");
            TextOutcome::Continue
        }
        Ok(ServerMessage::SpeechStarted) => {
            debug!("speech started");
            TextOutcome::Continue
        }
        Ok(ServerMessage::UtteranceEnd) => {
            debug!("utterance end");
            // Endpointing fired without a final; promote the pending
            // interim so the caption does not stick.
            if let Some(mut transcript) = live_interim.take() {
                transcript.is_final = true;
                let _ = events.send(SessionEvent::Transcript(transcript)).await;
            }
            TextOutcome::Continue
        }
        Ok(ServerMessage::Error(message)) => {
            stats.errors += 1;
            let err = classify_server_error(&message);
            error!("server error: {} ({})", message, err.kind());
            emit_error(events, &err).await;
            TextOutcome::ServerError
        }
        Ok(ServerMessage::Unknown(_)) => TextOutcome::Continue,
        Err(e) => {
            stats.errors += 1;
            warn!("unparseable server message: {}", e);
            emit_error(events, &e).await;
            TextOutcome::Continue
        }
    }
}

/// Wait out the linear backoff before the next attempt, unless the retry
/// budget is spent or a close command arrives first. Returns false when
/// the session must end.
async fn schedule_reconnect(
    config: &CoreConfig,
    attempt: &mut u32,
    stats: &mut SessionStats,
    events: &mpsc::Sender<SessionEvent>,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> bool {
    *attempt += 1;
    if *attempt > config.reconnect_max_retries {
        error!(
            "giving up after {} reconnect attempts",
            config.reconnect_max_retries
        );
        emit_error(
            events,
            &SessionError::WebSocketOpenFailed(format!(
                "gave up after {} attempts",
                config.reconnect_max_retries
            )),
        )
        .await;
        emit_state(events, SessionState::Errored, stats).await;
        return false;
    }

    stats.reconnects += 1;
    let delay = reconnect_delay(*attempt, config.reconnect_base_delay_ms);
    info!(
        "reconnecting in {} ms (attempt {}/{})",
        delay.as_millis(),
        attempt,
        config.reconnect_max_retries
    );

    tokio::select! {
        _ = sleep(delay) => true,
        _ = cmd_rx.recv() => {
            emit_state(events, SessionState::Disconnected, stats).await;
            false
        }
    }
}

fn build_ws_request(
    url: &str,
    host: &str,
    api_key: &str,
) -> Result<tungstenite::http::Request<()>, String> {
    tungstenite::http::Request::builder()
        .uri(url)
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        // Browser full-duplex APIs forbid custom headers, so the
        // credential rides the sub-protocol pair ["token", <key>].
        .header("Sec-WebSocket-Protocol", format!("token, {}", api_key))
        .body(())
        .map_err(|e| format!("failed to build request: {}", e))
}

fn is_auth_rejection(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(response) => {
            let code = response.status().as_u16();
            code == 401 || code == 403
        }
        _ => false,
    }
}

async fn emit_state(
    events: &mpsc::Sender<SessionEvent>,
    state: SessionState,
    stats: &SessionStats,
) {
    let _ = events
        .send(SessionEvent::State {
            state,
            stats: stats.clone(),
        })
        .await;
}

async fn emit_error(events: &mpsc::Sender<SessionEvent>, err: &SessionError) {
    let _ = events
        .send(SessionEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        })
        .await;
}
