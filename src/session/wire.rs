//! Wire model for the recognition service.
//!
//! Inbound messages are text JSON discriminated by a `type` field. The
//! open URL carries every session parameter; this backend accepts no text
//! configuration messages after open.

use log::debug;
use serde::Deserialize;

use super::{now_ms, Transcript, WordTiming};
use crate::config::CoreConfig;
use crate::error::SessionError;

/// Build the listen URL with all session parameters query-encoded.
///
/// The credential is deliberately absent: it travels in the WebSocket
/// sub-protocol, never in the URL.
pub fn listen_url(config: &CoreConfig) -> String {
    format!(
        "wss://{host}/v1/listen?model={model}&language={language}&encoding=linear16&sample_rate=16000&channels=1&interim_results={interim}&punctuate=true&smart_format=true&endpointing={endpointing}",
        host = config.service_host,
        model = config.model,
        language = config.language,
        interim = config.interim_results,
        endpointing = config.endpointing_ms,
    )
}

#[derive(Debug, Deserialize)]
pub struct WirePayload {
    #[serde(default)]
    pub channel: WireChannel,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireChannel {
    #[serde(default)]
    pub alternatives: Vec<WireAlternative>,
}

#[derive(Debug, Deserialize)]
pub struct WireAlternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<WireWord>,
}

#[derive(Debug, Deserialize)]
pub struct WireWord {
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

/// A parsed inbound message.
#[derive(Debug)]
pub enum ServerMessage {
    /// A transcript, already lifted out of the alternatives envelope.
    /// None when the transcript text is empty.
    Results(Option<Transcript>),
    Metadata,
    SpeechStarted,
    UtteranceEnd,
    Error(String),
    /// Anything with an unrecognized `type`; logged and ignored.
    Unknown(String),
}

/// Parse one text message from the service.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, SessionError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SessionError::MessageParseFailed(e.to_string()))?;

    let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match kind {
        "Results" => {
            let payload: WirePayload = serde_json::from_value(value)
                .map_err(|e| SessionError::MessageParseFailed(e.to_string()))?;
            Ok(ServerMessage::Results(transcript_from_payload(payload)))
        }
        "Metadata" => Ok(ServerMessage::Metadata),
        "SpeechStarted" => Ok(ServerMessage::SpeechStarted),
        "UtteranceEnd" => Ok(ServerMessage::UtteranceEnd),
        "Error" => {
            let message = value
                .get("message")
                .or_else(|| value.get("description"))
                .and_then(|m| m.as_str())
                .unwrap_or("unspecified server error")
                .to_string();
            Ok(ServerMessage::Error(message))
        }
        other => {
            debug!("ignoring unknown message kind: {:?}", other);
            Ok(ServerMessage::Unknown(other.to_string()))
        }
    }
}

fn transcript_from_payload(payload: WirePayload) -> Option<Transcript> {
    let alternative = payload.channel.alternatives.into_iter().next()?;
    if alternative.transcript.is_empty() {
        return None;
    }
    Some(Transcript {
        text: alternative.transcript,
        is_final: payload.is_final,
        confidence: alternative.confidence,
        words: alternative
            .words
            .into_iter()
            .map(|w| WordTiming {
                text: w.word,
                start_sec: w.start,
                end_sec: w.end,
            })
            .collect(),
        recv_timestamp_ms: now_ms(),
    })
}

/// Map a server-reported error message onto the session error taxonomy.
pub fn classify_server_error(message: &str) -> SessionError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("rate") && lower.contains("limit") || lower.contains("rate_limit") {
        SessionError::RateLimited
    } else if lower.contains("auth") || lower.contains("unauthorized") || lower.contains("401") {
        SessionError::AuthFailed
    } else {
        SessionError::ServerError(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_url_shape() {
        let config = CoreConfig::default();
        let url = listen_url(&config);
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("language=zh-TW"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("punctuate=true"));
        assert!(url.contains("smart_format=true"));
        assert!(url.contains("endpointing=300"));
        assert!(!url.contains("token"));
    }

    #[test]
    fn test_parse_results() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {
                "alternatives": [{
                    "transcript": "hello world",
                    "confidence": 0.97,
                    "words": [
                        {"word": "hello", "start": 0.1, "end": 0.4},
                        {"word": "world", "start": 0.5, "end": 0.9}
                    ]
                }]
            }
        }"#;

        match parse_server_message(raw).unwrap() {
            ServerMessage::Results(Some(t)) => {
                assert_eq!(t.text, "hello world");
                assert!(t.is_final);
                assert!((t.confidence - 0.97).abs() < 1e-9);
                assert_eq!(t.words.len(), 2);
                assert_eq!(t.words[1].text, "world");
                assert!((t.words[1].end_sec - 0.9).abs() < 1e-9);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_empty_transcript_suppressed() {
        let raw = r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"","confidence":0.0,"words":[]}]}}"#;
        match parse_server_message(raw).unwrap() {
            ServerMessage::Results(None) => {}
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let raw = r#"{"type":"Warning","message":"something new"}"#;
        match parse_server_message(raw).unwrap() {
            ServerMessage::Unknown(kind) => assert_eq!(kind, "Warning"),
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_control_kinds() {
        assert!(matches!(
            parse_server_message(r#"{"type":"Metadata","request_id":"abc"}"#).unwrap(),
            ServerMessage::Metadata
        ));
        assert!(matches!(
            parse_server_message(r#"{"type":"SpeechStarted","timestamp":1.5}"#).unwrap(),
            ServerMessage::SpeechStarted
        ));
        assert!(matches!(
            parse_server_message(r#"{"type":"UtteranceEnd","last_word_end":2.0}"#).unwrap(),
            ServerMessage::UtteranceEnd
        ));
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(SessionError::MessageParseFailed(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify_server_error("rate_limit"),
            SessionError::RateLimited
        ));
        assert!(matches!(
            classify_server_error("Rate limit exceeded"),
            SessionError::RateLimited
        ));
        assert!(matches!(
            classify_server_error("unauthorized token"),
            SessionError::AuthFailed
        ));
        assert!(matches!(
            classify_server_error("internal failure"),
            SessionError::ServerError(_)
        ));
    }
}
