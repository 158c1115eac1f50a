//! HTTP batch backend.
//!
//! Uploads each windowed chunk to the service's pre-recorded endpoint and
//! parses the same Results shape the streaming channel uses. Continuation
//! chunks lack a container header; the first rejection that looks like a
//! container complaint switches header repair on for the rest of the
//! session, which takes the reject rate from near-total to near-zero.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use super::{ChunkResult, RecognitionBackend};
use crate::audio::{repair_with_header, AudioChunk, WAV_HEADER_LEN};
use crate::error::SessionError;
use crate::session::Transcript;

pub struct HttpBatchBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: String,
    result_rx: mpsc::Receiver<ChunkResult>,
    internal_tx: mpsc::Sender<ChunkResult>,
    /// Container header captured from chunk 0.
    header: Option<Vec<u8>>,
    /// Once true, every continuation chunk is repaired before upload.
    repair_enabled: bool,
}

impl HttpBatchBackend {
    pub fn new(service_host: &str, api_key: &str, model: &str, language: &str) -> Self {
        let (internal_tx, result_rx) = mpsc::channel(100);
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: format!("https://{}", service_host),
            model: model.to_string(),
            language: language.to_string(),
            result_rx,
            internal_tx,
            header: None,
            repair_enabled: false,
        }
    }

    fn listen_url(&self) -> String {
        format!(
            "{}/v1/listen?model={}&language={}&punctuate=true&smart_format=true",
            self.base_url, self.model, self.language
        )
    }

    /// Heuristic for "the service could not read the container". Tuned
    /// per backend; kept in one place on purpose.
    fn looks_like_container_rejection(status: u16, body: &str) -> bool {
        if !(400..500).contains(&status) {
            return false;
        }
        let lower = body.to_ascii_lowercase();
        lower.contains("corrupt")
            || lower.contains("unsupported")
            || lower.contains("could not process")
            || lower.contains("unable to decode")
            || lower.contains("invalid audio")
    }

    async fn upload(
        client: &reqwest::Client,
        url: &str,
        api_key: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(u16, String), SessionError> {
        let response = client
            .post(url)
            .header("Authorization", format!("Token {}", api_key))
            .header("Content-Type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SessionError::ServerError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    fn parse_transcript(body: &str) -> Result<Transcript, SessionError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| SessionError::MessageParseFailed(e.to_string()))?;

        // Pre-recorded responses nest under results.channels; tolerate the
        // streaming shape too.
        let alternative = value["results"]["channels"][0]["alternatives"][0]
            .as_object()
            .or_else(|| value["channel"]["alternatives"][0].as_object())
            .ok_or_else(|| {
                SessionError::MessageParseFailed("no alternatives in response".to_string())
            })?;

        let text = alternative
            .get("transcript")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        let confidence = alternative
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0);
        let words = alternative
            .get("words")
            .and_then(|w| w.as_array())
            .map(|words| {
                words
                    .iter()
                    .filter_map(|w| {
                        Some(crate::session::WordTiming {
                            text: w.get("word")?.as_str()?.to_string(),
                            start_sec: w.get("start").and_then(|v| v.as_f64()).unwrap_or(0.0),
                            end_sec: w.get("end").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Transcript {
            text,
            is_final: true,
            confidence,
            words,
            recv_timestamp_ms: crate::session::now_ms(),
        })
    }
}

#[async_trait]
impl RecognitionBackend for HttpBatchBackend {
    async fn submit_chunk(&mut self, chunk: AudioChunk) -> Result<(), SessionError> {
        if chunk.index == 0 && chunk.bytes.len() >= WAV_HEADER_LEN {
            self.header = Some(chunk.bytes[..WAV_HEADER_LEN].to_vec());
        }

        let mut bytes = chunk.bytes.clone();
        if self.repair_enabled && chunk.index > 0 {
            if let Some(header) = &self.header {
                bytes = repair_with_header(header, &chunk.bytes);
            }
        }

        let url = self.listen_url();
        let (status, body) = Self::upload(
            &self.client,
            &url,
            &self.api_key,
            &chunk.mime_type,
            bytes,
        )
        .await?;

        let (status, body) = if Self::looks_like_container_rejection(status, &body)
            && chunk.index > 0
            && !self.repair_enabled
        {
            // Continuation data without a header; splice in chunk 0's and
            // stay in repair mode for the rest of the session.
            warn!(
                "chunk {} rejected ({}), enabling header repair",
                chunk.index, status
            );
            self.repair_enabled = true;
            let header = self.header.clone().ok_or_else(|| {
                SessionError::ServerError("no header available for repair".to_string())
            })?;
            let repaired = repair_with_header(&header, &chunk.bytes);
            Self::upload(&self.client, &url, &self.api_key, &chunk.mime_type, repaired).await?
        } else {
            (status, body)
        };

        if status == 401 || status == 403 {
            return Err(SessionError::AuthFailed);
        }
        if status == 429 {
            return Err(SessionError::RateLimited);
        }
        if !(200..300).contains(&status) {
            error!("chunk {} failed with status {}", chunk.index, status);
            return Err(SessionError::ServerError(format!(
                "status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let transcript = Self::parse_transcript(&body)?;
        if transcript.text.is_empty() {
            debug!("chunk {} recognized as silence", chunk.index);
            return Ok(());
        }

        info!(
            "chunk {} [{:.1}s..{:.1}s]: {:?}",
            chunk.index,
            chunk.start_offset_sec,
            chunk.end_offset_sec,
            transcript.text
        );

        let result = ChunkResult {
            chunk_index: chunk.index,
            chunk_start_sec: chunk.start_offset_sec,
            chunk_duration_sec: chunk.duration_sec(),
            transcript,
        };
        let _ = self.internal_tx.send(result).await;
        Ok(())
    }

    async fn next_result(&mut self) -> Option<ChunkResult> {
        self.result_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_rejection_heuristic() {
        assert!(HttpBatchBackend::looks_like_container_rejection(
            400,
            r#"{"err_code":"Bad Request","err_msg":"could not process audio"}"#
        ));
        assert!(HttpBatchBackend::looks_like_container_rejection(
            400,
            "corrupt or unsupported data"
        ));
        assert!(!HttpBatchBackend::looks_like_container_rejection(
            500,
            "could not process audio"
        ));
        assert!(!HttpBatchBackend::looks_like_container_rejection(
            400,
            "missing parameter"
        ));
    }

    #[test]
    fn test_parse_prerecorded_response() {
        let body = r#"{
            "results": {
                "channels": [{
                    "alternatives": [{
                        "transcript": "今天天氣很好",
                        "confidence": 0.93,
                        "words": [
                            {"word": "今天", "start": 0.1, "end": 0.6},
                            {"word": "天氣很好", "start": 0.7, "end": 1.8}
                        ]
                    }]
                }]
            }
        }"#;

        let transcript = HttpBatchBackend::parse_transcript(body).unwrap();
        assert_eq!(transcript.text, "今天天氣很好");
        assert!(transcript.is_final);
        assert_eq!(transcript.words.len(), 2);
        assert!((transcript.words[1].end_sec - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_streaming_shape_tolerated() {
        let body = r#"{"channel":{"alternatives":[{"transcript":"hi","confidence":0.5}]}}"#;
        let transcript = HttpBatchBackend::parse_transcript(body).unwrap();
        assert_eq!(transcript.text, "hi");
        assert!(transcript.words.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(HttpBatchBackend::parse_transcript("{}").is_err());
        assert!(HttpBatchBackend::parse_transcript("not json").is_err());
    }
}
