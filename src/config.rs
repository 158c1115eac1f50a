//! Session configuration.
//!
//! One `CoreConfig` value is constructed at session start and handed to each
//! component; modules read the fields they need by name.

/// Configuration for a recognition session.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Hostname of the recognition service.
    pub service_host: String,
    /// Backend model identifier.
    pub model: String,
    /// BCP-47 language code, or "multi" for auto-detect.
    pub language: String,
    /// Emit interim transcripts.
    pub interim_results: bool,
    /// Silence duration the backend uses to finalize an utterance.
    pub endpointing_ms: u32,
    /// Batch-mode window overlap.
    pub overlap_duration_ms: u32,
    /// Overlap-dedup similarity threshold.
    pub similarity_threshold: f64,
    /// Maximum gap between segments for sentence merging.
    pub merge_time_gap_sec: f64,
    /// Maximum characters considered by text similarity.
    pub max_compare_length: usize,
    /// Keep-alive cadence while audio frames are paused.
    pub keep_alive_interval_ms: u64,
    /// Some deployments treat any text message on the audio channel as a
    /// schema error; set false for those and rely on close-on-silence.
    pub allow_keepalive: bool,
    /// With keep-alive disabled, close the session after this much silence.
    pub silence_close_after_sec: u64,
    /// Reconnect attempt cap.
    pub reconnect_max_retries: u32,
    /// Linear backoff base: delay = base * attempt.
    pub reconnect_base_delay_ms: u64,
    /// How long the aligner retains recent transcripts.
    pub segment_retention_sec: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            service_host: "api.deepgram.com".to_string(),
            model: "nova-2".to_string(),
            language: "zh-TW".to_string(),
            interim_results: true,
            endpointing_ms: 300,
            overlap_duration_ms: 1000,
            similarity_threshold: 0.8,
            merge_time_gap_sec: 0.3,
            max_compare_length: 100,
            keep_alive_interval_ms: 5000,
            allow_keepalive: true,
            silence_close_after_sec: 10,
            reconnect_max_retries: 5,
            reconnect_base_delay_ms: 1000,
            segment_retention_sec: 30.0,
        }
    }
}

impl CoreConfig {
    /// Create a config for a given model and language preset.
    pub fn new(model: &str, language: &str) -> Self {
        Self {
            model: model.to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    /// Override the service host (useful for test servers).
    pub fn with_host(mut self, host: &str) -> Self {
        self.service_host = host.to_string();
        self
    }

    pub fn overlap_duration_sec(&self) -> f64 {
        self.overlap_duration_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.model, "nova-2");
        assert_eq!(config.language, "zh-TW");
        assert_eq!(config.endpointing_ms, 300);
        assert_eq!(config.reconnect_max_retries, 5);
        assert_eq!(config.reconnect_base_delay_ms, 1000);
        assert!((config.overlap_duration_sec() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_preset_ctor() {
        let config = CoreConfig::new("nova-2-general", "en-US").with_host("localhost:8080");
        assert_eq!(config.model, "nova-2-general");
        assert_eq!(config.language, "en-US");
        assert_eq!(config.service_host, "localhost:8080");
    }
}
