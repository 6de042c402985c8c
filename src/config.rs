// Pipeline configuration with the production defaults.

use serde::{Deserialize, Serialize};

/// Tuning knobs for chunking, the remote API and the fallback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscribeConfig {
    /// Target chunk length in seconds.
    pub chunk_duration_sec: f64,
    /// Overlap between consecutive chunks in seconds.
    pub overlap_sec: f64,
    /// Wall-clock bound on the media duration probe.
    pub probe_timeout_sec: u64,
    /// Attempts per chunk against the remote API.
    pub max_retries: u32,
    /// Per-request timeout against the remote API.
    pub request_timeout_sec: u64,
    /// Transcription language hint.
    pub language: String,
    /// Base URL of the transcription API.
    pub api_base: String,
    /// Model used for the diarization pass.
    pub diarize_model: String,
    /// Model used for the text pass.
    pub text_model: String,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            chunk_duration_sec: 240.0,
            overlap_sec: 1.5,
            probe_timeout_sec: 25,
            max_retries: 5,
            request_timeout_sec: 600,
            language: "da".to_string(),
            api_base: "https://api.openai.com".to_string(),
            diarize_model: "gpt-4o-transcribe-diarize".to_string(),
            text_model: "whisper-1".to_string(),
        }
    }
}

impl TranscribeConfig {
    /// Step between chunk starts. Never smaller than one second so the plan
    /// always advances.
    pub fn chunk_step_sec(&self) -> f64 {
        (self.chunk_duration_sec - self.overlap_sec).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranscribeConfig::default();
        assert_eq!(config.chunk_duration_sec, 240.0);
        assert_eq!(config.overlap_sec, 1.5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.chunk_step_sec(), 238.5);
    }

    #[test]
    fn test_step_never_below_one_second() {
        let config = TranscribeConfig {
            chunk_duration_sec: 2.0,
            overlap_sec: 5.0,
            ..Default::default()
        };
        assert_eq!(config.chunk_step_sec(), 1.0);
    }
}
