// Remote transcription engine: two passes per chunk against a diarizing
// speech API, with response-format negotiation and retry/backoff.

mod payload;

pub use payload::{merge_text_with_speakers, parse_diarized_segments, parse_text_segments};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::TranscribeConfig;
use crate::error::{Error, Result};
use crate::models::RawSegment;

/// Ceiling for the doubling retry backoff.
const MAX_BACKOFF_SEC: f64 = 12.0;

/// Response formats tried for the diarization pass, in order.
const DIARIZE_FORMATS: [&str; 2] = ["diarized_json", "json"];

/// One multipart upload. Field order is part of the contract: model,
/// language, response_format, optional chunking_strategy, then the file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub model: String,
    pub language: String,
    pub response_format: String,
    pub chunking_strategy: Option<String>,
    pub file_path: PathBuf,
}

/// Transport failure, with timeouts classified distinctly.
#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout,
    Request(String),
}

/// Seam between the engine and the HTTP layer; tests script it.
#[async_trait]
pub trait TranscriptionTransport: Send + Sync {
    /// Upload a chunk and return the 2xx response body.
    async fn upload(&self, request: &UploadRequest) -> std::result::Result<String, TransportError>;
}

/// Production transport: multipart POST to `/v1/audio/transcriptions`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str, request_timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_sec))
            .build()
            .map_err(|e| Error::RemoteRequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionTransport for HttpTransport {
    async fn upload(&self, request: &UploadRequest) -> std::result::Result<String, TransportError> {
        let bytes = tokio::fs::read(&request.file_path)
            .await
            .map_err(|e| TransportError::Request(format!("Kunne ikke læse chunk-fil: {}", e)))?;
        let file_name = request
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chunk.m4a")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mp4")
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", request.model.clone())
            .text("language", request.language.clone())
            .text("response_format", request.response_format.clone());
        if let Some(strategy) = &request.chunking_strategy {
            form = form.text("chunking_strategy", strategy.clone());
        }
        form = form.part("file", part);

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Request(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(body)
    }
}

/// Two-pass remote transcription with retries.
pub struct RemoteEngine {
    transport: Arc<dyn TranscriptionTransport>,
    config: TranscribeConfig,
}

impl RemoteEngine {
    pub fn new(transport: Arc<dyn TranscriptionTransport>, config: TranscribeConfig) -> Self {
        Self { transport, config }
    }

    /// Engine backed by the production HTTP transport.
    pub fn with_http(config: TranscribeConfig, api_key: &str) -> Result<Self> {
        let transport = HttpTransport::new(&config.api_base, api_key, config.request_timeout_sec)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Transcribe one chunk. Returns the chunk-local segments and the mean
    /// confidence across segments that carry one.
    pub async fn transcribe_chunk(&self, chunk_path: &Path) -> Result<(Vec<RawSegment>, Option<f64>)> {
        let max_retries = self.config.max_retries.max(1);
        let mut backoff = 1.0f64;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=max_retries {
            match self.attempt(chunk_path).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    log::warn!(
                        "Remote transcription attempt {}/{} failed for {:?}: {}",
                        attempt,
                        max_retries,
                        chunk_path,
                        e
                    );
                    last_error = Some(e);
                    if attempt >= max_retries {
                        break;
                    }
                    let jitter = rand::thread_rng().gen_range(0.05..0.40);
                    tokio::time::sleep(Duration::from_secs_f64(backoff + jitter)).await;
                    backoff = (backoff * 2.0).min(MAX_BACKOFF_SEC);
                }
            }
        }

        // Keep the inner message intact so a timeout text is never wrapped
        // twice on its way out.
        Err(match last_error {
            Some(Error::RemoteRequestFailed(message)) => Error::RemoteRequestFailed(format!(
                "Transskription fejlede efter {} forsøg: {}",
                max_retries, message
            )),
            Some(other) => other,
            None => Error::RemoteRequestFailed(format!(
                "Transskription fejlede efter {} forsøg",
                max_retries
            )),
        })
    }

    async fn attempt(&self, chunk_path: &Path) -> Result<(Vec<RawSegment>, Option<f64>)> {
        let diarized_body = self.request_diarized_payload(chunk_path).await?;

        let text_request = UploadRequest {
            model: self.config.text_model.clone(),
            language: self.config.language.clone(),
            response_format: "verbose_json".to_string(),
            chunking_strategy: None,
            file_path: chunk_path.to_path_buf(),
        };
        let text_body = self
            .transport
            .upload(&text_request)
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let diarized_payload: serde_json::Value = serde_json::from_str(&diarized_body)
            .map_err(|e| Error::InvalidResponse(format!("diarize-svar er ikke JSON: {}", e)))?;
        let text_payload: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|e| Error::InvalidResponse(format!("tekst-svar er ikke JSON: {}", e)))?;

        let diarized_segments = parse_diarized_segments(&diarized_payload);
        let text_segments = parse_text_segments(&text_payload);

        let segments = merge_text_with_speakers(text_segments, diarized_segments);
        if segments.is_empty() {
            return Err(Error::InvalidResponse(
                "API-svaret indeholdt ingen segmenter".to_string(),
            ));
        }

        let confidences: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
        let avg_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        Ok((segments, avg_confidence))
    }

    /// Diarization pass. The diarizer requires a chunking strategy for audio
    /// longer than 30 s, and not every deployment accepts `diarized_json`;
    /// format errors fall through to plain `json`.
    async fn request_diarized_payload(&self, chunk_path: &Path) -> Result<String> {
        let mut last_error: Option<Error> = None;

        for response_format in DIARIZE_FORMATS {
            let request = UploadRequest {
                model: self.config.diarize_model.clone(),
                language: self.config.language.clone(),
                response_format: response_format.to_string(),
                chunking_strategy: Some("auto".to_string()),
                file_path: chunk_path.to_path_buf(),
            };

            match self.transport.upload(&request).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let mapped = self.map_transport_error(e);
                    if is_response_format_error(&mapped) {
                        last_error = Some(mapped);
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::RemoteRequestFailed("Kunne ikke hente diarized payload".to_string())
        }))
    }

    fn map_transport_error(&self, error: TransportError) -> Error {
        match error {
            TransportError::Timeout => Error::RemoteRequestFailed(format!(
                "Forespørgslen timed out efter {} sekunder",
                self.config.request_timeout_sec
            )),
            TransportError::Request(message) => Error::RemoteRequestFailed(message),
        }
    }
}

fn is_response_format_error(error: &Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("response_format") || message.contains("unsupported_value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that replays a scripted list of outcomes and records every
    /// upload it sees.
    struct ScriptedTransport {
        script: Mutex<Vec<std::result::Result<String, TransportError>>>,
        seen: Mutex<Vec<UploadRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn observed_formats(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.response_format.clone())
                .collect()
        }

        fn upload_count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TranscriptionTransport for ScriptedTransport {
        async fn upload(&self, request: &UploadRequest) -> std::result::Result<String, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(TransportError::Request("script exhausted".to_string()));
            }
            script.remove(0)
        }
    }

    fn diarize_body() -> String {
        r#"{"segments": [{"start": 0.0, "end": 2.0, "speaker": "speaker_0", "text": "pladsholder"}]}"#
            .to_string()
    }

    fn text_body() -> String {
        r#"{"segments": [{"start": 0.0, "end": 2.0, "text": "Hej fra tekstpasset", "avg_logprob": -0.1}]}"#
            .to_string()
    }

    fn engine_with(
        transport: Arc<ScriptedTransport>,
        max_retries: u32,
        request_timeout_sec: u64,
    ) -> RemoteEngine {
        let config = TranscribeConfig {
            max_retries,
            request_timeout_sec,
            ..Default::default()
        };
        RemoteEngine::new(transport, config)
    }

    #[tokio::test]
    async fn test_timeout_then_success_uses_three_uploads() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Ok(diarize_body()),
            Ok(text_body()),
        ]);
        let engine = engine_with(transport.clone(), 2, 600);

        let (segments, avg) = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker_id, "speaker_0");
        assert_eq!(segments[0].text, "Hej fra tekstpasset");
        assert!(avg.is_some());
        assert_eq!(transport.upload_count(), 3);
    }

    #[tokio::test]
    async fn test_format_negotiation_order() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Request(
                "HTTP 400: response_format diarized_json is an unsupported_value".to_string(),
            )),
            Ok(diarize_body()),
            Ok(text_body()),
        ]);
        let engine = engine_with(transport.clone(), 1, 600);

        let (segments, _) = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(
            transport.observed_formats(),
            vec!["diarized_json", "json", "verbose_json"]
        );
    }

    #[tokio::test]
    async fn test_timeout_message_contains_seconds_once() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let engine = engine_with(transport.clone(), 2, 123);

        let error = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap_err();
        let message = error.to_string();

        assert!(message.contains("timed out efter 123"), "got: {}", message);
        assert_eq!(message.matches("Fjerntransskription fejlede").count(), 1);
        assert_eq!(transport.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_http_error_surfaces_code_and_body() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Request(
            "HTTP 500: internal".to_string(),
        ))]);
        let engine = engine_with(transport, 1, 600);

        let error = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::RemoteRequestFailed(_)));
        assert!(error.to_string().contains("HTTP 500: internal"));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_invalid_response() {
        let transport = ScriptedTransport::new(vec![Ok("{}".to_string()), Ok("{}".to_string())]);
        let engine = engine_with(transport, 1, 600);

        let error = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_diarization_alone_when_text_pass_empty() {
        let transport = ScriptedTransport::new(vec![Ok(diarize_body()), Ok("{}".to_string())]);
        let engine = engine_with(transport, 1, 600);

        let (segments, _) = engine
            .transcribe_chunk(Path::new("/tmp/chunk_0000.m4a"))
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "pladsholder");
    }
}
