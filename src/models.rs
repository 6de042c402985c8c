// Data model for jobs, chunks and transcript segments.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job. Terminal states are `Ready` and `Failed`;
/// `PausedRetryRemote` is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Preprocessing,
    TranscribingRemote,
    TranscribingFallback,
    Merging,
    Ready,
    PausedRetryRemote,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preprocessing => "preprocessing",
            JobStatus::TranscribingRemote => "transcribing_remote",
            JobStatus::TranscribingFallback => "transcribing_fallback",
            JobStatus::Merging => "merging",
            JobStatus::Ready => "ready",
            JobStatus::PausedRetryRemote => "paused_retry_remote",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "preprocessing" => Some(JobStatus::Preprocessing),
            "transcribing_remote" => Some(JobStatus::TranscribingRemote),
            "transcribing_fallback" => Some(JobStatus::TranscribingFallback),
            "merging" => Some(JobStatus::Merging),
            "ready" => Some(JobStatus::Ready),
            "paused_retry_remote" => Some(JobStatus::PausedRetryRemote),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Per-chunk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStatus {
    Queued,
    TranscribingRemote,
    TranscribingFallback,
    Done,
    PausedRetryRemote,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::TranscribingRemote => "transcribing_remote",
            ChunkStatus::TranscribingFallback => "transcribing_fallback",
            ChunkStatus::Done => "done",
            ChunkStatus::PausedRetryRemote => "paused_retry_remote",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ChunkStatus::Queued),
            "transcribing_remote" => Some(ChunkStatus::TranscribingRemote),
            "transcribing_fallback" => Some(ChunkStatus::TranscribingFallback),
            "done" => Some(ChunkStatus::Done),
            "paused_retry_remote" => Some(ChunkStatus::PausedRetryRemote),
            "failed" => Some(ChunkStatus::Failed),
            _ => None,
        }
    }
}

/// Which engine produced a chunk's transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineKind {
    Remote,
    Fallback,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Remote => "remote",
            EngineKind::Fallback => "fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "remote" => Some(EngineKind::Remote),
            "fallback" => Some(EngineKind::Fallback),
            _ => None,
        }
    }
}

/// Final two-valued speaker label: interviewer or participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    I,
    D,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::I => "I",
            Role::D => "D",
        }
    }

    pub fn swapped(&self) -> Role {
        match self {
            Role::I => Role::D,
            Role::D => Role::I,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "I" => Some(Role::I),
            "D" => Some(Role::D),
            _ => None,
        }
    }
}

/// Per-chunk transcription fragment before merging. Times are chunk-local at
/// transcription time and globalized before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    #[serde(rename = "speaker")]
    pub speaker_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl RawSegment {
    pub fn new(start_sec: f64, end_sec: f64, speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start_sec,
            end_sec: end_sec.max(start_sec),
            speaker_id: speaker_id.into(),
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Shift chunk-local times into the global time base.
    pub fn globalized(&self, chunk_start_sec: f64) -> RawSegment {
        RawSegment {
            start_sec: round_ms(chunk_start_sec + self.start_sec),
            end_sec: round_ms(chunk_start_sec + self.end_sec),
            speaker_id: self.speaker_id.clone(),
            text: self.text.clone(),
            confidence: self.confidence,
        }
    }
}

/// Post-merge, role-labeled transcript entry with global times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One planned time slice of the source audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPlan {
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub path: String,
    pub sha256: String,
}

impl ChunkPlan {
    pub fn duration_sec(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// A job row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_path: String,
    pub source_name: String,
    pub source_hash: String,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
    pub duration_sec: f64,
    pub chunks_total: i64,
    pub chunks_done: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<Segment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub interviewer_count: i64,
    pub participant_count: i64,
}

/// A chunk row as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRow {
    pub job_id: String,
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_hash: Option<String>,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,
    pub attempt_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<RawSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub updated_at: String,
}

/// How many interviewers and participants took part in the recording.
/// Both counts are clamped to at least one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerRoleConfig {
    pub interviewers: i64,
    pub participants: i64,
}

impl SpeakerRoleConfig {
    pub fn new(interviewers: i64, participants: i64) -> Self {
        Self {
            interviewers: interviewers.max(1),
            participants: participants.max(1),
        }
    }
}

impl Default for SpeakerRoleConfig {
    fn default() -> Self {
        Self { interviewers: 1, participants: 1 }
    }
}

/// The read-model handed to editors and exporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    pub source_path: String,
    pub duration_sec: f64,
    pub transcript: Vec<Segment>,
}

/// Round a time value to milliseconds.
pub fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Preprocessing,
            JobStatus::TranscribingRemote,
            JobStatus::TranscribingFallback,
            JobStatus::Merging,
            JobStatus::Ready,
            JobStatus::PausedRetryRemote,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_segment_json_uses_camel_case() {
        let segment = Segment {
            start_sec: 1.5,
            end_sec: 2.0,
            speaker: Role::I,
            text: "Hej".to_string(),
            confidence: None,
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"startSec\""));
        assert!(json.contains("\"speaker\":\"I\""));
        assert!(!json.contains("confidence"));
    }

    #[test]
    fn test_globalized_rounds_to_ms() {
        let raw = RawSegment::new(0.12345, 1.98765, "speaker_0", "hej");
        let shifted = raw.globalized(240.0);
        assert_eq!(shifted.start_sec, 240.123);
        assert_eq!(shifted.end_sec, 241.988);
    }

    #[test]
    fn test_role_config_clamps_to_one() {
        let config = SpeakerRoleConfig::new(0, -3);
        assert_eq!(config.interviewers, 1);
        assert_eq!(config.participants, 1);
    }
}
