// udskrift - interview transcription pipeline core
//
// A resumable, chunk-based job orchestrator: audio is sliced into
// overlapping chunks, each chunk is transcribed by a remote diarizing speech
// API with an automatic local fallback, per-chunk progress is persisted in a
// SQLite store with JSON checkpoints, and the partial results are merged
// into a role-labeled interview transcript (interviewer "I", participant
// "D") with plain-text and DOCX export.
//
// The desktop shell, secret storage and AI post-editing live outside this
// crate; the coordinator is the only entrypoint they need.

pub mod chunker;
pub mod config;
pub mod coordinator;
pub mod editor;
pub mod error;
pub mod export;
pub mod fallback;
pub mod hashing;
pub mod merge;
pub mod models;
pub mod paths;
pub mod progress;
pub mod remote;
pub mod store;

pub use config::TranscribeConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{Error, Result};
pub use models::{
    ChunkPlan, ChunkRow, ChunkStatus, EngineKind, Job, JobResult, JobStatus, RawSegment, Role,
    Segment, SpeakerRoleConfig,
};
pub use paths::AppPaths;
pub use progress::{ProgressEvent, Stage};
pub use store::Store;
