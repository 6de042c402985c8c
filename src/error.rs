//! Error types for the transcription pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Library-level error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kildefilen findes ikke: {0}")]
    SourceMissing(PathBuf),

    #[error("API-nøgle mangler. Angiv en nøgle for at bruge fjerntransskription.")]
    ApiKeyMissing,

    #[error("Et andet job kører allerede")]
    Busy,

    #[error("Ugyldigt svar fra transskriptions-API: {0}")]
    InvalidResponse(String),

    #[error("Fjerntransskription fejlede: {0}")]
    RemoteRequestFailed(String),

    #[error("Lokal fallback er ikke tilgængelig: {0}")]
    FallbackUnavailable(String),

    #[error("Lav taler-sikkerhed i fallback: {0}")]
    LowSpeakerConfidence(String),

    #[error("{0}")]
    ParsingFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
