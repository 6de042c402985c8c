// Filesystem layout under the application data directory.
//
// jobs.sqlite                              - job store database
// jobs/<jobId>/source/source-audio[.ext]   - copied original
// jobs/<jobId>/chunks/chunk_####.m4a       - rendered chunks
// jobs/<jobId>/checkpoints/*.json          - crash-safe snapshots

use std::path::{Path, PathBuf};

use crate::error::Result;

pub const APP_NAME: &str = "Udskrift";

/// Media formats accepted at the job boundary.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "wav", "mp4", "mov"];

/// Resolves all persistent paths from a single root directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root under the platform data directory.
    pub fn default_root() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);
        Self::new(base)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("jobs.sqlite")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(job_id)
    }

    pub fn source_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("source")
    }

    pub fn chunks_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("chunks")
    }

    pub fn checkpoints_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("checkpoints")
    }

    /// Path the original is copied to inside the job directory, keeping the
    /// original extension when there is one.
    pub fn source_copy_path(&self, job_id: &str, original: &Path) -> PathBuf {
        let name = match original.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("source-audio.{}", ext.to_lowercase()),
            None => "source-audio".to_string(),
        };
        self.source_dir(job_id).join(name)
    }

    pub fn chunk_path(&self, job_id: &str, idx: i64) -> PathBuf {
        self.chunks_dir(job_id).join(format!("chunk_{:04}.m4a", idx))
    }

    /// Create the per-job directory tree.
    pub fn ensure_job_dirs(&self, job_id: &str) -> Result<()> {
        std::fs::create_dir_all(self.source_dir(job_id))?;
        std::fs::create_dir_all(self.chunks_dir(job_id))?;
        std::fs::create_dir_all(self.checkpoints_dir(job_id))?;
        Ok(())
    }
}

/// Whether a path has one of the supported media extensions.
pub fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lowered = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.iter().any(|s| *s == lowered)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = AppPaths::new("/data/app");
        assert_eq!(paths.db_path(), PathBuf::from("/data/app/jobs.sqlite"));
        assert_eq!(
            paths.chunk_path("job-1", 7),
            PathBuf::from("/data/app/jobs/job-1/chunks/chunk_0007.m4a")
        );
        assert_eq!(
            paths.checkpoints_dir("job-1"),
            PathBuf::from("/data/app/jobs/job-1/checkpoints")
        );
    }

    #[test]
    fn test_source_copy_keeps_extension() {
        let paths = AppPaths::new("/data/app");
        assert_eq!(
            paths.source_copy_path("j", Path::new("/tmp/Interview MED Bo.MP3")),
            PathBuf::from("/data/app/jobs/j/source/source-audio.mp3")
        );
        assert_eq!(
            paths.source_copy_path("j", Path::new("/tmp/raw")),
            PathBuf::from("/data/app/jobs/j/source/source-audio")
        );
    }

    #[test]
    fn test_supported_media() {
        assert!(is_supported_media(Path::new("a.mp3")));
        assert!(is_supported_media(Path::new("b.MOV")));
        assert!(!is_supported_media(Path::new("c.flac")));
        assert!(!is_supported_media(Path::new("noext")));
    }
}
