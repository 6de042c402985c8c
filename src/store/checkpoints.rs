// Durable JSON checkpoints for forensic recovery.
// Written atomically: temp file in the same directory, then rename.

use std::path::PathBuf;

use serde::Serialize;

use super::Store;
use crate::error::Result;

impl Store {
    /// Write `<checkpoints>/<name>` for a job. The payload is pretty-printed
    /// with sorted keys so snapshots diff cleanly between runs.
    pub fn write_checkpoint<T: Serialize>(&self, job_id: &str, name: &str, payload: &T) -> Result<PathBuf> {
        let dir = self.paths().checkpoints_dir(job_id);
        std::fs::create_dir_all(&dir)?;

        // Round-tripping through Value sorts object keys.
        let value = serde_json::to_value(payload)?;
        let body = serde_json::to_string_pretty(&value)?;

        let path = dir.join(name);
        let tmp = dir.join(format!("{}.tmp", name));
        std::fs::write(&tmp, body.as_bytes())?;
        std::fs::rename(&tmp, &path)?;

        log::debug!("Wrote checkpoint {:?}", path);
        Ok(path)
    }
}
