// Job repository: CRUD and lifecycle queries for job rows.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{now_iso, Store};
use crate::error::{Error, Result};
use crate::models::{Job, JobResult, JobStatus, Segment, SpeakerRoleConfig};

/// Statuses a job can be picked up from after a crash or restart.
const INCOMPLETE_STATUSES: &str = "'queued', 'preprocessing', 'transcribing_remote', \
     'transcribing_fallback', 'merging', 'paused_retry_remote'";

/// Same set minus `paused_retry_remote`, which needs a human decision.
const AUTO_RESUMABLE_STATUSES: &str = "'queued', 'preprocessing', 'transcribing_remote', \
     'transcribing_fallback', 'merging'";

/// Slim row used for listing finished jobs without loading transcripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyJobSummary {
    pub job_id: String,
    pub source_path: String,
    pub source_name: String,
    pub updated_at: String,
    pub duration_sec: f64,
    pub interviewer_count: i64,
    pub participant_count: i64,
}

impl Store {
    /// Create a new job row in `queued` state.
    pub fn create_job(
        &self,
        job_id: &str,
        source_path: &str,
        source_name: &str,
        source_hash: &str,
        roles: SpeakerRoleConfig,
    ) -> Result<()> {
        let stamp = now_iso();
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO jobs (
                    id, source_path, source_name, source_hash, status,
                    created_at, updated_at, interviewer_count, participant_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    job_id,
                    source_path,
                    source_name,
                    source_hash,
                    JobStatus::Queued.as_str(),
                    stamp,
                    stamp,
                    roles.interviewers.max(1),
                    roles.participants.max(1),
                ],
            )?;
            Ok(())
        })
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.with_connection(|conn| {
            query_single_job(conn, "SELECT * FROM jobs WHERE id = ?", params![job_id])
        })
    }

    /// Most recently touched job that has not reached a terminal state.
    pub fn latest_incomplete_job(&self) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY datetime(updated_at) DESC LIMIT 1",
            INCOMPLETE_STATUSES
        );
        self.with_connection(|conn| query_single_job(conn, &sql, params![]))
    }

    /// Most recently touched job that can be resumed without operator input.
    pub fn latest_auto_resumable_job(&self) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY datetime(updated_at) DESC LIMIT 1",
            AUTO_RESUMABLE_STATUSES
        );
        self.with_connection(|conn| query_single_job(conn, &sql, params![]))
    }

    /// Finished jobs, newest first. The limit is clamped to [1, 500].
    pub fn list_ready_jobs(&self, limit: i64) -> Result<Vec<ReadyJobSummary>> {
        let safe_limit = limit.clamp(1, 500);
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, source_path, source_name, updated_at,
                       duration_sec, interviewer_count, participant_count
                FROM jobs
                WHERE status = 'ready'
                ORDER BY datetime(updated_at) DESC
                LIMIT ?
                "#,
            )?;

            let rows = stmt.query_map(params![safe_limit], |row| {
                Ok(ReadyJobSummary {
                    job_id: row.get(0)?,
                    source_path: row.get(1)?,
                    source_name: row.get(2)?,
                    updated_at: row.get(3)?,
                    duration_sec: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    interviewer_count: row.get::<_, Option<i64>>(5)?.unwrap_or(1),
                    participant_count: row.get::<_, Option<i64>>(6)?.unwrap_or(1),
                })
            })?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
    }

    /// Update job status plus optional progress counters. Reaching `ready`
    /// clears any stored error message.
    pub fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        chunks_done: Option<i64>,
        chunks_total: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.with_connection(|conn| {
            let mut set_clauses = vec!["status = ?".to_string(), "updated_at = ?".to_string()];
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(status.as_str().to_string()), Box::new(now_iso())];

            if let Some(done) = chunks_done {
                set_clauses.push("chunks_done = ?".to_string());
                params_vec.push(Box::new(done));
            }
            if let Some(total) = chunks_total {
                set_clauses.push("chunks_total = ?".to_string());
                params_vec.push(Box::new(total));
            }
            if status == JobStatus::Ready {
                set_clauses.push("error_message = NULL".to_string());
            } else if let Some(message) = error_message {
                set_clauses.push("error_message = ?".to_string());
                params_vec.push(Box::new(message.to_string()));
            }

            params_vec.push(Box::new(job_id.to_string()));

            let query = format!("UPDATE jobs SET {} WHERE id = ?", set_clauses.join(", "));
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            conn.execute(&query, params_refs.as_slice())?;
            Ok(())
        })
    }

    /// Store the probed duration and the planned chunk count.
    pub fn update_job_metadata(&self, job_id: &str, duration_sec: f64, chunks_total: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE jobs SET duration_sec = ?, chunks_total = ?, updated_at = ? WHERE id = ?",
                params![duration_sec, chunks_total, now_iso(), job_id],
            )?;
            Ok(())
        })
    }

    /// Rename the display title of a finished job. Returns false when the job
    /// does not exist or is not ready.
    pub fn update_ready_job_source_name(&self, job_id: &str, source_name: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE jobs SET source_name = ?, updated_at = ? WHERE id = ? AND status = 'ready'",
                params![source_name, now_iso(), job_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Persist the merged transcript and move the job to the given status.
    /// Clears the error message, matching the ready invariant.
    pub fn set_final_transcript(
        &self,
        job_id: &str,
        transcript: &[Segment],
        status: JobStatus,
    ) -> Result<()> {
        let json = serde_json::to_string(transcript)?;
        self.with_connection(|conn| {
            conn.execute(
                r#"
                UPDATE jobs
                SET transcript_json = ?, status = ?, updated_at = ?, error_message = NULL
                WHERE id = ?
                "#,
                params![json, status.as_str(), now_iso(), job_id],
            )?;
            Ok(())
        })
    }

    /// The final transcript of a job, empty when none is stored yet.
    pub fn get_transcript(&self, job_id: &str) -> Result<Vec<Segment>> {
        let raw: Option<String> = self.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT transcript_json FROM jobs WHERE id = ?",
                params![job_id],
                |row| row.get(0),
            );
            match result {
                Ok(json) => Ok(json),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(Error::Database(e)),
            }
        })?;

        match raw {
            Some(json) if !json.is_empty() => Ok(serde_json::from_str(&json)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Flip I and D on every final segment and store the result.
    pub fn toggle_swap_roles(&self, job_id: &str) -> Result<Vec<Segment>> {
        let mut transcript = self.get_transcript(job_id)?;
        for segment in &mut transcript {
            segment.speaker = segment.speaker.swapped();
        }
        self.set_final_transcript(job_id, &transcript, JobStatus::Ready)?;
        Ok(transcript)
    }

    /// Combined read-model of a job and its transcript.
    pub fn read_job_result(&self, job_id: &str) -> Result<Option<JobResult>> {
        let job = match self.get_job(job_id)? {
            Some(job) => job,
            None => return Ok(None),
        };
        Ok(Some(JobResult {
            job_id: job.id,
            source_path: job.source_path,
            duration_sec: job.duration_sec,
            transcript: job.transcript.unwrap_or_default(),
        }))
    }

    /// Result of the most recently finished job, if any.
    pub fn latest_ready_result(&self) -> Result<Option<JobResult>> {
        let job_id: Option<String> = self.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT id FROM jobs WHERE status = 'ready' ORDER BY datetime(updated_at) DESC LIMIT 1",
                [],
                |row| row.get(0),
            );
            match result {
                Ok(id) => Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(Error::Database(e)),
            }
        })?;

        match job_id {
            Some(id) => self.read_job_result(&id),
            None => Ok(None),
        }
    }

    /// Delete a finished job row (chunks cascade) and its directory.
    pub fn delete_ready_job(&self, job_id: &str) -> Result<bool> {
        let deleted = self.with_connection(|conn| {
            let changed = conn.execute(
                "DELETE FROM jobs WHERE id = ? AND status = 'ready'",
                params![job_id],
            )?;
            Ok(changed > 0)
        })?;

        if deleted {
            self.remove_job_dir(job_id);
        }
        Ok(deleted)
    }

    /// Delete every finished job row and directory. Returns the count removed.
    pub fn delete_all_ready_jobs(&self) -> Result<usize> {
        let ids = self.ready_job_ids()?;
        self.with_connection(|conn| {
            conn.execute("DELETE FROM jobs WHERE status = 'ready'", [])?;
            Ok(())
        })?;
        for id in &ids {
            self.remove_job_dir(id);
        }
        Ok(ids.len())
    }

    /// Wipe every job row and the whole jobs directory.
    pub fn clear_all_data(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM jobs", [])?;
            Ok(())
        })?;

        let jobs_dir = self.paths().jobs_dir();
        if jobs_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&jobs_dir) {
                log::warn!("Failed to remove jobs directory {:?}: {}", jobs_dir, e);
            }
        }
        Ok(())
    }

    /// Remove the directories of finished jobs while keeping their rows.
    /// Fresh job starts call this to reclaim chunk storage.
    pub fn purge_ready_job_dirs(&self) -> Result<()> {
        for id in self.ready_job_ids()? {
            self.remove_job_dir(&id);
        }
        Ok(())
    }

    fn ready_job_ids(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM jobs WHERE status = 'ready'")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
    }

    fn remove_job_dir(&self, job_id: &str) {
        let dir = self.paths().job_dir(job_id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::warn!("Failed to remove job directory {:?}: {}", dir, e);
            } else {
                log::info!("Removed job directory: {:?}", dir);
            }
        }
    }
}

fn query_single_job(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Job>> {
    let result = conn.query_row(sql, params, map_job_row);
    match result {
        Ok((job, transcript_json)) => {
            let transcript = match transcript_json {
                Some(json) if !json.is_empty() => Some(serde_json::from_str(&json)?),
                _ => None,
            };
            Ok(Some(Job { transcript, ..job }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::Database(e)),
    }
}

/// Map a full jobs row. The transcript JSON is returned unparsed so callers
/// can surface parse failures through the crate error type.
fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Job, Option<String>)> {
    let status_str: String = row.get("status")?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown job status: {}", status_str).into(),
        )
    })?;

    let job = Job {
        id: row.get("id")?,
        source_path: row.get("source_path")?,
        source_name: row.get("source_name")?,
        source_hash: row.get("source_hash")?,
        status,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        duration_sec: row.get::<_, Option<f64>>("duration_sec")?.unwrap_or(0.0),
        chunks_total: row.get::<_, Option<i64>>("chunks_total")?.unwrap_or(0),
        chunks_done: row.get::<_, Option<i64>>("chunks_done")?.unwrap_or(0),
        transcript: None,
        error_message: row.get("error_message")?,
        interviewer_count: row.get::<_, Option<i64>>("interviewer_count")?.unwrap_or(1),
        participant_count: row.get::<_, Option<i64>>("participant_count")?.unwrap_or(1),
    };
    let transcript_json: Option<String> = row.get("transcript_json")?;
    Ok((job, transcript_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::paths::AppPaths;
    use tempfile::tempdir;

    fn open_store(dir: &std::path::Path) -> Store {
        Store::open(AppPaths::new(dir)).unwrap()
    }

    fn sample_transcript() -> Vec<Segment> {
        vec![
            Segment {
                start_sec: 0.0,
                end_sec: 3.0,
                speaker: Role::I,
                text: "Hvordan gik det?".to_string(),
                confidence: Some(0.9),
            },
            Segment {
                start_sec: 3.5,
                end_sec: 8.0,
                speaker: Role::D,
                text: "Det gik fint.".to_string(),
                confidence: None,
            },
        ]
    }

    #[test]
    fn test_create_and_get_job() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "deadbeef", SpeakerRoleConfig::new(2, 1))
            .unwrap();

        let job = store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.source_name, "a.mp3");
        assert_eq!(job.interviewer_count, 2);
        assert_eq!(job.participant_count, 1);
        assert!(job.transcript.is_none());

        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_incomplete_and_auto_resumable() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("paused", "/tmp/a.mp3", "a.mp3", "h1", SpeakerRoleConfig::default())
            .unwrap();
        store
            .update_job_status("paused", JobStatus::PausedRetryRemote, None, None, Some("lav sikkerhed"))
            .unwrap();

        // Paused jobs are resumable by hand but never auto-resumed.
        let incomplete = store.latest_incomplete_job().unwrap().unwrap();
        assert_eq!(incomplete.id, "paused");
        assert!(store.latest_auto_resumable_job().unwrap().is_none());

        store
            .create_job("running", "/tmp/b.mp3", "b.mp3", "h2", SpeakerRoleConfig::default())
            .unwrap();
        store
            .update_job_status("running", JobStatus::TranscribingRemote, Some(1), Some(4), None)
            .unwrap();

        let auto = store.latest_auto_resumable_job().unwrap().unwrap();
        assert_eq!(auto.id, "running");
        assert_eq!(auto.chunks_done, 1);
        assert_eq!(auto.chunks_total, 4);
    }

    #[test]
    fn test_ready_clears_error_message() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        store
            .update_job_status("job-1", JobStatus::Failed, None, None, Some("netværksfejl"))
            .unwrap();
        assert_eq!(
            store.get_job("job-1").unwrap().unwrap().error_message.as_deref(),
            Some("netværksfejl")
        );

        store
            .update_job_status("job-1", JobStatus::Ready, Some(2), Some(2), None)
            .unwrap();
        assert!(store.get_job("job-1").unwrap().unwrap().error_message.is_none());
    }

    #[test]
    fn test_swap_roles_is_involution() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        let transcript = sample_transcript();
        store
            .set_final_transcript("job-1", &transcript, JobStatus::Ready)
            .unwrap();

        let swapped = store.toggle_swap_roles("job-1").unwrap();
        assert_eq!(swapped[0].speaker, Role::D);
        assert_eq!(swapped[1].speaker, Role::I);

        let restored = store.toggle_swap_roles("job-1").unwrap();
        assert_eq!(restored, transcript);
    }

    #[test]
    fn test_read_job_result() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        store.update_job_metadata("job-1", 120.5, 2).unwrap();
        store
            .set_final_transcript("job-1", &sample_transcript(), JobStatus::Ready)
            .unwrap();

        let result = store.read_job_result("job-1").unwrap().unwrap();
        assert_eq!(result.job_id, "job-1");
        assert_eq!(result.duration_sec, 120.5);
        assert_eq!(result.transcript.len(), 2);

        let latest = store.latest_ready_result().unwrap().unwrap();
        assert_eq!(latest.job_id, "job-1");
    }

    #[test]
    fn test_list_ready_jobs_clamps_limit() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        for i in 0..3 {
            let id = format!("job-{}", i);
            store
                .create_job(&id, "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
                .unwrap();
            store
                .set_final_transcript(&id, &sample_transcript(), JobStatus::Ready)
                .unwrap();
        }

        // A non-positive limit still returns one row.
        assert_eq!(store.list_ready_jobs(0).unwrap().len(), 1);
        assert_eq!(store.list_ready_jobs(100).unwrap().len(), 3);
    }

    #[test]
    fn test_delete_ready_job_removes_directory() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        store.paths().ensure_job_dirs("job-1").unwrap();
        let job_dir = store.paths().job_dir("job-1");
        assert!(job_dir.exists());

        // Not ready yet: refuse.
        assert!(!store.delete_ready_job("job-1").unwrap());

        store
            .set_final_transcript("job-1", &sample_transcript(), JobStatus::Ready)
            .unwrap();
        assert!(store.delete_ready_job("job-1").unwrap());
        assert!(store.get_job("job-1").unwrap().is_none());
        assert!(!job_dir.exists());
    }

    #[test]
    fn test_rename_only_applies_to_ready_jobs() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        assert!(!store.update_ready_job_source_name("job-1", "Nyt navn").unwrap());

        store
            .set_final_transcript("job-1", &sample_transcript(), JobStatus::Ready)
            .unwrap();
        assert!(store.update_ready_job_source_name("job-1", "Nyt navn").unwrap());
        assert_eq!(store.get_job("job-1").unwrap().unwrap().source_name, "Nyt navn");
    }

    #[test]
    fn test_delete_all_ready_jobs_keeps_unfinished() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        for i in 0..2 {
            let id = format!("done-{}", i);
            store
                .create_job(&id, "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
                .unwrap();
            store
                .set_final_transcript(&id, &sample_transcript(), JobStatus::Ready)
                .unwrap();
        }
        store
            .create_job("running", "/tmp/b.mp3", "b.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();

        assert_eq!(store.delete_all_ready_jobs().unwrap(), 2);
        assert!(store.get_job("done-0").unwrap().is_none());
        assert!(store.get_job("running").unwrap().is_some());
    }

    #[test]
    fn test_clear_all_data() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        store.paths().ensure_job_dirs("job-1").unwrap();
        store.clear_all_data().unwrap();

        assert!(store.get_job("job-1").unwrap().is_none());
        assert!(!store.paths().jobs_dir().exists());
    }
}
