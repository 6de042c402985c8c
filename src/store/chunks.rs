// Chunk repository: upsert and listing for per-chunk progress rows.

use rusqlite::params;

use super::{now_iso, Store};
use crate::error::{Error, Result};
use crate::models::{ChunkRow, ChunkStatus, EngineKind, RawSegment};

/// Full row for an upsert. Unspecified fields are not preserved: the row is
/// replaced wholesale, which is what makes retries idempotent.
#[derive(Debug, Clone)]
pub struct ChunkUpsert<'a> {
    pub job_id: &'a str,
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: &'a str,
    pub chunk_hash: Option<&'a str>,
    pub status: ChunkStatus,
    pub engine: Option<EngineKind>,
    pub attempt_count: i64,
    pub transcript: Option<&'a [RawSegment]>,
    pub confidence: Option<f64>,
}

impl Store {
    /// Insert or fully replace a chunk row keyed on (job_id, idx).
    pub fn upsert_chunk(&self, chunk: ChunkUpsert<'_>) -> Result<()> {
        let transcript_json = match chunk.transcript {
            Some(segments) => Some(serde_json::to_string(segments)?),
            None => None,
        };

        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO chunks (
                    job_id, idx, start_sec, end_sec, chunk_path, chunk_hash,
                    status, engine, attempt_count, transcript_json, confidence, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(job_id, idx)
                DO UPDATE SET
                    start_sec = excluded.start_sec,
                    end_sec = excluded.end_sec,
                    chunk_path = excluded.chunk_path,
                    chunk_hash = excluded.chunk_hash,
                    status = excluded.status,
                    engine = excluded.engine,
                    attempt_count = excluded.attempt_count,
                    transcript_json = excluded.transcript_json,
                    confidence = excluded.confidence,
                    updated_at = excluded.updated_at
                "#,
                params![
                    chunk.job_id,
                    chunk.idx,
                    chunk.start_sec,
                    chunk.end_sec,
                    chunk.chunk_path,
                    chunk.chunk_hash,
                    chunk.status.as_str(),
                    chunk.engine.map(|e| e.as_str()),
                    chunk.attempt_count,
                    transcript_json,
                    chunk.confidence,
                    now_iso(),
                ],
            )?;
            Ok(())
        })
    }

    /// All chunk rows of a job in ascending index order.
    pub fn list_chunks(&self, job_id: &str) -> Result<Vec<ChunkRow>> {
        let raw_rows: Vec<(ChunkRow, Option<String>)> = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT job_id, idx, start_sec, end_sec, chunk_path, chunk_hash,
                       status, engine, attempt_count, transcript_json, confidence, updated_at
                FROM chunks
                WHERE job_id = ?
                ORDER BY idx ASC
                "#,
            )?;

            let rows = stmt.query_map(params![job_id], |row| {
                let status_str: String = row.get(6)?;
                let status = ChunkStatus::parse(&status_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        format!("unknown chunk status: {}", status_str).into(),
                    )
                })?;
                let engine = row
                    .get::<_, Option<String>>(7)?
                    .as_deref()
                    .and_then(EngineKind::parse);

                let chunk = ChunkRow {
                    job_id: row.get(0)?,
                    idx: row.get(1)?,
                    start_sec: row.get(2)?,
                    end_sec: row.get(3)?,
                    chunk_path: row.get(4)?,
                    chunk_hash: row.get(5)?,
                    status,
                    engine,
                    attempt_count: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
                    transcript: None,
                    confidence: row.get(10)?,
                    updated_at: row.get(11)?,
                };
                let transcript_json: Option<String> = row.get(9)?;
                Ok((chunk, transcript_json))
            })?;

            let mut collected = Vec::new();
            for row in rows {
                collected.push(row.map_err(Error::Database)?);
            }
            Ok(collected)
        })?;

        let mut chunks = Vec::with_capacity(raw_rows.len());
        for (mut chunk, transcript_json) in raw_rows {
            if let Some(json) = transcript_json {
                if !json.is_empty() {
                    chunk.transcript = Some(serde_json::from_str(&json)?);
                }
            }
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpeakerRoleConfig;
    use crate::paths::AppPaths;
    use tempfile::tempdir;

    fn store_with_job(dir: &std::path::Path) -> Store {
        let store = Store::open(AppPaths::new(dir)).unwrap();
        store
            .create_job("job-1", "/tmp/a.mp3", "a.mp3", "h", SpeakerRoleConfig::default())
            .unwrap();
        store
    }

    fn queued_chunk(idx: i64) -> ChunkUpsert<'static> {
        ChunkUpsert {
            job_id: "job-1",
            idx,
            start_sec: idx as f64 * 238.5,
            end_sec: idx as f64 * 238.5 + 240.0,
            chunk_path: "/tmp/chunk.m4a",
            chunk_hash: Some("abc"),
            status: ChunkStatus::Queued,
            engine: None,
            attempt_count: 0,
            transcript: None,
            confidence: None,
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let dir = tempdir().unwrap();
        let store = store_with_job(dir.path());

        store.upsert_chunk(queued_chunk(1)).unwrap();
        store.upsert_chunk(queued_chunk(0)).unwrap();

        let chunks = store.list_chunks("job-1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].idx, 0);
        assert_eq!(chunks[1].idx, 1);
        assert_eq!(chunks[0].status, ChunkStatus::Queued);
        assert!(chunks[0].engine.is_none());
    }

    #[test]
    fn test_upsert_replaces_full_row() {
        let dir = tempdir().unwrap();
        let store = store_with_job(dir.path());

        store.upsert_chunk(queued_chunk(0)).unwrap();

        let segments = vec![RawSegment::new(0.0, 2.0, "speaker_0", "Hej").with_confidence(Some(0.8))];
        store
            .upsert_chunk(ChunkUpsert {
                status: ChunkStatus::Done,
                engine: Some(EngineKind::Remote),
                attempt_count: 2,
                transcript: Some(&segments),
                confidence: Some(0.8),
                ..queued_chunk(0)
            })
            .unwrap();

        let chunks = store.list_chunks("job-1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].status, ChunkStatus::Done);
        assert_eq!(chunks[0].engine, Some(EngineKind::Remote));
        assert_eq!(chunks[0].attempt_count, 2);
        let transcript = chunks[0].transcript.as_ref().unwrap();
        assert_eq!(transcript[0].text, "Hej");
        assert_eq!(transcript[0].speaker_id, "speaker_0");

        // Replacing again without a transcript wipes it: full-row semantics.
        store.upsert_chunk(queued_chunk(0)).unwrap();
        assert!(store.list_chunks("job-1").unwrap()[0].transcript.is_none());
    }

    #[test]
    fn test_deleting_job_cascades_to_chunks() {
        let dir = tempdir().unwrap();
        let store = store_with_job(dir.path());
        store.upsert_chunk(queued_chunk(0)).unwrap();

        store
            .with_connection(|conn| {
                conn.execute("DELETE FROM jobs WHERE id = 'job-1'", [])?;
                Ok(())
            })
            .unwrap();

        assert!(store.list_chunks("job-1").unwrap().is_empty());
    }
}
