// The job runner: preprocess, per-chunk transcription with fallback,
// checkpointing, merge and finalization. Chunks are processed in ascending
// index order; a chunk is never started before the previous one is done.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::broadcast;

use crate::chunker;
use crate::config::TranscribeConfig;
use crate::error::Error;
use crate::fallback::FallbackEngine;
use crate::hashing::sha256_file;
use crate::merge::merge_and_label;
use crate::models::{
    ChunkRow, ChunkStatus, EngineKind, JobStatus, RawSegment, SpeakerRoleConfig,
};
use crate::progress::{clamp_percent, ProgressEvent, Stage};
use crate::remote::RemoteEngine;
use crate::store::{ChunkUpsert, Store};

pub(crate) struct RunnerCtx {
    pub store: Arc<Store>,
    pub config: TranscribeConfig,
    pub remote: Option<Arc<RemoteEngine>>,
    pub fallback: Arc<FallbackEngine>,
    pub progress: broadcast::Sender<ProgressEvent>,
    pub roles: SpeakerRoleConfig,
}

impl RunnerCtx {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.progress.send(event);
    }

    fn transcribing_status(&self) -> JobStatus {
        if self.remote.is_some() {
            JobStatus::TranscribingRemote
        } else {
            JobStatus::TranscribingFallback
        }
    }
}

/// Percent window for the transcribe stage: preprocessing owns the first 10,
/// merging the last 10.
fn transcribe_percent(done: i64, total: i64) -> f64 {
    clamp_percent(10.0 + 80.0 * done as f64 / total.max(1) as f64)
}

pub(crate) async fn run_job(ctx: RunnerCtx, job_id: String, resume: bool) {
    if let Err(e) = drive_job(&ctx, &job_id, resume).await {
        // Terminal failures are persisted and surfaced as a final event.
        log::error!("Job {} failed: {}", job_id, e);
        fail_job(&ctx, &job_id, &e.to_string()).await;
    }
}

async fn fail_job(ctx: &RunnerCtx, job_id: &str, message: &str) {
    if let Err(store_error) =
        ctx.store
            .update_job_status(job_id, JobStatus::Failed, None, None, Some(message))
    {
        log::error!("Could not persist failure for job {}: {}", job_id, store_error);
    }
    ctx.emit(ProgressEvent::new(
        job_id,
        JobStatus::Failed,
        Stage::Transcribe,
        100.0,
        None,
        0,
        0,
        message,
    ));
}

/// Outcome of the per-chunk loop: either all chunks are done, or the run was
/// paused for a later retry against the remote API.
enum ChunkLoopOutcome {
    Completed { done: i64, total: i64 },
    Paused,
}

async fn drive_job(ctx: &RunnerCtx, job_id: &str, resume: bool) -> crate::error::Result<()> {
    let job = ctx
        .store
        .get_job(job_id)?
        .ok_or_else(|| Error::ParsingFailed("Job findes ikke til kørsel".to_string()))?;

    let source_path = PathBuf::from(&job.source_path);
    if !source_path.exists() {
        fail_job(ctx, job_id, "Source fil mangler").await;
        return Ok(());
    }

    if !resume {
        // Finished jobs keep their rows and transcripts, but their chunk
        // directories are no longer needed.
        ctx.store.purge_ready_job_dirs()?;
    }

    ctx.store
        .update_job_status(job_id, JobStatus::Preprocessing, None, None, None)?;
    ctx.emit(ProgressEvent::new(
        job_id,
        JobStatus::Preprocessing,
        Stage::Preprocess,
        3.0,
        None,
        0,
        0,
        "Forbereder lyd og opretter chunks...",
    ));

    let (duration, chunk_rows) = preprocess_if_needed(ctx, job_id, &source_path, job.duration_sec).await?;

    let outcome = transcribe_chunks(ctx, job_id, &source_path, &chunk_rows).await?;
    let (done, total) = match outcome {
        ChunkLoopOutcome::Paused => return Ok(()),
        ChunkLoopOutcome::Completed { done, total } => (done, total),
    };

    ctx.store
        .update_job_status(job_id, JobStatus::Merging, Some(done), Some(total), None)?;
    ctx.emit(ProgressEvent::new(
        job_id,
        JobStatus::Merging,
        Stage::Merge,
        94.0,
        Some(5),
        done,
        total,
        "Sammenfletter segmenter og fjerner overlap...",
    ));

    let mut collected: Vec<RawSegment> = Vec::new();
    for row in ctx.store.list_chunks(job_id)? {
        if let Some(segments) = row.transcript {
            collected.extend(segments.into_iter().filter(|s| !s.text.trim().is_empty()));
        }
    }

    let labeled = merge_and_label(collected, ctx.roles);
    ctx.store
        .set_final_transcript(job_id, &labeled, JobStatus::Ready)?;
    ctx.store
        .update_job_status(job_id, JobStatus::Ready, Some(total), Some(total), None)?;

    ctx.store.write_checkpoint(
        job_id,
        "result.json",
        &json!({
            "jobId": job_id,
            "sourcePath": source_path.to_string_lossy(),
            "durationSec": duration,
            "transcript": labeled,
        }),
    )?;

    ctx.emit(ProgressEvent::new(
        job_id,
        JobStatus::Ready,
        Stage::Merge,
        100.0,
        Some(0),
        total,
        total,
        "Transskriptionen er klar",
    ));

    log::info!("Job {} is ready with {} final segments", job_id, labeled.len());
    Ok(())
}

/// Build chunk rows when none exist; otherwise reuse them and recover a
/// missing duration with a fresh probe.
async fn preprocess_if_needed(
    ctx: &RunnerCtx,
    job_id: &str,
    source_path: &std::path::Path,
    stored_duration: f64,
) -> crate::error::Result<(f64, Vec<ChunkRow>)> {
    let existing = ctx.store.list_chunks(job_id)?;
    if !existing.is_empty() {
        let duration = if stored_duration > 0.0 {
            stored_duration
        } else {
            let probed = chunker::probe_duration(source_path, ctx.config.probe_timeout_sec).await?;
            ctx.store
                .update_job_metadata(job_id, probed, existing.len() as i64)?;
            probed
        };
        return Ok((duration, existing));
    }

    let chunks_dir = ctx.store.paths().chunks_dir(job_id);
    let (duration, plans) = chunker::create_chunks(source_path, &chunks_dir, &ctx.config).await?;
    ctx.store
        .update_job_metadata(job_id, duration, plans.len() as i64)?;

    for plan in &plans {
        ctx.store.upsert_chunk(ChunkUpsert {
            job_id,
            idx: plan.idx,
            start_sec: plan.start_sec,
            end_sec: plan.end_sec,
            chunk_path: &plan.path,
            chunk_hash: Some(&plan.sha256),
            status: ChunkStatus::Queued,
            engine: None,
            attempt_count: 0,
            transcript: None,
            confidence: None,
        })?;
    }

    Ok((duration, ctx.store.list_chunks(job_id)?))
}

async fn transcribe_chunks(
    ctx: &RunnerCtx,
    job_id: &str,
    source_path: &std::path::Path,
    chunk_rows: &[ChunkRow],
) -> crate::error::Result<ChunkLoopOutcome> {
    let total = chunk_rows.len() as i64;
    let mut done = chunk_rows
        .iter()
        .filter(|c| c.status == ChunkStatus::Done)
        .count() as i64;

    ctx.store
        .update_job_status(job_id, ctx.transcribing_status(), Some(done), Some(total), None)?;

    let loop_started = Instant::now();
    let mut processed: i64 = 0;

    for row in chunk_rows {
        if row.status == ChunkStatus::Done {
            continue;
        }

        let chunk_path = PathBuf::from(&row.chunk_path);
        if !chunk_path.exists() {
            // Re-render is idempotent by path; resume relies on it.
            chunker::render_chunk(
                source_path,
                &chunk_path,
                row.start_sec,
                row.end_sec - row.start_sec,
            )
            .await?;
        }
        let chunk_hash = match &row.chunk_hash {
            Some(hash) => hash.clone(),
            None => sha256_file(&chunk_path)?,
        };

        let attempts = row.attempt_count + 1;
        let (chunk_status, engine) = if ctx.remote.is_some() {
            (ChunkStatus::TranscribingRemote, EngineKind::Remote)
        } else {
            (ChunkStatus::TranscribingFallback, EngineKind::Fallback)
        };
        ctx.store.upsert_chunk(ChunkUpsert {
            job_id,
            idx: row.idx,
            start_sec: row.start_sec,
            end_sec: row.end_sec,
            chunk_path: &row.chunk_path,
            chunk_hash: Some(&chunk_hash),
            status: chunk_status,
            engine: Some(engine),
            attempt_count: attempts,
            transcript: None,
            confidence: None,
        })?;

        let chunk_started = Instant::now();
        let attempt = attempt_chunk(ctx, job_id, row, &chunk_path, done, total).await?;
        let (segments, confidence, engine_used) = match attempt {
            ChunkAttempt::Paused => {
                pause_job(ctx, job_id, row, &chunk_hash, attempts, done, total).await?;
                return Ok(ChunkLoopOutcome::Paused);
            }
            ChunkAttempt::Done {
                segments,
                confidence,
                engine,
            } => (segments, confidence, engine),
        };

        let globalized: Vec<RawSegment> =
            segments.iter().map(|s| s.globalized(row.start_sec)).collect();

        ctx.store.upsert_chunk(ChunkUpsert {
            job_id,
            idx: row.idx,
            start_sec: row.start_sec,
            end_sec: row.end_sec,
            chunk_path: &row.chunk_path,
            chunk_hash: Some(&chunk_hash),
            status: ChunkStatus::Done,
            engine: Some(engine_used),
            attempt_count: attempts,
            transcript: Some(&globalized),
            confidence,
        })?;

        // Checkpoint strictly after the store update.
        ctx.store.write_checkpoint(
            job_id,
            &format!("chunk_{:04}.json", row.idx),
            &json!({
                "jobId": job_id,
                "chunkIndex": row.idx,
                "engine": engine_used.as_str(),
                "segments": globalized,
            }),
        )?;

        done += 1;
        processed += 1;

        let avg_chunk_runtime = loop_started.elapsed().as_secs_f64() / processed.max(1) as f64;
        let eta = (avg_chunk_runtime * (total - done).max(0) as f64) as i64;

        ctx.store
            .update_job_status(job_id, ctx.transcribing_status(), Some(done), Some(total), None)?;

        ctx.emit(ProgressEvent::new(
            job_id,
            ctx.transcribing_status(),
            Stage::Transcribe,
            transcribe_percent(done, total),
            Some(eta),
            done,
            total,
            format!(
                "Chunk {}/{} færdig via {} ({:.1}s)",
                row.idx + 1,
                total,
                engine_used.as_str(),
                chunk_started.elapsed().as_secs_f64()
            ),
        ));
    }

    Ok(ChunkLoopOutcome::Completed { done, total })
}

enum ChunkAttempt {
    Done {
        segments: Vec<RawSegment>,
        confidence: Option<f64>,
        engine: EngineKind,
    },
    Paused,
}

/// Try remote first, then the local fallback. A failed quality gate while
/// remote is enabled pauses the job instead of failing it; every other
/// two-engine failure is terminal.
async fn attempt_chunk(
    ctx: &RunnerCtx,
    job_id: &str,
    row: &ChunkRow,
    chunk_path: &std::path::Path,
    done: i64,
    total: i64,
) -> crate::error::Result<ChunkAttempt> {
    let remote_error = match &ctx.remote {
        Some(engine) => match engine.transcribe_chunk(chunk_path).await {
            Ok((segments, confidence)) => {
                return Ok(ChunkAttempt::Done {
                    segments,
                    confidence,
                    engine: EngineKind::Remote,
                })
            }
            Err(e) => Some(e),
        },
        None => None,
    };

    if remote_error.is_some() {
        ctx.emit(ProgressEvent::new(
            job_id,
            JobStatus::TranscribingFallback,
            Stage::Transcribe,
            transcribe_percent(done, total),
            None,
            done,
            total,
            format!("Fjern-fejl på chunk {}, prøver lokal fallback...", row.idx + 1),
        ));
    }

    match ctx.fallback.transcribe_chunk(chunk_path).await {
        Ok((segments, quality)) => Ok(ChunkAttempt::Done {
            segments,
            confidence: Some(quality.coverage),
            engine: EngineKind::Fallback,
        }),
        Err(Error::LowSpeakerConfidence(message)) if ctx.remote.is_some() => {
            log::warn!(
                "Chunk {} of job {} paused on fallback quality gate: {}",
                row.idx,
                job_id,
                message
            );
            Ok(ChunkAttempt::Paused)
        }
        Err(fallback_error) => {
            let message = match remote_error {
                Some(remote_error) => format!(
                    "Chunk {} fejlede i både fjern-API og fallback. Fjern: {}; Fallback: {}",
                    row.idx + 1,
                    remote_error,
                    fallback_error
                ),
                None => format!("Chunk {} fejlede i fallback: {}", row.idx + 1, fallback_error),
            };
            Err(Error::ParsingFailed(message))
        }
    }
}

async fn pause_job(
    ctx: &RunnerCtx,
    job_id: &str,
    row: &ChunkRow,
    chunk_hash: &str,
    attempts: i64,
    done: i64,
    total: i64,
) -> crate::error::Result<()> {
    ctx.store.upsert_chunk(ChunkUpsert {
        job_id,
        idx: row.idx,
        start_sec: row.start_sec,
        end_sec: row.end_sec,
        chunk_path: &row.chunk_path,
        chunk_hash: Some(chunk_hash),
        status: ChunkStatus::PausedRetryRemote,
        engine: Some(EngineKind::Fallback),
        attempt_count: attempts,
        transcript: None,
        confidence: None,
    })?;

    ctx.store.update_job_status(
        job_id,
        JobStatus::PausedRetryRemote,
        Some(done),
        Some(total),
        Some("Lokal fallback kunne ikke skelne talere sikkert nok."),
    )?;

    ctx.emit(ProgressEvent::new(
        job_id,
        JobStatus::PausedRetryRemote,
        Stage::Transcribe,
        transcribe_percent(done, total),
        None,
        done,
        total,
        "Lokal fallback kunne ikke skelne talere sikkert nok. Genoptag når fjern-API'et er tilgængeligt igen.",
    ));

    Ok(())
}
