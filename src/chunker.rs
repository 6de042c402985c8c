// Media probing and chunk rendering via ffmpeg/ffprobe subprocesses.
// Chunks are rendered as mono 16 kHz AAC in an MP4 container with a fixed
// overlap between consecutive slices.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::TranscribeConfig;
use crate::error::{Error, Result};
use crate::hashing::sha256_file;
use crate::models::{round_ms, ChunkPlan};

/// Smallest renderable slice; ffmpeg rejects zero-length exports.
const MIN_RENDER_DURATION_SEC: f64 = 0.05;

fn ffmpeg_bin() -> String {
    std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string())
}

fn ffprobe_bin() -> String {
    std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string())
}

/// Total playable duration of the source in seconds.
///
/// Bounded by `probe_timeout_sec` wall clock so a hung media layer cannot
/// stall a job; both the timeout and an unreadable duration surface as a
/// parsing error.
pub async fn probe_duration(source: &Path, probe_timeout_sec: u64) -> Result<f64> {
    let mut command = Command::new(ffprobe_bin());
    command
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("json")
        .arg(source)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = tokio::time::timeout(Duration::from_secs(probe_timeout_sec), command.output())
        .await
        .map_err(|_| {
            Error::ParsingFailed(format!(
                "Medie-probe overskred tidsgrænsen på {} sekunder",
                probe_timeout_sec
            ))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ParsingFailed(format!(
            "Kunne ikke læse varighed via ffprobe: {}",
            stderr.trim()
        )));
    }

    let payload: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::ParsingFailed(format!("Uventet ffprobe-output: {}", e)))?;
    let duration = payload
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(parse_duration_value)
        .unwrap_or(0.0);

    if !duration.is_finite() || duration <= 0.0 {
        return Err(Error::ParsingFailed(
            "Kunne ikke læse varighed via ffprobe".to_string(),
        ));
    }

    Ok(duration)
}

fn parse_duration_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render one chunk of the source to `out_path`, replacing any existing file.
pub async fn render_chunk(
    source: &Path,
    out_path: &Path,
    start_sec: f64,
    duration_sec: f64,
) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let duration_sec = duration_sec.max(MIN_RENDER_DURATION_SEC);

    let output = Command::new(ffmpeg_bin())
        .arg("-y")
        .arg("-i")
        .arg(source)
        .arg("-vn")
        .arg("-ss")
        .arg(format!("{:.3}", start_sec))
        .arg("-t")
        .arg(format!("{:.3}", duration_sec))
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg("16000")
        .arg("-c:a")
        .arg("aac")
        .arg("-movflags")
        .arg("+faststart")
        .arg(out_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ParsingFailed(format!(
            "Kunne ikke rendere chunk {:?}: {}",
            out_path,
            stderr.trim()
        )));
    }

    Ok(())
}

/// Pure chunk layout: dense indices from 0, fixed step, final chunk truncated
/// at the source duration. Times are rounded to milliseconds.
pub fn plan_chunk_ranges(duration: f64, config: &TranscribeConfig) -> Vec<(i64, f64, f64)> {
    let step = config.chunk_step_sec();
    let mut ranges = Vec::new();
    let mut idx: i64 = 0;
    let mut start = 0.0f64;

    while start < duration {
        let end = (start + config.chunk_duration_sec).min(duration);
        ranges.push((idx, round_ms(start), round_ms(end)));
        idx += 1;
        start += step;
    }

    ranges
}

/// Probe the source, render every chunk into `chunk_dir` and hash the
/// results. Returns the probed duration and the full plan.
pub async fn create_chunks(
    source: &Path,
    chunk_dir: &Path,
    config: &TranscribeConfig,
) -> Result<(f64, Vec<ChunkPlan>)> {
    let duration = probe_duration(source, config.probe_timeout_sec).await?;
    tokio::fs::create_dir_all(chunk_dir).await?;

    let mut chunks = Vec::new();
    for (idx, start_sec, end_sec) in plan_chunk_ranges(duration, config) {
        let out_path: PathBuf = chunk_dir.join(format!("chunk_{:04}.m4a", idx));
        render_chunk(source, &out_path, start_sec, end_sec - start_sec).await?;
        let sha256 = sha256_file(&out_path)?;

        chunks.push(ChunkPlan {
            idx,
            start_sec,
            end_sec,
            path: out_path.to_string_lossy().to_string(),
            sha256,
        });
    }

    log::info!(
        "Planned {} chunks of {:.0}s (overlap {:.1}s) over {:.1}s of audio",
        chunks.len(),
        config.chunk_duration_sec,
        config.overlap_sec,
        duration
    );

    Ok((duration, chunks))
}
