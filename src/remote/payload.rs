// Schema-agnostic extraction of transcription payloads.
//
// Remote response schemas vary by API version, so fields are read by name
// with fallbacks and numeric coercion; unknown fields are ignored and
// missing time fields default to 0.

use serde_json::Value;

use crate::models::RawSegment;

/// Diarized segments from `segments` or `utterances`; a bare `text` payload
/// becomes a single zero-length segment.
pub fn parse_diarized_segments(payload: &Value) -> Vec<RawSegment> {
    let raw_segments = payload
        .get("segments")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .or_else(|| {
            payload
                .get("utterances")
                .and_then(Value::as_array)
                .filter(|a| !a.is_empty())
        });

    let raw_segments = match raw_segments {
        Some(segments) => segments,
        None => {
            let text = payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if text.is_empty() {
                return Vec::new();
            }
            return vec![RawSegment::new(0.0, 0.0, "speaker_0", text)];
        }
    };

    let mut segments = Vec::new();
    for raw in raw_segments {
        let text = raw
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            continue;
        }

        let start = field_f64(raw, &["start", "start_sec"]).unwrap_or(0.0).max(0.0);
        let end = field_f64(raw, &["end", "end_sec"]).unwrap_or(start).max(start);

        let confidence = field_f64(raw, &["confidence", "probability"]).or_else(|| word_mean_confidence(raw));

        segments.push(
            RawSegment::new(start, end, parse_speaker(raw), text).with_confidence(confidence),
        );
    }

    segments
}

/// Text-pass segments from `segments[*].{start,end,text}` with confidence
/// from `confidence|probability|avg_logprob`. The speaker is unknown at this
/// point; diarization assigns it afterwards.
pub fn parse_text_segments(payload: &Value) -> Vec<RawSegment> {
    let raw_segments = payload
        .get("segments")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty());

    let raw_segments = match raw_segments {
        Some(segments) => segments,
        None => {
            let text = payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if text.is_empty() {
                return Vec::new();
            }
            return vec![RawSegment::new(0.0, 0.0, "unknown", text)];
        }
    };

    let mut segments = Vec::new();
    for raw in raw_segments {
        let text = raw
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            continue;
        }

        let start = field_f64(raw, &["start", "start_sec"]).unwrap_or(0.0).max(0.0);
        let end = field_f64(raw, &["end", "end_sec"]).unwrap_or(start).max(start);

        let confidence = field_f64(raw, &["confidence", "probability"]).or_else(|| {
            field_f64(raw, &["avg_logprob"]).map(|logprob| logprob.exp().clamp(0.0, 1.0))
        });

        segments.push(RawSegment::new(start, end, "unknown", text).with_confidence(confidence));
    }

    segments
}

/// For every text segment, take the speaker of the diarized segment with the
/// largest time overlap; with no overlap at all, the nearest by midpoint.
/// An empty text pass falls back to the diarization verbatim.
pub fn merge_text_with_speakers(
    text_segments: Vec<RawSegment>,
    diarized_segments: Vec<RawSegment>,
) -> Vec<RawSegment> {
    if text_segments.is_empty() {
        return diarized_segments;
    }

    text_segments
        .into_iter()
        .map(|segment| {
            let speaker = assign_speaker(&segment, &diarized_segments);
            RawSegment {
                speaker_id: speaker,
                ..segment
            }
        })
        .collect()
}

fn assign_speaker(segment: &RawSegment, diarized: &[RawSegment]) -> String {
    if diarized.is_empty() {
        return "speaker_0".to_string();
    }

    let mut best_overlap = -1.0f64;
    let mut best_speaker = diarized[0].speaker_id.clone();

    for candidate in diarized {
        let overlap = overlap_sec(segment.start_sec, segment.end_sec, candidate.start_sec, candidate.end_sec);
        if overlap > best_overlap {
            best_overlap = overlap;
            best_speaker = candidate.speaker_id.clone();
        }
    }

    if best_overlap > 0.0 {
        return best_speaker;
    }

    let midpoint = (segment.start_sec + segment.end_sec) / 2.0;
    diarized
        .iter()
        .min_by(|a, b| {
            let da = (midpoint - (a.start_sec + a.end_sec) / 2.0).abs();
            let db = (midpoint - (b.start_sec + b.end_sec) / 2.0).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|c| c.speaker_id.clone())
        .unwrap_or_else(|| "speaker_0".to_string())
}

fn overlap_sec(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

fn parse_speaker(raw: &Value) -> String {
    for key in ["speaker", "speaker_id", "speaker_label"] {
        if let Some(value) = raw.get(key) {
            let label = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            };
            if !label.is_empty() {
                return label;
            }
        }
    }
    "speaker_0".to_string()
}

fn field_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(value) = raw.get(*key) {
            if let Some(number) = coerce_f64(value) {
                return Some(number);
            }
        }
    }
    None
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn word_mean_confidence(raw: &Value) -> Option<f64> {
    let words = raw.get("words")?.as_array()?;
    let confidences: Vec<f64> = words
        .iter()
        .filter_map(|w| w.get("confidence").and_then(coerce_f64))
        .collect();
    if confidences.is_empty() {
        return None;
    }
    Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
}
