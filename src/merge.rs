// Merge/label engine: dedup, style-noise filtering, speaker-run compaction
// and interviewer/participant role assignment over globalized raw segments.
//
// The filter word lists are Danish and intentionally conservative; dropping a
// real utterance is worse than keeping a backchannel.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{round_ms, RawSegment, Role, Segment, SpeakerRoleConfig};

static BACKCHANNELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "ja",
        "jo",
        "nej",
        "ok",
        "okay",
        "nå",
        "nåh",
        "mhm",
        "mm",
        "mmm",
        "klart",
        "fedt",
        "præcis",
        "super",
        "tak",
        "det gør jeg",
        "det vil jeg gøre",
        "ja okay",
        "ja ja",
        "nej nej",
    ])
});

static FILLER_TOKENS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["øh", "øhm", "øhh", "eh", "hmm"]));

const TECHNICAL_META_KEYWORDS: [&str; 23] = [
    "kan du høre",
    "hører mig",
    "høre mig",
    "lyden",
    "mikrofon",
    "kamera",
    "dele skærm",
    "del skærm",
    "skærm",
    "link",
    "chat",
    "chatten",
    "nettet",
    "internet",
    "forbindelse",
    "hakker",
    "langsom",
    "opkald",
    "teams",
    "zoom",
    "kan ikke åbne",
    "kan ikke se",
    "driller",
];

const TECHNICAL_META_STRONG_KEYWORDS: [&str; 7] = [
    "kan du prøve at gentage",
    "kan du gentage",
    "kan du se min skærm",
    "kan du se den nu",
    "er det mig igen",
    "løber tør for strøm",
    "deler skærm",
];

const SHORT_BACKCHANNEL_MAX_WORDS: usize = 2;
const TECHNICAL_META_MAX_WORDS: usize = 10;
const TECHNICAL_META_STRONG_MAX_WORDS: usize = 20;
const INTERRUPTION_MAX_WORDS: usize = 3;
const INTERRUPTION_MAX_GAP_SEC: f64 = 8.0;
const SPEAKER_RUN_MERGE_MAX_GAP_SEC: f64 = 10.0;
const DEDUP_OVERLAP_SLACK_SEC: f64 = 0.25;

static NON_WORD_OR_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").unwrap());

#[derive(Debug)]
struct SpeakerStats {
    first_start: f64,
    utterance_count: usize,
    question_count: usize,
    total_words: usize,
}

fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD_OR_SPACE.replace_all(&lowered, " ");
    WHITESPACE_RUN.replace_all(&stripped, " ").trim().to_string()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn strip_fillers(text: &str) -> String {
    let kept: Vec<&str> = text
        .split_whitespace()
        .filter(|token| {
            let word = NON_WORD.replace_all(&token.to_lowercase(), "").to_string();
            !FILLER_TOKENS.contains(word.as_str())
        })
        .collect();

    let joined = kept.join(" ");
    let collapsed = WHITESPACE_RUN.replace_all(&joined, " ");
    collapsed.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '-').to_string()
}

fn is_backchannel(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return true;
    }
    word_count(&normalized) <= SHORT_BACKCHANNEL_MAX_WORDS && BACKCHANNELS.contains(normalized.as_str())
}

fn is_technical_meta(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return true;
    }

    let words = word_count(&normalized);
    let has_keyword = TECHNICAL_META_KEYWORDS.iter().any(|k| normalized.contains(k));
    if has_keyword && words <= TECHNICAL_META_MAX_WORDS {
        return true;
    }

    let has_strong_keyword = TECHNICAL_META_STRONG_KEYWORDS.iter().any(|k| normalized.contains(k));
    has_strong_keyword && words <= TECHNICAL_META_STRONG_MAX_WORDS
}

fn sort_by_time(segments: &mut [RawSegment]) {
    segments.sort_by(|a, b| {
        (a.start_sec, a.end_sec)
            .partial_cmp(&(b.start_sec, b.end_sec))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Collapse duplicates produced by chunk overlap: equal text within the
/// overlap slack, or a same-speaker prefix of a longer take.
pub fn dedupe_segments(mut segments: Vec<RawSegment>) -> Vec<RawSegment> {
    sort_by_time(&mut segments);
    let mut merged: Vec<RawSegment> = Vec::with_capacity(segments.len());

    for segment in segments {
        if segment.text.trim().is_empty() {
            continue;
        }

        let Some(previous) = merged.last_mut() else {
            merged.push(segment);
            continue;
        };

        let prev_norm = normalize(&previous.text);
        let curr_norm = normalize(&segment.text);
        let overlapping = segment.start_sec <= previous.end_sec + DEDUP_OVERLAP_SLACK_SEC;
        let same_speaker = segment.speaker_id == previous.speaker_id;

        if prev_norm == curr_norm && overlapping {
            previous.end_sec = previous.end_sec.max(segment.end_sec);
            if let Some(confidence) = segment.confidence {
                previous.confidence = Some(previous.confidence.unwrap_or(0.0).max(confidence));
            }
            continue;
        }

        if overlapping && same_speaker && !prev_norm.is_empty() && !curr_norm.is_empty() {
            if curr_norm.starts_with(&prev_norm) {
                previous.text = segment.text;
                previous.end_sec = previous.end_sec.max(segment.end_sec);
                previous.confidence = segment.confidence.or(previous.confidence);
                continue;
            }
            if prev_norm.starts_with(&curr_norm) {
                continue;
            }
        }

        merged.push(segment);
    }

    merged
}

/// Strip fillers, drop backchannels and technical-meta chatter, compact
/// micro-interruptions and fuse same-speaker runs.
pub fn filter_style_noise(mut segments: Vec<RawSegment>) -> Vec<RawSegment> {
    sort_by_time(&mut segments);

    let mut filtered: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        let cleaned = strip_fillers(segment.text.trim());
        if cleaned.is_empty() || is_backchannel(&cleaned) || is_technical_meta(&cleaned) {
            continue;
        }
        filtered.push(RawSegment {
            text: cleaned,
            ..segment
        });
    }

    if filtered.len() >= 3 {
        // Delete a short backchannel wedged between two utterances of the
        // same other speaker, when all gaps are conversationally tight.
        let mut i = 1;
        while i + 1 < filtered.len() {
            let current_norm = normalize(&filtered[i].text);
            let wedged = word_count(&current_norm) <= INTERRUPTION_MAX_WORDS
                && BACKCHANNELS.contains(current_norm.as_str())
                && filtered[i - 1].speaker_id == filtered[i + 1].speaker_id
                && filtered[i - 1].speaker_id != filtered[i].speaker_id
                && (filtered[i].start_sec - filtered[i - 1].end_sec) <= INTERRUPTION_MAX_GAP_SEC
                && (filtered[i + 1].start_sec - filtered[i].end_sec) <= INTERRUPTION_MAX_GAP_SEC;

            if wedged {
                filtered.remove(i);
                continue;
            }
            i += 1;
        }
    }

    let mut merged_runs: Vec<RawSegment> = Vec::with_capacity(filtered.len());
    for segment in filtered {
        let Some(previous) = merged_runs.last_mut() else {
            merged_runs.push(segment);
            continue;
        };

        if previous.speaker_id == segment.speaker_id
            && (segment.start_sec - previous.end_sec) <= SPEAKER_RUN_MERGE_MAX_GAP_SEC
        {
            let joined = format!("{} {}", previous.text, segment.text);
            previous.text = WHITESPACE_RUN.replace_all(joined.trim(), " ").to_string();
            previous.end_sec = previous.end_sec.max(segment.end_sec);
            if let Some(confidence) = segment.confidence {
                previous.confidence = Some(previous.confidence.unwrap_or(0.0).max(confidence));
            }
            continue;
        }

        merged_runs.push(segment);
    }

    merged_runs
}

fn expected_interviewer_slots(unique_speakers: usize, roles: SpeakerRoleConfig) -> usize {
    if unique_speakers <= 1 {
        return 1;
    }

    let interviewers = roles.interviewers.max(1) as f64;
    let participants = roles.participants.max(1) as f64;
    let scaled = ((unique_speakers as f64 * interviewers) / (interviewers + participants)).round();
    let slots = (scaled as usize).max(1);
    slots.min((unique_speakers - 1).max(1))
}

/// Pick which internal speakers act as interviewers: frequent questions,
/// early first appearance and short utterances all point that way.
fn infer_interviewer_speakers(ordered: &[RawSegment], roles: SpeakerRoleConfig) -> HashSet<String> {
    if ordered.is_empty() {
        return HashSet::from(["speaker_0".to_string()]);
    }

    let mut stats_by_speaker: HashMap<String, SpeakerStats> = HashMap::new();
    let mut speaker_order: Vec<String> = Vec::new();

    for segment in ordered {
        let speaker_id = if segment.speaker_id.is_empty() {
            "speaker_0".to_string()
        } else {
            segment.speaker_id.clone()
        };
        let words = word_count(&normalize(&segment.text));

        let stats = stats_by_speaker.entry(speaker_id.clone()).or_insert_with(|| {
            speaker_order.push(speaker_id.clone());
            SpeakerStats {
                first_start: segment.start_sec,
                utterance_count: 0,
                question_count: 0,
                total_words: 0,
            }
        });

        stats.utterance_count += 1;
        stats.total_words += words;
        if segment.text.contains('?') {
            stats.question_count += 1;
        }
    }

    if stats_by_speaker.len() <= 1 {
        return HashSet::from([speaker_order[0].clone()]);
    }

    let slots = expected_interviewer_slots(stats_by_speaker.len(), roles);

    let mut scored: Vec<(String, f64, f64)> = speaker_order
        .iter()
        .map(|speaker_id| {
            let stats = &stats_by_speaker[speaker_id];
            let utterances = stats.utterance_count.max(1) as f64;
            let avg_words = stats.total_words as f64 / utterances;
            let question_density = stats.question_count as f64 / utterances;
            let start_bonus = (1.0 - (stats.first_start.min(120.0) / 120.0)).max(0.0);
            let brevity_bonus = 1.0 / avg_words.max(1.0);
            let score = question_density * 3.0 + start_bonus + brevity_bonus * 2.0;
            (speaker_id.clone(), score, stats.first_start)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
    });

    scored
        .into_iter()
        .take(slots)
        .map(|(speaker_id, _, _)| speaker_id)
        .collect()
}

/// Map internal speakers to final I/D roles.
pub fn map_to_roles(mut segments: Vec<RawSegment>, roles: SpeakerRoleConfig) -> Vec<Segment> {
    sort_by_time(&mut segments);
    let interviewer_speakers = infer_interviewer_speakers(&segments, roles);

    segments
        .into_iter()
        .map(|segment| {
            let speaker_id = if segment.speaker_id.is_empty() {
                "speaker_0"
            } else {
                segment.speaker_id.as_str()
            };
            let speaker = if interviewer_speakers.contains(speaker_id) {
                Role::I
            } else {
                Role::D
            };

            Segment {
                start_sec: round_ms(segment.start_sec),
                end_sec: round_ms(segment.end_sec),
                speaker,
                text: segment.text.trim().to_string(),
                confidence: segment.confidence.map(round4),
            }
        })
        .collect()
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

/// The full merge pipeline: dedup, style-noise filter, role assignment.
/// Deterministic for identical inputs.
pub fn merge_and_label(segments: Vec<RawSegment>, roles: SpeakerRoleConfig) -> Vec<Segment> {
    let deduped = dedupe_segments(segments);
    let filtered = filter_style_noise(deduped);
    map_to_roles(filtered, roles)
}
