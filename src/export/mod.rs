// Export formatter: the header block and numbered line entries shared by the
// TXT and DOCX serializers.

mod docx;
mod txt;

pub use docx::export_docx;
pub use txt::export_txt;

use std::path::Path;

use chrono::Local;

use crate::models::{Job, Role, Segment};

/// One numbered output line. `speaker` is set only on the first line of a
/// speaker block; a blank `text` is the separator row between blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEntry {
    pub number: usize,
    pub speaker: Option<Role>,
    pub text: String,
}

/// Fixed Danish header block. `source_name_override` replaces the filename.
pub fn header_lines(job: &Job, source_name_override: Option<&str>) -> Vec<String> {
    let source_name = source_label(job, source_name_override);
    let duration_min = ((job.duration_sec / 60.0).round() as i64).max(1);
    let date = header_date(&job.created_at);

    vec![
        format!("Navn på fil: \"{}\"", source_name),
        format!("Dato: {}", date),
        format!("Varighed: {} minutter", duration_min),
        String::new(),
        "Deltagere:".to_string(),
        "Interviewer (I)".to_string(),
        "Deltager (D)".to_string(),
        String::new(),
    ]
}

fn source_label(job: &Job, source_name_override: Option<&str>) -> String {
    let raw = source_name_override
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            if job.source_name.trim().is_empty() {
                job.source_path.clone()
            } else {
                job.source_name.clone()
            }
        });

    Path::new(raw.trim())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("")
        .to_string()
}

fn header_date(created_at: &str) -> String {
    let trimmed = created_at.trim();
    if !trimmed.is_empty() {
        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(trimmed) {
            return parsed.with_timezone(&Local).format("%d.%m.%Y").to_string();
        }
    }
    Local::now().format("%d.%m.%Y").to_string()
}

/// Build the numbered body entries for a transcript.
///
/// Every embedded newline becomes its own entry; the speaker prefix goes on
/// the first entry of each speaker block; a blank entry separates blocks
/// unless the previous segment text already ends in a newline. With
/// `wrap_width_pt` set, long lines are pre-wrapped by text measurement and
/// each fragment gets its own number.
pub fn build_line_entries(transcript: &[Segment], wrap_width_pt: Option<f64>) -> Vec<LineEntry> {
    let mut drafts: Vec<(Option<Role>, String)> = Vec::new();
    let mut previous: Option<&Segment> = None;

    for segment in transcript {
        if segment.text.trim().is_empty() {
            continue;
        }

        let block_start = match previous {
            None => true,
            Some(prev) => prev.speaker != segment.speaker,
        };
        if block_start {
            if let Some(prev) = previous {
                if !prev.text.ends_with('\n') {
                    drafts.push((None, String::new()));
                }
            }
        }

        for (line_idx, line) in segment.text.trim_end().split('\n').enumerate() {
            let speaker = if line_idx == 0 && block_start {
                Some(segment.speaker)
            } else {
                None
            };

            match wrap_width_pt {
                None => drafts.push((speaker, line.to_string())),
                Some(width) => {
                    let fragments = wrap_line(line, speaker.is_some(), width);
                    for (frag_idx, fragment) in fragments.into_iter().enumerate() {
                        drafts.push((if frag_idx == 0 { speaker } else { None }, fragment));
                    }
                }
            }
        }

        previous = Some(segment);
    }

    drafts
        .into_iter()
        .enumerate()
        .map(|(idx, (speaker, text))| LineEntry {
            number: idx + 1,
            speaker,
            text,
        })
        .collect()
}

/// Greedy word wrap against a point budget. The first fragment of a prefixed
/// line loses the width of the bold `I: ` run.
fn wrap_line(line: &str, has_prefix: bool, max_width_pt: f64) -> Vec<String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return vec![String::new()];
    }

    let prefix_pt = if has_prefix { measure_text_pt("I: ") } else { 0.0 };
    let mut fragments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut budget = (max_width_pt - prefix_pt).max(measure_text_pt("mmmm"));

    for word in words {
        if current.is_empty() && measure_text_pt(word) > budget {
            // A single token wider than the column gets hard-split.
            let mut pieces = split_long_word(word, budget, max_width_pt);
            current = pieces.pop().unwrap_or_default();
            fragments.append(&mut pieces);
            budget = max_width_pt;
            continue;
        }

        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };

        if measure_text_pt(&candidate) <= budget || current.is_empty() {
            current = candidate;
        } else {
            fragments.push(current);
            budget = max_width_pt;
            if measure_text_pt(word) > budget {
                let mut pieces = split_long_word(word, budget, max_width_pt);
                current = pieces.pop().unwrap_or_default();
                fragments.append(&mut pieces);
            } else {
                current = word.to_string();
            }
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}

fn split_long_word(word: &str, first_budget_pt: f64, budget_pt: f64) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut budget = first_budget_pt;

    for c in word.chars() {
        if !current.is_empty() && measure_text_pt(&current) + char_width_pt(c) > budget {
            pieces.push(std::mem::take(&mut current));
            budget = budget_pt;
        }
        current.push(c);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Approximate rendered width of text in the 12 pt body font.
pub(crate) fn measure_text_pt(text: &str) -> f64 {
    text.chars().map(char_width_pt).sum()
}

fn char_width_pt(c: char) -> f64 {
    match c {
        'i' | 'j' | 'l' | '\'' | '.' | ',' | ':' | ';' | '!' | '|' => 3.3,
        'f' | 't' | 'r' | 's' | '(' | ')' | '[' | ']' | '-' | ' ' => 4.2,
        'm' | 'w' | 'M' | 'W' | 'Æ' | 'Ø' | 'Å' => 10.0,
        c if c.is_uppercase() => 8.0,
        c if c.is_ascii_digit() => 6.0,
        _ => 6.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Role};

    pub(crate) fn sample_job() -> Job {
        Job {
            id: "job-1".to_string(),
            source_path: "/tmp/demo_interview.wav".to_string(),
            source_name: "demo_interview.wav".to_string(),
            source_hash: "h".to_string(),
            status: JobStatus::Ready,
            created_at: "2026-02-11T10:15:00+00:00".to_string(),
            updated_at: "2026-02-11T11:00:00+00:00".to_string(),
            duration_sec: 3600.0,
            chunks_total: 2,
            chunks_done: 2,
            transcript: None,
            error_message: None,
            interviewer_count: 1,
            participant_count: 1,
        }
    }

    fn segment(speaker: Role, text: &str) -> Segment {
        Segment {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker,
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn test_header_block() {
        let header = header_lines(&sample_job(), None);
        assert_eq!(header[0], "Navn på fil: \"demo_interview\"");
        assert!(header[1].starts_with("Dato: "));
        assert_eq!(header[2], "Varighed: 60 minutter");
        assert_eq!(header[4], "Deltagere:");
        assert_eq!(header[5], "Interviewer (I)");
        assert_eq!(header[6], "Deltager (D)");
    }

    #[test]
    fn test_header_duration_is_at_least_one_minute() {
        let mut job = sample_job();
        job.duration_sec = 12.0;
        let header = header_lines(&job, None);
        assert_eq!(header[2], "Varighed: 1 minutter");
    }

    #[test]
    fn test_header_source_name_override() {
        let header = header_lines(&sample_job(), Some("Samtale med Anna.m4a"));
        assert_eq!(header[0], "Navn på fil: \"Samtale med Anna\"");
    }

    #[test]
    fn test_entries_numbered_contiguously_with_block_separators() {
        let transcript = vec![
            segment(Role::I, "Velkommen"),
            segment(Role::I, "Første spørgsmål?"),
            segment(Role::D, "Tak"),
        ];
        let entries = build_line_entries(&transcript, None);

        let numbers: Vec<usize> = entries.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        assert_eq!(entries[0].speaker, Some(Role::I));
        assert_eq!(entries[0].text, "Velkommen");
        // Same block: no prefix on the second segment.
        assert_eq!(entries[1].speaker, None);
        assert_eq!(entries[1].text, "Første spørgsmål?");
        // Separator row before the speaker change.
        assert_eq!(entries[2].speaker, None);
        assert_eq!(entries[2].text, "");
        assert_eq!(entries[3].speaker, Some(Role::D));
    }

    #[test]
    fn test_embedded_newlines_become_continuation_entries() {
        let transcript = vec![segment(Role::I, "Første linje\nanden linje")];
        let entries = build_line_entries(&transcript, None);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Some(Role::I));
        assert_eq!(entries[0].text, "Første linje");
        assert_eq!(entries[1].speaker, None);
        assert_eq!(entries[1].text, "anden linje");
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let transcript = vec![
            segment(Role::I, "   "),
            segment(Role::D, "Indhold"),
        ];
        let entries = build_line_entries(&transcript, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].number, 1);
        assert_eq!(entries[0].speaker, Some(Role::D));
    }

    #[test]
    fn test_wrapping_splits_long_lines_into_numbered_fragments() {
        let long_text = "ord ".repeat(120).trim_end().to_string();
        let transcript = vec![segment(Role::I, &long_text)];
        let entries = build_line_entries(&transcript, Some(427.4));

        assert!(entries.len() >= 2, "expected wrapped rows, got {}", entries.len());
        assert_eq!(entries[0].speaker, Some(Role::I));
        for entry in &entries[1..] {
            assert_eq!(entry.speaker, None);
        }
        let numbers: Vec<usize> = entries.iter().map(|e| e.number).collect();
        assert_eq!(numbers, (1..=entries.len()).collect::<Vec<_>>());

        // No fragment blows the budget.
        for entry in &entries {
            assert!(measure_text_pt(&entry.text) <= 427.4 + 1e-9);
        }
    }

    #[test]
    fn test_short_lines_are_not_wrapped() {
        let transcript = vec![segment(Role::D, "Det giver mening.")];
        let entries = build_line_entries(&transcript, Some(427.4));
        assert_eq!(entries.len(), 1);
    }
}
