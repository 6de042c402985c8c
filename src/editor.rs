// Round-trip between the final transcript and the plain-text editor format.
//
// Parsing is deliberately tolerant: users paste text back from word
// processors, so leading line numbers, full-width colons and invisible
// characters (BOM, zero-width joiners) must all be accepted.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::{round_ms, Role, Segment};

/// Synthesized timing: utterance i starts at i*3 s and nominally lasts 1 s.
const SEGMENT_START_STEP: f64 = 3.0;
const SEGMENT_DURATION: f64 = 1.0;

/// Optional line number, speaker letter, ASCII or full-width colon, body.
static SPEAKER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+\s*[).]?\s*)?([IiDd])\s*[:：](.*)$").unwrap());

/// Characters word processors smuggle in before the visible text.
const INVISIBLE_CHARS: [char; 5] = ['\u{FEFF}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

fn strip_invisible_prefix(line: &str) -> &str {
    line.trim_start_matches(|c| INVISIBLE_CHARS.contains(&c))
}

/// Parse editor text into segments. Utterance times are synthesized at a
/// fixed stride; confidences are copied by index from the prior transcript.
pub fn parse_editor_text(text: &str, prior_transcript: &[Segment]) -> Result<Vec<Segment>> {
    let mut utterances: Vec<(Role, String)> = Vec::new();
    let mut open = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim_end_matches('\r');
        let visible = strip_invisible_prefix(line);

        if let Some(captures) = SPEAKER_PREFIX.captures(visible) {
            let speaker = match captures.get(1).map(|m| m.as_str().to_uppercase()) {
                Some(s) if s == "I" => Role::I,
                _ => Role::D,
            };
            let body = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            if body.is_empty() {
                return Err(Error::ParsingFailed(format!(
                    "Linje {} er tom efter taler-prefix. Brug formatet 'I: ...' eller 'D: ...'.",
                    line_number
                )));
            }
            utterances.push((speaker, body.to_string()));
            open = true;
            continue;
        }

        if visible.trim().is_empty() {
            // Blank lines separate utterances without creating segments.
            open = false;
            continue;
        }

        if open {
            // Continuation line: append verbatim with a newline.
            if let Some((_, body)) = utterances.last_mut() {
                body.push('\n');
                body.push_str(line);
            }
            continue;
        }

        return Err(Error::ParsingFailed(format!(
            "Linje {} mangler taler-prefix. Hver ikke-tom linje skal starte med 'I:' eller 'D:'.",
            line_number
        )));
    }

    if utterances.is_empty() {
        return Err(Error::ParsingFailed(
            "Ingen gyldige ytringer fundet. Brug formatet 'I: ...' eller 'D: ...'.".to_string(),
        ));
    }

    let segments = utterances
        .into_iter()
        .enumerate()
        .map(|(idx, (speaker, text))| {
            let start_sec = round_ms(idx as f64 * SEGMENT_START_STEP);
            Segment {
                start_sec,
                end_sec: round_ms(start_sec + SEGMENT_DURATION),
                speaker,
                text,
                confidence: prior_transcript.get(idx).and_then(|s| s.confidence),
            }
        })
        .collect();

    Ok(segments)
}

/// Render a transcript to editor text: one `SPEAKER: text` line per segment,
/// continuation lines streamed without prefix, and a single blank line at
/// every speaker change.
pub fn render_editor_text(transcript: &[Segment]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous: Option<&Segment> = None;

    for segment in transcript {
        if let Some(prev) = previous {
            if prev.speaker != segment.speaker && !prev.text.ends_with('\n') {
                lines.push(String::new());
            }
        }
        lines.push(format!("{}: {}", segment.speaker.as_str(), segment.text));
        previous = Some(segment);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(speaker: Role, text: &str, confidence: Option<f64>) -> Segment {
        Segment {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker,
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_each_prefixed_line_is_its_own_utterance() {
        let text = "I: Hej og velkommen\nI: til interviewet i dag\nD: Tak for det.\nD: Det er fint.";
        let parsed = parse_editor_text(text, &[]).unwrap();

        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0].speaker, Role::I);
        assert_eq!(parsed[0].text, "Hej og velkommen");
        assert_eq!(parsed[2].speaker, Role::D);
        assert_eq!(parsed[2].text, "Tak for det.");

        assert_eq!(parsed[0].start_sec, 0.0);
        assert_eq!(parsed[0].end_sec, 1.0);
        assert_eq!(parsed[1].start_sec, 3.0);
        assert_eq!(parsed[2].start_sec, 6.0);
        assert_eq!(parsed[3].start_sec, 9.0);
    }

    #[test]
    fn test_tolerant_input_with_numbers_and_invisibles() {
        // Scenario S4: BOM + zero-width space, numbered line, continuation.
        let text = "\u{FEFF}\u{200B}I: Hej med dig\n1) D: Svar\n   fortsætter";
        let parsed = parse_editor_text(text, &[]).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].speaker, Role::I);
        assert_eq!(parsed[0].text, "Hej med dig");
        assert_eq!(parsed[1].speaker, Role::D);
        assert_eq!(parsed[1].text, "Svar\n   fortsætter");
    }

    #[test]
    fn test_full_width_colon_and_lowercase_prefix() {
        let text = "i：Første spørgsmål?\n2. d： Andet svar";
        let parsed = parse_editor_text(text, &[]).unwrap();

        assert_eq!(parsed[0].speaker, Role::I);
        assert_eq!(parsed[0].text, "Første spørgsmål?");
        assert_eq!(parsed[1].speaker, Role::D);
        assert_eq!(parsed[1].text, "Andet svar");
    }

    #[test]
    fn test_blank_lines_separate_utterances() {
        let text = "I: Hej\n\nD: Hej tilbage";
        let parsed = parse_editor_text(text, &[]).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_orphan_line_fails_with_line_number() {
        let error = parse_editor_text("Dette er en linje uden speaker-prefix.", &[]).unwrap_err();
        assert!(error.to_string().contains("Linje 1 mangler taler-prefix"));

        // A blank line closes the open utterance, so the next bare line is an
        // orphan again.
        let error = parse_editor_text("I: Hej\n\nfortsættelse uden prefix", &[]).unwrap_err();
        assert!(error.to_string().contains("Linje 3 mangler taler-prefix"));
    }

    #[test]
    fn test_empty_body_after_prefix_fails() {
        let error = parse_editor_text("I:", &[]).unwrap_err();
        assert!(error.to_string().contains("Linje 1 er tom efter taler-prefix"));
    }

    #[test]
    fn test_empty_input_fails() {
        let error = parse_editor_text("\n\n", &[]).unwrap_err();
        assert!(error.to_string().contains("Ingen gyldige ytringer"));
    }

    #[test]
    fn test_confidence_copied_by_index() {
        let prior = vec![
            segment(Role::I, "gammel", Some(0.77)),
            segment(Role::D, "gammel", None),
        ];
        let parsed = parse_editor_text("I: Ny tekst\nD: Mere tekst\nI: Tredje", &prior).unwrap();

        assert_eq!(parsed[0].confidence, Some(0.77));
        assert_eq!(parsed[1].confidence, None);
        assert_eq!(parsed[2].confidence, None);
    }

    #[test]
    fn test_render_inserts_blank_line_at_speaker_change() {
        let transcript = vec![
            segment(Role::I, "Første spørgsmål?", None),
            segment(Role::I, "Opfølgning", None),
            segment(Role::D, "Svar", None),
        ];
        let rendered = render_editor_text(&transcript);
        assert_eq!(rendered, "I: Første spørgsmål?\nI: Opfølgning\n\nD: Svar");
    }

    #[test]
    fn test_round_trip_up_to_times() {
        let transcript = vec![
            segment(Role::I, "Hvordan gik det?", Some(0.9)),
            segment(Role::D, "Fint nok\n   på anden linje", None),
            segment(Role::I, "Godt at høre", None),
        ];

        let rendered = render_editor_text(&transcript);
        let parsed = parse_editor_text(&rendered, &transcript).unwrap();

        assert_eq!(parsed.len(), transcript.len());
        for (original, round_tripped) in transcript.iter().zip(parsed.iter()) {
            assert_eq!(original.speaker, round_tripped.speaker);
            assert_eq!(original.text, round_tripped.text);
            assert_eq!(original.confidence, round_tripped.confidence);
        }
    }
}
