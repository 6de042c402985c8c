// Plain-text exporter: header block plus tab-separated numbered lines.

use std::path::Path;

use crate::error::Result;
use crate::models::{Job, Segment};

use super::{build_line_entries, header_lines};

/// Write the transcript as numbered text. Blank separator entries emit only
/// their number and tab; the file ends with a single newline.
pub fn export_txt(
    job: &Job,
    transcript: &[Segment],
    output_path: &Path,
    source_name_override: Option<&str>,
) -> Result<()> {
    let mut lines = header_lines(job, source_name_override);

    for entry in build_line_entries(transcript, None) {
        let line = match entry.speaker {
            Some(speaker) => format!("{}\t{}: {}", entry.number, speaker.as_str(), entry.text),
            None if entry.text.is_empty() => format!("{}\t", entry.number),
            None => format!("{}\t{}", entry.number, entry.text),
        };
        lines.push(line);
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, format!("{}\n", lines.join("\n").trim_end()))?;

    log::info!("Exported TXT transcript to {:?}", output_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::sample_job;
    use crate::models::Role;
    use tempfile::tempdir;

    fn segment(speaker: Role, text: &str, start: f64) -> Segment {
        Segment {
            start_sec: start,
            end_sec: start + 1.0,
            speaker,
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn test_txt_contains_header_and_dialogue() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let transcript = vec![
            segment(Role::I, "Velkommen", 0.0),
            segment(Role::D, "Tak", 1.1),
        ];

        export_txt(&sample_job(), &transcript, &out, None).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();

        assert!(content.contains("Navn på fil:"));
        assert!(content.contains("Varighed:"));
        assert!(content.contains("1\tI: Velkommen"));
        // Separator row between the speaker blocks carries its own number.
        assert!(content.contains("\n2\t\n"));
        assert!(content.contains("3\tD: Tak"));
        assert!(content.ends_with('\n'));
        assert!(!content.ends_with("\n\n"));
    }

    #[test]
    fn test_txt_continuation_lines_have_no_prefix() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let transcript = vec![segment(Role::I, "Første\nanden linje", 0.0)];

        export_txt(&sample_job(), &transcript, &out, None).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();

        assert!(content.contains("1\tI: Første"));
        assert!(content.contains("2\tanden linje"));
    }

    #[test]
    fn test_txt_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("nested/deep/out.txt");
        export_txt(&sample_job(), &[segment(Role::I, "Hej", 0.0)], &out, None).unwrap();
        assert!(out.exists());
    }
}
