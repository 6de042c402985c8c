// DOCX exporter.
//
// The document is generated directly as OOXML parts and zipped: a fixed
// three-column table (number | gap | text) whose rows grow with their
// content, matching the TXT exporter's line-number contract.

use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::models::{Job, Role, Segment};

use super::{build_line_entries, header_lines, LineEntry};

const PAGE_WIDTH_TWIPS: i64 = 11906;
const PAGE_HEIGHT_TWIPS: i64 = 16838;
const TOP_BOTTOM_MARGIN_TWIPS: i64 = 1701;
const SIDE_MARGIN_TWIPS: i64 = 1134;

const NUMBER_COL_TWIPS: i64 = 601;
const GAP_COL_TWIPS: i64 = 329;
const TEXT_COL_TWIPS: i64 =
    PAGE_WIDTH_TWIPS - SIDE_MARGIN_TWIPS * 2 - NUMBER_COL_TWIPS - GAP_COL_TWIPS;

/// Minimum row height. The rule is `atLeast`, never `exact`: content must be
/// able to grow the row.
const ROW_MIN_HEIGHT_TWIPS: i64 = 283;

/// Wrap budget for the text column, in points (20 twips per point), with
/// breathing room for cell padding.
const WRAP_SLACK_PT: f64 = 8.0;

/// Write the transcript as a DOCX file.
pub fn export_docx(
    job: &Job,
    transcript: &[Segment],
    output_path: &Path,
    source_name_override: Option<&str>,
) -> Result<()> {
    let wrap_width_pt = TEXT_COL_TWIPS as f64 / 20.0 - WRAP_SLACK_PT;
    let entries = build_line_entries(transcript, Some(wrap_width_pt));
    let document = document_xml(&header_lines(job, source_name_override), &entries);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(output_path)?;
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML),
        ("_rels/.rels", ROOT_RELS_XML),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML),
        ("word/styles.xml", STYLES_XML),
        ("word/document.xml", &document),
    ];
    for (name, body) in parts {
        archive
            .start_file(name, options)
            .map_err(zip_error)?;
        archive.write_all(body.as_bytes())?;
    }
    archive.finish().map_err(zip_error)?;

    log::info!("Exported DOCX transcript to {:?}", output_path);
    Ok(())
}

fn zip_error(error: zip::result::ZipError) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("DOCX-arkiv kunne ikke skrives: {}", error),
    ))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn tight_paragraph_props() -> &'static str {
    r#"<w:pPr><w:spacing w:before="0" w:after="0" w:line="240" w:lineRule="auto"/></w:pPr>"#
}

fn header_paragraph(line: &str) -> String {
    if line.is_empty() {
        return format!("<w:p>{}</w:p>", tight_paragraph_props());
    }
    let run_props = if line == "Deltagere:" { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        r#"<w:p>{}<w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        tight_paragraph_props(),
        run_props,
        xml_escape(line)
    )
}

fn text_cell_paragraph(entry: &LineEntry) -> String {
    let mut runs = String::new();
    match entry.speaker {
        Some(speaker) => {
            runs.push_str(&format!(
                r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}:</w:t></w:r>"#,
                speaker_letter(speaker)
            ));
            if !entry.text.is_empty() {
                runs.push_str(&format!(
                    r#"<w:r><w:t xml:space="preserve"> {}</w:t></w:r>"#,
                    xml_escape(&entry.text)
                ));
            }
        }
        None => {
            if !entry.text.is_empty() {
                runs.push_str(&format!(
                    r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#,
                    xml_escape(&entry.text)
                ));
            }
        }
    }
    format!("<w:p>{}{}</w:p>", tight_paragraph_props(), runs)
}

fn speaker_letter(speaker: Role) -> &'static str {
    speaker.as_str()
}

fn table_row(entry: &LineEntry) -> String {
    let number_paragraph = format!(
        r#"<w:p><w:pPr><w:spacing w:before="0" w:after="0" w:line="240" w:lineRule="auto"/><w:jc w:val="right"/></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>"#,
        entry.number
    );

    format!(
        concat!(
            r#"<w:tr><w:trPr><w:trHeight w:val="{height}" w:hRule="atLeast"/></w:trPr>"#,
            r#"<w:tc><w:tcPr><w:tcW w:w="{num_w}" w:type="dxa"/></w:tcPr>{number}</w:tc>"#,
            r#"<w:tc><w:tcPr><w:tcW w:w="{gap_w}" w:type="dxa"/></w:tcPr><w:p>{props}</w:p></w:tc>"#,
            r#"<w:tc><w:tcPr><w:tcW w:w="{text_w}" w:type="dxa"/></w:tcPr>{text}</w:tc>"#,
            "</w:tr>"
        ),
        height = ROW_MIN_HEIGHT_TWIPS,
        num_w = NUMBER_COL_TWIPS,
        gap_w = GAP_COL_TWIPS,
        text_w = TEXT_COL_TWIPS,
        number = number_paragraph,
        props = tight_paragraph_props(),
        text = text_cell_paragraph(entry),
    )
}

fn table_xml(entries: &[LineEntry]) -> String {
    let mut table = String::new();
    table.push_str(&format!(
        concat!(
            "<w:tbl><w:tblPr>",
            r#"<w:tblW w:w="{total}" w:type="dxa"/>"#,
            r#"<w:tblLayout w:type="fixed"/>"#,
            r#"<w:tblBorders><w:top w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#,
            r#"<w:left w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#,
            r#"<w:bottom w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#,
            r#"<w:right w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#,
            r#"<w:insideH w:val="none" w:sz="0" w:space="0" w:color="auto"/>"#,
            r#"<w:insideV w:val="none" w:sz="0" w:space="0" w:color="auto"/></w:tblBorders>"#,
            "</w:tblPr>",
            r#"<w:tblGrid><w:gridCol w:w="{num_w}"/><w:gridCol w:w="{gap_w}"/><w:gridCol w:w="{text_w}"/></w:tblGrid>"#
        ),
        total = NUMBER_COL_TWIPS + GAP_COL_TWIPS + TEXT_COL_TWIPS,
        num_w = NUMBER_COL_TWIPS,
        gap_w = GAP_COL_TWIPS,
        text_w = TEXT_COL_TWIPS,
    ));

    for entry in entries {
        table.push_str(&table_row(entry));
    }
    table.push_str("</w:tbl>");
    table
}

fn document_xml(header: &[String], entries: &[LineEntry]) -> String {
    let mut body = String::new();
    for line in header {
        body.push_str(&header_paragraph(line));
    }
    if !entries.is_empty() {
        body.push_str(&table_xml(entries));
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            "<w:body>{body}",
            r#"<w:sectPr><w:pgSz w:w="{page_w}" w:h="{page_h}"/>"#,
            r#"<w:pgMar w:top="{tb}" w:bottom="{tb}" w:left="{lr}" w:right="{lr}" w:header="708" w:footer="708" w:gutter="0"/>"#,
            "</w:sectPr></w:body></w:document>"
        ),
        body = body,
        page_w = PAGE_WIDTH_TWIPS,
        page_h = PAGE_HEIGHT_TWIPS,
        tb = TOP_BOTTOM_MARGIN_TWIPS,
        lr = SIDE_MARGIN_TWIPS,
    )
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"<Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>"#,
    "</Types>"
);

const ROOT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    "</Relationships>"
);

const DOCUMENT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
    "</Relationships>"
);

/// Document defaults: minor-Latin body font at 12 pt (24 half-points).
const STYLES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
    "<w:docDefaults><w:rPrDefault><w:rPr>",
    r#"<w:rFonts w:asciiTheme="minorHAnsi" w:hAnsiTheme="minorHAnsi" w:eastAsiaTheme="minorHAnsi" w:cstheme="minorBidi"/>"#,
    r#"<w:sz w:val="24"/><w:szCs w:val="24"/>"#,
    "</w:rPr></w:rPrDefault>",
    r#"<w:pPrDefault><w:pPr><w:spacing w:before="0" w:after="0" w:line="240" w:lineRule="auto"/></w:pPr></w:pPrDefault>"#,
    "</w:docDefaults></w:styles>"
);
