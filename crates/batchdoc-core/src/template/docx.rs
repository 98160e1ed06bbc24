//! .docx package reading and part compilation
//!
//! Word splits visible text into runs (`w:r`), each carrying its own
//! formatting and a `w:t` text node. A placeholder typed in one go can still
//! end up spread over several runs after spell-check or an edit, so
//! placeholders are searched in the joined text of a whole paragraph. The
//! replacement is written into the run where the placeholder starts, and
//! the placeholder characters in the following runs are removed. Runs that
//! carry no placeholder are left byte-for-byte untouched.
//!
//! A table row (`w:tr`) that holds a placeholder becomes a repeated region:
//! grouped output writes it once per record, per-record output once.

use std::io::{Cursor, Read};
use std::iter::Peekable;

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;
use zip::{CompressionMethod, ZipArchive};

use super::{find_placeholders, EntryContent, Escape, Fragment, PackageEntry, Template};
use crate::error::EngineLoadError;

/// Main document part, required in every package
pub const DOCUMENT_PART: &str = "word/document.xml";

const TEXT_TAG: &[u8] = b"w:t";
const PARAGRAPH_TAG: &[u8] = b"w:p";
const ROW_TAG: &[u8] = b"w:tr";

/// Whether a package entry carries user-visible text worth templating
pub fn is_templated_part(name: &str) -> bool {
    if name == DOCUMENT_PART || name == "word/footnotes.xml" || name == "word/endnotes.xml" {
        return true;
    }
    match name.strip_prefix("word/") {
        Some(rest) => {
            (rest.starts_with("header") || rest.starts_with("footer"))
                && rest.ends_with(".xml")
                && !rest.contains('/')
        }
        None => false,
    }
}

/// Read every entry of a package, compiling the text-bearing parts
pub(crate) fn read_package(bytes: &[u8]) -> Result<Vec<PackageEntry>, EngineLoadError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| EngineLoadError::NotAPackage(e.to_string()))?;

    if !archive.file_names().any(|name| name == DOCUMENT_PART) {
        return Err(EngineLoadError::MissingPart(DOCUMENT_PART.to_string()));
    }

    let mut entries = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let mut file = archive
            .by_index(idx)
            .map_err(|e| EngineLoadError::NotAPackage(e.to_string()))?;
        let name = file.name().to_string();

        if file.is_dir() {
            entries.push(PackageEntry {
                name,
                content: EntryContent::Directory,
            });
            continue;
        }

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(|e| EngineLoadError::NotAPackage(format!("{}: {}", name, e)))?;

        let content = if is_templated_part(&name) {
            let xml = String::from_utf8(raw).map_err(|_| EngineLoadError::Encoding(name.clone()))?;
            let template = compile_part(&name, &xml)?;
            debug!(
                part = %name,
                placeholders = template.placeholders().count(),
                "Compiled template part"
            );
            EntryContent::Template(template)
        } else {
            EntryContent::Raw {
                bytes: raw,
                stored: file.compression() == CompressionMethod::Stored,
            }
        };
        entries.push(PackageEntry { name, content });
    }

    Ok(entries)
}

/// A `w:t` element located in the part source
#[derive(Debug, Clone)]
struct TextRun {
    /// Offset of the `<` opening the start tag
    tag_start: usize,
    /// Offset just past the start tag
    start: usize,
    /// Offset of the `</` closing the element
    end: usize,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

/// Replacement for one run's start tag and content
#[derive(Debug, Clone)]
struct Edit {
    tag_start: usize,
    end: usize,
    start_tag: String,
    segments: Vec<Segment>,
}

impl Edit {
    fn has_placeholder(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }
}

/// Byte range of a whole `w:tr` element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowSpan {
    start: usize,
    end: usize,
}

impl RowSpan {
    fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Compile one XML part into a template
pub fn compile_part(part: &str, xml: &str) -> Result<Template, EngineLoadError> {
    let malformed = |message: String| EngineLoadError::MalformedXml {
        part: part.to_string(),
        message,
    };

    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<Vec<TextRun>> = Vec::new();
    let mut open_run: Option<(usize, usize)> = None;
    let mut open_rows: Vec<usize> = Vec::new();
    let mut rows = Vec::new();
    let mut edits = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        let pos = reader.buffer_position();

        match event {
            Event::Start(e) if e.name().as_ref() == PARAGRAPH_TAG => paragraphs.push(Vec::new()),
            Event::End(e) if e.name().as_ref() == PARAGRAPH_TAG => {
                if let Some(runs) = paragraphs.pop() {
                    edits.extend(plan_edits(xml, &runs));
                }
            }
            Event::Start(e) if e.name().as_ref() == ROW_TAG => {
                open_rows.push(xml[..pos].rfind('<').unwrap_or(pos));
            }
            Event::End(e) if e.name().as_ref() == ROW_TAG => {
                if let Some(start) = open_rows.pop() {
                    rows.push(RowSpan { start, end: pos });
                }
            }
            Event::Start(e) if e.name().as_ref() == TEXT_TAG => {
                let tag_start = xml[..pos].rfind('<').unwrap_or(pos);
                open_run = Some((tag_start, pos));
            }
            Event::End(e) if e.name().as_ref() == TEXT_TAG => {
                let Some((tag_start, start)) = open_run.take() else {
                    continue;
                };
                let end = xml[..pos].rfind("</").unwrap_or(pos).max(start);
                let text = unescape(&xml[start..end])
                    .map_err(|e| malformed(e.to_string()))?
                    .into_owned();
                let run = TextRun {
                    tag_start,
                    start,
                    end,
                    text,
                };
                match paragraphs.last_mut() {
                    Some(runs) => runs.push(run),
                    None => edits.extend(plan_edits(xml, std::slice::from_ref(&run))),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !paragraphs.is_empty() {
        return Err(malformed("unclosed paragraph".to_string()));
    }

    edits.sort_by_key(|edit| edit.tag_start);
    let repeated = repeated_rows(&rows, &edits);

    let mut fragments = Vec::new();
    let mut cursor = 0;
    let mut edits = edits.into_iter().peekable();
    for row in repeated {
        splice(xml, &mut cursor, row.start, &mut edits, &mut fragments);
        let mut body = Vec::new();
        splice(xml, &mut cursor, row.end, &mut edits, &mut body);
        fragments.push(Fragment::Repeat(Template::from_fragments(
            body,
            Escape::WordXml,
        )));
    }
    splice(xml, &mut cursor, xml.len(), &mut edits, &mut fragments);

    Ok(Template::from_fragments(fragments, Escape::WordXml))
}

/// Innermost rows holding a placeholder, outermost kept when they nest
fn repeated_rows(rows: &[RowSpan], edits: &[Edit]) -> Vec<RowSpan> {
    let mut selected: Vec<RowSpan> = edits
        .iter()
        .filter(|edit| edit.has_placeholder())
        .filter_map(|edit| {
            rows.iter()
                .filter(|row| row.contains(edit.tag_start))
                .min_by_key(|row| row.end - row.start)
                .copied()
        })
        .collect();
    selected.sort_by_key(|row| row.start);
    selected.dedup();

    let mut kept: Vec<RowSpan> = Vec::with_capacity(selected.len());
    for row in selected {
        match kept.last() {
            Some(prev) if row.start < prev.end => {}
            _ => kept.push(row),
        }
    }
    kept
}

/// Source up to `until` as fragments, applying the edits that start before it
fn splice(
    xml: &str,
    cursor: &mut usize,
    until: usize,
    edits: &mut Peekable<std::vec::IntoIter<Edit>>,
    out: &mut Vec<Fragment>,
) {
    while let Some(edit) = edits.next_if(|edit| edit.tag_start < until) {
        out.push(Fragment::Literal(xml[*cursor..edit.tag_start].to_string()));
        out.push(Fragment::Literal(edit.start_tag));
        for segment in edit.segments {
            out.push(match segment {
                Segment::Text(text) => Fragment::Literal(escape(&text).into_owned()),
                Segment::Placeholder(name) => Fragment::Placeholder(name),
            });
        }
        *cursor = edit.end;
    }
    out.push(Fragment::Literal(xml[*cursor..until].to_string()));
    *cursor = until;
}

/// Work out which runs of a paragraph change and what they become
fn plan_edits(xml: &str, runs: &[TextRun]) -> Vec<Edit> {
    let joined: String = runs.iter().map(|run| run.text.as_str()).collect();
    let matches = find_placeholders(&joined);
    if matches.is_empty() {
        return Vec::new();
    }

    let mut edits = Vec::new();
    let mut offset = 0;
    for run in runs {
        let run_start = offset;
        let run_end = offset + run.text.len();
        offset = run_end;

        let touching: Vec<_> = matches
            .iter()
            .filter(|m| m.range.start < run_end && m.range.end > run_start)
            .collect();
        if touching.is_empty() {
            continue;
        }

        let mut segments = Vec::new();
        let mut cursor = run_start;
        for m in touching {
            if m.range.start > cursor {
                segments.push(Segment::Text(joined[cursor..m.range.start].to_string()));
            }
            if m.range.start >= run_start {
                segments.push(Segment::Placeholder(m.name.clone()));
            }
            cursor = m.range.end.min(run_end);
        }
        if cursor < run_end {
            segments.push(Segment::Text(joined[cursor..run_end].to_string()));
        }

        edits.push(Edit {
            tag_start: run.tag_start,
            end: run.end,
            start_tag: preserve_space(&xml[run.tag_start..run.start]),
            segments,
        });
    }
    edits
}

/// Substituted values may start or end with spaces Word would otherwise drop
fn preserve_space(start_tag: &str) -> String {
    if start_tag.contains("xml:space") {
        start_tag.to_string()
    } else {
        "<w:t xml:space=\"preserve\">".to_string()
    }
}
