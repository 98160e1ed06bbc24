//! Template compilation and rendering
//!
//! A [`Template`] is a list of literal fragments and placeholders, plus
//! repeated regions (Word table rows) that grouped output fills once per
//! record. A [`DocumentTemplate`] is what users upload: either a .docx
//! package whose text-bearing XML parts are compiled into templates, or a
//! plain text file. Templates are compiled once and rendered for every
//! record or group of a batch.

pub mod docx;
pub mod placeholder;
pub mod render;

use std::collections::HashSet;

pub use placeholder::{find_placeholders, PlaceholderMatch};
pub use render::{render, render_group};

use crate::error::{EngineLoadError, MissingFieldError};
use crate::upload::{TemplateFormat, Upload};

/// A piece of a compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Output copied as-is (already escaped for XML parts)
    Literal(String),
    /// Replaced by the display value of the named field
    Placeholder(String),
    /// A table row holding placeholders, written once per grouped record
    Repeat(Template),
}

/// How substituted values are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    /// Values are written verbatim
    #[default]
    None,
    /// Values are XML-escaped; newlines and tabs become `w:br` / `w:tab`
    WordXml,
}

/// Literal content interleaved with placeholders
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    fragments: Vec<Fragment>,
    escape: Escape,
}

impl Template {
    /// Compile plain text
    pub fn parse(text: &str) -> Self {
        let mut fragments = Vec::new();
        let mut cursor = 0;
        for m in find_placeholders(text) {
            fragments.push(Fragment::Literal(text[cursor..m.range.start].to_string()));
            fragments.push(Fragment::Placeholder(m.name));
            cursor = m.range.end;
        }
        fragments.push(Fragment::Literal(text[cursor..].to_string()));
        Self::from_fragments(fragments, Escape::None)
    }

    /// Build from fragments, merging adjacent literals and dropping empty ones
    pub fn from_fragments(fragments: Vec<Fragment>, escape: Escape) -> Self {
        let mut merged: Vec<Fragment> = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            match (merged.last_mut(), fragment) {
                (_, Fragment::Literal(text)) if text.is_empty() => {}
                (Some(Fragment::Literal(prev)), Fragment::Literal(text)) => prev.push_str(&text),
                (_, fragment) => merged.push(fragment),
            }
        }
        Self {
            fragments: merged,
            escape,
        }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn escape(&self) -> Escape {
        self.escape
    }

    /// Placeholder names in order of appearance (repeats included)
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        let mut names = Vec::new();
        self.collect_placeholders(&mut names, false);
        names.into_iter()
    }

    /// Placeholder names inside repeated rows
    pub fn row_placeholders(&self) -> impl Iterator<Item = &str> {
        let mut names = Vec::new();
        self.collect_placeholders(&mut names, true);
        names.into_iter()
    }

    /// Whether the template has a region that grouped output repeats
    pub fn has_repeat(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| matches!(f, Fragment::Repeat(_)))
    }

    fn collect_placeholders<'t>(&'t self, names: &mut Vec<&'t str>, rows_only: bool) {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Placeholder(name) if !rows_only => names.push(name.as_str()),
                Fragment::Repeat(row) => row.collect_placeholders(names, false),
                _ => {}
            }
        }
    }

    /// Fill every placeholder through `lookup`
    ///
    /// All placeholders are checked before any output is built, so a missing
    /// field never yields a partially filled result. Repeated rows are
    /// written once.
    pub fn render_with<'a, F>(&self, lookup: F) -> Result<String, MissingFieldError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let missing = distinct(self.placeholders().filter(|name| lookup(name).is_none()));
        if !missing.is_empty() {
            return Err(MissingFieldError { fields: missing });
        }

        let mut out = String::new();
        self.write(&mut out, &lookup, None);
        Ok(out)
    }

    /// Fill repeated rows once per entry of `rows`, everything else from `head`
    ///
    /// `head` must cover every placeholder; each row lookup must cover the
    /// placeholders of the repeated rows.
    pub fn render_group<'a, F>(&self, head: &F, rows: &[F]) -> Result<String, MissingFieldError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let row_names: Vec<&str> = self.row_placeholders().collect();
        let missing = distinct(
            self.placeholders()
                .filter(|name| head(name).is_none())
                .chain(rows.iter().flat_map(|row| {
                    row_names.iter().copied().filter(move |name| row(name).is_none())
                })),
        );
        if !missing.is_empty() {
            return Err(MissingFieldError { fields: missing });
        }

        let mut out = String::new();
        self.write(&mut out, head, Some(rows));
        Ok(out)
    }

    fn write<'a, F>(&self, out: &mut String, lookup: &F, rows: Option<&[F]>)
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(text) => out.push_str(text),
                Fragment::Placeholder(name) => {
                    let value = lookup(name).unwrap_or_default();
                    match self.escape {
                        Escape::None => out.push_str(value),
                        Escape::WordXml => push_word_text(out, value),
                    }
                }
                Fragment::Repeat(row) => match rows {
                    Some(rows) => rows.iter().for_each(|each| row.write(out, each, None)),
                    None => row.write(out, lookup, None),
                },
            }
        }
    }
}

/// Write a value inside an open `w:t`, breaking out for line breaks and tabs
fn push_word_text(out: &mut String, value: &str) {
    let normalized = value.replace("\r\n", "\n").replace('\r', "\n");
    for (idx, ch) in normalized.char_indices() {
        match ch {
            '\n' => out.push_str("</w:t><w:br/><w:t xml:space=\"preserve\">"),
            '\t' => out.push_str("</w:t><w:tab/><w:t xml:space=\"preserve\">"),
            _ => {
                let end = idx + ch.len_utf8();
                out.push_str(&quick_xml::escape::escape(&normalized[idx..end]));
            }
        }
    }
}

/// First-seen order, duplicates removed
fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// One entry of a .docx package
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageEntry {
    pub name: String,
    pub content: EntryContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryContent {
    Directory,
    Raw { bytes: Vec<u8>, stored: bool },
    Template(Template),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TemplateBody {
    Text(Template),
    Package(Vec<PackageEntry>),
}

/// An uploaded template, compiled and ready to render many times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTemplate {
    pub(crate) body: TemplateBody,
}

impl DocumentTemplate {
    /// Compile an upload whose format was already detected
    pub fn load(upload: &Upload, format: TemplateFormat) -> Result<Self, EngineLoadError> {
        match format {
            TemplateFormat::Docx => Self::from_docx(&upload.bytes),
            TemplateFormat::Text => {
                let text = std::str::from_utf8(&upload.bytes)
                    .map_err(|_| EngineLoadError::Encoding(upload.file_name.clone()))?;
                Ok(Self::from_text(text))
            }
        }
    }

    /// Compile a .docx package
    pub fn from_docx(bytes: &[u8]) -> Result<Self, EngineLoadError> {
        let entries = docx::read_package(bytes)?;
        Ok(Self {
            body: TemplateBody::Package(entries),
        })
    }

    /// Compile a plain text template
    pub fn from_text(text: &str) -> Self {
        Self {
            body: TemplateBody::Text(Template::parse(text)),
        }
    }

    pub fn format(&self) -> TemplateFormat {
        match self.body {
            TemplateBody::Text(_) => TemplateFormat::Text,
            TemplateBody::Package(_) => TemplateFormat::Docx,
        }
    }

    /// Compiled templates in package order
    pub fn parts(&self) -> Vec<&Template> {
        match &self.body {
            TemplateBody::Text(template) => vec![template],
            TemplateBody::Package(entries) => entries
                .iter()
                .filter_map(|e| match &e.content {
                    EntryContent::Template(t) => Some(t),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Distinct placeholder names across all parts, first-seen order
    pub fn placeholders(&self) -> Vec<String> {
        distinct(self.parts().into_iter().flat_map(Template::placeholders))
    }

    /// Whether any part has a table row that grouped output can repeat
    pub fn has_repeating_rows(&self) -> bool {
        self.parts().into_iter().any(Template::has_repeat)
    }

    /// Placeholders that `has_field` rejects, first-seen order
    pub fn missing_fields(&self, has_field: impl Fn(&str) -> bool) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !has_field(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<&'a str> {
        move |name| pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    #[test]
    fn test_parse_text_fragments() {
        let t = Template::parse("Batch {{Batch}}, lot {{Lot}}.");
        assert_eq!(
            t.fragments(),
            &[
                Fragment::Literal("Batch ".into()),
                Fragment::Placeholder("Batch".into()),
                Fragment::Literal(", lot ".into()),
                Fragment::Placeholder("Lot".into()),
                Fragment::Literal(".".into()),
            ]
        );
    }

    #[test]
    fn test_from_fragments_merges_literals() {
        let t = Template::from_fragments(
            vec![
                Fragment::Literal("a".into()),
                Fragment::Literal("".into()),
                Fragment::Literal("b".into()),
                Fragment::Placeholder("x".into()),
                Fragment::Literal("c".into()),
            ],
            Escape::None,
        );
        assert_eq!(
            t.fragments(),
            &[
                Fragment::Literal("ab".into()),
                Fragment::Placeholder("x".into()),
                Fragment::Literal("c".into()),
            ]
        );
    }

    #[test]
    fn test_render_substitutes_values() {
        let t = Template::parse("{{Batch}}/{{Lot}}/{{Qty}}");
        let out = t
            .render_with(lookup(&[("Batch", "B100"), ("Lot", "L5"), ("Qty", "200")]))
            .unwrap();
        assert_eq!(out, "B100/L5/200");
    }

    #[test]
    fn test_render_reports_all_missing_once() {
        let t = Template::parse("{{Batch}} {{Lot}} {{Qty}} {{Lot}}");
        let err = t.render_with(lookup(&[("Batch", "B100")])).unwrap_err();
        assert_eq!(err.fields, vec!["Lot".to_string(), "Qty".to_string()]);
    }

    #[test]
    fn test_render_is_repeatable() {
        let t = Template::parse("{{Batch}}");
        let first = t.render_with(lookup(&[("Batch", "B1")])).unwrap();
        let second = t.render_with(lookup(&[("Batch", "B2")])).unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("B1", "B2"));
        assert_eq!(t, Template::parse("{{Batch}}"));
    }

    #[test]
    fn test_word_escape() {
        let t = Template::from_fragments(
            vec![
                Fragment::Literal("<w:t>".into()),
                Fragment::Placeholder("Note".into()),
                Fragment::Literal("</w:t>".into()),
            ],
            Escape::WordXml,
        );
        let out = t.render_with(lookup(&[("Note", "a<b & c\nd")])).unwrap();
        assert_eq!(
            out,
            "<w:t>a&lt;b &amp; c</w:t><w:br/><w:t xml:space=\"preserve\">d</w:t>"
        );
    }

    fn table(row: Vec<Fragment>) -> Template {
        Template::from_fragments(
            vec![
                Fragment::Literal("[".into()),
                Fragment::Placeholder("Product".into()),
                Fragment::Literal("|".into()),
                Fragment::Repeat(Template::from_fragments(row, Escape::None)),
                Fragment::Literal("]".into()),
            ],
            Escape::None,
        )
    }

    #[test]
    fn test_group_repeats_rows_in_order() {
        let t = table(vec![
            Fragment::Placeholder("Batch".into()),
            Fragment::Literal(";".into()),
        ]);
        assert!(t.has_repeat());
        assert_eq!(t.placeholders().collect::<Vec<_>>(), vec!["Product", "Batch"]);
        assert_eq!(t.row_placeholders().collect::<Vec<_>>(), vec!["Batch"]);

        let first = [("Product", "Para"), ("Batch", "B1")];
        let second = [("Product", "Para"), ("Batch", "B2")];
        let rows = [lookup(&first), lookup(&second)];
        assert_eq!(t.render_group(&rows[0], &rows).unwrap(), "[Para|B1;B2;]");

        // Per-record rendering writes the row once
        assert_eq!(t.render_with(lookup(&second)).unwrap(), "[Para|B2;]");
    }

    #[test]
    fn test_group_reports_fields_missing_from_rows() {
        let t = table(vec![Fragment::Placeholder("Lot".into())]);
        let first = [("Product", "Para"), ("Lot", "L1")];
        let second = [("Product", "Para")];
        let rows = [lookup(&first), lookup(&second)];
        let err = t.render_group(&rows[0], &rows).unwrap_err();
        assert_eq!(err.fields, vec!["Lot".to_string()]);
    }

    #[test]
    fn test_text_document_placeholders() {
        let doc = DocumentTemplate::from_text("{{A}} {{B}} {{A}}");
        assert_eq!(doc.format(), TemplateFormat::Text);
        assert_eq!(doc.placeholders(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(doc.missing_fields(|f| f == "A"), vec!["B".to_string()]);
    }
}
