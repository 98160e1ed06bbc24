//! Rendering a compiled template for one record or one group of records

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{DocumentTemplate, EntryContent, PackageEntry, Template, TemplateBody};
use crate::error::{MissingFieldError, RenderError};
use crate::record::Record;

/// Render `template` with the display values of `record`
///
/// Every placeholder is checked against the record first; when any is
/// missing nothing is written and all missing names are reported. The
/// template is never modified, so it can be rendered again for the next
/// record.
pub fn render(template: &DocumentTemplate, record: &Record) -> Result<Vec<u8>, RenderError> {
    let missing = template.missing_fields(|name| record.get(name).is_some());
    if !missing.is_empty() {
        return Err(MissingFieldError { fields: missing }.into());
    }

    let lookup = |name: &str| record.display(name);
    write_body(template, |part| part.render_with(lookup))
}

/// Render `template` once for a whole group
///
/// Repeated table rows are written once per record, in the order given.
/// Everything outside them takes its values from the first record.
pub fn render_group(
    template: &DocumentTemplate,
    records: &[&Record],
) -> Result<Vec<u8>, RenderError> {
    let Some(first) = records.first() else {
        return Err(RenderError::Output("group has no records".to_string()));
    };
    let missing = template.missing_fields(|name| first.get(name).is_some());
    if !missing.is_empty() {
        return Err(MissingFieldError { fields: missing }.into());
    }

    let lookups: Vec<_> = records
        .iter()
        .map(|&record| move |name: &str| record.display(name))
        .collect();
    write_body(template, |part| {
        part.render_group(&lookups[0], lookups.as_slice())
    })
}

/// Output bytes of a text template, or a package with every part filled
fn write_body<R>(template: &DocumentTemplate, fill: R) -> Result<Vec<u8>, RenderError>
where
    R: Fn(&Template) -> Result<String, MissingFieldError>,
{
    match &template.body {
        TemplateBody::Text(text) => Ok(fill(text)?.into_bytes()),
        TemplateBody::Package(entries) => write_package(entries, fill),
    }
}

fn write_package<R>(entries: &[PackageEntry], fill: R) -> Result<Vec<u8>, RenderError>
where
    R: Fn(&Template) -> Result<String, MissingFieldError>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for entry in entries {
        match &entry.content {
            EntryContent::Directory => {
                writer.add_directory(entry.name.as_str(), deflated).map_err(output)?;
            }
            EntryContent::Raw { bytes, stored: is_stored } => {
                let options = if *is_stored { stored } else { deflated };
                writer.start_file(entry.name.as_str(), options).map_err(output)?;
                writer.write_all(bytes).map_err(output)?;
            }
            EntryContent::Template(part) => {
                let xml = fill(part)?;
                writer.start_file(entry.name.as_str(), deflated).map_err(output)?;
                writer.write_all(xml.as_bytes()).map_err(output)?;
            }
        }
    }

    let cursor = writer.finish().map_err(output)?;
    Ok(cursor.into_inner())
}

fn output(err: impl std::fmt::Display) -> RenderError {
    RenderError::Output(err.to_string())
}
