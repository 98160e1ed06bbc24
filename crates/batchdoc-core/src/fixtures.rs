//! In-memory .xlsx and .docx builders for tests
//!
//! The packages carry only the parts calamine and the template compiler
//! read, which keeps fixtures readable inside the tests that use them.

use std::io::{Cursor, Read, Write};

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Zip the given `(name, content)` entries, deflated, in order
pub fn zip_entries(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(content.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Single-sheet workbook; cells that parse as numbers are stored as numbers
pub fn xlsx(sheet_name: &str, rows: &[&[&str]]) -> Vec<u8> {
    let content_types = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
         <Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>\
         </Types>";
    let root_rels = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"{}/officeDocument\" Target=\"xl/workbook.xml\"/>\
         </Relationships>",
        REL_NS
    );
    let workbook = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <workbook xmlns=\"{}\" xmlns:r=\"{}\">\
         <sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets>\
         </workbook>",
        SPREADSHEETML_NS,
        REL_NS,
        escape(sheet_name)
    );
    let workbook_rels = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"{}/worksheet\" Target=\"worksheets/sheet1.xml\"/>\
         </Relationships>",
        REL_NS
    );

    let mut sheet_data = String::new();
    for (r, row) in rows.iter().enumerate() {
        sheet_data.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let reference = format!("{}{}", column_letters(c), r + 1);
            if cell.parse::<f64>().is_ok() {
                sheet_data.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", reference, cell));
            } else {
                sheet_data.push_str(&format!(
                    "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                    reference,
                    escape(*cell)
                ));
            }
        }
        sheet_data.push_str("</row>");
    }
    let sheet = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <worksheet xmlns=\"{}\"><sheetData>{}</sheetData></worksheet>",
        SPREADSHEETML_NS, sheet_data
    );

    zip_entries(&[
        ("[Content_Types].xml", content_types),
        ("_rels/.rels", root_rels.as_str()),
        ("xl/workbook.xml", workbook.as_str()),
        ("xl/_rels/workbook.xml.rels", workbook_rels.as_str()),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
    ])
}

/// `0` -> `A`, `27` -> `AB`
fn column_letters(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).expect("ascii")
}

/// Minimal .docx whose body is the given WordprocessingML
pub fn docx_from_body(body: &str) -> Vec<u8> {
    docx_with_parts(body, &[])
}

/// Minimal .docx with one single-run paragraph per entry
pub fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    docx_from_body(&paragraphs_xml(paragraphs))
}

/// Paragraph markup, one single-run paragraph per entry
pub fn paragraphs_xml(paragraphs: &[&str]) -> String {
    paragraphs
        .iter()
        .map(|text| {
            format!(
                "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
                escape(*text)
            )
        })
        .collect()
}

/// Minimal .docx plus extra parts such as `word/header1.xml`
pub fn docx_with_parts(body: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let content_types = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
         </Types>";
    let rels = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"{}/officeDocument\" Target=\"word/document.xml\"/>\
         </Relationships>",
        REL_NS
    );
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
        WORDML_NS, body
    );

    let mut entries: Vec<(&str, &str)> = vec![
        ("[Content_Types].xml", content_types),
        ("_rels/.rels", rels.as_str()),
        ("word/document.xml", document.as_str()),
    ];
    entries.extend_from_slice(extra);
    zip_entries(&entries)
}

/// Content of one package entry as text
pub fn docx_part(bytes: &[u8], name: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("zip package");
    let mut file = archive.by_name(name).expect("package entry");
    let mut out = String::new();
    file.read_to_string(&mut out).expect("utf-8 entry");
    out
}

/// Raw bytes of one zip entry, e.g. a document inside a batch archive
pub fn zip_entry_bytes(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("zip package");
    let mut file = archive.by_name(name).expect("zip entry");
    let mut out = Vec::new();
    file.read_to_end(&mut out).expect("readable entry");
    out
}

/// Entry names of a zip, in archive order
pub fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("zip package");
    (0..archive.len())
        .map(|idx| archive.by_index(idx).expect("zip entry").name().to_string())
        .collect()
}

/// Visible text of `word/document.xml`: paragraphs joined by `\n`, `w:br`
/// as `\n`, `w:tab` as `\t`
pub fn docx_text(bytes: &[u8]) -> String {
    part_text(bytes, "word/document.xml")
}

/// Header or footer part wrapping the given paragraph markup
pub fn story_part(root: &str, paragraphs: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:{root} xmlns:w=\"{ns}\">{paragraphs}</w:{root}>",
        root = root,
        ns = WORDML_NS,
        paragraphs = paragraphs
    )
}

/// Visible text of any WordprocessingML part, read like [`docx_text`]
pub fn part_text(bytes: &[u8], name: &str) -> String {
    let xml = docx_part(bytes, name);
    let mut reader = Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().expect("well-formed document") {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) if e.name().as_ref() == b"w:t" => in_text = false,
            Event::Text(e) if in_text => {
                current.push_str(&e.unescape().expect("valid escapes"));
            }
            Event::Empty(e) if e.name().as_ref() == b"w:br" => current.push('\n'),
            Event::Empty(e) if e.name().as_ref() == b"w:tab" => current.push('\t'),
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                paragraphs.push(std::mem::take(&mut current));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    paragraphs.join("\n")
}
