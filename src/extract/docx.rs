use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{DocumentFormat, Extraction, Table, TextUnit};

const CORE_PROPERTIES: [(&[u8], &str); 5] = [
    (b"creator", "author"),
    (b"title", "title"),
    (b"subject", "subject"),
    (b"created", "created"),
    (b"modified", "modified"),
];

pub fn extract(bytes: &[u8]) -> Extraction {
    let _span = tracing::debug_span!("extract.docx", size = bytes.len()).entered();

    let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(err) => {
            return Extraction::failed(
                Some(DocumentFormat::Docx),
                format!("failed to open DOCX: {err}"),
            )
        }
    };

    let document_xml = match read_entry(&mut archive, "word/document.xml") {
        Ok(Some(xml)) => xml,
        Ok(None) => {
            return Extraction::failed(Some(DocumentFormat::Docx), "word/document.xml missing")
        }
        Err(err) => return Extraction::failed(Some(DocumentFormat::Docx), err),
    };

    let body = match parse_body(&document_xml) {
        Ok(body) => body,
        Err(err) => return Extraction::failed(Some(DocumentFormat::Docx), err),
    };

    let metadata = match read_entry(&mut archive, "docProps/core.xml") {
        Ok(Some(xml)) => parse_core_properties(&xml),
        _ => BTreeMap::new(),
    };

    let full_text = body.paragraphs.join("\n\n");
    let units = body
        .paragraphs
        .into_iter()
        .map(|text| TextUnit { page: None, text })
        .collect();

    Extraction {
        format: Some(DocumentFormat::Docx),
        success: true,
        full_text,
        units,
        tables: body.tables,
        metadata,
        ..Extraction::default()
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, String> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(format!("failed to open {name}: {err}")),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|err| format!("failed to read {name}: {err}"))?;
    Ok(Some(content))
}

#[derive(Debug, Default)]
struct Body {
    paragraphs: Vec<String>,
    tables: Vec<Table>,
}

/// Walks `w:body`. Paragraphs outside tables become text units; each top-level table becomes
/// a row-of-cells matrix where a cell's paragraphs are joined by newlines. Nested tables are
/// flattened into the enclosing cell.
fn parse_body(xml: &str) -> Result<Body, String> {
    let mut reader = Reader::from_str(xml);
    let mut body = Body::default();

    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut paragraph = String::new();
    let mut cell_paragraphs: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut table: Table = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paragraph.clear(),
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell_paragraphs.clear(),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    let decoded = e
                        .unescape()
                        .map_err(|err| format!("XML parsing error: {err}"))?;
                    paragraph.push_str(&decoded);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim().to_string();
                    paragraph.clear();
                    if text.is_empty() {
                        continue;
                    }
                    if table_depth == 0 {
                        body.paragraphs.push(text);
                    } else {
                        cell_paragraphs.push(text);
                    }
                }
                b"tc" if table_depth == 1 => row.push(cell_paragraphs.join("\n")),
                b"tr" if table_depth == 1 => table.push(std::mem::take(&mut row)),
                b"tbl" => {
                    if table_depth == 1 && !table.is_empty() {
                        body.tables.push(std::mem::take(&mut table));
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(format!("XML parsing error: {err}")),
            _ => {}
        }
    }

    Ok(body)
}

fn parse_core_properties(xml: &str) -> BTreeMap<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut metadata = BTreeMap::new();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                current = CORE_PROPERTIES
                    .iter()
                    .find(|(key, _)| *key == name.as_ref())
                    .map(|(_, label)| *label);
            }
            Ok(Event::Text(e)) => {
                if let (Some(label), Ok(value)) = (current, e.unescape()) {
                    let value = value.trim();
                    if !value.is_empty() {
                        metadata.insert(label.to_string(), value.to_string());
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    metadata
}
