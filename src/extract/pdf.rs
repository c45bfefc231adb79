use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId};

use super::{DocumentFormat, Extraction, TextUnit};

const INFO_KEYS: [(&[u8], &str); 6] = [
    (b"Author", "author"),
    (b"Title", "title"),
    (b"Subject", "subject"),
    (b"Creator", "creator"),
    (b"CreationDate", "created"),
    (b"ModDate", "modified"),
];

/// A raster XObject found on a page.
#[derive(Debug, Clone)]
struct PdfImage {
    page: u32,
    extension: &'static str,
    width: Option<i64>,
    height: Option<i64>,
    size: usize,
}

/// Text per page. A PDF without any text layer but with embedded raster images is a scan:
/// it is marked `is_image` and its images are summarized in the metadata.
pub fn extract(bytes: &[u8]) -> Extraction {
    let _span = tracing::debug_span!("extract.pdf", size = bytes.len()).entered();

    let doc = match Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(err) => {
            return Extraction::failed(Some(DocumentFormat::Pdf), format!("invalid PDF: {err}"))
        }
    };

    let pages = doc.get_pages();
    let mut units = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    units.push(TextUnit {
                        page: Some(*page_num),
                        text,
                    });
                }
            }
            Err(err) => {
                tracing::debug!(page = page_num, error = %err, "no text layer on page");
            }
        }
    }

    let mut metadata = document_info(&doc);
    metadata.insert("page_count".to_string(), pages.len().to_string());

    let mut is_image = false;
    if units.is_empty() {
        let images = page_images(&doc);
        if !images.is_empty() {
            tracing::debug!(images = images.len(), "PDF has no text layer; treating as scan");
            describe_images(&images, &mut metadata);
            is_image = true;
        }
    }

    let full_text = units
        .iter()
        .map(|unit| unit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Extraction {
        format: Some(DocumentFormat::Pdf),
        success: true,
        full_text,
        units,
        metadata,
        is_image,
        ..Extraction::default()
    }
}

fn page_images(doc: &Document) -> Vec<PdfImage> {
    let mut images = Vec::new();
    for (page_num, page_id) in doc.get_pages() {
        let Some(xobjects) = page_xobjects(doc, page_id) else {
            continue;
        };
        for (_, object) in xobjects.iter() {
            let Ok(Object::Stream(stream)) = resolve(doc, object) else {
                continue;
            };
            if !matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(subtype)) if subtype.as_slice() == b"Image")
            {
                continue;
            }
            images.push(PdfImage {
                page: page_num,
                extension: image_extension(&stream.dict),
                width: integer(&stream.dict, b"Width"),
                height: integer(&stream.dict, b"Height"),
                size: stream.content.len(),
            });
        }
    }
    images
}

/// Count, pages and total size of the images; format and dimensions of the first one.
fn describe_images(images: &[PdfImage], metadata: &mut BTreeMap<String, String>) {
    let mut pages: Vec<u32> = images.iter().map(|image| image.page).collect();
    pages.dedup();
    let pages = pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");

    metadata.insert("image_count".to_string(), images.len().to_string());
    metadata.insert("image_pages".to_string(), pages);
    metadata.insert(
        "image_bytes".to_string(),
        images.iter().map(|image| image.size).sum::<usize>().to_string(),
    );

    if let Some(first) = images.first() {
        metadata.insert("format".to_string(), first.extension.to_string());
        if let (Some(width), Some(height)) = (first.width, first.height) {
            metadata.insert("width".to_string(), width.to_string());
            metadata.insert("height".to_string(), height.to_string());
        }
    }
}

fn page_xobjects(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve(doc, page.get(b"Resources").ok()?).ok()?.as_dict().ok()?;
    resolve(doc, resources.get(b"XObject").ok()?)
        .ok()?
        .as_dict()
        .ok()
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> lopdf::Result<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id),
        other => Ok(other),
    }
}

fn image_extension(dict: &Dictionary) -> &'static str {
    let filter = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => Some(name.clone()),
        Ok(Object::Array(filters)) => filters.iter().rev().find_map(|item| match item {
            Object::Name(name) => Some(name.clone()),
            _ => None,
        }),
        _ => None,
    };
    match filter.as_deref() {
        Some(b"DCTDecode") => "jpg",
        Some(b"JPXDecode") => "jp2",
        _ => "raw",
    }
}

fn integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Ok(Object::Integer(value)) => Some(*value),
        _ => None,
    }
}

fn document_info(doc: &Document) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|object| resolve(doc, object).ok())
        .and_then(|object| object.as_dict().ok())
    else {
        return metadata;
    };

    for (key, label) in INFO_KEYS {
        if let Ok(Object::String(raw, _)) = info.get(key) {
            let value = decode_text_string(raw);
            if !value.trim().is_empty() {
                metadata.insert(label.to_string(), value.trim().to_string());
            }
        }
    }
    metadata
}

/// PDF text strings are either UTF-16BE with a BOM or a single-byte encoding.
fn decode_text_string(raw: &[u8]) -> String {
    if let Some(utf16) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    /// Builds a PDF with one Helvetica text page per entry of `pages`.
    pub(crate) fn build_pdf(pages: &[&str], author: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = format!("BT /F1 12 Tf 50 700 Td ({text}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if let Some(author) = author {
            let info_id = doc.add_object(dictionary! {
                "Author" => Object::string_literal(author),
                "Title" => Object::string_literal("Laporan"),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize test pdf");
        bytes
    }

    #[test]
    fn extracts_text_per_page() {
        let bytes = build_pdf(&["Kerangka Acuan Kerja", "Agenda kegiatan"], None);
        let extraction = extract(&bytes);

        assert!(extraction.success);
        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].page, Some(1));
        assert_eq!(extraction.units[1].page, Some(2));
        assert!(extraction.units[1].text.contains("Agenda kegiatan"));
        assert!(extraction.full_text.contains("Kerangka Acuan Kerja"));
        assert_eq!(extraction.metadata.get("page_count").map(String::as_str), Some("2"));
    }

    #[test]
    fn reads_document_info() {
        let bytes = build_pdf(&["Isi"], Some("Budi"));
        let extraction = extract(&bytes);

        assert_eq!(extraction.metadata.get("author").map(String::as_str), Some("Budi"));
        assert_eq!(extraction.metadata.get("title").map(String::as_str), Some("Laporan"));
    }

    #[test]
    fn corrupt_bytes_fail_without_panicking() {
        let extraction = extract(b"not a valid pdf content");
        assert!(!extraction.success);
        assert!(extraction.full_text.is_empty());
        assert!(extraction.error.is_some());
    }

    #[test]
    fn decodes_utf16_info_strings() {
        let raw = [0xFE, 0xFF, 0x00, 0x41, 0x00, 0x6E, 0x00, 0x69];
        assert_eq!(decode_text_string(&raw), "Ani");
        assert_eq!(decode_text_string(b"Plain"), "Plain");
    }

    #[test]
    fn text_pdf_is_not_marked_as_image() {
        let extraction = extract(&build_pdf(&["Daftar hadir"], None));
        assert!(!extraction.is_image);
        assert!(!extraction.metadata.contains_key("image_count"));
    }

    #[test]
    fn scanned_pdf_is_marked_as_image() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 3,
                "Filter" => "DCTDecode",
            },
            vec![0xFF, 0xD8, 0xFF, 0xD9],
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize test pdf");

        let extraction = extract(&bytes);
        assert!(extraction.success);
        assert!(extraction.is_image);
        assert!(!extraction.has_text());
        let meta = |key: &str| extraction.metadata.get(key).map(String::as_str);
        assert_eq!(meta("image_count"), Some("1"));
        assert_eq!(meta("image_pages"), Some("1"));
        assert_eq!(meta("image_bytes"), Some("4"));
        assert_eq!(meta("format"), Some("jpg"));
        assert_eq!(meta("width"), Some("2"));
        assert_eq!(meta("height"), Some("3"));
    }
}
