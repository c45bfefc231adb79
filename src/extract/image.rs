use std::collections::BTreeMap;
use std::io::Cursor;

use ::image::ImageReader;

use super::{DocumentFormat, Extraction};

/// Images carry no text layer. The result is a success marked `is_image`, with pixel
/// dimensions when the header can be read.
pub fn extract(bytes: &[u8]) -> Extraction {
    let mut metadata = BTreeMap::new();
    metadata.insert("size_bytes".to_string(), bytes.len().to_string());

    match read_header(bytes) {
        Some((format, width, height)) => {
            if let Some(format) = format {
                metadata.insert("format".to_string(), format);
            }
            metadata.insert("width".to_string(), width.to_string());
            metadata.insert("height".to_string(), height.to_string());
        }
        None => tracing::debug!("image header not readable; dimensions unknown"),
    }

    Extraction {
        format: Some(DocumentFormat::Image),
        success: true,
        is_image: true,
        metadata,
        ..Extraction::default()
    }
}

fn read_header(bytes: &[u8]) -> Option<(Option<String>, u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader
        .format()
        .and_then(|format| format.extensions_str().first().map(|ext| ext.to_string()));
    let (width, height) = reader.into_dimensions().ok()?;
    Some((format, width, height))
}
