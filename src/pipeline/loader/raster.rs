//! Image source: one upload, one page.

use image::GenericImageView;
use serde_json::Value;

use super::{base_metadata, DocumentPage, LoadError, LoadedDocument, PageImage, SourceFile};

const FALLBACK_MIME: &str = "image/png";

/// Detect an image format from its leading bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'B', b'M', ..] => Some("image/bmp"),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some("image/tiff"),
        [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c', ..]
        | [_, _, _, _, b'f', b't', b'y', b'p', b'm', b'i', b'f', b'1', ..] => Some("image/heic"),
        _ => None,
    }
}

/// Pick a MIME type: signature bytes, then the declared content type, then
/// the file extension, then `image/png`. Each fallback adds a warning.
pub fn resolve_image_mime(source: &SourceFile<'_>) -> (String, Vec<String>) {
    if let Some(mime) = sniff_image_mime(source.bytes) {
        return (mime.to_string(), Vec::new());
    }

    let mut warnings =
        vec!["Could not detect the image format from its contents.".to_string()];

    if let Some(declared) = source
        .content_type
        .map(str::trim)
        .filter(|ct| ct.to_ascii_lowercase().starts_with("image/"))
    {
        warnings.push(format!("Using the declared content type {declared}."));
        return (declared.to_ascii_lowercase(), warnings);
    }

    if let Some(guessed) = mime_guess::from_path(source.original_name)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
    {
        warnings.push(format!(
            "Using {} based on the file extension.",
            guessed.essence_str()
        ));
        return (guessed.essence_str().to_string(), warnings);
    }

    warnings.push(format!("Defaulting to {FALLBACK_MIME}."));
    (FALLBACK_MIME.to_string(), warnings)
}

pub(crate) fn load_image(source: &SourceFile<'_>) -> Result<LoadedDocument, LoadError> {
    if source.bytes.is_empty() {
        return Err(LoadError::NoPages);
    }
    if source.bytes.starts_with(b"%PDF") {
        return Err(LoadError::Unsupported(
            "Expected an image upload but received a PDF document".into(),
        ));
    }

    let (mime_type, warnings) = resolve_image_mime(source);

    let mut metadata = base_metadata(source);
    metadata.insert("mimeType".into(), Value::String(mime_type.clone()));
    if let Ok(decoded) = image::load_from_memory(source.bytes) {
        metadata.insert("width".into(), Value::from(decoded.width()));
        metadata.insert("height".into(), Value::from(decoded.height()));
    }

    Ok(LoadedDocument {
        pages: vec![DocumentPage {
            page_number: 1,
            text_content: None,
            images: vec![PageImage {
                mime_type,
                data: source.bytes.to_vec(),
            }],
            metadata,
        }],
        warnings,
    })
}
