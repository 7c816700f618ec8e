use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::pipeline::component::ImageBlob;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// HEIC/HEIF major brands inside an ISO-BMFF `ftyp` box. Phone-shot
/// reference images are commonly HEIC, and `infer` alone misses some of
/// these variants.
const HEIC_BRANDS: [&[u8; 4]; 3] = [b"heic", b"heif", b"hevc"];

/// Major brand of an ISO base media file: bytes 4..8 spell `ftyp` and
/// bytes 8..12 name the brand.
fn bmff_major_brand(data: &[u8]) -> Option<[u8; 4]> {
    if data.get(4..8)? != b"ftyp" {
        return None;
    }
    data.get(8..12)?.try_into().ok()
}

/// Sniff a mime type from raw bytes.
pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if let Some(brand) = bmff_major_brand(data) {
        if HEIC_BRANDS.iter().any(|known| **known == brand) {
            return Some("image/heic".to_string());
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn mime_for_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    if mime.contains("jpeg") || mime.contains("jpg") {
        "jpg"
    } else if mime.contains("gif") {
        "gif"
    } else if mime.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let lowered = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Load an image file as an opaque blob. The mime type comes from the
/// extension, falling back to content sniffing for extension-less files.
pub fn load_image(path: &Path) -> Result<ImageBlob> {
    let bytes = fs::read(path).map_err(|err| AppError::file(path, err))?;
    let mime = if path.extension().is_some() {
        mime_for_extension(path).to_string()
    } else {
        detect_mime_type(&bytes).unwrap_or_else(|| "image/jpeg".to_string())
    };
    Ok(ImageBlob { bytes, mime })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_mime_mapping() {
        assert_eq!(mime_for_extension(Path::new("a.png")), "image/png");
        assert_eq!(mime_for_extension(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_extension(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for_extension(Path::new("a.gif")), "image/gif");
    }

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }

    #[test]
    fn supported_image_filter() {
        assert!(is_supported_image(&PathBuf::from("x/y/photo.JPEG")));
        assert!(is_supported_image(&PathBuf::from("photo.webp")));
        assert!(!is_supported_image(&PathBuf::from("notes.txt")));
        assert!(!is_supported_image(&PathBuf::from("no_extension")));
    }

    #[test]
    fn detects_png_bytes() {
        let png_header = [
            0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0, 0,
        ];
        assert_eq!(detect_mime_type(&png_header).as_deref(), Some("image/png"));
    }

    #[test]
    fn detects_heic_by_ftyp_brand() {
        let mut data = vec![0x00, 0x00, 0x00, 0x18];
        data.extend_from_slice(b"ftypheic");
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(detect_mime_type(&data).as_deref(), Some("image/heic"));

        // A brand outside the HEIC family falls through to `infer`.
        let mut mp4 = vec![0x00, 0x00, 0x00, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0u8; 8]);
        assert_ne!(detect_mime_type(&mp4).as_deref(), Some("image/heic"));
    }
}
