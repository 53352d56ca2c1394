//! Binary payloads: base64 wrapping, `data:` URIs and thumbnails.
//!
//! Every binary in a result (screenshot, figure image, thumbnail) travels as
//! an [`EncodedBinary`]. Payloads above the configured byte bound keep their
//! metadata but lose `data` so a single page screenshot cannot blow up the
//! result document.

use crate::output::EncodedBinary;
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Wrap raw bytes as base64.
pub fn encode_binary(bytes: &[u8], mime_type: &str) -> EncodedBinary {
    EncodedBinary {
        mime_type: mime_type.to_string(),
        encoding: "base64".to_string(),
        byte_len: bytes.len(),
        omitted: false,
        data: Some(STANDARD.encode(bytes)),
    }
}

/// Wrap an already-base64 payload (e.g. a crawler screenshot).
pub fn from_base64(data: &str, mime_type: &str) -> Option<EncodedBinary> {
    let bytes = decode_base64(data)?;
    Some(encode_binary(&bytes, mime_type))
}

/// Parse a `data:<mime>;base64,<payload>` URI.
pub fn from_data_uri(uri: &str) -> Option<EncodedBinary> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().filter(|m| !m.is_empty()).unwrap_or("application/octet-stream");
    if !header.to_ascii_lowercase().contains(";base64") {
        return None;
    }
    from_base64(payload, mime)
}

/// Lenient base64 decoding: whitespace is ignored, standard and URL-safe
/// alphabets with or without padding are accepted.
pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(&compact).ok())
}

/// Drop `data` when the payload exceeds `max_bytes`. Idempotent.
pub fn bound(binary: &mut EncodedBinary, max_bytes: usize) {
    if binary.byte_len > max_bytes && binary.data.is_some() {
        debug!(
            "Omitting {} payload of {} bytes (limit {})",
            binary.mime_type, binary.byte_len, max_bytes
        );
        binary.data = None;
        binary.omitted = true;
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Downscale so the longest edge is at most `max_edge`; smaller images are
/// returned unchanged.
pub fn thumbnail(img: &DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width() <= max_edge && img.height() <= max_edge {
        img.clone()
    } else {
        img.thumbnail(max_edge, max_edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        let data = encode_binary(&png, "image/png");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.byte_len, png.len());
        let decoded = STANDARD.decode(data.data.unwrap()).expect("valid base64");
        assert_eq!(decoded, png);
    }

    #[test]
    fn thumbnail_caps_longest_edge() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(2000, 500));
        let t = thumbnail(&img, 512);
        assert_eq!(t.width(), 512);
        assert!(t.height() <= 128);
        let small = DynamicImage::ImageRgba8(RgbaImage::new(20, 10));
        assert_eq!(thumbnail(&small, 512).width(), 20);
    }

    #[test]
    fn data_uri_parsing() {
        let b = from_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(b.mime_type, "image/png");
        assert_eq!(b.byte_len, 5);
        assert!(from_data_uri("data:text/plain,hello").is_none());
        assert!(from_data_uri("https://example.com/a.png").is_none());
    }

    #[test]
    fn lenient_base64() {
        assert_eq!(decode_base64("aGVs\nbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVsbG8").unwrap(), b"hello");
        assert!(decode_base64("   ").is_none());
        assert!(decode_base64("***").is_none());
    }

    #[test]
    fn bound_omits_large_payloads_once() {
        let mut b = encode_binary(&[0u8; 100], "image/png");
        bound(&mut b, 1000);
        assert!(b.data.is_some());
        bound(&mut b, 10);
        assert!(b.omitted);
        assert!(b.data.is_none());
        assert_eq!(b.byte_len, 100);
        let snapshot = b.clone();
        bound(&mut b, 10);
        assert_eq!(b, snapshot);
    }
}
