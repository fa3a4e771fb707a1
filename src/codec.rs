//! Frame envelope parsing and image normalization.
//!
//! Sources may send any image format the `image` crate can decode (JPEG or PNG
//! here) at any quality. Every accepted frame is re-encoded to one canonical
//! format: 8-bit RGB JPEG at the configured quality.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

use crate::types::IngestEnvelope;
use crate::{RelayError, Result};

/// Default canonical JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Parse an inbound `{"image": <base64>}` envelope into raw image bytes.
///
/// Invalid JSON, a missing or non-string `image` field and invalid base64 are
/// all protocol errors.
pub fn parse_envelope(text: &str) -> Result<Vec<u8>> {
    let envelope: IngestEnvelope =
        serde_json::from_str(text).map_err(|e| RelayError::protocol(e.to_string()))?;
    STANDARD
        .decode(envelope.image.trim())
        .map_err(|e| RelayError::protocol(format!("image is not valid base64: {e}")))
}

/// Base64-encode a payload for the outbound wire format.
pub fn encode_base64(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decodes source images and re-encodes them to the canonical JPEG.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    quality: u8,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameCodec {
    /// Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Decode `bytes` as an image and re-encode it as colour JPEG.
    pub fn normalize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| RelayError::decode(format!("{} byte payload", bytes.len()), e))?;
        self.encode(&image)
    }

    /// Full inbound path: envelope, base64, decode, re-encode.
    pub fn normalize_envelope(&self, text: &str) -> Result<Vec<u8>> {
        let bytes = parse_envelope(text)?;
        self.normalize(&bytes)
    }

    fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let rgb = image.to_rgb8();
        let mut out = Vec::with_capacity(rgb.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&rgb).map_err(|e| {
            RelayError::encode(format!("{}x{} frame", rgb.width(), rgb.height()), e)
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{envelope, sample_jpeg, sample_png};

    #[test]
    fn normalizes_png_to_jpeg() {
        let codec = FrameCodec::default();
        let jpeg = codec.normalize(&sample_png(32, 24)).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn normalizes_full_envelope() {
        let codec = FrameCodec::new(60);
        let jpeg = codec.normalize_envelope(&envelope(&sample_jpeg(16, 16))).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn malformed_envelopes_are_protocol_errors() {
        for text in ["not json", r#"{"img":"AAAA"}"#, r#"{"image":null}"#, r#"{"image":"***"}"#] {
            let err = parse_envelope(text).unwrap_err();
            assert!(matches!(err, RelayError::Protocol { .. }), "{text}: {err}");
        }
    }

    #[test]
    fn undecodable_image_is_decode_error() {
        let codec = FrameCodec::default();
        let text = format!(r#"{{"image":"{}"}}"#, encode_base64(b"definitely not an image"));
        let err = codec.normalize_envelope(&text).unwrap_err();
        assert!(matches!(err, RelayError::Decode { .. }), "{err}");
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(FrameCodec::new(0).quality(), 1);
        assert_eq!(FrameCodec::new(250).quality(), 100);
    }
}
