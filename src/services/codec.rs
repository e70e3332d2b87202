//! Image encoding and decoding service
//!
//! Base64/data URL handling for the mask field and the JSON response, plus
//! decoding of uploaded bytes and PNG encoding of results.

use crate::error::{InpaintError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// MIME type of every image this service returns
pub const PNG_MIME: &str = "image/png";

/// Service for converting between bytes, data URLs and images
pub struct ImageCodec;

impl ImageCodec {
    /// Extract the raw bytes from a data URL or a bare base64 payload
    ///
    /// Accepts `data:<mime>;base64,<payload>` as produced by a canvas
    /// `toDataURL()` call, or the payload alone. Embedded whitespace and line
    /// breaks are ignored.
    ///
    /// # Errors
    /// - Data URL without a `base64` marker
    /// - Empty payload
    /// - Payload is not valid base64
    pub fn decode_data_url(input: &str) -> Result<Vec<u8>> {
        let trimmed = input.trim();
        let payload = if let Some(rest) = trimmed.strip_prefix("data:") {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| InpaintError::decode("data URL has no ',' separator"))?;
            if !header.ends_with(";base64") {
                return Err(InpaintError::decode(format!(
                    "data URL is not base64 encoded (header: 'data:{header}')"
                )));
            }
            payload
        } else {
            trimmed
        };

        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if compact.is_empty() {
            return Err(InpaintError::decode("empty base64 payload"));
        }

        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| InpaintError::decode(format!("invalid base64 payload: {e}")))
    }

    /// Decode an image from bytes, detecting the format from content
    ///
    /// # Errors
    /// - Empty input
    /// - Unknown or corrupt image data
    pub fn load_image_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(InpaintError::invalid_input("image data is empty"));
        }
        image::load_from_memory(bytes).map_err(|e| {
            InpaintError::processing_stage_error(
                "image decoding",
                &e.to_string(),
                Some(&format!("{} bytes", bytes.len())),
            )
        })
    }

    /// Decode a mask supplied as a data URL
    ///
    /// # Errors
    /// - Any error from [`ImageCodec::decode_data_url`] or [`ImageCodec::load_image_bytes`]
    pub fn load_data_url_image(input: &str) -> Result<DynamicImage> {
        let bytes = Self::decode_data_url(input)?;
        Self::load_image_bytes(&bytes)
    }

    /// Encode an RGB raster as PNG
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Wrap already encoded bytes in a data URL
    #[must_use]
    pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
        format!("data:{mime};base64,{}", STANDARD.encode(bytes))
    }

    /// Encode an RGB raster as a `data:image/png;base64,...` URL
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn png_data_url(image: &RgbImage) -> Result<String> {
        let bytes = Self::encode_png(image)?;
        Ok(Self::to_data_url(PNG_MIME, &bytes))
    }

    /// File extension for uploaded bytes, from their content (`bin` if unknown)
    #[must_use]
    pub fn guess_extension(bytes: &[u8]) -> &'static str {
        image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin")
    }
}
