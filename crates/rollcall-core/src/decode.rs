//! Boundary adapter: data-URI image payload → decoded raster.
//!
//! Payloads arrive as `data:<mime>;base64,<body>` (capture clients send
//! canvas exports that way) or as bare base64. Decode failures
//! short-circuit the pipeline before any face work happens.

use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    EmptyPayload,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a valid image encoding: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a data-URI-style image payload into a color raster.
///
/// Everything up to and including the first comma is treated as the
/// MIME/encoding prefix and discarded; the actual format is sniffed
/// from the decoded bytes, not trusted from the prefix.
pub fn decode_data_uri(payload: &str) -> Result<DynamicImage, DecodeError> {
    let body = payload
        .split_once(',')
        .map(|(_, body)| body)
        .unwrap_or(payload)
        .trim();

    if body.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(body)?;
    let image = image::load_from_memory(&bytes)?;

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        bytes = bytes.len(),
        "decoded image payload"
    );

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat};
    use std::io::Cursor;

    fn png_base64() -> String {
        let img = GrayImage::from_fn(32, 24, |x, y| image::Luma([(x + y) as u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(&buf)
    }

    #[test]
    fn test_decode_with_data_uri_prefix() {
        let payload = format!("data:image/png;base64,{}", png_base64());
        let img = decode_data_uri(&payload).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
    }

    #[test]
    fn test_decode_bare_base64() {
        let img = decode_data_uri(&png_base64()).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
    }

    #[test]
    fn test_decode_rejects_garbage_base64() {
        let err = decode_data_uri("data:image/png;base64,!!!not-base64!!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let body = base64::engine::general_purpose::STANDARD.encode(b"just some text");
        let err = decode_data_uri(&body).unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert!(matches!(decode_data_uri(""), Err(DecodeError::EmptyPayload)));
        assert!(matches!(
            decode_data_uri("data:image/png;base64,"),
            Err(DecodeError::EmptyPayload)
        ));
    }
}
