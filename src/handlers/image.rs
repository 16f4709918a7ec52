use image::{imageops::FilterType, DynamicImage};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Decodifica i byte grezzi, il formato viene rilevato dal contenuto
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let reader = image::ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.decode()?)
}

/// Lato massimo accettato dall'encoder JPEG
const MAX_JPEG_DIMENSION: u64 = u16::MAX as u64;

/// Stessa soglia di memoria usata dal decoder
fn max_output_bytes() -> u64 {
    image::Limits::default().max_alloc.unwrap_or(512 * 1024 * 1024)
}

/// Ridimensiona alla larghezza indicata mantenendo le proporzioni (Lanczos3).
///
/// Le dimensioni di destinazione vengono verificate prima di allocare: una
/// sorgente molto stretta e alta produrrebbe un buffer enorme.
pub fn resize_to_width(img: DynamicImage, target_width: u32) -> Result<DynamicImage> {
    if target_width == 0 || img.width() == target_width || img.width() == 0 {
        return Ok(img);
    }

    let ratio = target_width as f64 / img.width() as f64;
    let height = (img.height() as f64 * ratio).round().max(1.0);
    if height > MAX_JPEG_DIMENSION as f64 {
        return Err(AppError::Transform(format!(
            "altezza risultante {} oltre il limite di {}px",
            height, MAX_JPEG_DIMENSION
        )));
    }
    let height = height as u32;

    let bytes = target_width as u64 * height as u64 * img.color().bytes_per_pixel() as u64;
    if bytes > max_output_bytes() {
        return Err(AppError::Transform(format!(
            "immagine {}x{} troppo grande ({} byte)",
            target_width, height, bytes
        )));
    }

    Ok(img.resize_exact(target_width, height, FilterType::Lanczos3))
}

/// Codifica in JPEG con la qualità indicata (1-100)
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let quality = quality.clamp(1, 100);

    // JPEG non supporta il canale alpha
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| AppError::Transform(format!("codifica JPEG fallita: {}", e)))?;

    Ok(buffer.into_inner())
}
