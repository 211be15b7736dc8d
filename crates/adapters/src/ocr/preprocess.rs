//! Image preparation ahead of OCR

use std::path::Path;

use async_trait::async_trait;
use dropwatch_domain::{ImagePreprocessor, MediaError};
use image::{GrayImage, ImageError, imageops};

const UNSHARPEN_SIGMA: f32 = 1.0;
const UNSHARPEN_THRESHOLD: i32 = 1;

/// Keeps the bottom third of the picture, where promo codes are printed,
/// converted to high-contrast grayscale
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptionPreprocessor;

#[async_trait]
impl ImagePreprocessor for CaptionPreprocessor {
    async fn preprocess(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || prepare(&input, &output))
            .await
            .map_err(|e| MediaError::Io(format!("Preprocessing task failed: {}", e)))?
    }
}

fn prepare(input: &Path, output: &Path) -> Result<(), MediaError> {
    let img = image::open(input).map_err(|e| match e {
        ImageError::IoError(io) => MediaError::Io(io.to_string()),
        other => MediaError::Decode(other.to_string()),
    })?;

    let (width, height) = (img.width(), img.height());
    let region = if height >= 3 {
        let crop_height = height / 3;
        img.crop_imm(0, height - crop_height, width, crop_height)
    } else {
        img
    };

    let mut gray = region.to_luma8();
    stretch_contrast(&mut gray);
    let sharpened = imageops::unsharpen(&gray, UNSHARPEN_SIGMA, UNSHARPEN_THRESHOLD);

    sharpened
        .save(output)
        .map_err(|e| MediaError::Io(e.to_string()))?;
    tracing::trace!(input = %input.display(), output = %output.display(), "Preprocessed image");
    Ok(())
}

/// Spread luma values over the full 0-255 range
fn stretch_contrast(img: &mut GrayImage) {
    let (min, max) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min {
        return;
    }

    let range = u32::from(max - min);
    for pixel in img.pixels_mut() {
        let scaled = u32::from(pixel.0[0] - min) * 255 / range;
        pixel.0[0] = scaled as u8;
    }
}
