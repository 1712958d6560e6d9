//! Photo intake: turns whatever image a registrant selects into a
//! face-centered 1000×1000 JPEG for their credential.
//!
//! Stages run in order: decode, detect, crop, resample, encode. Decoding and
//! the pixel work happen on the blocking pool; detection goes to the
//! [`FaceDetector`] collaborator. An image without a face is rejected outright.

use std::{io::Cursor, time::Duration};

use image::{codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, RgbImage};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    util::{sanitize_file_name, with_timeout},
};

pub mod crop;
pub mod detect;
pub mod intake;

use crop::{crop_region, CropRegion};
use detect::FaceDetector;

pub const OUTPUT_SIZE: u32 = 1000;
pub const JPEG_QUALITY: u8 = 80;

/// Normalized photo ready to be stored
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPhoto {
    pub file_name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub crop: CropRegion,
}

/// `<stem>_facecrop.jpg`, where the stem is the name without its last extension.
pub fn output_file_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(idx) => &base[..idx],
        None => base,
    };

    if stem.trim().is_empty() {
        "photo_facecrop.jpg".to_string()
    } else {
        format!("{}_facecrop.jpg", sanitize_file_name(stem))
    }
}

fn decode(raw: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(raw)
        .map_err(|e| Error::InvalidImage(e.to_string()))?
        .to_rgb8();

    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidImage("image has no pixels".to_string()));
    }
    Ok(image)
}

fn render(image: &RgbImage, region: CropRegion) -> Result<Vec<u8>> {
    let square = imageops::crop_imm(image, region.x, region.y, region.size, region.size).to_image();
    let scaled = imageops::resize(&square, OUTPUT_SIZE, OUTPUT_SIZE, FilterType::Lanczos3);

    let mut bytes = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(&scaled)?;
    Ok(bytes.into_inner())
}

/// Runs the whole pipeline for one selected file.
pub async fn process_photo(
    detector: &dyn FaceDetector,
    file_name: &str,
    raw: Vec<u8>,
    detect_timeout: Duration,
) -> Result<ProcessedPhoto> {
    let image = tokio::task::spawn_blocking(move || decode(&raw))
        .await
        .map_err(|e| Error::General(e.to_string()))??;
    log::debug!(
        "Decoded {} ({}x{})",
        file_name,
        image.width(),
        image.height()
    );

    let face = with_timeout(detect_timeout, "face detection", detector.detect(&image))
        .await?
        .filter(|f| f.is_valid());
    let Some(face) = face else {
        log::info!("No face detected in {}", file_name);
        return Err(Error::NoFaceDetected);
    };

    let region = crop_region(&face, image.width(), image.height());
    let bytes = tokio::task::spawn_blocking(move || render(&image, region))
        .await
        .map_err(|e| Error::General(e.to_string()))??;

    Ok(ProcessedPhoto {
        file_name: output_file_name(file_name),
        bytes,
        width: OUTPUT_SIZE,
        height: OUTPUT_SIZE,
        crop: region,
    })
}
