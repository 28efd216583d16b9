//! # fw-imaging
//!
//! `ImageInspector` backed by `image` and `rqrr`.
//! Features: 64-bit average hash, QR payload extraction.

use fw_core::{ImageHash, ImageInspector, Result, WardenError};
use image::imageops::FilterType;
use image::GrayImage;

/// Side of the square the image is reduced to before hashing.
const HASH_SIDE: u32 = 8;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalImageInspector;

impl LocalImageInspector {
    pub fn new() -> Self {
        Self
    }

    fn decode(image: &[u8]) -> Result<GrayImage> {
        image::load_from_memory(image)
            .map(|img| img.to_luma8())
            .map_err(|e| WardenError::InvalidData(format!("undecodable image: {e}")))
    }
}

impl ImageInspector for LocalImageInspector {
    /// Average hash: one bit per cell of an 8x8 greyscale thumbnail,
    /// set when the cell is brighter than the mean.
    fn fingerprint(&self, image: &[u8]) -> Result<ImageHash> {
        let img = image::load_from_memory(image)
            .map_err(|e| WardenError::InvalidData(format!("undecodable image: {e}")))?;
        let small = img.resize_exact(HASH_SIDE, HASH_SIDE, FilterType::Triangle).to_luma8();

        let total: u32 = small.pixels().map(|p| p.0[0] as u32).sum();
        let mean = total / (HASH_SIDE * HASH_SIDE);

        let bits = small
            .pixels()
            .fold(0u64, |acc, p| (acc << 1) | u64::from(p.0[0] as u32 > mean));
        Ok(ImageHash(bits))
    }

    fn decode_qr(&self, image: &[u8]) -> Option<String> {
        let gray = match Self::decode(image) {
            Ok(gray) => gray,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping QR scan");
                return None;
            }
        };

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            gray.width() as usize,
            gray.height() as usize,
            |x, y| gray.get_pixel(x as u32, y as u32).0[0],
        );

        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| grid.decode().ok().map(|(_, content)| content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png(width: u32, height: u32, shade: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([shade(x, y)]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_fingerprint_is_stable_across_scale() {
        let inspector = LocalImageInspector::new();
        let left_dark = |w: u32| move |x: u32, _y: u32| -> u8 { if x < w / 2 { 0 } else { 255 } };

        let small = inspector.fingerprint(&png(64, 64, left_dark(64))).unwrap();
        let large = inspector.fingerprint(&png(256, 256, left_dark(256))).unwrap();
        assert_eq!(small, large);
        assert_eq!(small.to_string().len(), 16);
    }

    #[test]
    fn test_fingerprint_distinguishes_layouts() {
        let inspector = LocalImageInspector::new();
        let vertical = inspector.fingerprint(&png(64, 64, |x, _| if x < 32 { 0 } else { 255 })).unwrap();
        let horizontal = inspector.fingerprint(&png(64, 64, |_, y| if y < 32 { 0 } else { 255 })).unwrap();
        assert_ne!(vertical, horizontal);
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let inspector = LocalImageInspector::new();
        let err = inspector.fingerprint(b"definitely not an image").unwrap_err();
        assert!(matches!(err, WardenError::InvalidData(_)));
        assert_eq!(inspector.decode_qr(b"definitely not an image"), None);
    }

    #[test]
    fn test_plain_image_has_no_qr() {
        let inspector = LocalImageInspector::new();
        assert_eq!(inspector.decode_qr(&png(120, 120, |x, y| ((x + y) % 256) as u8)), None);
    }
}
