//! Decoded RGBA8 images.

use std::path::Path;

use crate::error::AssetError;

/// A tightly packed RGBA8 image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap pixel data, checking that it matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, AssetError> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        if width == 0 || height == 0 {
            return Err(AssetError::Malformed(format!(
                "image has zero area ({width}x{height})"
            )));
        }
        if pixels.len() != expected {
            return Err(AssetError::Malformed(format!(
                "image {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Decode an encoded image (PNG, JPEG) from memory into RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<ImageData, AssetError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    ImageData::new(width, height, rgba.into_raw())
}

/// Read and decode an image file into RGBA8.
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageData, AssetError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let image = decode_image(&bytes)?;
    log::info!(
        "Loaded image {} ({}x{})",
        path.display(),
        image.width,
        image.height
    );
    Ok(image)
}

/// Generate a two-color checkerboard.
pub fn generate_checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> ImageData {
    let size = size.max(1);
    let cell = cell.max(1);
    let mut pixels = Vec::with_capacity(size as usize * size as usize * ImageData::BYTES_PER_PIXEL);
    for y in 0..size {
        for x in 0..size {
            let color = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
            pixels.extend_from_slice(&color);
        }
    }
    ImageData {
        width: size,
        height: size,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    #[test]
    fn test_checkerboard_layout() {
        let image = generate_checkerboard(4, 2, WHITE, BLACK);
        assert_eq!(image.byte_len(), 4 * 4 * 4);
        let pixel = |x: usize, y: usize| &image.pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(pixel(0, 0), WHITE);
        assert_eq!(pixel(1, 1), WHITE);
        assert_eq!(pixel(2, 0), BLACK);
        assert_eq!(pixel(0, 2), BLACK);
        assert_eq!(pixel(3, 3), WHITE);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(ImageData::new(2, 2, vec![0; 15]).is_err());
        assert!(ImageData::new(0, 2, vec![]).is_err());
        assert!(ImageData::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_decode_png_round_trip() {
        let source = generate_checkerboard(8, 1, WHITE, BLACK);
        let buffer =
            image::RgbaImage::from_raw(source.width, source.height, source.pixels.clone()).unwrap();
        let mut encoded = std::io::Cursor::new(Vec::new());
        buffer
            .write_to(&mut encoded, image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode_image(encoded.get_ref()).unwrap();
        assert_eq!(decoded, source);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AssetError::ImageDecode(_)));
    }
}
