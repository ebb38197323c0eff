use std::io::Cursor;

use image::ImageReader;
use sheetq_model::{DecodeError, DecodedImage, ImageSource, PictureRef};

use crate::config::EngineConfig;

/// Decodes PNG, JPEG, GIF, and BMP payloads into RGBA8 with the `image` crate.
#[derive(Debug, Clone)]
pub struct RasterImageSource {
    max_decoded_bytes: u64,
}

impl RasterImageSource {
    pub fn new(max_decoded_bytes: u64) -> Self {
        Self { max_decoded_bytes }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_decoded_image_bytes)
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Invalid(e.to_string()))
    }
}

impl Default for RasterImageSource {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ImageSource for RasterImageSource {
    fn decode(&self, picture: &PictureRef) -> Result<DecodedImage, DecodeError> {
        if picture.is_empty() {
            return Err(DecodeError::NotAvailable);
        }

        let (width, height) = Self::reader(picture.bytes())?
            .into_dimensions()
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        let needed = u64::from(width) * u64::from(height) * 4;
        if needed > self.max_decoded_bytes {
            return Err(DecodeError::TooLarge {
                needed,
                max: self.max_decoded_bytes,
            });
        }

        let decoded = Self::reader(picture.bytes())?
            .decode()
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        Ok(DecodedImage::new(decoded.to_rgba8()))
    }
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_to_rgba() {
        let source = RasterImageSource::default();
        let image = source.decode(&PictureRef::new(png_bytes(3, 2))).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.pixels().get_pixel(0, 0).0, [200, 10, 10, 255]);
    }

    #[test]
    fn rejects_garbage() {
        let source = RasterImageSource::default();
        let err = source
            .decode(&PictureRef::new(b"not an image".to_vec()))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn empty_payload_is_not_available() {
        let source = RasterImageSource::default();
        assert_eq!(
            source.decode(&PictureRef::new(Vec::new())).unwrap_err(),
            DecodeError::NotAvailable
        );
    }

    #[test]
    fn enforces_decoded_size_limit() {
        let source = RasterImageSource::new(16);
        let err = source.decode(&PictureRef::new(png_bytes(4, 4))).unwrap_err();
        assert_eq!(err, DecodeError::TooLarge { needed: 64, max: 16 });
    }
}
