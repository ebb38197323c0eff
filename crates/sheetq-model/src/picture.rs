use core::fmt;
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

/// An encoded picture payload (PNG, JPEG, ...) located by the workbook backend.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct PictureRef {
    bytes: Arc<[u8]>,
    /// Package path or other backend-specific name (e.g. `xl/media/image1.png`).
    pub name: Option<String>,
}

impl PictureRef {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            name: None,
        }
    }

    pub fn named(bytes: impl Into<Arc<[u8]>>, name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            name: Some(name.into()),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PictureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureRef")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A picture positioned on the drawing layer of a worksheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchoredPicture {
    /// 0-based anchor row (`xdr:from/xdr:row`).
    pub row: u32,
    /// 0-based anchor column (`xdr:from/xdr:col`).
    pub col: u32,
    pub picture: PictureRef,
}

/// A decoded RGBA8 pixel buffer.
///
/// Clones share the same buffer, so a row snapshot and the image cache can refer to one decode.
/// Equality is identity of that buffer.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<RgbaImage>,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// A decode is usable when it has a non-zero area.
    pub fn is_valid(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }

    pub fn ptr_eq(&self, other: &DecodedImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Number of live handles to the underlying buffer.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.pixels)
    }
}

impl PartialEq for DecodedImage {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecodedImage({}x{})", self.width(), self.height())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The picture exists but no payload could be extracted for it.
    #[error("picture payload not available")]
    NotAvailable,
    #[error("invalid image data: {0}")]
    Invalid(String),
    #[error("decoded image would need {needed} bytes (max {max})")]
    TooLarge { needed: u64, max: u64 },
}

/// Turns an encoded picture into pixels.
///
/// One implementation is chosen when the loader is constructed; it is never probed per cell.
pub trait ImageSource: Send + Sync {
    fn decode(&self, picture: &PictureRef) -> Result<DecodedImage, DecodeError>;
}
