//! Decoding into a normalized RGB buffer, and encoding back out.
//!
//! Every decoder produces the same [`PixelBuffer`] layout (8-bit RGB,
//! interleaved, rows top to bottom), so the encoder never needs to know
//! where the pixels came from.

mod encoder;

pub use encoder::{OutputFormat, encode, encode_to_vec, write_output};

use image::{ImageFormat, RgbImage};

use crate::archive::RawImageBlob;
use crate::classify::SupportedKind;
use crate::error::{Error, Result};

/// Normalized in-memory image: `width * height * 3` bytes of RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub const CHANNELS: usize = 3;

    /// Wrap raw RGB8 bytes. Returns `None` unless `data` holds exactly
    /// `width * height * 3` bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::CHANNELS)?;
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * Self::CHANNELS
    }

    /// Rows top to bottom; always yields exactly `height` slices.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        let rows = if self.stride() == 0 { 0 } else { self.height as usize };
        self.data
            .chunks_exact(self.stride().max(1))
            .take(rows)
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

fn image_format(kind: SupportedKind) -> ImageFormat {
    match kind {
        SupportedKind::Jpeg => ImageFormat::Jpeg,
        SupportedKind::Png => ImageFormat::Png,
        SupportedKind::Webp => ImageFormat::WebP,
    }
}

/// Decode a blob with the codec its kind tag names.
///
/// The bytes are not sniffed: a PNG stored under `cover.jpg` fails as a
/// JPEG. Alpha is dropped and every color type is converted to RGB8.
pub fn decode(blob: RawImageBlob) -> Result<PixelBuffer> {
    let RawImageBlob { entry, kind, bytes } = blob;

    let decoded = image::load_from_memory_with_format(&bytes, image_format(kind)).map_err(|e| {
        Error::Decode {
            kind,
            entry: entry.clone(),
            reason: e.to_string(),
        }
    })?;
    drop(bytes);

    let buffer = PixelBuffer::from(decoded.to_rgb8());
    log::debug!(
        "decoded {} {} to {}x{} RGB",
        kind,
        entry,
        buffer.width(),
        buffer.height()
    );
    Ok(buffer)
}
