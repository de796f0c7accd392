use std::fmt;
use std::io::Write;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use tempfile::NamedTempFile;

use super::PixelBuffer;
use crate::error::{Error, Result};

/// Output container and its settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy JPEG; quality 0-100 (0 is clamped to the encoder's minimum of 1).
    Jpeg { quality: u8 },
    /// Lossless PNG, best compression, no row filtering.
    Png,
}

impl OutputFormat {
    pub const DEFAULT_QUALITY: u8 = 90;
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg {
            quality: Self::DEFAULT_QUALITY,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jpeg { quality } => write!(f, "JPEG (quality {})", quality),
            OutputFormat::Png => f.write_str("PNG"),
        }
    }
}

/// Encode `buffer` in memory.
///
/// `label` only names the destination in error messages.
pub fn encode_to_vec(buffer: &PixelBuffer, format: OutputFormat, label: &str) -> Result<Vec<u8>> {
    let encode_error = |reason: String| Error::Encode {
        path: label.to_string(),
        reason,
    };

    // One scanline per image row; a zero width or height leaves none.
    let scanlines = buffer.rows().len();
    if scanlines == 0 {
        return Err(encode_error(format!(
            "cannot encode a {}x{} image",
            buffer.width(),
            buffer.height()
        )));
    }

    let mut out = Vec::new();
    let result = match format {
        OutputFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(
                buffer.as_bytes(),
                buffer.width(),
                buffer.height(),
                ExtendedColorType::Rgb8,
            ),
        OutputFormat::Png => PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::NoFilter)
            .write_image(
                buffer.as_bytes(),
                buffer.width(),
                buffer.height(),
                ExtendedColorType::Rgb8,
            ),
    };
    result.map_err(|e| encode_error(e.to_string()))?;

    Ok(out)
}

/// Write encoded bytes to `destination`.
///
/// The bytes go to a temporary file next to `destination`, which is then
/// renamed over it. On failure the temporary file is removed and whatever
/// was at `destination` before is left untouched.
pub fn write_output(destination: &Path, bytes: &[u8]) -> Result<()> {
    let write_error = |reason: String| Error::Encode {
        path: destination.display().to_string(),
        reason,
    };

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| write_error(e.to_string()))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| write_error(e.to_string()))?;
    staged
        .persist(destination)
        .map_err(|e| write_error(e.error.to_string()))?;

    log::debug!("wrote {} bytes to {}", bytes.len(), destination.display());
    Ok(())
}

/// Encode `buffer` and write it to `destination`.
pub fn encode(buffer: PixelBuffer, destination: &Path, format: OutputFormat) -> Result<()> {
    let bytes = encode_to_vec(&buffer, format, &destination.display().to_string())?;
    drop(buffer);
    write_output(destination, &bytes)
}
