use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Entry-level access to a ZIP archive.
pub struct ZipReader<R: ReadAt + ?Sized> {
    parser: ZipParser<R>,
}

impl<R: ReadAt + ?Sized> ZipReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all entries, in central directory order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Extract an entry's uncompressed bytes into `buf`.
    ///
    /// `buf` must be empty; the caller reserves `entry.uncompressed_size`
    /// bytes up front. The payload is checked against the entry's size and
    /// CRC-32.
    pub async fn extract_into(&self, entry: &ZipFileEntry, buf: &mut Vec<u8>) -> Result<()> {
        if entry.is_encrypted() {
            bail!("encrypted entries are not supported");
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        if data_offset.saturating_add(entry.compressed_size) > self.parser.reader().size() {
            bail!("compressed data runs past the end of the archive");
        }

        match entry.compression_method {
            CompressionMethod::Stored => {
                if entry.compressed_size != entry.uncompressed_size {
                    bail!(
                        "stored entry declares {} compressed but {} uncompressed bytes",
                        entry.compressed_size,
                        entry.uncompressed_size
                    );
                }
                buf.resize(entry.uncompressed_size as usize, 0);
                self.parser.reader().read_exact_at(data_offset, buf).await?;
            }
            CompressionMethod::Deflate => {
                let mut compressed = vec![0u8; entry.compressed_size as usize];
                self.parser
                    .reader()
                    .read_exact_at(data_offset, &mut compressed)
                    .await?;

                // One byte past the declared size is enough to spot an overrun.
                DeflateDecoder::new(compressed.as_slice())
                    .take(entry.uncompressed_size + 1)
                    .read_to_end(buf)?;
                if buf.len() as u64 != entry.uncompressed_size {
                    bail!(
                        "inflated to {} bytes, expected {}",
                        buf.len(),
                        entry.uncompressed_size
                    );
                }
            }
            CompressionMethod::Unknown(method) => {
                bail!("unsupported compression method {}", method);
            }
        }

        let mut crc = flate2::Crc::new();
        crc.update(buf);
        if crc.sum() != entry.crc32 {
            bail!(
                "CRC-32 mismatch (stored {:08x}, computed {:08x})",
                entry.crc32,
                crc.sum()
            );
        }

        Ok(())
    }
}
