mod http;
mod local;

pub use http::{HttpRangeReader, RetryPolicy};
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at `offset` into the buffer.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past
    /// the end of the source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, failing if the source ends first.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                bail!(
                    "unexpected end of data at offset {} ({} of {} bytes read)",
                    offset + filled as u64,
                    filled,
                    buf.len()
                );
            }
            filled += n;
        }
        Ok(())
    }
}

/// Whether `location` names a remote archive rather than a local path.
pub fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Open `location` as a random-access source.
///
/// HTTP(S) URLs go through Range requests, everything else is treated as a
/// local path.
pub async fn open(location: &str) -> Result<Arc<dyn ReadAt>> {
    if is_http_url(location) {
        Ok(Arc::new(HttpRangeReader::new(location.to_string()).await?))
    } else {
        Ok(Arc::new(LocalFileReader::new(Path::new(location))?))
    }
}
