//! Forward-only byte streams over a [`ReadAt`] source.
//!
//! TAR archives are read front to back. [`PlainStream`] walks the source
//! with an advancing offset; [`GzipStream`] feeds that stream through a
//! push-mode gzip decoder, so only as much of a `.tar.gz` is inflated as
//! the walk actually consumes.

use anyhow::{Result, bail};
use async_trait::async_trait;
use flate2::write::GzDecoder;
use std::io::Write;
use std::sync::Arc;

use crate::io::ReadAt;

/// Size of the reads issued against the underlying source.
const CHUNK_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes; `0` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read until `buf` is full or the stream ends; returns bytes read.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Read exactly `buf.len()` bytes.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.read_full(buf).await?;
        if n < buf.len() {
            bail!("stream ended after {} of {} bytes", n, buf.len());
        }
        Ok(())
    }

    /// Append exactly `len` bytes to `buf`.
    ///
    /// `buf` grows one chunk at a time, so a length the stream cannot back
    /// fails at end of stream without first zero-filling the whole payload.
    async fn read_to_vec(&mut self, buf: &mut Vec<u8>, len: u64) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let start = buf.len();
            let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(CHUNK_SIZE);
            buf.resize(start + want, 0);
            let n = self.read_full(&mut buf[start..]).await?;
            buf.truncate(start + n);
            if n < want {
                bail!("stream ended after {} of {} bytes", len - remaining + n as u64, len);
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Discard the next `n` bytes.
    async fn skip(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = vec![0u8; CHUNK_SIZE.min(n as usize)];
        while n > 0 {
            let want = scratch.len().min(n as usize);
            let got = self.read(&mut scratch[..want]).await?;
            if got == 0 {
                bail!("stream ended with {} bytes left to skip", n);
            }
            n -= got as u64;
        }
        Ok(())
    }
}

/// Uncompressed stream: reads the source in order from offset zero.
pub struct PlainStream<R: ReadAt + ?Sized> {
    reader: Arc<R>,
    offset: u64,
}

impl<R: ReadAt + ?Sized> PlainStream<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader, offset: 0 }
    }
}

#[async_trait]
impl<R: ReadAt + ?Sized> ByteStream for PlainStream<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.reader.read_at(self.offset, buf).await?;
        self.offset += n as u64;
        Ok(n)
    }

    async fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.offset.saturating_add(n);
        if target > self.reader.size() {
            bail!(
                "stream ended with {} bytes left to skip",
                target - self.reader.size()
            );
        }
        self.offset = target;
        Ok(())
    }
}

/// Gzip-compressed stream decoded on the fly.
pub struct GzipStream<R: ReadAt + ?Sized> {
    inner: PlainStream<R>,
    decoder: GzDecoder<Vec<u8>>,
    /// Read position inside the decoder's output buffer.
    pos: usize,
    chunk: Vec<u8>,
    finished: bool,
}

impl<R: ReadAt + ?Sized> GzipStream<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            inner: PlainStream::new(reader),
            decoder: GzDecoder::new(Vec::new()),
            pos: 0,
            chunk: vec![0u8; CHUNK_SIZE],
            finished: false,
        }
    }

    /// Push the next compressed chunk into the decoder.
    async fn fill(&mut self) -> Result<()> {
        let n = self.inner.read(&mut self.chunk).await?;
        if n == 0 {
            // Errors here if the member was cut short
            self.decoder.try_finish()?;
            self.finished = true;
            return Ok(());
        }

        let mut input = &self.chunk[..n];
        while !input.is_empty() {
            let used = self.decoder.write(input)?;
            if used == 0 {
                // Member complete; anything after the trailer is ignored.
                self.finished = true;
                break;
            }
            input = &input[used..];
        }
        Ok(())
    }
}

#[async_trait]
impl<R: ReadAt + ?Sized> ByteStream for GzipStream<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let out = self.decoder.get_mut();
            if self.pos < out.len() {
                let n = (out.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&out[self.pos..self.pos + n]);
                self.pos += n;
                if self.pos == out.len() {
                    out.clear();
                    self.pos = 0;
                }
                return Ok(n);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }
            self.fill().await?;
        }
    }
}
