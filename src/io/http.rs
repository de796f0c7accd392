//! Remote archives read through HTTP Range requests.
//!
//! Only the byte ranges the scanner asks for are fetched, so a ZIP's
//! central directory and its first image can be read without downloading
//! the rest of the archive.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a ranged GET is retried after a timeout or connect error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Back-off grows by this much per failed attempt.
    pub step: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            step: Duration::from_millis(500),
        }
    }
}

pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    retry: RetryPolicy,
    fetched: AtomicU64,
    requests: AtomicU64,
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request and keep its size.
    pub async fn new(url: String) -> Result<Self> {
        Self::with_retry(url, RetryPolicy::default()).await
    }

    pub async fn with_retry(url: String, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let resp = client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("HEAD {}", url))?;
        let size = remote_size(resp.status(), resp.headers())?;
        log::debug!("remote archive {} is {} bytes", url, size);

        Ok(Self {
            client,
            url,
            size,
            retry,
            fetched: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        })
    }

    /// Payload bytes received so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    /// Successful ranged GETs so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// GET `start..=end` into `out`; returns how many bytes the server sent.
    async fn fetch_into(&self, start: u64, end: u64, out: &mut [u8]) -> Result<usize> {
        let range = format!("bytes={}-{}", start, end);
        let mut attempt = 0;

        let resp = loop {
            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(resp) => break resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(e)
                            .with_context(|| format!("{} failed after {} attempts", range, attempt));
                    }
                    log::warn!(
                        "{}: {} (retry {}/{})",
                        self.url,
                        e,
                        attempt,
                        self.retry.attempts
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            bail!("{} answered {} to {}", self.url, resp.status(), range);
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            bail!("server returned an empty body for {}", range);
        }
        self.requests.fetch_add(1, Ordering::Relaxed);

        let n = body.len().min(out.len());
        out[..n].copy_from_slice(&body[..n]);
        Ok(n)
    }
}

/// Archive size from a HEAD response. The server must serve byte ranges.
fn remote_size(status: StatusCode, headers: &HeaderMap) -> Result<u64> {
    if !status.is_success() {
        bail!("HEAD request failed with status {}", status);
    }

    let ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    if !ranges
        .split(',')
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
    {
        bail!("server does not accept byte ranges (Accept-Ranges: {})", ranges);
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .context("server did not send a Content-Length")
}

impl Drop for HttpRangeReader {
    fn drop(&mut self) {
        log::debug!(
            "fetched {} of {} bytes from {} in {} requests",
            self.transferred_bytes(),
            self.size,
            self.url,
            self.requests()
        );
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = offset
            .saturating_add(buf.len() as u64 - 1)
            .min(self.size - 1);
        let want = (end - offset + 1) as usize;

        // Servers may answer with less than the requested range.
        let mut filled = 0;
        while filled < want {
            let n = self
                .fetch_into(offset + filled as u64, end, &mut buf[filled..want])
                .await?;
            filled += n;
            self.fetched.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
