//! End-to-end thumbnail generation.
//!
//! ```text
//! Start ──scan──▶ Scanned ──decode──▶ Decoded ──encode──▶ Encoded ──write──▶ Done
//!   └──────────────┴──────────────────┴──────────────────┴──────────▶ Failed
//! ```
//!
//! Each stage consumes the previous stage's value. A failure anywhere ends
//! the run: no retries, no second codec, no second entry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::{self, RawImageBlob};
use crate::classify::SupportedKind;
use crate::codec::{self, OutputFormat, PixelBuffer};
use crate::error::{Error, Result};

/// Run configuration.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailOptions {
    pub format: OutputFormat,
    /// Budget for scan + decode + encode. The output file is written after
    /// the budget check, so an expired run leaves nothing behind.
    pub timeout: Option<Duration>,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Archive entry the image came from.
    pub entry: String,
    pub kind: SupportedKind,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Scanned,
    Decoded,
    Encoded,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::Scanned => "scanned",
            Stage::Decoded => "decoded",
            Stage::Encoded => "encoded",
            Stage::Done => "done",
        })
    }
}

/// Encoded output waiting to be written.
struct Encoded {
    entry: String,
    kind: SupportedKind,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

/// Extract the first image of `input` and write it to `output`.
pub async fn generate(input: &str, output: &Path, options: &ThumbnailOptions) -> Result<Thumbnail> {
    let label = output.display().to_string();

    let encoded = match options.timeout {
        Some(limit) => tokio::time::timeout(limit, produce(input, &label, options.format))
            .await
            .map_err(|_| Error::Timeout(limit))??,
        None => produce(input, &label, options.format).await?,
    };

    let Encoded {
        entry,
        kind,
        width,
        height,
        bytes,
    } = encoded;
    codec::write_output(output, &bytes)?;
    transition(Stage::Encoded, Stage::Done);

    Ok(Thumbnail {
        entry,
        kind,
        width,
        height,
        output: output.to_path_buf(),
        format: options.format,
    })
}

async fn produce(input: &str, label: &str, format: OutputFormat) -> Result<Encoded> {
    let blob: RawImageBlob = archive::first_image(input).await?;
    transition(Stage::Start, Stage::Scanned);

    let entry = blob.entry.clone();
    let kind = blob.kind;
    let pixels: PixelBuffer = run_blocking(label, move || codec::decode(blob)).await?;
    transition(Stage::Scanned, Stage::Decoded);

    let (width, height) = (pixels.width(), pixels.height());
    let owned_label = label.to_string();
    let bytes = run_blocking(label, move || {
        codec::encode_to_vec(&pixels, format, &owned_label)
    })
    .await?;
    transition(Stage::Decoded, Stage::Encoded);

    Ok(Encoded {
        entry,
        kind,
        width,
        height,
        bytes,
    })
}

/// Run CPU-bound codec work off the async worker threads.
///
/// Panics in `work` are re-raised on the caller.
async fn run_blocking<T, F>(label: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        // Only reachable while the runtime is shutting down.
        Err(join_error) => Err(Error::Encode {
            path: label.to_string(),
            reason: format!("codec task cancelled: {}", join_error),
        }),
    }
}

fn transition(from: Stage, to: Stage) {
    log::debug!("pipeline: {} -> {}", from, to);
}
