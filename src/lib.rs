//! # archive-thumbnailer
//!
//! Pull the first image out of an archive and save it as a thumbnail.
//!
//! The archive is walked entry by entry in archive order. The first entry
//! whose name contains `.jpg`, `.jpeg`, `.png` or `.webp` is extracted,
//! decoded with the codec its name selects, normalized to 8-bit RGB and
//! re-encoded as JPEG (or, on request, as a lossless PNG). The image is
//! not resized.
//!
//! ## Features
//!
//! - ZIP (including ZIP64, STORED and DEFLATE entries), TAR and TAR.GZ,
//!   detected from the file contents rather than the file name
//! - Local files and HTTP/HTTPS URLs; remote ZIPs are read with Range
//!   requests, so only the Central Directory and the chosen entry are
//!   fetched
//! - JPEG, PNG and WebP input
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use archive_thumbnailer::{ThumbnailOptions, generate};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let thumb = generate("comic.cbz", Path::new("cover.jpg"), &ThumbnailOptions::default()).await?;
//!     println!("{} -> {}x{}", thumb.entry, thumb.width, thumb.height);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod classify;
pub mod cli;
pub mod codec;
pub mod error;
pub mod io;
pub mod pipeline;

pub use archive::{ArchiveEntry, ContainerFormat, RawImageBlob, first_image};
pub use classify::{SupportedKind, classify};
pub use cli::Cli;
pub use codec::{OutputFormat, PixelBuffer, decode, encode};
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use pipeline::{Thumbnail, ThumbnailOptions, generate};
