//! Archive scanning: find the first image entry and pull out its bytes.
//!
//! The container type is sniffed from the leading bytes of the source,
//! never from the archive's file name:
//!
//! | leading bytes                        | container         |
//! |--------------------------------------|-------------------|
//! | `PK\x03\x04`, `PK\x05\x06`, `PK\x07\x08` | ZIP           |
//! | `\x1f\x8b`                           | gzip'd TAR        |
//! | `ustar` at 257 / valid v7 checksum   | TAR               |
//!
//! Entries are offered to [`classify`] in archive order (the Central
//! Directory order for ZIP, stream order for TAR) and the walk stops at the
//! first match; later entries are never read.

pub mod stream;
pub mod tar;
pub mod zip;

use std::fmt;
use std::sync::Arc;

use crate::classify::{SupportedKind, classify};
use crate::error::{Error, Result};
use crate::io::{self, ReadAt};

use self::stream::{ByteStream, GzipStream, PlainStream};
use self::tar::TarWalker;
use self::zip::ZipReader;

/// Bytes sniffed from the start of the source.
const SNIFF_LEN: usize = tar::BLOCK_SIZE;

/// Container formats the scanner can walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Zip,
    Tar,
    TarGz,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerFormat::Zip => "zip",
            ContainerFormat::Tar => "tar",
            ContainerFormat::TarGz => "tar.gz",
        })
    }
}

impl ContainerFormat {
    /// Identify the container from its first bytes.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        let zip_signatures = [
            zip::LFH_SIGNATURE,
            zip::EndOfCentralDirectory::SIGNATURE,
            zip::SPANNED_SIGNATURE,
        ];
        if zip_signatures.iter().any(|sig| head.starts_with(sig)) {
            return Some(ContainerFormat::Zip);
        }
        if head.starts_with(&[0x1f, 0x8b]) {
            return Some(ContainerFormat::TarGz);
        }
        if tar::looks_like_tar(head) {
            return Some(ContainerFormat::Tar);
        }
        None
    }
}

/// An entry as seen during a single step of the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    /// Declared uncompressed size.
    pub size: u64,
}

/// Bytes of the first image entry, tagged with the kind its name selected.
#[derive(Debug, Clone)]
pub struct RawImageBlob {
    pub entry: String,
    pub kind: SupportedKind,
    pub bytes: Vec<u8>,
}

/// Open `archive` (a path or HTTP(S) URL) and return its first image entry.
pub async fn first_image(archive: &str) -> Result<RawImageBlob> {
    log::info!("scanning {}", archive);
    let source = io::open(archive)
        .await
        .map_err(|e| Error::open(archive, format!("{:#}", e)))?;
    scan_source(archive, source).await
}

/// Scan an already opened source. `label` names it in errors and logs.
///
/// The source is dropped before returning, whatever the outcome.
pub async fn scan_source<R: ReadAt + ?Sized>(label: &str, source: Arc<R>) -> Result<RawImageBlob> {
    let head_len = SNIFF_LEN.min(source.size() as usize);
    let mut head = vec![0u8; head_len];
    source
        .read_exact_at(0, &mut head)
        .await
        .map_err(|e| Error::open(label, format!("{:#}", e)))?;

    let format = ContainerFormat::sniff(&head)
        .ok_or_else(|| Error::open(label, "unrecognized container format"))?;
    log::debug!("{} looks like a {} archive", label, format);

    match format {
        ContainerFormat::Zip => scan_zip(label, source).await,
        ContainerFormat::Tar => scan_tar(label, PlainStream::new(source), false).await,
        ContainerFormat::TarGz => scan_tar(label, GzipStream::new(source), true).await,
    }
}

/// Reserve exactly `entry.size` bytes, reporting failure instead of aborting.
fn allocate_payload(entry: &ArchiveEntry) -> Result<Vec<u8>> {
    let allocation_error = || Error::Allocation {
        entry: entry.name.clone(),
        size: entry.size,
    };
    let size = usize::try_from(entry.size).map_err(|_| allocation_error())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| allocation_error())?;
    Ok(buf)
}

fn accept(entry: &ArchiveEntry) -> Option<SupportedKind> {
    let kind = classify(&entry.name);
    match kind {
        Some(kind) => log::info!("found {} image {} ({} bytes)", kind, entry.name, entry.size),
        None => log::debug!("skipping {}", entry.name),
    }
    kind
}

async fn scan_zip<R: ReadAt + ?Sized>(label: &str, source: Arc<R>) -> Result<RawImageBlob> {
    let reader = ZipReader::new(source);
    let entries = reader
        .list_files()
        .await
        .map_err(|e| Error::open(label, format!("{:#}", e)))?;

    for zip_entry in entries.iter().filter(|e| !e.is_directory) {
        let entry = ArchiveEntry {
            name: zip_entry.file_name.clone(),
            size: zip_entry.uncompressed_size,
        };
        let Some(kind) = accept(&entry) else {
            continue;
        };

        let mut bytes = allocate_payload(&entry)?;
        reader
            .extract_into(zip_entry, &mut bytes)
            .await
            .map_err(|e| Error::read(label, &entry.name, format!("{:#}", e)))?;

        return Ok(RawImageBlob {
            entry: entry.name,
            kind,
            bytes,
        });
    }

    Err(Error::NoImageFound {
        path: label.to_string(),
    })
}

async fn scan_tar<S: ByteStream>(label: &str, stream: S, gzipped: bool) -> Result<RawImageBlob> {
    let mut walker = TarWalker::new(stream);
    let mut current = String::new();
    let mut first = true;

    loop {
        let next = match walker.next_entry().await {
            Ok(next) => next,
            // A gzip stream whose content is not a TAR is a container we
            // do not understand, not a damaged archive.
            Err(e) if first && gzipped => {
                return Err(Error::open(label, format!("not a gzip'd tar archive: {:#}", e)));
            }
            Err(e) => {
                let entry = if current.is_empty() { "TAR header" } else { current.as_str() };
                return Err(Error::read(label, entry, format!("{:#}", e)));
            }
        };
        first = false;

        let Some(tar_entry) = next else {
            break;
        };
        let entry = ArchiveEntry {
            name: tar_entry.name,
            size: tar_entry.size,
        };
        let Some(kind) = accept(&entry) else {
            current = entry.name;
            continue;
        };

        let mut bytes = allocate_payload(&entry)?;
        walker
            .stream()
            .read_to_vec(&mut bytes, entry.size)
            .await
            .map_err(|e| Error::read(label, &entry.name, format!("{:#}", e)))?;
        walker.consumed(entry.size);

        return Ok(RawImageBlob {
            entry: entry.name,
            kind,
            bytes,
        });
    }

    Err(Error::NoImageFound {
        path: label.to_string(),
    })
}
