//! TAR entry walking.
//!
//! Understands v7, ustar and GNU headers, GNU long-name records (`L`) and
//! the `path`/`size` keys of pax extended headers (`x`). Everything else
//! (links, directories, devices, global pax headers) is stepped over.

use anyhow::{Context, Result, bail};

use super::stream::ByteStream;

pub const BLOCK_SIZE: usize = 512;

/// Longest GNU long-name or pax record we are willing to buffer.
const MAX_META_SIZE: u64 = 1024 * 1024;

const MAGIC_OFFSET: usize = 257;
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    GnuLongName,
    PaxHeader,
    Other(u8),
}

impl EntryType {
    fn from_flag(flag: u8) -> Self {
        match flag {
            b'0' | b'\0' | b'7' => EntryType::Regular,
            b'L' => EntryType::GnuLongName,
            b'x' => EntryType::PaxHeader,
            other => EntryType::Other(other),
        }
    }
}

/// One parsed 512-byte header block.
#[derive(Debug, Clone)]
pub struct TarHeader {
    pub name: String,
    pub size: u64,
    pub entry_type: EntryType,
}

impl TarHeader {
    /// Parse a header block. Returns `Ok(None)` for an all-zero block, which
    /// marks the end of the archive.
    pub fn parse(block: &[u8; BLOCK_SIZE]) -> Result<Option<Self>> {
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        if !checksum_matches(block) {
            bail!("TAR header checksum mismatch");
        }

        let mut name = field_str(&block[0..100]);
        // POSIX ustar splits long paths into prefix + name; GNU reuses the
        // prefix bytes for other data.
        if &block[MAGIC_OFFSET..MAGIC_OFFSET + 6] == b"ustar\0" {
            let prefix = field_str(&block[345..500]);
            if !prefix.is_empty() {
                name = format!("{}/{}", prefix, name);
            }
        }

        let size = parse_number(&block[124..136]).context("bad size field")?;

        Ok(Some(Self {
            name,
            size,
            entry_type: EntryType::from_flag(block[156]),
        }))
    }
}

/// Whether a block looks like the first header of a TAR archive.
pub fn looks_like_tar(block: &[u8]) -> bool {
    let Ok(block) = <&[u8; BLOCK_SIZE]>::try_from(block) else {
        return false;
    };
    &block[MAGIC_OFFSET..MAGIC_OFFSET + 5] == b"ustar" || checksum_matches(block)
}

fn checksum_matches(block: &[u8; BLOCK_SIZE]) -> bool {
    let Ok(stored) = parse_number(&block[CHECKSUM_RANGE]) else {
        return false;
    };

    // The checksum field itself counts as eight spaces.
    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if CHECKSUM_RANGE.contains(&i) { b' ' } else { b };
        unsigned += b as u64;
        signed += b as i8 as i64;
    }
    // Some old writers summed signed chars.
    stored == unsigned || stored as i64 == signed
}

fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Numeric header field: NUL/space padded octal, or GNU base-256 when the
/// high bit of the first byte is set.
fn parse_number(field: &[u8]) -> Result<u64> {
    if let Some((&first, rest)) = field.split_first()
        && first & 0x80 != 0
    {
        if first & 0x40 != 0 {
            bail!("negative number");
        }
        let mut value = (first & 0x7f) as u64;
        for &b in rest {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(b as u64))
                .context("number overflows 64 bits")?;
        }
        return Ok(value);
    }

    let text = field_str(field);
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8).with_context(|| format!("invalid octal {:?}", text))
}

/// Bytes of padding after `size` bytes of data.
pub fn padding(size: u64) -> u64 {
    let rem = size % BLOCK_SIZE as u64;
    if rem == 0 { 0 } else { BLOCK_SIZE as u64 - rem }
}

/// Data plus padding occupied by an entry of `size` bytes.
fn data_span(size: u64) -> Result<u64> {
    size.checked_add(padding(size))
        .with_context(|| format!("TAR entry size {} out of range", size))
}

/// Values a pax extended header overrides for the next entry.
#[derive(Debug, Default)]
struct PaxOverrides {
    path: Option<String>,
    size: Option<u64>,
}

/// Parse pax records of the form `"<len> <key>=<value>\n"`.
fn parse_pax(data: &[u8]) -> Result<PaxOverrides> {
    let mut overrides = PaxOverrides::default();
    let mut rest = data;

    while !rest.is_empty() && rest[0] != 0 {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .context("pax record without length")?;
        let len: usize = std::str::from_utf8(&rest[..space])?
            .parse()
            .context("bad pax record length")?;
        if len <= space + 1 || len > rest.len() {
            bail!("pax record length {} out of range", len);
        }

        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            let (key, value) = (&record[..eq], &record[eq + 1..]);
            match key {
                b"path" => overrides.path = Some(String::from_utf8_lossy(value).into_owned()),
                b"size" => {
                    overrides.size = Some(
                        std::str::from_utf8(value)?
                            .parse()
                            .context("bad pax size")?,
                    )
                }
                _ => {}
            }
        }
        rest = &rest[len..];
    }

    Ok(overrides)
}

/// A regular file the walk stopped at. The stream is positioned at the
/// first byte of its data.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub name: String,
    pub size: u64,
}

/// Sequential walker over the entries of a TAR stream.
pub struct TarWalker<S: ByteStream> {
    stream: S,
    /// Data + padding of the previous entry still to be skipped.
    pending: u64,
}

impl<S: ByteStream> TarWalker<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, pending: 0 }
    }

    pub fn stream(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Mark `consumed` bytes of the current entry's data as already read.
    pub fn consumed(&mut self, consumed: u64) {
        self.pending = self.pending.saturating_sub(consumed);
    }

    /// Advance to the next regular file, or `None` at the end of the archive.
    pub async fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        let mut long_name: Option<String> = None;
        let mut pax = PaxOverrides::default();

        loop {
            if self.pending > 0 {
                self.stream.skip(self.pending).await?;
                self.pending = 0;
            }

            let mut block = [0u8; BLOCK_SIZE];
            let n = self.stream.read_full(&mut block).await?;
            if n == 0 {
                // Missing end-of-archive marker; treat EOF as the end.
                return Ok(None);
            }
            if n < BLOCK_SIZE {
                bail!("truncated TAR header ({} bytes)", n);
            }

            let Some(header) = TarHeader::parse(&block)? else {
                return Ok(None);
            };

            match header.entry_type {
                EntryType::GnuLongName => {
                    let data = self.read_meta(header.size).await?;
                    long_name = Some(field_str(&data));
                }
                EntryType::PaxHeader => {
                    let data = self.read_meta(header.size).await?;
                    pax = parse_pax(&data)?;
                }
                EntryType::Regular => {
                    let name = pax.path.take().or(long_name.take()).unwrap_or(header.name);
                    let size = pax.size.take().unwrap_or(header.size);
                    self.pending = data_span(size)?;
                    return Ok(Some(TarEntry { name, size }));
                }
                EntryType::Other(flag) => {
                    log::trace!("skipping TAR entry {} (type {:?})", header.name, flag as char);
                    self.pending = data_span(header.size)?;
                    long_name = None;
                    pax = PaxOverrides::default();
                }
            }
        }
    }

    async fn read_meta(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > MAX_META_SIZE {
            bail!("TAR metadata record of {} bytes is too large", size);
        }
        let mut data = vec![0u8; size as usize];
        self.stream.read_exact(&mut data).await?;
        self.pending = padding(size);
        Ok(data)
    }
}
