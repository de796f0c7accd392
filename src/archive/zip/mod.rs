//! ZIP container support.
//!
//! - [`structures`]: on-disk records (EOCD, ZIP64 records, header signatures)
//! - [`parser`]: reads the End of Central Directory and the Central Directory
//! - [`reader`]: payload extraction for STORED and DEFLATE entries
//!
//! The Central Directory is read first, so listing an archive costs a read
//! of its tail only. That keeps remote archives cheap: over HTTP the first
//! image is reached with a handful of Range requests.
//!
//! Not supported: encryption, multi-disk archives, compression methods
//! other than STORED and DEFLATE.

mod parser;
mod reader;
mod structures;

pub use parser::ZipParser;
pub use reader::ZipReader;
pub use structures::*;
