use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::OutputFormat;
use crate::pipeline::ThumbnailOptions;

#[derive(Parser, Debug)]
#[command(name = "archive-thumbnailer")]
#[command(version)]
#[command(about = "Save the first image found in an archive as a thumbnail", long_about = None)]
#[command(after_help = "Examples:\n  \
  archive-thumbnailer comic.cbz cover.jpg              first image as JPEG (quality 90)\n  \
  archive-thumbnailer -Q 75 photos.tar.gz thumb.jpg    lower JPEG quality\n  \
  archive-thumbnailer --lossless book.zip cover.png    lossless PNG output\n  \
  archive-thumbnailer https://example.com/a.zip a.jpg  remote ZIP via Range requests")]
pub struct Cli {
    /// Archive path or HTTP URL (ZIP, TAR or TAR.GZ)
    #[arg(value_name = "ARCHIVE")]
    pub input: String,

    /// Where to write the thumbnail
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// JPEG quality (0-100)
    #[arg(
        short = 'Q',
        long,
        value_name = "N",
        default_value_t = OutputFormat::DEFAULT_QUALITY,
        value_parser = clap::value_parser!(u8).range(0..=100)
    )]
    pub quality: u8,

    /// Write a lossless PNG instead of a JPEG
    #[arg(long, conflicts_with = "quality")]
    pub lossless: bool,

    /// Give up if extraction takes longer than this many seconds
    #[arg(short = 't', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Do not print the status line
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn options(&self) -> ThumbnailOptions {
        let format = if self.lossless {
            OutputFormat::Png
        } else {
            OutputFormat::Jpeg {
                quality: self.quality,
            }
        };
        ThumbnailOptions {
            format,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }

    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
