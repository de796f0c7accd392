//! Command-line entry point: `archive-thumbnailer <ARCHIVE> <OUTPUT>`.

use anyhow::Result;
use clap::Parser;

use archive_thumbnailer::{Cli, generate};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    let options = cli.options();
    match generate(&cli.input, &cli.output, &options).await {
        Ok(thumb) => {
            log::info!(
                "{} {} ({}x{}) saved as {}",
                thumb.kind,
                thumb.entry,
                thumb.width,
                thumb.height,
                thumb.format
            );
            if !cli.quiet {
                println!("Thumbnail saved to {}", thumb.output.display());
            }
            Ok(())
        }
        Err(e) => {
            log::debug!("pipeline failed ({})", e.class());
            Err(e.into())
        }
    }
}
