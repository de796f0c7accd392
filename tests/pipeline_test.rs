// End-to-end tests: build archives on disk, run the pipeline, inspect output.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use archive_thumbnailer::{
    Error, OutputFormat, SupportedKind, ThumbnailOptions, first_image, generate,
};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn rgb_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 2) as u8, (y * 4) as u8, ((x ^ y) & 0xff) as u8])
    })
}

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    match format {
        // WebP encoding in `image` is lossless RGBA/RGB only
        ImageFormat::WebP => {
            let rgba: RgbaImage =
                ImageBuffer::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 9, 255]));
            rgba.write_to(&mut out, format).unwrap();
        }
        _ => rgb_image(width, height).write_to(&mut out, format).unwrap(),
    }
    out.into_inner()
}

fn write_zip(dir: &TempDir, name: &str, entries: &[(&str, &[u8])], deflate: bool) -> PathBuf {
    let method = if deflate {
        zip::CompressionMethod::Deflated
    } else {
        zip::CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default().compression_method(method);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (entry, data) in entries {
        if entry.ends_with('/') {
            writer.add_directory(*entry, options).unwrap();
        } else {
            writer.start_file(*entry, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    let bytes = writer.finish().unwrap().into_inner();

    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (entry, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Offset of the first Central Directory header in a ZIP image.
fn central_directory(bytes: &[u8]) -> usize {
    bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap()
}

/// Recompute the checksum of the TAR header starting at `offset`.
fn reseal_tar_header(bytes: &mut [u8], offset: usize) {
    let block = &mut bytes[offset..offset + 512];
    block[148..156].copy_from_slice(b"        ");
    let sum: u64 = block.iter().map(|&b| b as u64).sum();
    block[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
}

fn assert_read_error(err: &Error, entry: &str) {
    match err {
        Error::ArchiveRead { entry: got, .. } => assert_eq!(got, entry, "{err}"),
        other => panic!("expected ArchiveRead for {entry}, got {other:?}"),
    }
}

async fn run(archive: &Path, output: &Path) -> archive_thumbnailer::Result<archive_thumbnailer::Thumbnail> {
    generate(arg(archive), output, &ThumbnailOptions::default()).await
}

#[tokio::test]
async fn test_photos_zip_produces_jpeg_of_same_size() {
    let dir = tempfile::tempdir().unwrap();
    let jpeg = encoded(100, 50, ImageFormat::Jpeg);
    let archive = write_zip(
        &dir,
        "photos.zip",
        &[("a.txt", b"hello"), ("cover.jpg", &jpeg)],
        false,
    );
    let output = dir.path().join("thumb.jpg");

    let thumb = run(&archive, &output).await.unwrap();
    assert_eq!(thumb.entry, "cover.jpg");
    assert_eq!(thumb.kind, SupportedKind::Jpeg);
    assert_eq!((thumb.width, thumb.height), (100, 50));

    let written = std::fs::read(&output).unwrap();
    assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&written).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 50));
}

#[tokio::test]
async fn test_empty_zip_is_no_image_found() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(&dir, "empty.zip", &[], false);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert!(matches!(err, Error::NoImageFound { .. }), "{err}");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_zip_without_images_is_no_image_found() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(
        &dir,
        "docs.zip",
        &[("readme.txt", b"x"), ("logo.gif", b"GIF89a"), ("COVER.JPG", b"upper")],
        true,
    );
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert!(matches!(err, Error::NoImageFound { .. }));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_truncated_png_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut png = encoded(64, 64, ImageFormat::Png);
    png.truncate(png.len() / 2);
    let archive = write_zip(&dir, "bad.zip", &[("img.png", &png)], false);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert!(
        matches!(err, Error::Decode { kind: SupportedKind::Png, .. }),
        "{err}"
    );
    assert!(!output.exists());
}

#[tokio::test]
async fn test_only_first_match_is_tried() {
    // A broken first image is fatal even though a good one follows.
    let dir = tempfile::tempdir().unwrap();
    let good = encoded(8, 8, ImageFormat::Png);
    let archive = write_zip(
        &dir,
        "two.zip",
        &[("first.jpg", b"not a jpeg"), ("second.png", &good)],
        false,
    );
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert!(matches!(err, Error::Decode { kind: SupportedKind::Jpeg, .. }));
}

#[tokio::test]
async fn test_deflated_zip_entry() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(33, 17, ImageFormat::Png);
    let archive = write_zip(
        &dir,
        "deflated.zip",
        &[("notes.md", b"# notes\n"), ("pages/001.png", &png)],
        true,
    );

    let blob = first_image(arg(&archive)).await.unwrap();
    assert_eq!(blob.entry, "pages/001.png");
    assert_eq!(blob.kind, SupportedKind::Png);
    assert_eq!(blob.bytes, png);
}

#[tokio::test]
async fn test_directory_named_like_image_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let webp = encoded(12, 10, ImageFormat::WebP);
    let archive = write_zip(
        &dir,
        "dirs.zip",
        &[("covers.png/", b""), ("covers.png/real.webp", &webp)],
        false,
    );

    let blob = first_image(arg(&archive)).await.unwrap();
    assert_eq!(blob.entry, "covers.png/real.webp");
    // Right-most marker decides
    assert_eq!(blob.kind, SupportedKind::Webp);
}

#[tokio::test]
async fn test_webp_in_tar() {
    let dir = tempfile::tempdir().unwrap();
    let webp = encoded(20, 30, ImageFormat::WebP);
    let archive = write_file(
        &dir,
        "images.tar",
        &tar_bytes(&[("info.txt", b"some text that is not an image"), ("shot.webp", &webp)]),
    );
    let output = dir.path().join("thumb.jpg");

    let thumb = run(&archive, &output).await.unwrap();
    assert_eq!(thumb.kind, SupportedKind::Webp);
    assert_eq!((thumb.width, thumb.height), (20, 30));
    assert!(output.exists());
}

#[tokio::test]
async fn test_tar_gz_with_long_name() {
    let dir = tempfile::tempdir().unwrap();
    let jpeg = encoded(40, 24, ImageFormat::Jpeg);
    let long_name = format!("{}/cover.jpeg", "nested-directory".repeat(8));
    assert!(long_name.len() > 100);
    let archive = write_file(
        &dir,
        "book.tgz",
        &gzip(&tar_bytes(&[("a.txt", b"aaaa"), (long_name.as_str(), &jpeg)])),
    );

    let blob = first_image(arg(&archive)).await.unwrap();
    assert_eq!(blob.entry, long_name);
    assert_eq!(blob.kind, SupportedKind::Jpeg);
    assert_eq!(blob.bytes, jpeg);
}

#[tokio::test]
async fn test_tar_without_images() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_file(&dir, "plain.tar", &tar_bytes(&[("a.txt", b"a"), ("b.bin", &[0u8; 700])]));

    let err = first_image(arg(&archive)).await.unwrap_err();
    assert!(matches!(err, Error::NoImageFound { .. }));
}

#[tokio::test]
async fn test_container_is_sniffed_not_named() {
    // A ZIP named .tar and a TAR named .zip both work.
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(3, 3, ImageFormat::Png);
    let zip_path = write_zip(&dir, "really-a-zip.tar", &[("x.png", &png)], false);
    let tar_path = write_file(&dir, "really-a-tar.zip", &tar_bytes(&[("x.png", &png)]));

    assert_eq!(first_image(arg(&zip_path)).await.unwrap().bytes, png);
    assert_eq!(first_image(arg(&tar_path)).await.unwrap().bytes, png);
}

#[tokio::test]
async fn test_not_an_archive_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "image.png", &encoded(4, 4, ImageFormat::Png));
    let output = dir.path().join("thumb.jpg");

    let err = run(&path, &output).await.unwrap_err();
    assert!(matches!(err, Error::ArchiveOpen { .. }));
    assert!(!output.exists());

    let empty = write_file(&dir, "empty.bin", b"");
    assert!(matches!(
        first_image(arg(&empty)).await.unwrap_err(),
        Error::ArchiveOpen { .. }
    ));
}

#[tokio::test]
async fn test_corrupt_zip_directory_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(4, 4, ImageFormat::Png);
    let good = write_zip(&dir, "good.zip", &[("x.png", &png)], false);
    let mut bytes = std::fs::read(&good).unwrap();
    // Chop the End of Central Directory record off.
    bytes.truncate(bytes.len() - 10);
    let broken = write_file(&dir, "broken.zip", &bytes);

    let err = first_image(arg(&broken)).await.unwrap_err();
    assert!(matches!(err, Error::ArchiveOpen { .. }), "{err}");
}

#[tokio::test]
async fn test_lossless_png_output_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_image(48, 27);
    let mut png = Cursor::new(Vec::new());
    source.write_to(&mut png, ImageFormat::Png).unwrap();
    let archive = write_zip(&dir, "lossless.zip", &[("p.png", png.get_ref())], true);
    let output = dir.path().join("thumb.png");

    let options = ThumbnailOptions {
        format: OutputFormat::Png,
        timeout: None,
    };
    let thumb = generate(arg(&archive), &output, &options).await.unwrap();
    assert_eq!(thumb.format, OutputFormat::Png);

    let written = image::open(&output).unwrap().to_rgb8();
    assert_eq!(written, source);
}

#[tokio::test]
async fn test_timeout_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(1024, 1024, ImageFormat::Png);
    let archive = write_zip(&dir, "big.zip", &[("big.png", &png)], false);
    let output = dir.path().join("thumb.jpg");

    let options = ThumbnailOptions {
        format: OutputFormat::default(),
        timeout: Some(Duration::ZERO),
    };
    let err = generate(arg(&archive), &output, &options).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_tar_damaged_after_first_entry_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(8, 8, ImageFormat::Png);
    let mut bytes = tar_bytes(&[("a.txt", b"aaaa"), ("b.png", &png)]);
    // Second header sits after one header block and one data block.
    bytes[1024] = b'c';
    let archive = write_file(&dir, "damaged.tar", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert_read_error(&err, "a.txt");
    assert!(!output.exists());

    let tgz = write_file(&dir, "damaged.tgz", &gzip(&bytes));
    let err = run(&tgz, &output).await.unwrap_err();
    assert_read_error(&err, "a.txt");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_truncated_tar_payload_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(64, 64, ImageFormat::Png);
    let mut bytes = tar_bytes(&[("cover.png", &png)]);
    bytes.truncate(512 + 100);
    let archive = write_file(&dir, "short.tar", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert_read_error(&err, "cover.png");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_tar_entry_larger_than_archive_is_not_materialized() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = tar_bytes(&[("huge.png", b"tiny")]);
    bytes[124..136].copy_from_slice(format!("{:011o}\0", 4u64 << 30).as_bytes());
    reseal_tar_header(&mut bytes, 0);
    let archive = write_file(&dir, "huge.tar", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    match &err {
        Error::ArchiveRead { .. } | Error::Allocation { .. } => {}
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn test_stored_zip_entry_past_end_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(4, 4, ImageFormat::Png);
    let good = write_zip(&dir, "good.zip", &[("x.png", &png)], false);
    let mut bytes = std::fs::read(&good).unwrap();
    let cd = central_directory(&bytes);
    let claimed = 64u32 << 20;
    bytes[cd + 20..cd + 24].copy_from_slice(&claimed.to_le_bytes());
    bytes[cd + 24..cd + 28].copy_from_slice(&claimed.to_le_bytes());
    let archive = write_file(&dir, "overclaim.zip", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert_read_error(&err, "x.png");
    assert!(err.to_string().contains("past the end"), "{err}");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_unsupported_zip_method_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(4, 4, ImageFormat::Png);
    let good = write_zip(&dir, "good.zip", &[("x.png", &png)], false);
    let mut bytes = std::fs::read(&good).unwrap();
    let cd = central_directory(&bytes);
    // 12 is bzip2.
    bytes[cd + 10..cd + 12].copy_from_slice(&12u16.to_le_bytes());
    let archive = write_file(&dir, "bzip2.zip", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert_read_error(&err, "x.png");
    assert!(err.to_string().contains("compression method 12"), "{err}");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_zip_crc_mismatch_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(4, 4, ImageFormat::Png);
    let good = write_zip(&dir, "good.zip", &[("x.png", &png)], true);
    let mut bytes = std::fs::read(&good).unwrap();
    let cd = central_directory(&bytes);
    bytes[cd + 16] ^= 0xff;
    let archive = write_file(&dir, "badcrc.zip", &bytes);
    let output = dir.path().join("thumb.jpg");

    let err = run(&archive, &output).await.unwrap_err();
    assert_read_error(&err, "x.png");
    assert!(err.to_string().contains("CRC-32"), "{err}");
    assert!(!output.exists());
}

/// Serve `body` at `/archive.zip` with byte-range support, one request per
/// connection.
async fn serve_archive(body: Vec<u8>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = std::sync::Arc::new(body);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request).to_string();

                let response = if request.starts_with("HEAD ") {
                    format!(
                        "HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    )
                    .into_bytes()
                } else {
                    let (start, end) = request
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("range")
                                .then(|| value.trim().trim_start_matches("bytes=").to_string())
                        })
                        .and_then(|range| {
                            let (start, end) = range.split_once('-')?;
                            Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?))
                        })
                        .unwrap_or((0, body.len() - 1));
                    let end = end.min(body.len() - 1);
                    let mut out = format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        start,
                        end,
                        body.len(),
                        end - start + 1
                    )
                    .into_bytes();
                    out.extend_from_slice(&body[start..=end]);
                    out
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/archive.zip", addr)
}

#[tokio::test]
async fn test_remote_zip_over_range_requests() {
    let dir = tempfile::tempdir().unwrap();
    let png = encoded(30, 20, ImageFormat::Png);
    let filler = vec![7u8; 256 * 1024];
    let local = write_zip(
        &dir,
        "remote.zip",
        &[("big.bin", &filler), ("cover.png", &png)],
        false,
    );
    let url = serve_archive(std::fs::read(&local).unwrap()).await;
    let output = dir.path().join("thumb.jpg");

    let thumb = generate(&url, &output, &ThumbnailOptions::default()).await.unwrap();
    assert_eq!(thumb.entry, "cover.png");
    assert_eq!((thumb.width, thumb.height), (30, 20));
    assert!(output.exists());
}

