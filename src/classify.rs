//! Entry name classification.
//!
//! An entry is an image candidate when its name contains one of the known
//! extension markers *anywhere*, not only at the end: `scan.png.bak` counts
//! as PNG. Matching is case-sensitive.

use std::fmt;

/// Image formats the dispatcher knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedKind {
    Jpeg,
    Png,
    Webp,
}

/// Extension markers and the kind each one selects.
pub const EXTENSION_MARKERS: [(&str, SupportedKind); 4] = [
    (".jpg", SupportedKind::Jpeg),
    (".jpeg", SupportedKind::Jpeg),
    (".png", SupportedKind::Png),
    (".webp", SupportedKind::Webp),
];

impl fmt::Display for SupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupportedKind::Jpeg => "JPEG",
            SupportedKind::Png => "PNG",
            SupportedKind::Webp => "WebP",
        })
    }
}

/// Classify an entry name.
///
/// Returns `None` for names without any marker. When more than one marker
/// occurs, the right-most occurrence decides, so `cover.png.jpg` is a JPEG.
pub fn classify(name: &str) -> Option<SupportedKind> {
    EXTENSION_MARKERS
        .iter()
        .filter_map(|(marker, kind)| name.rfind(marker).map(|pos| (pos, *kind)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, kind)| kind)
}
