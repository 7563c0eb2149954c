use std::path::Path;

/// Broad content families, declared in primary-file preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MimeCategory {
    Video,
    Ebook,
    Zim,
    HtmlArchive,
    Audio,
    Image,
    Json,
    Text,
    Other,
}

// Types `mime_guess` misses or reports too generically.
const EXTENSION_OVERRIDES: &[(&str, &str)] = &[
    ("zim", "application/x-openzim"),
    ("mobi", "application/x-mobipocket-ebook"),
    ("azw3", "application/vnd.amazon.ebook"),
    ("epub", "application/epub+zip"),
    ("vtt", "text/vtt"),
    ("srt", "text/srt"),
    ("mkv", "video/x-matroska"),
];

const EBOOK_TYPES: &[&str] = &[
    "application/epub+zip",
    "application/x-mobipocket-ebook",
    "application/vnd.amazon.ebook",
    "application/pdf",
];

/// Guess the mimetype of `path` from its name.
pub fn detect_mimetype(path: &Path) -> String {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return "application/octet-stream".to_string();
    };
    let lower = name.to_ascii_lowercase();

    if lower.ends_with(".info.json") || lower.ends_with(".readability.json") {
        return "application/json".to_string();
    }

    if let Some((_, ext)) = lower.rsplit_once('.')
        && let Some((_, mimetype)) = EXTENSION_OVERRIDES.iter().find(|(known, _)| *known == ext)
    {
        return (*mimetype).to_string();
    }

    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn category(mimetype: &str) -> MimeCategory {
    if mimetype.starts_with("video/") {
        MimeCategory::Video
    } else if EBOOK_TYPES.contains(&mimetype) {
        MimeCategory::Ebook
    } else if mimetype == "application/x-openzim" {
        MimeCategory::Zim
    } else if mimetype == "text/html" {
        MimeCategory::HtmlArchive
    } else if mimetype.starts_with("audio/") {
        MimeCategory::Audio
    } else if mimetype.starts_with("image/") {
        MimeCategory::Image
    } else if mimetype == "application/json" {
        MimeCategory::Json
    } else if mimetype.starts_with("text/") {
        MimeCategory::Text
    } else {
        MimeCategory::Other
    }
}
