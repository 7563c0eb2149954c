//! File-name stems: the grouping key shared by a primary file and its sidecars.
//!
//! `clip.mp4`, `clip.info.json`, and `clip.en.vtt` all share the stem `clip`
//! and therefore belong to the same file group.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Multi-part suffixes that must be split off whole.
const COMPOUND_SUFFIXES: &[&str] = &[
    ".info.json",
    ".readability.json",
    ".readability.txt",
    ".readability.html",
    ".tar.gz",
    ".tar.bz2",
    ".tar.xz",
    ".tar.zst",
];

// Caption sidecars carry a language code before the extension, e.g.
// `.en.vtt` or `.pt-BR.srt`.
static CAPTION_SUFFIX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\.[a-z]{2}(?:[-_][a-z]{2,4})?\.(?:vtt|srt|ass|ssa)$").ok());

/// Key identifying one file group: parent directory plus stem.
pub type GroupKey = (PathBuf, String);

/// Split a bare file name into `(stem, suffix)`.
///
/// Compound suffixes and language-tagged captions are recognized first; any
/// other name splits at its final dot. Names without a usable dot (including
/// dotfiles like `.hidden`) have an empty suffix.
pub fn split_stem_and_suffix(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    for suffix in COMPOUND_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            let at = name.len() - suffix.len();
            return name.split_at(at);
        }
    }

    if let Some(pattern) = CAPTION_SUFFIX.as_ref()
        && let Some(found) = pattern.find(name)
        && found.start() > 0
    {
        return name.split_at(found.start());
    }

    match name.rfind('.') {
        Some(at) if at > 0 => name.split_at(at),
        _ => (name, ""),
    }
}

/// Stem of the file name of `path`, if the path has a UTF-8 file name.
pub fn stem_of(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    Some(split_stem_and_suffix(name).0)
}

/// Grouping key for `path`: its parent directory and stem.
pub fn group_key(path: &Path) -> Option<GroupKey> {
    let parent = path.parent()?;
    let stem = stem_of(path)?;
    Some((parent.to_path_buf(), stem.to_string()))
}

/// Replace the stem of `name` while keeping its suffix.
pub fn with_stem(name: &str, new_stem: &str) -> String {
    let (_, suffix) = split_stem_and_suffix(name);
    format!("{new_stem}{suffix}")
}

/// Group absolute file paths by `(directory, stem)`.
///
/// Paths without a parent or a UTF-8 file name are skipped. Members within a
/// group are sorted by name.
pub fn group_files_by_stem<I, P>(paths: I) -> BTreeMap<GroupKey, Vec<PathBuf>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut groups: BTreeMap<GroupKey, Vec<PathBuf>> = BTreeMap::new();
    for path in paths {
        let path = path.as_ref();
        if let Some(key) = group_key(path) {
            groups.entry(key).or_default().push(path.to_path_buf());
        }
    }
    for members in groups.values_mut() {
        members.sort();
        members.dedup();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_final_dot() {
        assert_eq!(split_stem_and_suffix("clip.mp4"), ("clip", ".mp4"));
        assert_eq!(split_stem_and_suffix("my.clip.mp4"), ("my.clip", ".mp4"));
        assert_eq!(split_stem_and_suffix("README"), ("README", ""));
        assert_eq!(split_stem_and_suffix(".hidden"), (".hidden", ""));
    }

    #[test]
    fn compound_suffixes_split_whole() {
        assert_eq!(split_stem_and_suffix("clip.info.json"), ("clip", ".info.json"));
        assert_eq!(
            split_stem_and_suffix("page.readability.json"),
            ("page", ".readability.json")
        );
        assert_eq!(split_stem_and_suffix("backup.tar.gz"), ("backup", ".tar.gz"));
        assert_eq!(split_stem_and_suffix("CLIP.INFO.JSON"), ("CLIP", ".INFO.JSON"));
    }

    #[test]
    fn caption_language_codes_stay_in_suffix() {
        assert_eq!(split_stem_and_suffix("clip.en.vtt"), ("clip", ".en.vtt"));
        assert_eq!(split_stem_and_suffix("clip.pt-BR.srt"), ("clip", ".pt-BR.srt"));
        assert_eq!(split_stem_and_suffix("clip.vtt"), ("clip", ".vtt"));
        assert_eq!(split_stem_and_suffix("S01.E02.vtt"), ("S01.E02", ".vtt"));
    }

    #[test]
    fn with_stem_keeps_suffix() {
        assert_eq!(with_stem("clip.en.vtt", "renamed"), "renamed.en.vtt");
        assert_eq!(with_stem("clip.info.json", "renamed"), "renamed.info.json");
    }

    #[test]
    fn groups_sidecars_with_primary() {
        let groups = group_files_by_stem([
            "/m/v/clip.mp4",
            "/m/v/clip.info.json",
            "/m/v/clip.en.vtt",
            "/m/v/other.mp4",
            "/m/w/clip.mp4",
        ]);

        assert_eq!(groups.len(), 3);
        let clip = &groups[&(PathBuf::from("/m/v"), "clip".to_string())];
        assert_eq!(
            clip,
            &vec![
                PathBuf::from("/m/v/clip.en.vtt"),
                PathBuf::from("/m/v/clip.info.json"),
                PathBuf::from("/m/v/clip.mp4"),
            ]
        );
    }
}
