use std::path::{Component, Path, PathBuf};

use crate::error::{HoardError, Result};

/// The absolute directory every cataloged path lives under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute, lexically normalized form of `path`. Relative paths are
    /// taken relative to the media root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Resolve `path` and reject anything that escapes the media root.
    pub fn ensure_within(&self, path: &Path) -> Result<PathBuf> {
        let resolved = self.resolve(path);
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(HoardError::OutsideMediaRoot(resolved))
        }
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Text form used for every path stored in the catalog.
pub fn path_to_db(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `LIKE` pattern matching every path strictly beneath `dir`. Pair with
/// `ESCAPE '\'`.
pub fn like_descendants(dir: &Path) -> String {
    let mut escaped = String::new();
    for ch in path_to_db(dir).chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    if !escaped.ends_with('/') {
        escaped.push('/');
    }
    escaped.push('%');
    escaped
}

/// True when any component of `path` below `base` starts with a dot.
pub fn is_hidden_below(path: &Path, base: &Path) -> bool {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_under_root() {
        let root = MediaRoot::new("/media/hoard");
        assert_eq!(
            root.resolve(Path::new("videos/./clip.mp4")),
            PathBuf::from("/media/hoard/videos/clip.mp4")
        );
        assert_eq!(
            root.resolve(Path::new("/media/hoard/a/../b")),
            PathBuf::from("/media/hoard/b")
        );
    }

    #[test]
    fn rejects_escapes() {
        let root = MediaRoot::new("/media/hoard");
        assert!(matches!(
            root.ensure_within(Path::new("../etc/passwd")),
            Err(HoardError::OutsideMediaRoot(_))
        ));
        assert!(root.ensure_within(Path::new("/media/hoarder")).is_err());
        assert!(root.ensure_within(Path::new("/media/hoard")).is_ok());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_descendants(Path::new("/m/50%_off")), "/m/50\\%\\_off/%");
        assert_eq!(like_descendants(Path::new("/m/v")), "/m/v/%");
    }

    #[test]
    fn hidden_detection_is_relative_to_base() {
        let base = Path::new("/home/user/.media");
        assert!(!is_hidden_below(Path::new("/home/user/.media/a/b.mp4"), base));
        assert!(is_hidden_below(Path::new("/home/user/.media/.cache/b.mp4"), base));
        assert!(is_hidden_below(Path::new("/home/user/.media/a/.b.mp4"), base));
    }
}
