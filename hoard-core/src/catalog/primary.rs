use hoard_model::FileGroupFile;

use crate::mimetype::{MimeCategory, category};

/// Which member of a group acts as its primary file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimaryChoice {
    pub index: usize,
    pub category: MimeCategory,
    /// More than one member shares the winning category.
    pub ambiguous: bool,
}

/// Pick the primary file among `files`.
///
/// The most preferred category wins; within a category the first file in
/// slice order wins, so callers pass members sorted by name for a stable
/// choice. Returns `None` only for an empty slice.
pub fn select_primary(files: &[FileGroupFile]) -> Option<PrimaryChoice> {
    let best = files.iter().map(|file| category(&file.mimetype)).min()?;
    let mut matching = files
        .iter()
        .enumerate()
        .filter(|(_, file)| category(&file.mimetype) == best);

    let (index, _) = matching.next()?;
    Some(PrimaryChoice {
        index,
        category: best,
        ambiguous: matching.next().is_some(),
    })
}
