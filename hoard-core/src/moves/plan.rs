use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use hoard_model::{FileGroup, FileGroupFile};
use tracing::debug;

use crate::context::EngineContext;
use crate::database::file_groups;
use crate::error::{HoardError, Result};
use crate::scanner::EntryKind;
use crate::stem::{GroupKey, group_files_by_stem, group_key, split_stem_and_suffix, with_stem};

/// One file relocation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoveEntry {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Catalog rewrite for one file group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRelocation {
    pub file_group_id: i64,
    pub from_primary: PathBuf,
    pub to_primary: PathBuf,
    pub from_directory: PathBuf,
    pub to_directory: PathBuf,
    pub from_files: Vec<FileGroupFile>,
    /// Differs from `from_files` only for renames.
    pub to_files: Vec<FileGroupFile>,
}

impl GroupRelocation {
    pub fn renames_members(&self) -> bool {
        self.from_files != self.to_files
    }
}

/// Everything a move or rename will do, computed before any file is touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MovePlan {
    /// Directory receiving the sources. For a rename, the source's parent.
    pub destination: PathBuf,
    /// Directory sources paired with their new location.
    pub directories: Vec<(PathBuf, PathBuf)>,
    pub file_sources: Vec<PathBuf>,
    pub entries: Vec<MoveEntry>,
    pub relocations: Vec<GroupRelocation>,
}

impl MovePlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.relocations.is_empty()
    }

    /// Old path to new path for every planned file.
    pub fn mapping(&self) -> BTreeMap<PathBuf, PathBuf> {
        self.entries
            .iter()
            .map(|entry| (entry.from.clone(), entry.to.clone()))
            .collect()
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') => Ok(name),
        _ => Err(HoardError::InvalidTask(format!("invalid name: {name:?}"))),
    }
}

/// Builds [`MovePlan`]s with a bounded number of catalog queries.
#[derive(Debug)]
pub struct MovePlanner<'a> {
    ctx: &'a EngineContext,
}

impl<'a> MovePlanner<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Plan moving `sources` into the directory `destination`.
    pub async fn plan_move(&self, sources: &[PathBuf], destination: &Path) -> Result<MovePlan> {
        let destination = self.ctx.media_root.ensure_within(destination)?;
        if let Ok(metadata) = tokio::fs::metadata(&destination).await
            && !metadata.is_dir()
        {
            return Err(HoardError::InvalidTask(format!(
                "destination is not a directory: {}",
                destination.display()
            )));
        }
        self.build(destination, sources, None).await
    }

    /// Plan renaming one file group or directory in place.
    pub async fn plan_rename(&self, path: &Path, new_name: &str) -> Result<MovePlan> {
        let new_name = validate_name(new_name)?;
        let path = self.ctx.media_root.ensure_within(path)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| HoardError::InvalidTask(format!("cannot rename {}", path.display())))?;
        self.build(parent, &[path], Some(new_name)).await
    }

    async fn build(
        &self,
        destination: PathBuf,
        sources: &[PathBuf],
        rename: Option<&str>,
    ) -> Result<MovePlan> {
        if sources.is_empty() {
            return Err(HoardError::InvalidTask("no sources to move".into()));
        }

        let mut dir_candidates = Vec::new();
        let mut file_sources = Vec::new();
        let mut missing = Vec::new();
        for source in sources {
            let source = self.ctx.media_root.ensure_within(source)?;
            if self.ctx.media_root.is_root(&source) {
                return Err(HoardError::InvalidTask("cannot move the media root".into()));
            }
            match tokio::fs::metadata(&source).await {
                Ok(metadata) if metadata.is_dir() => dir_candidates.push(source),
                Ok(_) => file_sources.push(source),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => missing.push(source),
                Err(err) => return Err(err.into()),
            }
        }

        let mut conn = self.ctx.pool.acquire().await?;

        // Groups at or beneath anything that might be a directory.
        let lookup: Vec<PathBuf> = dir_candidates.iter().chain(missing.iter()).cloned().collect();
        let under = if lookup.is_empty() {
            Vec::new()
        } else {
            file_groups::fetch_under_any(&mut conn, &lookup).await?
        };

        let mut dir_sources = dir_candidates;
        for source in missing {
            if under.iter().any(|group| group.directory.starts_with(&source)) {
                dir_sources.push(source);
            } else {
                file_sources.push(source);
            }
        }

        for dir in &dir_sources {
            if destination.starts_with(dir) && rename.is_none() {
                return Err(HoardError::InvalidTask(format!(
                    "cannot move {} into itself",
                    dir.display()
                )));
            }
        }

        // Groups sharing a stem with any file source.
        let parents: Vec<PathBuf> = file_sources
            .iter()
            .filter_map(|source| source.parent().map(Path::to_path_buf))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let siblings = if parents.is_empty() {
            Vec::new()
        } else {
            file_groups::fetch_in_directories(&mut conn, &parents).await?
        };
        drop(conn);
        let on_disk = list_by_stem(&parents).await?;

        let mut entries: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        let mut relocations = Vec::new();
        let mut directories = Vec::new();

        for source in &dir_sources {
            let target = match (rename, source.file_name()) {
                (Some(name), _) => destination.join(name),
                (None, Some(name)) => destination.join(name),
                (None, None) => {
                    return Err(HoardError::InvalidTask(format!(
                        "cannot move {}",
                        source.display()
                    )));
                }
            };
            self.plan_directory(source, &target, &under, &mut entries, &mut relocations)
                .await?;
            directories.push((source.clone(), target));
        }

        for source in &file_sources {
            plan_file(
                source,
                &destination,
                rename,
                &on_disk,
                &siblings,
                &mut entries,
                &mut relocations,
            )?;
        }

        entries.retain(|from, to| from != to);
        relocations.retain(|relocation: &GroupRelocation| {
            relocation.from_primary != relocation.to_primary
                || relocation.from_directory != relocation.to_directory
                || relocation.renames_members()
        });
        let mut seen_ids = HashSet::new();
        relocations.retain(|relocation| seen_ids.insert(relocation.file_group_id));

        let plan = MovePlan {
            destination,
            directories,
            file_sources,
            entries: entries
                .into_iter()
                .map(|(from, to)| MoveEntry { from, to })
                .collect(),
            relocations,
        };
        check_conflicts(&plan).await?;

        debug!(
            target: "files::move",
            destination = %plan.destination.display(),
            files = plan.entries.len(),
            groups = plan.relocations.len(),
            "move planned"
        );
        Ok(plan)
    }

    async fn plan_directory(
        &self,
        source: &Path,
        target: &Path,
        under: &[FileGroup],
        entries: &mut BTreeMap<PathBuf, PathBuf>,
        relocations: &mut Vec<GroupRelocation>,
    ) -> Result<()> {
        for group in under.iter().filter(|group| group.directory.starts_with(source)) {
            let Ok(relative) = group.directory.strip_prefix(source) else {
                continue;
            };
            let new_directory = target.join(relative);
            for name in group.file_names() {
                entries.insert(group.directory.join(&name), new_directory.join(&name));
            }
            if let Some(primary) = group.primary_name() {
                relocations.push(GroupRelocation {
                    file_group_id: group.id,
                    from_primary: group.primary_path.clone(),
                    to_primary: new_directory.join(primary),
                    from_directory: group.directory.clone(),
                    to_directory: new_directory,
                    from_files: group.files.clone(),
                    to_files: group.files.clone(),
                });
            }
        }

        // Uncataloged and hidden files travel with the directory too.
        let stream = self
            .ctx
            .scanner
            .stream_entries(vec![source.to_path_buf()], EntryKind::AllFiles);
        futures::pin_mut!(stream);
        while let Some(file) = stream.next().await {
            let file = file?;
            if let Ok(relative) = file.strip_prefix(source) {
                let to = target.join(relative);
                entries.entry(file).or_insert(to);
            }
        }
        Ok(())
    }
}

/// Regular files in each of `parents`, keyed by `(directory, stem)`. Each
/// directory is listed once however many sources it holds.
async fn list_by_stem(parents: &[PathBuf]) -> Result<BTreeMap<GroupKey, Vec<PathBuf>>> {
    let mut files = Vec::new();
    for parent in parents {
        let Ok(mut listing) = tokio::fs::read_dir(parent).await else {
            continue;
        };
        while let Some(entry) = listing.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
    }
    Ok(group_files_by_stem(files))
}

fn plan_file(
    source: &Path,
    destination: &Path,
    rename: Option<&str>,
    on_disk: &BTreeMap<GroupKey, Vec<PathBuf>>,
    siblings: &[FileGroup],
    entries: &mut BTreeMap<PathBuf, PathBuf>,
    relocations: &mut Vec<GroupRelocation>,
) -> Result<()> {
    let Some(key) = group_key(source) else {
        return Err(HoardError::InvalidTask(format!(
            "cannot move {}",
            source.display()
        )));
    };
    let new_stem = rename.map(|name| split_stem_and_suffix(name).0);
    let rename_member = |name: &str| match new_stem {
        Some(new_stem) => with_stem(name, new_stem),
        None => name.to_string(),
    };

    let mut found = false;
    for path in on_disk.get(&key).into_iter().flatten() {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        entries.insert(path.clone(), destination.join(rename_member(name)));
        found = true;
    }

    for group in siblings
        .iter()
        .filter(|group| group_key(&group.primary_path).as_ref() == Some(&key))
    {
        for name in group.file_names() {
            entries
                .entry(group.directory.join(&name))
                .or_insert_with(|| destination.join(rename_member(&name)));
        }
        if let Some(primary) = group.primary_name() {
            relocations.push(GroupRelocation {
                file_group_id: group.id,
                from_primary: group.primary_path.clone(),
                to_primary: destination.join(rename_member(primary)),
                from_directory: group.directory.clone(),
                to_directory: destination.to_path_buf(),
                from_files: group.files.clone(),
                to_files: group
                    .files
                    .iter()
                    .map(|file| FileGroupFile::new(rename_member(&file.path), file.mimetype.clone()))
                    .collect(),
            });
        }
        found = true;
    }

    if found {
        Ok(())
    } else {
        Err(HoardError::SourceMissing(source.to_path_buf()))
    }
}

/// Reject the plan if any target is occupied by something other than an
/// already-moved source, or two sources land on the same target.
async fn check_conflicts(plan: &MovePlan) -> Result<()> {
    let mut targets = HashSet::with_capacity(plan.entries.len());
    for entry in &plan.entries {
        if !targets.insert(entry.to.as_path()) {
            return Err(HoardError::DestinationExists(entry.to.clone()));
        }
        if tokio::fs::try_exists(&entry.to).await? && tokio::fs::try_exists(&entry.from).await? {
            return Err(HoardError::DestinationExists(entry.to.clone()));
        }
    }
    for (_, target) in &plan.directories {
        if let Ok(metadata) = tokio::fs::metadata(target).await
            && !metadata.is_dir()
        {
            return Err(HoardError::DestinationExists(target.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_must_be_single_components() {
        assert_eq!(validate_name(" new.mp4 ").unwrap(), "new.mp4");
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".").is_err());
    }

    #[test]
    fn mapping_reflects_entries() {
        let plan = MovePlan {
            entries: vec![MoveEntry {
                from: "/m/a/x.mp4".into(),
                to: "/m/b/x.mp4".into(),
            }],
            ..Default::default()
        };
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.mapping()[Path::new("/m/a/x.mp4")], PathBuf::from("/m/b/x.mp4"));
    }
}
