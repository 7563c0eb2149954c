mod support;

use hoard_core::moves::{MoveExecutor, MovePlanner, move_paths, rename_path};
use hoard_core::{EngineEvent, HoardError};
use support::Library;
use tokio_util::sync::CancellationToken;

async fn library_with_videos(count: usize) -> Library {
    let lib = Library::new().await;
    for n in 0..count {
        lib.write(&format!("incoming/clip{n:03}.mp4"), "video");
    }
    lib.refresh(&[]).await;
    lib
}

fn all_relative(lib: &Library, dir: &str) -> Vec<String> {
    let mut files: Vec<String> = walk(&lib.path(dir))
        .into_iter()
        .map(|path| support::relative(&lib.root, &path))
        .collect();
    files.sort();
    files
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walk(&path));
        } else {
            found.push(path);
        }
    }
    found
}

#[tokio::test]
async fn moving_a_file_takes_its_siblings_along() {
    let lib = Library::new().await;
    lib.write("shows/pilot.mp4", "video");
    lib.write("shows/pilot.en.srt", "captions");
    lib.write("shows/other.mp4", "video");
    std::fs::create_dir_all(lib.path("archive")).unwrap();
    lib.refresh(&[]).await;
    let before = lib.groups_by_primary().await;

    let outcome = move_paths(
        &lib.ctx,
        &[lib.path("shows/pilot.mp4")],
        &lib.path("archive"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert_eq!(outcome.moved_files, 2);
    assert!(lib.exists("archive/pilot.mp4"));
    assert!(lib.exists("archive/pilot.en.srt"));
    assert!(lib.exists("shows/other.mp4"));

    let pilot_id = before
        .iter()
        .find(|(_, primary)| primary == "shows/pilot.mp4")
        .map(|(id, _)| *id)
        .unwrap();
    let after = lib.groups_by_primary().await;
    assert!(after.contains(&(pilot_id, "archive/pilot.mp4".to_string())));
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn moving_a_directory_relocates_everything_beneath_it() {
    let lib = Library::new().await;
    lib.write("show/s01/e01.mp4", "video");
    lib.write("show/s01/e02.mp4", "video");
    lib.write("show/s02/e01.mp4", "video");
    lib.write("show/.notes", "uncataloged");
    lib.refresh(&[]).await;

    move_paths(
        &lib.ctx,
        &[lib.path("show")],
        &lib.path("library/tv"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert!(!lib.exists("show"));
    assert!(lib.exists("library/tv/show/.notes"));
    assert_eq!(
        lib.primaries().await,
        vec![
            "library/tv/show/s01/e01.mp4",
            "library/tv/show/s01/e02.mp4",
            "library/tv/show/s02/e01.mp4",
        ]
    );

    // Nothing left pointing at a path that no longer exists.
    let summary = lib.refresh(&[]).await;
    assert_eq!(summary.new + summary.modified + summary.deleted, 0);
}

#[tokio::test]
async fn chunked_move_matches_single_chunk_move() {
    let chunked = library_with_videos(150).await;
    let single = library_with_videos(150).await;

    let mut progress = Vec::new();
    let plan = MovePlanner::new(&chunked.ctx)
        .plan_move(&[chunked.path("incoming")], &chunked.path("done"))
        .await
        .unwrap();
    let outcome = MoveExecutor::new(&chunked.ctx)
        .with_chunk_size(40)
        .execute(&plan, &CancellationToken::new(), |done, total| {
            progress.push((done, total))
        })
        .await
        .unwrap();
    assert_eq!(outcome.chunks, 4);
    assert_eq!(outcome.moved_files, 150);
    assert_eq!(progress.last(), Some(&(150, 150)));

    let plan = MovePlanner::new(&single.ctx)
        .plan_move(&[single.path("incoming")], &single.path("done"))
        .await
        .unwrap();
    let outcome = MoveExecutor::new(&single.ctx)
        .with_chunk_size(150)
        .execute(&plan, &CancellationToken::new(), |_, _| {})
        .await
        .unwrap();
    assert_eq!(outcome.chunks, 1);

    assert_eq!(chunked.groups_by_primary().await, single.groups_by_primary().await);
    assert_eq!(all_relative(&chunked, "done"), all_relative(&single, "done"));
}

#[tokio::test]
async fn cancelled_move_rolls_back_files_and_catalog() {
    let lib = library_with_videos(100).await;
    let before_groups = lib.groups_by_primary().await;
    let before_files = all_relative(&lib, "incoming");
    let mut events = lib.events.subscribe();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let plan = MovePlanner::new(&lib.ctx)
        .plan_move(&[lib.path("incoming")], &lib.path("archive"))
        .await
        .unwrap();
    let err = MoveExecutor::new(&lib.ctx)
        .with_chunk_size(25)
        .execute(&plan, &cancel, move |done, _| {
            if done >= 25 {
                trigger.cancel();
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(all_relative(&lib, "incoming"), before_files);
    assert_eq!(lib.groups_by_primary().await, before_groups);
    assert!(!lib.exists("archive"));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::MoveFailed { .. } = event {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn existing_destination_rejects_the_whole_plan() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    lib.write("a/extra.mp4", "video");
    lib.write("b/clip.mp4", "other video");
    lib.refresh(&[]).await;

    let err = move_paths(
        &lib.ctx,
        &[lib.path("a/extra.mp4"), lib.path("a/clip.mp4")],
        &lib.path("b"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HoardError::DestinationExists(_)));
    assert!(lib.exists("a/extra.mp4"));
    assert!(lib.exists("a/clip.mp4"));
    assert_eq!(std::fs::read_to_string(lib.path("b/clip.mp4")).unwrap(), "other video");
}

#[tokio::test]
async fn already_moved_sources_only_rewrite_the_catalog() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    std::fs::create_dir_all(lib.path("b")).unwrap();
    lib.refresh(&[]).await;
    let id = lib.groups_by_primary().await[0].0;

    std::fs::rename(lib.path("a/clip.mp4"), lib.path("b/clip.mp4")).unwrap();

    move_paths(
        &lib.ctx,
        &[lib.path("a/clip.mp4")],
        &lib.path("b"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert_eq!(lib.groups_by_primary().await, vec![(id, "b/clip.mp4".to_string())]);
}

#[tokio::test]
async fn orphan_at_the_target_is_removed_before_the_move() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    lib.write("b/clip.mp4", "stale");
    lib.refresh(&[]).await;
    let moving_id = lib
        .groups_by_primary()
        .await
        .into_iter()
        .find(|(_, primary)| primary == "a/clip.mp4")
        .map(|(id, _)| id)
        .unwrap();

    // The catalog still believes b/clip.mp4 exists.
    std::fs::remove_file(lib.path("b/clip.mp4")).unwrap();

    let outcome = move_paths(
        &lib.ctx,
        &[lib.path("a/clip.mp4")],
        &lib.path("b"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert_eq!(outcome.orphans_deleted, 1);
    assert_eq!(lib.groups_by_primary().await, vec![(moving_id, "b/clip.mp4".to_string())]);
}

#[tokio::test]
async fn moving_a_directory_into_itself_is_rejected() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    lib.refresh(&[]).await;

    let err = MovePlanner::new(&lib.ctx)
        .plan_move(&[lib.path("a")], &lib.path("a/inner"))
        .await
        .unwrap_err();
    assert!(matches!(err, HoardError::InvalidTask(_)));
}

#[tokio::test]
async fn missing_uncataloged_source_is_reported() {
    let lib = Library::new().await;
    std::fs::create_dir_all(lib.path("b")).unwrap();

    let err = MovePlanner::new(&lib.ctx)
        .plan_move(&[lib.path("a/ghost.mp4")], &lib.path("b"))
        .await
        .unwrap_err();
    assert!(matches!(err, HoardError::SourceMissing(_)));
}

#[tokio::test]
async fn rename_changes_every_member_of_the_group() {
    let lib = Library::new().await;
    lib.write("shows/draft.mp4", "video");
    lib.write("shows/draft.en.vtt", "captions");
    lib.write("shows/draft.info.json", "{}");
    lib.refresh(&[]).await;
    let id = lib.groups_by_primary().await[0].0;

    rename_path(
        &lib.ctx,
        &lib.path("shows/draft.mp4"),
        "final.mp4",
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert!(lib.exists("shows/final.mp4"));
    assert!(lib.exists("shows/final.en.vtt"));
    assert!(lib.exists("shows/final.info.json"));
    assert!(!lib.exists("shows/draft.mp4"));
    assert_eq!(lib.groups_by_primary().await, vec![(id, "shows/final.mp4".to_string())]);
}

#[tokio::test]
async fn renaming_a_directory_moves_its_groups() {
    let lib = Library::new().await;
    lib.write("Sesaon 1/e01.mp4", "video");
    lib.refresh(&[]).await;

    rename_path(
        &lib.ctx,
        &lib.path("Sesaon 1"),
        "Season 1",
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    assert!(!lib.exists("Sesaon 1"));
    assert_eq!(lib.primaries().await, vec!["Season 1/e01.mp4"]);
}

#[tokio::test]
async fn many_files_from_one_directory_keep_their_own_siblings() {
    let lib = Library::new().await;
    for n in 0..40 {
        lib.write(&format!("inbox/clip{n:02}.mp4"), "video");
        lib.write(&format!("inbox/clip{n:02}.en.srt"), "captions");
    }
    lib.write("inbox/clip.mp4", "stays");
    lib.refresh(&[]).await;

    let sources: Vec<_> = (0..40)
        .map(|n| lib.path(&format!("inbox/clip{n:02}.mp4")))
        .collect();
    let plan = MovePlanner::new(&lib.ctx)
        .plan_move(&sources, &lib.path("sorted"))
        .await
        .unwrap();
    assert_eq!(plan.len(), 80);
    assert_eq!(plan.relocations.len(), 40);

    MoveExecutor::new(&lib.ctx)
        .execute(&plan, &CancellationToken::new(), |_, _| {})
        .await
        .unwrap();
    assert_eq!(all_relative(&lib, "inbox"), vec!["inbox/clip.mp4"]);
    assert!(lib.exists("sorted/clip07.en.srt"));
    assert_eq!(lib.primaries().await.len(), 41);
}

#[tokio::test]
async fn failed_rename_mid_move_rolls_back_files_and_catalog() {
    let lib = Library::new().await;
    for season in ["s1", "s2"] {
        lib.write(&format!("incoming/{season}/e01.mp4"), "video");
        lib.write(&format!("incoming/{season}/e02.mp4"), "video");
    }
    lib.refresh(&[]).await;
    let before_groups = lib.groups_by_primary().await;
    let before_files = all_relative(&lib, "incoming");
    let mut events = lib.events.subscribe();

    let plan = MovePlanner::new(&lib.ctx)
        .plan_move(&[lib.path("incoming")], &lib.path("done"))
        .await
        .unwrap();
    // A plain file where the second season's directory belongs.
    lib.write("done/incoming/s2", "in the way");

    let err = MoveExecutor::new(&lib.ctx)
        .with_chunk_size(2)
        .execute(&plan, &CancellationToken::new(), |_, _| {})
        .await
        .unwrap_err();

    assert!(!err.is_cancelled());
    assert_eq!(all_relative(&lib, "incoming"), before_files);
    assert_eq!(lib.groups_by_primary().await, before_groups);
    assert!(!lib.exists("done/incoming/s1"));
    assert_eq!(all_relative(&lib, "done"), vec!["done/incoming/s2"]);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::MoveFailed { .. } = event {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}
