mod support;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use hoard_core::HoardError;
use hoard_core::Refresher;
use hoard_core::database::file_groups;
use hoard_core::moves::move_paths;
use support::Library;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn second_refresh_over_unchanged_tree_is_clean() {
    let lib = Library::new().await;
    lib.write("shows/pilot.mp4", "video");
    lib.write("shows/pilot.en.srt", "captions");
    lib.write("books/novel.epub", "book");
    lib.write("notes.txt", "text");

    let first = lib.refresh(&[]).await;
    assert_eq!(first.new, 3);
    assert_eq!(first.deleted, 0);

    let second = lib.refresh(&[]).await;
    assert_eq!(second.new, 0);
    assert_eq!(second.modified, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.unchanged, 3);
}

#[tokio::test]
async fn related_files_share_one_group_with_the_video_as_primary() {
    let lib = Library::new().await;
    lib.write("shows/pilot.mp4", "video");
    lib.write("shows/pilot.en.srt", "captions");
    lib.write("shows/pilot.info.json", "{}");
    lib.write("shows/pilot.jpg", "poster");

    lib.refresh(&[]).await;

    let mut conn = lib.ctx.pool.acquire().await.unwrap();
    let group = file_groups::fetch_by_primary_path(&mut conn, &lib.path("shows/pilot.mp4"))
        .await
        .unwrap()
        .expect("pilot group");
    assert_eq!(group.files.len(), 4);
    assert_eq!(group.mimetype.as_deref(), Some("video/mp4"));
    assert_eq!(group.model.as_deref(), Some("video"));
    assert!(group.indexed);
    assert!(group.deep_indexed);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM video").await, 1);
}

#[tokio::test]
async fn files_moved_outside_the_engine_are_reconciled() {
    let lib = Library::new().await;
    for n in 1..=4 {
        lib.write(&format!("source/video{n}.mp4"), "video");
    }
    std::fs::create_dir_all(lib.path("dest")).unwrap();
    lib.refresh(&[]).await;
    assert_eq!(lib.primaries().await.len(), 4);

    for n in 1..=2 {
        std::fs::rename(
            lib.path(&format!("source/video{n}.mp4")),
            lib.path(&format!("dest/video{n}.mp4")),
        )
        .unwrap();
    }

    lib.refresh(&["source", "dest"]).await;
    assert_eq!(
        lib.primaries().await,
        vec![
            "dest/video1.mp4",
            "dest/video2.mp4",
            "source/video3.mp4",
            "source/video4.mp4",
        ]
    );
}

#[tokio::test]
async fn stale_pointer_is_replaced_by_the_group_where_the_file_is() {
    let lib = Library::new().await;
    lib.write("old/clip.mp4", "video");
    std::fs::create_dir_all(lib.path("new")).unwrap();
    lib.refresh(&[]).await;

    std::fs::rename(lib.path("old/clip.mp4"), lib.path("new/clip.mp4")).unwrap();
    lib.refresh(&[]).await;

    assert_eq!(lib.primaries().await, vec!["new/clip.mp4"]);
}

#[tokio::test]
async fn replaced_content_is_detected_by_modification_time() {
    let lib = Library::new().await;
    let clip = lib.write("clip.mp4", "video");
    lib.refresh(&[]).await;

    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(120);
    std::fs::File::options()
        .write(true)
        .open(&clip)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let summary = lib.refresh(&[]).await;
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.new, 0);
}

#[tokio::test]
async fn losing_the_primary_keeps_the_group_identity() {
    let lib = Library::new().await;
    lib.write("shows/pilot.mp4", "video");
    lib.write("shows/pilot.jpg", "poster");
    lib.refresh(&[]).await;
    let before = lib.groups_by_primary().await;
    assert_eq!(before.len(), 1);

    std::fs::remove_file(lib.path("shows/pilot.mp4")).unwrap();
    let summary = lib.refresh(&[]).await;
    assert_eq!(summary.modified, 1);

    let after = lib.groups_by_primary().await;
    assert_eq!(after, vec![(before[0].0, "shows/pilot.jpg".to_string())]);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM video").await, 0);
}

#[tokio::test]
async fn deleted_groups_leave_their_url_on_the_skip_list() {
    let lib = Library::new().await;
    lib.write("downloads/talk.mp4", "video");
    lib.refresh(&[]).await;
    sqlx::query("UPDATE file_group SET url = 'https://example.com/talk'")
        .execute(&lib.ctx.pool)
        .await
        .unwrap();

    std::fs::remove_file(lib.path("downloads/talk.mp4")).unwrap();
    let summary = lib.refresh(&["downloads"]).await;
    assert_eq!(summary.deleted, 1);
    assert!(lib.primaries().await.is_empty());
    assert_eq!(
        lib.scalar("SELECT COUNT(*) FROM download_skip_list WHERE url = 'https://example.com/talk'")
            .await,
        1
    );
}

#[tokio::test]
async fn hidden_and_ignored_entries_are_not_cataloged() {
    let lib = Library::with_config(|config| {
        config.ignored_directories = vec![PathBuf::from("cache")];
    })
    .await;
    lib.write("visible.mp4", "video");
    lib.write(".hidden.mp4", "video");
    lib.write(".trash/old.mp4", "video");
    lib.write("cache/thumb.jpg", "image");

    lib.refresh(&[]).await;
    assert_eq!(lib.primaries().await, vec!["visible.mp4"]);
}

#[tokio::test]
async fn directory_rows_follow_the_tree() {
    let lib = Library::new().await;
    lib.write("a/b/c/file.txt", "x");
    lib.refresh(&[]).await;
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM directory").await, 3);

    std::fs::remove_dir_all(lib.path("a/b")).unwrap();
    let summary = lib.refresh(&["a"]).await;
    assert_eq!(summary.directories_removed, 2);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM directory").await, 1);
}

#[tokio::test]
async fn refreshing_a_missing_directory_sees_no_files() {
    let lib = Library::new().await;
    lib.write("present.txt", "x");

    let summary = lib.refresh(&["does-not-exist"]).await;
    assert_eq!(summary.files_seen, 0);
    assert_eq!(summary.new, 0);
}

#[tokio::test]
async fn global_refresh_refuses_an_empty_media_root() {
    let lib = Library::new().await;
    lib.write(".DS_Store", "junk");

    let err = Refresher::new(&lib.ctx)
        .refresh(&[], &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, HoardError::MediaRootUnavailable(_)));
}

#[tokio::test]
async fn paths_outside_the_media_root_are_rejected() {
    let lib = Library::new().await;
    let err = Refresher::new(&lib.ctx)
        .refresh(&[PathBuf::from("/etc")], &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, HoardError::OutsideMediaRoot(_)));
}

#[tokio::test]
async fn refreshing_known_files_skips_the_directory_walk() {
    let lib = Library::new().await;
    lib.write("uploads/song.mp3", "audio");
    lib.write("uploads/song.jpg", "cover");
    lib.write("uploads/other.mp3", "audio");

    let summary = Refresher::new(&lib.ctx)
        .refresh_files(&[lib.path("uploads/song.mp3")], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(summary.files_seen, 2);
    assert_eq!(lib.primaries().await, vec!["uploads/song.mp3"]);
}

#[tokio::test]
async fn cancelled_refresh_reports_cancellation() {
    let lib = Library::new().await;
    lib.write("a.txt", "x");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Refresher::new(&lib.ctx)
        .refresh(&[], &cancel, |_| {})
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn duplicate_groups_from_a_move_collapse_into_one() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    lib.refresh(&[]).await;
    lib.write("b/clip.mkv", "other cut");
    lib.refresh(&[]).await;
    let before = lib.groups_by_primary().await;
    assert_eq!(before.len(), 2);

    move_paths(
        &lib.ctx,
        &[lib.path("a/clip.mp4")],
        &lib.path("b"),
        &CancellationToken::new(),
        |_, _| {},
    )
    .await
    .unwrap();

    lib.refresh(&[]).await;
    let settled = lib.refresh(&[]).await;
    assert_eq!(settled.new + settled.modified + settled.deleted, 0);

    let after = lib.groups_by_primary().await;
    assert_eq!(after.len(), 1);
    assert!(before.iter().any(|(id, _)| *id == after[0].0));
    let mut conn = lib.ctx.pool.acquire().await.unwrap();
    let group = file_groups::fetch_by_primary_path(&mut conn, &lib.path(&after[0].1))
        .await
        .unwrap()
        .expect("surviving group");
    assert_eq!(group.files.len(), 2);
}

#[tokio::test]
async fn files_that_cannot_be_stat_are_skipped() {
    let scripts = tempfile::tempdir().unwrap();
    let lister = scripts.path().join("lister.sh");
    std::fs::write(
        &lister,
        "#!/bin/sh\nfind \"$@\"\ncase \"$*\" in *\"-type f\"*) printf '%s/plain.txt/ghost\\0' \"$1\";; esac\n",
    )
    .unwrap();
    std::fs::set_permissions(&lister, std::fs::Permissions::from_mode(0o755)).unwrap();

    let lib = Library::with_config(|config| {
        config.lister_program = lister.to_string_lossy().into_owned();
    })
    .await;
    lib.write("plain.txt", "text");
    lib.write("shows/pilot.mp4", "video");

    let summary = lib.refresh(&[]).await;
    assert_eq!(summary.new, 2);
    assert_eq!(lib.primaries().await, vec!["plain.txt", "shows/pilot.mp4"]);
}

#[tokio::test]
async fn every_refresh_stamps_unchanged_groups_too() {
    let lib = Library::new().await;
    lib.write("a.mp4", "video");
    lib.write("b.mp4", "video");
    lib.refresh(&[]).await;
    lib.write("c.mp4", "video");

    let summary = lib.refresh(&[]).await;
    assert_eq!(summary.new, 1);
    assert_eq!(summary.mutation.stamped, 2);
    assert_eq!(lib.scalar("SELECT COUNT(DISTINCT idempotency) FROM file_group").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM file_group WHERE idempotency IS NULL").await, 0);
}
