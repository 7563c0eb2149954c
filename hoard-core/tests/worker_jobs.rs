mod support;

use std::sync::Arc;
use std::time::Duration;

use hoard_core::hoard_model::{FileTask, JobStatus, TaskType, WorkerState};
use hoard_core::{FileWorker, HoardError, JobReport};
use support::Library;

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn directory_refresh_counts_then_refreshes() {
    let lib = Library::new().await;
    lib.write("shows/a.mp4", "video");
    lib.write("shows/b.mp4", "video");
    lib.write("shows/b.en.srt", "captions");
    let worker = FileWorker::new(lib.ctx.clone());

    let job = worker.queue_refresh(vec![lib.path("shows")]).unwrap();
    assert_eq!(worker.get_job_status(job), Some(JobStatus::Pending));

    let report = worker.wait_for_job(job, WAIT).await.unwrap();
    let JobReport::Refreshed(summary) = report else {
        panic!("expected a refresh report, got {report:?}");
    };
    assert_eq!(summary.files_seen, 3);
    assert_eq!(summary.new, 2);
    assert_eq!(worker.get_job_status(job), Some(JobStatus::Complete));

    let status = worker.status();
    assert_eq!(status.status, WorkerState::Idle);
    assert_eq!(status.total, 0);
}

#[tokio::test]
async fn second_directory_refresh_is_told_already_running() {
    let lib = Library::new().await;
    lib.write("a.txt", "x");
    let worker = FileWorker::new(lib.ctx.clone());

    let first = worker.queue_refresh(Vec::new()).unwrap();
    let err = worker.queue_refresh(Vec::new()).unwrap_err();
    assert!(matches!(err, HoardError::AlreadyRunning("refresh")));

    worker.wait_for_job(first, WAIT).await.unwrap();
    let again = worker.queue_refresh(Vec::new()).unwrap();
    worker.wait_for_job(again, WAIT).await.unwrap();
}

#[tokio::test]
async fn second_move_is_told_already_running() {
    let lib = Library::new().await;
    lib.write("a/one.mp4", "video");
    lib.write("a/two.mp4", "video");
    lib.refresh(&[]).await;
    let worker = FileWorker::new(lib.ctx.clone());

    let first = worker
        .queue_move(lib.path("b"), vec![lib.path("a/one.mp4")])
        .unwrap();
    let err = worker
        .queue_move(lib.path("c"), vec![lib.path("a/two.mp4")])
        .unwrap_err();
    assert!(matches!(err, HoardError::AlreadyRunning("move")));

    let report = worker.wait_for_job(first, WAIT).await.unwrap();
    assert!(matches!(report, JobReport::Moved(outcome) if outcome.moved_files == 1));
    assert!(lib.exists("b/one.mp4"));
}

#[tokio::test]
async fn file_refresh_skips_counting_and_the_guard() {
    let lib = Library::new().await;
    lib.write("uploads/new.mp4", "video");
    let worker = FileWorker::new(lib.ctx.clone());

    let files = worker.queue_refresh(vec![lib.path("uploads/new.mp4")]).unwrap();
    // Plain file refreshes do not hold the directory-refresh guard.
    let dirs = worker.queue_refresh(vec![lib.path("uploads")]).unwrap();

    worker.wait_for_job(files, WAIT).await.unwrap();
    worker.wait_for_job(dirs, WAIT).await.unwrap();
    assert_eq!(lib.primaries().await, vec!["uploads/new.mp4"]);
}

#[tokio::test]
async fn failed_jobs_report_their_error() {
    let lib = Library::new().await;
    lib.write("a/clip.mp4", "video");
    lib.write("b/clip.mp4", "video");
    lib.refresh(&[]).await;
    let worker = FileWorker::new(lib.ctx.clone());

    let job = worker
        .queue_move(lib.path("b"), vec![lib.path("a/clip.mp4")])
        .unwrap();
    let err = worker.wait_for_job(job, WAIT).await.unwrap_err();
    assert!(matches!(err, HoardError::JobFailed(_)));
    assert!(worker.job_error(job).unwrap().contains("already exists"));
    assert!(worker.status().last_error.is_some());

    // The move guard is released once the job finishes.
    let retry = worker
        .queue_move(lib.path("c"), vec![lib.path("a/clip.mp4")])
        .unwrap();
    worker.wait_for_job(retry, WAIT).await.unwrap();
    assert!(lib.exists("c/clip.mp4"));
}

#[tokio::test]
async fn tagging_through_the_worker() {
    let lib = Library::new().await;
    lib.write("docs/one.pdf", "pdf");
    lib.write("docs/two.pdf", "pdf");
    lib.refresh(&[]).await;
    let worker = FileWorker::new(lib.ctx.clone());
    let mut events = lib.events.subscribe();

    let job = worker
        .queue_tag("reading".into(), vec![lib.path("docs")])
        .unwrap();
    let report = worker.wait_for_job(job, WAIT).await.unwrap();
    assert!(matches!(report, JobReport::Tagged(summary) if summary.groups == 2));
    assert_eq!(
        lib.scalar("SELECT COUNT(*) FROM tag_file JOIN tag ON tag.id = tag_file.tag_id WHERE tag.name = 'reading'")
            .await,
        2
    );
    assert!(matches!(
        events.try_recv(),
        Ok(hoard_core::EngineEvent::TagsChanged { tag: Some(tag) }) if tag == "reading"
    ));
}

#[tokio::test]
async fn renaming_through_the_worker() {
    let lib = Library::new().await;
    lib.write("a/old.mp4", "video");
    lib.refresh(&[]).await;
    let worker = FileWorker::new(lib.ctx.clone());

    let job = worker
        .queue_rename(lib.path("a/old.mp4"), "new.mp4".into())
        .unwrap();
    worker.wait_for_job(job, WAIT).await.unwrap();
    assert_eq!(lib.primaries().await, vec!["a/new.mp4"]);
}

#[tokio::test]
async fn handed_off_tasks_get_job_ids_and_run() {
    let lib = Library::new().await;
    lib.write("music/track.mp3", "audio");
    let worker = FileWorker::new(lib.ctx.clone());

    let job = worker
        .submit(FileTask::count_then_refresh(vec![lib.path("music")], None))
        .unwrap();
    let report = worker.wait_for_job(job, WAIT).await.unwrap();
    assert!(matches!(report, JobReport::Refreshed(summary) if summary.new == 1));
}

#[tokio::test]
async fn a_bare_count_reports_its_total() {
    let lib = Library::new().await;
    for n in 0..5 {
        lib.write(&format!("pile/{n}.txt"), "x");
    }
    let worker = FileWorker::new(lib.ctx.clone());

    let job = worker
        .submit(FileTask::new(TaskType::Count, vec![lib.path("pile")]))
        .unwrap();
    let report = worker.wait_for_job(job, WAIT).await.unwrap();
    assert_eq!(report, JobReport::Counted(5));
}

#[tokio::test]
async fn run_loop_processes_jobs_until_shutdown() {
    let lib = Library::new().await;
    lib.write("a.txt", "x");
    let worker = Arc::new(FileWorker::new(lib.ctx.clone()));
    let handle = tokio::spawn(worker.clone().run());

    let mut status = worker.subscribe_status();
    let job = worker.queue_refresh(Vec::new()).unwrap();
    tokio::time::timeout(WAIT, async {
        while worker.get_job_status(job) != Some(JobStatus::Complete) {
            let _ = tokio::time::timeout(Duration::from_millis(50), status.changed()).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(lib.primaries().await, vec!["a.txt"]);

    worker.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn waiting_on_an_unknown_job_fails_fast() {
    let lib = Library::new().await;
    let worker = FileWorker::new(lib.ctx.clone());
    let err = worker
        .wait_for_job(hoard_core::hoard_model::JobId::new(), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, HoardError::InvalidTask(_)));
}
