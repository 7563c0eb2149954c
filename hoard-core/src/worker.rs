//! The file worker: a single-lane executor for count, refresh, move, rename,
//! and tag tasks.
//!
//! Submissions arrive on a public hand-off channel and are transferred onto
//! a local LIFO stack, so a task that chains a follow-up (a count feeding its
//! refresh) runs that follow-up before older work. Only one task executes at
//! a time. At most one directory refresh and one move may be in flight; a
//! second request is rejected with [`HoardError::AlreadyRunning`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use hoard_model::{FileTask, JobId, JobStatus, TaskType, WorkerState, WorkerStatus};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{TagSummary, tag_paths};
use crate::context::EngineContext;
use crate::error::{HoardError, Result};
use crate::events::EngineEvent;
use crate::moves::{MoveOutcome, move_paths, rename_path};
use crate::refresh::{RefreshSummary, Refresher};

/// What a finished job produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobReport {
    Counted(u64),
    Refreshed(RefreshSummary),
    Moved(MoveOutcome),
    Tagged(TagSummary),
}

#[derive(Clone, Debug)]
enum JobFailure {
    Cancelled(String),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GuardKind {
    Refresh,
    Move,
}

#[derive(Debug)]
struct JobEntry {
    status: JobStatus,
    guard: Option<GuardKind>,
    report: Option<JobReport>,
    failure: Option<JobFailure>,
}

impl JobEntry {
    fn pending(guard: Option<GuardKind>) -> Self {
        Self {
            status: JobStatus::Pending,
            guard,
            report: None,
            failure: None,
        }
    }
}

enum Step {
    Chain(FileTask),
    Done(JobReport),
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct FileWorker {
    ctx: EngineContext,
    handoff_tx: mpsc::UnboundedSender<FileTask>,
    handoff_rx: StdMutex<mpsc::UnboundedReceiver<FileTask>>,
    local: StdMutex<Vec<FileTask>>,
    jobs: StdMutex<HashMap<JobId, JobEntry>>,
    status: watch::Sender<WorkerStatus>,
    execution: Mutex<()>,
    refresh_running: AtomicBool,
    move_running: AtomicBool,
    current: StdMutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    notify: Notify,
}

impl fmt::Debug for FileWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWorker")
            .field("media_root", &self.ctx.media_root)
            .field("local_queue", &lock(&self.local).len())
            .field("jobs", &lock(&self.jobs).len())
            .field("refresh_running", &self.refresh_running.load(Ordering::Relaxed))
            .field("move_running", &self.move_running.load(Ordering::Relaxed))
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl FileWorker {
    pub fn new(ctx: EngineContext) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(WorkerStatus::default());
        Self {
            ctx,
            handoff_tx,
            handoff_rx: StdMutex::new(handoff_rx),
            local: StdMutex::new(Vec::new()),
            jobs: StdMutex::new(HashMap::new()),
            status,
            execution: Mutex::new(()),
            refresh_running: AtomicBool::new(false),
            move_running: AtomicBool::new(false),
            current: StdMutex::new(None),
            shutdown: CancellationToken::new(),
            notify: Notify::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Sender for the public hand-off queue. Tasks sent here without a job id
    /// are assigned one on transfer.
    pub fn handoff(&self) -> mpsc::UnboundedSender<FileTask> {
        self.handoff_tx.clone()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Refresh `paths`, or the whole media root when empty. Directory
    /// refreshes are counted first; a list of plain files skips counting.
    pub fn queue_refresh(&self, paths: Vec<PathBuf>) -> Result<JobId> {
        let resolved = self.resolve_all(&paths)?;

        let global = resolved.is_empty() || resolved.iter().any(|p| self.ctx.media_root.is_root(p));
        let all_files = !global && resolved.iter().all(|p| looks_like_file(p));

        let job_id = JobId::new();
        if all_files {
            self.enqueue(
                FileTask {
                    job_id: Some(job_id),
                    ..FileTask::new(TaskType::Refresh, resolved)
                },
                None,
            );
            return Ok(job_id);
        }

        let roots = if global {
            vec![self.ctx.media_root.path().to_path_buf()]
        } else {
            directory_roots(resolved)
        };
        self.acquire(GuardKind::Refresh)?;
        self.enqueue(FileTask::count_then_refresh(roots, Some(job_id)), Some(GuardKind::Refresh));
        Ok(job_id)
    }

    pub fn queue_move(&self, destination: PathBuf, sources: Vec<PathBuf>) -> Result<JobId> {
        if sources.is_empty() {
            return Err(HoardError::InvalidTask("no sources to move".into()));
        }
        let destination = self.ctx.media_root.ensure_within(&destination)?;
        let job_id = JobId::new();
        self.acquire(GuardKind::Move)?;
        self.enqueue(
            FileTask::moving(destination, sources, Some(job_id)),
            Some(GuardKind::Move),
        );
        Ok(job_id)
    }

    pub fn queue_rename(&self, path: PathBuf, new_name: String) -> Result<JobId> {
        let path = self.ctx.media_root.ensure_within(&path)?;
        let job_id = JobId::new();
        self.acquire(GuardKind::Move)?;
        self.enqueue(
            FileTask::renaming(path, new_name, Some(job_id)),
            Some(GuardKind::Move),
        );
        Ok(job_id)
    }

    pub fn queue_tag(&self, tag_name: String, paths: Vec<PathBuf>) -> Result<JobId> {
        if tag_name.trim().is_empty() {
            return Err(HoardError::InvalidTask("tag name is empty".into()));
        }
        let paths = self.resolve_all(&paths)?;
        let job_id = JobId::new();
        self.enqueue(FileTask::tagging(tag_name, paths, Some(job_id)), None);
        Ok(job_id)
    }

    fn resolve_all(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        paths
            .iter()
            .map(|path| self.ctx.media_root.ensure_within(path))
            .collect()
    }

    /// Put a prepared task on the hand-off queue, taking the same run guard
    /// the matching `queue_*` call would.
    pub fn submit(&self, mut task: FileTask) -> Result<JobId> {
        let job_id = *task.job_id.get_or_insert_with(JobId::new);
        let guard = match task.task_type {
            TaskType::Move | TaskType::Rename => Some(GuardKind::Move),
            TaskType::Count if task.next_task_type == Some(TaskType::Refresh) => {
                Some(GuardKind::Refresh)
            }
            _ => None,
        };
        if let Some(kind) = guard {
            self.acquire(kind)?;
        }
        self.enqueue(task, guard);
        Ok(job_id)
    }

    /// `None` for ids this worker has never seen.
    pub fn get_job_status(&self, job_id: JobId) -> Option<JobStatus> {
        lock(&self.jobs).get(&job_id).map(|entry| entry.status)
    }

    pub fn job_error(&self, job_id: JobId) -> Option<String> {
        lock(&self.jobs)
            .get(&job_id)
            .and_then(|entry| entry.failure.as_ref())
            .map(|failure| match failure {
                JobFailure::Cancelled(message) | JobFailure::Failed(message) => message.clone(),
            })
    }

    /// Block until `job_id` completes, processing queued work in the
    /// meantime. A job that failed returns its error.
    pub async fn wait_for_job(&self, job_id: JobId, timeout: Duration) -> Result<JobReport> {
        let deadline = Instant::now() + timeout;
        let poll = self.ctx.config.wait_poll_interval();
        loop {
            if let Some(result) = self.finished(job_id)? {
                return result;
            }
            if Instant::now() >= deadline {
                return Err(HoardError::Timeout(job_id.to_string()));
            }
            if !self.process_if_idle().await {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep_until(deadline.min(Instant::now() + poll)) => {}
                }
            }
        }
    }

    /// Cancel the task currently executing, if any.
    pub fn cancel_current(&self) {
        if let Some(token) = lock(&self.current).as_ref() {
            info!(target: "files::worker", "cancelling current task");
            token.cancel();
        }
    }

    /// Stop the run loop and cancel whatever is executing.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    /// Process tasks until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: Arc<Self>) {
        info!(target: "files::worker", root = %self.ctx.media_root.path().display(), "file worker started");
        let poll = self.ctx.config.wait_poll_interval();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.process_next().await {
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
        info!(target: "files::worker", "file worker stopped");
    }

    /// Run one queued task. Returns `false` when there was nothing to do.
    pub async fn process_next(&self) -> bool {
        let _running = self.execution.lock().await;
        self.process_locked().await
    }

    async fn process_if_idle(&self) -> bool {
        let Ok(_running) = self.execution.try_lock() else {
            return false;
        };
        self.process_locked().await
    }

    async fn process_locked(&self) -> bool {
        self.transfer();
        let next = lock(&self.local).pop();
        let Some(task) = next else {
            return false;
        };
        self.run_task(task).await;
        true
    }

    fn acquire(&self, kind: GuardKind) -> Result<()> {
        let (flag, label) = match kind {
            GuardKind::Refresh => (&self.refresh_running, "refresh"),
            GuardKind::Move => (&self.move_running, "move"),
        };
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| HoardError::AlreadyRunning(label))
    }

    fn release(&self, kind: GuardKind) {
        match kind {
            GuardKind::Refresh => self.refresh_running.store(false, Ordering::Release),
            GuardKind::Move => self.move_running.store(false, Ordering::Release),
        }
    }

    fn enqueue(&self, task: FileTask, guard: Option<GuardKind>) {
        if let Some(job_id) = task.job_id {
            lock(&self.jobs).insert(job_id, JobEntry::pending(guard));
        }
        // The receiver lives as long as `self`.
        let _ = self.handoff_tx.send(task);
        self.notify.notify_one();
    }

    /// Drain the hand-off queue onto the local stack.
    fn transfer(&self) {
        let mut incoming = Vec::new();
        {
            let mut rx = lock(&self.handoff_rx);
            while let Ok(mut task) = rx.try_recv() {
                task.job_id.get_or_insert_with(JobId::new);
                incoming.push(task);
            }
        }
        if incoming.is_empty() {
            return;
        }

        {
            let mut jobs = lock(&self.jobs);
            for task in &incoming {
                if let Some(job_id) = task.job_id {
                    jobs.entry(job_id).or_insert_with(|| JobEntry::pending(None));
                }
            }
        }
        debug!(target: "files::worker", tasks = incoming.len(), "transferred tasks from hand-off queue");
        lock(&self.local).extend(incoming);
    }

    fn finished(&self, job_id: JobId) -> Result<Option<Result<JobReport>>> {
        let jobs = lock(&self.jobs);
        let Some(entry) = jobs.get(&job_id) else {
            return Err(HoardError::InvalidTask(format!("unknown job {job_id}")));
        };
        if entry.status != JobStatus::Complete {
            return Ok(None);
        }
        let result = match (&entry.failure, &entry.report) {
            (Some(JobFailure::Cancelled(message)), _) => Err(HoardError::Cancelled(message.clone())),
            (Some(JobFailure::Failed(message)), _) => Err(HoardError::JobFailed(message.clone())),
            (None, Some(report)) => Ok(report.clone()),
            (None, None) => Err(HoardError::Internal(format!("job {job_id} finished without a report"))),
        };
        Ok(Some(result))
    }

    async fn run_task(&self, task: FileTask) {
        let cancel = self.shutdown.child_token();
        *lock(&self.current) = Some(cancel.clone());

        self.status.send_modify(|status| {
            status.status = WorkerState::from(task.task_type);
            status.task_type = Some(task.task_type);
            status.paths = task.paths.iter().map(|p| p.display().to_string()).collect();
            status.total = task.count.unwrap_or(0);
            status.completed = 0;
            status.phase = Some(task.task_type.to_string());
            status.last_error = None;
        });
        debug!(
            target: "files::worker",
            task = %task.task_type,
            paths = task.paths.len(),
            job = ?task.job_id,
            "running task"
        );

        let step = self.execute(&task, &cancel).await;
        *lock(&self.current) = None;

        match step {
            Ok(Step::Chain(next)) => {
                self.status.send_modify(WorkerStatus::reset);
                lock(&self.local).push(next);
            }
            Ok(Step::Done(report)) => {
                self.status.send_modify(WorkerStatus::reset);
                self.complete(task.job_id, Ok(report));
            }
            Err(err) => {
                if err.is_cancelled() {
                    info!(target: "files::worker", task = %task.task_type, "task cancelled");
                } else {
                    warn!(target: "files::worker", task = %task.task_type, error = %err, "task failed");
                }
                let message = err.to_string();
                self.status.send_modify(|status| {
                    status.last_error = Some(message);
                    status.reset();
                });
                self.complete(task.job_id, Err(err));
            }
        }
        self.notify.notify_waiters();
    }

    fn complete(&self, job_id: Option<JobId>, result: Result<JobReport>) {
        let Some(job_id) = job_id else { return };
        let guard = {
            let mut jobs = lock(&self.jobs);
            let entry = jobs
                .entry(job_id)
                .or_insert_with(|| JobEntry::pending(None));
            entry.status = JobStatus::Complete;
            match result {
                Ok(report) => entry.report = Some(report),
                Err(HoardError::Cancelled(message)) => {
                    entry.failure = Some(JobFailure::Cancelled(message));
                }
                Err(err) => entry.failure = Some(JobFailure::Failed(err.to_string())),
            }
            entry.guard.take()
        };
        if let Some(kind) = guard {
            self.release(kind);
        }
    }

    async fn execute(&self, task: &FileTask, cancel: &CancellationToken) -> Result<Step> {
        match task.task_type {
            TaskType::Count => {
                let roots = self.resolve_all(&task.paths)?;
                let count = self
                    .ctx
                    .scanner
                    .count_files(roots, cancel, |n| {
                        self.status.send_modify(|status| status.completed = n);
                    })
                    .await?;
                info!(target: "files::worker", files = count, "count complete");
                match task.chained(count) {
                    Some(next) => Ok(Step::Chain(next)),
                    None => Ok(Step::Done(JobReport::Counted(count))),
                }
            }
            TaskType::Refresh => {
                let refresher = Refresher::new(&self.ctx);
                let files_only =
                    !task.paths.is_empty() && task.paths.iter().all(|p| looks_like_file(p));
                if files_only {
                    let summary = refresher.refresh_files(&task.paths, cancel).await?;
                    return Ok(Step::Done(JobReport::Refreshed(summary)));
                }
                if task.count.is_none() {
                    // Directory refreshes report against a count.
                    return Ok(Step::Chain(FileTask::count_then_refresh(
                        task.paths.clone(),
                        task.job_id,
                    )));
                }
                let summary = refresher
                    .refresh(&task.paths, cancel, |n| {
                        self.status.send_modify(|status| status.completed = n);
                    })
                    .await?;
                Ok(Step::Done(JobReport::Refreshed(summary)))
            }
            TaskType::Move => {
                let destination = task
                    .destination
                    .as_deref()
                    .ok_or_else(|| HoardError::InvalidTask("move without destination".into()))?;
                let outcome = move_paths(&self.ctx, &task.paths, destination, cancel, |done, total| {
                    self.status.send_modify(|status| {
                        status.completed = done;
                        status.total = total;
                    });
                })
                .await?;
                Ok(Step::Done(JobReport::Moved(outcome)))
            }
            TaskType::Rename => {
                let (Some(path), Some(new_name)) = (task.paths.first(), task.new_name.as_deref())
                else {
                    return Err(HoardError::InvalidTask("rename needs a path and a name".into()));
                };
                let outcome = rename_path(&self.ctx, path, new_name, cancel, |done, total| {
                    self.status.send_modify(|status| {
                        status.completed = done;
                        status.total = total;
                    });
                })
                .await?;
                Ok(Step::Done(JobReport::Moved(outcome)))
            }
            TaskType::Tag => {
                let tag_name = task
                    .tag_name
                    .as_deref()
                    .ok_or_else(|| HoardError::InvalidTask("tag without a name".into()))?;
                let summary = tag_paths(&self.ctx.pool, tag_name, &task.paths).await?;
                self.ctx
                    .emit(EngineEvent::TagsChanged {
                        tag: Some(tag_name.trim().to_string()),
                    })
                    .await;
                Ok(Step::Done(JobReport::Tagged(summary)))
            }
        }
    }
}

/// Existing regular files, and missing paths that carry an extension.
fn looks_like_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => !metadata.is_dir(),
        Err(_) => path.extension().is_some(),
    }
}

/// Directory roots for a mixed request: file paths are widened to their
/// parent directory.
fn directory_roots(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = paths
        .into_iter()
        .map(|path| {
            if looks_like_file(&path) {
                path.parent().map(Path::to_path_buf).unwrap_or(path)
            } else {
                path
            }
        })
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_paths_are_classified_by_extension() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("shows")).unwrap();
        std::fs::write(tmp.path().join("a.mp4"), b"x").unwrap();

        assert!(!looks_like_file(&tmp.path().join("shows")));
        assert!(looks_like_file(&tmp.path().join("a.mp4")));
        assert!(looks_like_file(&tmp.path().join("gone.mkv")));
        assert!(!looks_like_file(&tmp.path().join("gone-dir")));
    }

    #[test]
    fn mixed_requests_widen_files_to_their_parent() {
        let tmp = TempDir::new().unwrap();
        let shows = tmp.path().join("shows");
        std::fs::create_dir(&shows).unwrap();
        std::fs::write(shows.join("a.mp4"), b"x").unwrap();

        let roots = directory_roots(vec![shows.join("a.mp4"), shows.clone()]);
        assert_eq!(roots, vec![shows]);
    }
}
