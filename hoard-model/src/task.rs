use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

/// Opaque handle callers use to track a submitted task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion state reported for a job id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Complete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TaskType {
    Count,
    Refresh,
    Move,
    Rename,
    Tag,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Count => "count",
            TaskType::Refresh => "refresh",
            TaskType::Move => "move",
            TaskType::Rename => "rename",
            TaskType::Tag => "tag",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(TaskType::Count),
            "refresh" => Ok(TaskType::Refresh),
            "move" => Ok(TaskType::Move),
            "rename" => Ok(TaskType::Rename),
            "tag" => Ok(TaskType::Tag),
            other => Err(ModelError::UnknownTaskType(other.to_string())),
        }
    }
}

/// A unit of work handed to the file worker. Tasks are process-local and
/// never persisted.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileTask {
    pub task_type: TaskType,
    pub paths: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    /// Files counted ahead of a directory-scoped refresh.
    pub count: Option<u64>,
    pub job_id: Option<JobId>,
    pub prev_task_type: Option<TaskType>,
    pub next_task_type: Option<TaskType>,
    /// New file or directory name for `rename`.
    pub new_name: Option<String>,
    /// Tag applied by `tag`.
    pub tag_name: Option<String>,
}

impl FileTask {
    pub fn new(task_type: TaskType, paths: Vec<PathBuf>) -> Self {
        Self {
            task_type,
            paths,
            destination: None,
            count: None,
            job_id: None,
            prev_task_type: None,
            next_task_type: None,
            new_name: None,
            tag_name: None,
        }
    }

    /// A `count` task that hands its result to a `refresh` of the same paths.
    pub fn count_then_refresh(paths: Vec<PathBuf>, job_id: Option<JobId>) -> Self {
        Self {
            job_id,
            next_task_type: Some(TaskType::Refresh),
            ..Self::new(TaskType::Count, paths)
        }
    }

    pub fn moving(destination: PathBuf, sources: Vec<PathBuf>, job_id: Option<JobId>) -> Self {
        Self {
            destination: Some(destination),
            job_id,
            ..Self::new(TaskType::Move, sources)
        }
    }

    pub fn renaming(path: PathBuf, new_name: String, job_id: Option<JobId>) -> Self {
        Self {
            new_name: Some(new_name),
            job_id,
            ..Self::new(TaskType::Rename, vec![path])
        }
    }

    pub fn tagging(tag_name: String, paths: Vec<PathBuf>, job_id: Option<JobId>) -> Self {
        Self {
            tag_name: Some(tag_name),
            job_id,
            ..Self::new(TaskType::Tag, paths)
        }
    }

    /// Build the follow-up task this one chains into, carrying its count.
    pub fn chained(&self, count: u64) -> Option<Self> {
        let next = self.next_task_type?;
        Some(Self {
            task_type: next,
            paths: self.paths.clone(),
            destination: self.destination.clone(),
            count: Some(count),
            job_id: self.job_id,
            prev_task_type: Some(self.task_type),
            next_task_type: None,
            new_name: self.new_name.clone(),
            tag_name: self.tag_name.clone(),
        })
    }
}
