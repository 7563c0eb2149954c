use std::fmt;

use crate::task::TaskType;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WorkerState {
    #[default]
    Idle,
    Counting,
    Refreshing,
    Moving,
    Renaming,
    Tagging,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Idle => "idle",
            WorkerState::Counting => "counting",
            WorkerState::Refreshing => "refreshing",
            WorkerState::Moving => "moving",
            WorkerState::Renaming => "renaming",
            WorkerState::Tagging => "tagging",
        };
        f.write_str(label)
    }
}

impl From<TaskType> for WorkerState {
    fn from(value: TaskType) -> Self {
        match value {
            TaskType::Count => WorkerState::Counting,
            TaskType::Refresh => WorkerState::Refreshing,
            TaskType::Move => WorkerState::Moving,
            TaskType::Rename => WorkerState::Renaming,
            TaskType::Tag => WorkerState::Tagging,
        }
    }
}

/// Advisory progress snapshot for status displays. Never used for
/// correctness decisions.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerStatus {
    pub status: WorkerState,
    pub task_type: Option<TaskType>,
    pub paths: Vec<String>,
    pub total: u64,
    pub completed: u64,
    pub phase: Option<String>,
    pub last_error: Option<String>,
}

impl WorkerStatus {
    /// Whole-number percent complete, clamped to 100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = self.completed.saturating_mul(100) / self.total;
        pct.min(100) as u8
    }

    /// Reset to the idle baseline while keeping the last reported error.
    pub fn reset(&mut self) {
        let last_error = self.last_error.take();
        *self = WorkerStatus {
            last_error,
            ..WorkerStatus::default()
        };
    }
}
