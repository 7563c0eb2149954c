//! Core data model definitions shared across Hoard crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod files;
pub mod status;
pub mod task;

pub use error::{ModelError, Result as ModelResult};
pub use files::{Directory, FileGroup, FileGroupFile};
pub use status::{WorkerState, WorkerStatus};
pub use task::{FileTask, JobId, JobStatus, TaskType};
