use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HoardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Path is outside the media root: {}", .0.display())]
    OutsideMediaRoot(PathBuf),

    #[error("Media root is missing or contains no visible files: {}", .0.display())]
    MediaRootUnavailable(PathBuf),

    #[error("File lister unavailable: {0}")]
    ScannerUnavailable(String),

    #[error("A {0} is already running")]
    AlreadyRunning(&'static str),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Timed out waiting for job {0}")]
    Timeout(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HoardError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HoardError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, HoardError>;
