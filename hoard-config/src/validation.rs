use thiserror::Error;

use crate::models::HoardConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("media_root must be an absolute path, got '{0}'")]
    RelativeMediaRoot(String),
    #[error("{field} must be greater than zero")]
    ZeroSize { field: &'static str },
    #[error("database url must not be empty")]
    EmptyDatabaseUrl,
    #[error("lister_program must not be empty")]
    EmptyListerProgram,
}

/// Reject settings the engine cannot run with.
pub fn validate(config: &HoardConfig) -> Result<(), ConfigValidationError> {
    let engine = &config.engine;
    if !engine.media_root.is_absolute() {
        return Err(ConfigValidationError::RelativeMediaRoot(
            engine.media_root.display().to_string(),
        ));
    }

    let sizes: [(&'static str, u64); 7] = [
        ("scan_batch_size", engine.scan_batch_size as u64),
        ("upsert_batch_size", engine.upsert_batch_size as u64),
        ("delete_batch_size", engine.delete_batch_size as u64),
        ("move_chunk_size", engine.move_chunk_size as u64),
        ("pipeline_batch_size", engine.pipeline_batch_size as u64),
        ("count_progress_interval", engine.count_progress_interval),
        ("database.max_connections", u64::from(config.database.max_connections)),
    ];
    if let Some(&(field, _)) = sizes.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigValidationError::ZeroSize { field });
    }

    if config.database.url.trim().is_empty() {
        return Err(ConfigValidationError::EmptyDatabaseUrl);
    }
    if engine.lister_program.trim().is_empty() {
        return Err(ConfigValidationError::EmptyListerProgram);
    }
    Ok(())
}
