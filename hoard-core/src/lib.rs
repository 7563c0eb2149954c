//! # Hoard Core
//!
//! File reconciliation and move engine for the Hoard media library. Keeps the
//! SQLite catalog of file groups in step with what is actually on disk, and
//! moves or renames files without leaving the two out of sync.
//!
//! ## Overview
//!
//! - **Scanning**: streaming, cancellable enumeration through an external
//!   `find`-compatible lister
//! - **Comparison**: filesystem-vs-catalog diffing per `(directory, stem)`
//!   through a temporary table, linear in files plus groups
//! - **Catalog mutation**: primary-file selection, batched upserts and deletes,
//!   domain-model cleanup, tagging
//! - **Moves**: bulk planning, chunked execution, full rollback on failure
//! - **Post-processing**: modeler and indexer hooks held in an explicit
//!   [`pipeline::HookRegistry`]
//! - **Worker**: a single-lane task queue with job tracking and status
//!   subscription
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use hoard_core::{EngineConfig, EngineContext, FileWorker, database};
//!
//! async fn refresh_everything() -> hoard_core::Result<()> {
//!     let pool = database::open("sqlite://hoard.db", 4).await?;
//!     let ctx = EngineContext::new(pool, EngineConfig::new("/media/hoard"));
//!     let worker = FileWorker::new(ctx);
//!
//!     let job = worker.queue_refresh(Vec::new())?;
//!     worker.wait_for_job(job, Duration::from_secs(600)).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod catalog;
pub mod compare;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod events;
pub mod mimetype;
pub mod moves;
pub mod paths;
pub mod pipeline;
pub mod refresh;
pub mod scanner;
pub mod stem;
pub mod worker;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{HoardError, Result};
pub use events::{EngineEvent, EventPublisher, InProcEventBus};
pub use refresh::{RefreshSummary, Refresher};
pub use worker::{FileWorker, JobReport};

pub use hoard_model;
