pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod export;
pub mod models;
pub mod progress;
pub mod sync;

pub use config::Config;
pub use database::Database;
pub use engine::ReviewEngine;
pub use error::{Error, Result};
pub use models::{ItemStatus, ReviewRecord, SyncQueueEntry};
