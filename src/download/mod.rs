//! Concurrent file download subsystem

pub mod engine;
pub mod progress;

pub use engine::{DownloadConfig, DownloadEngine, TaskOutcome, TaskStatus};
pub use progress::{ProgressTracker, ProgressUpdate, TaskHandle};
