#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from linecount for tests
pub use linecount::core::db::{JobDb, JobRecord, JobRepository};
pub use linecount::core::{
    JobConfig, JobName, JobRequest, LocalDirStorage, Orchestrator, ProgressManager, RemoteStorage,
    SubmitError, VideoRef,
};
pub use linecount::pipeline::{TrackReplayBackend, VideoBackend};
