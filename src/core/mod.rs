pub mod db;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod storage;

pub use job::{ConfigError, JobConfig, JobName, JobRequest, ModelChoice, VideoRef};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SubmitError};
pub use progress::ProgressManager;
pub use storage::{LocalDirStorage, RemoteStorage};
