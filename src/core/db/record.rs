use std::future::Future;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Durable progress row for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub frame_current: i64,
    pub frame_total_estimate: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// Remaining-time estimate, or a status message during non-frame phases.
    pub remaining_time_display: String,
    pub finished: bool,
    pub cancelled: bool,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl JobRecord {
    /// Placeholder returned for unknown jobs so pollers see a terminal record.
    pub fn not_found(name: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.to_string(),
            frame_current: 0,
            frame_total_estimate: 0,
            start_time: now,
            remaining_time_display: String::new(),
            finished: true,
            cancelled: false,
            error: Some(format!("Job '{}' not found", name)),
            result: None,
            last_updated: now,
        }
    }
}

/// Frame counters written by a progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub frame_current: i64,
    pub frame_total_estimate: i64,
    pub remaining_time_display: String,
}

/// Storage for job records.
///
/// Every write is a single guarded statement: writes that return `bool`
/// report whether the guard matched and the row changed.
pub trait JobRepository: Send + Sync + 'static {
    /// Create the record, or reset an existing one to its initial state if it
    /// is terminal (finished or failed). Returns `false` when the job is still
    /// active and the claim was refused.
    fn claim_job(
        &self,
        name: &str,
        started_at: OffsetDateTime,
        message: &str,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn get_job(&self, name: &str) -> impl Future<Output = anyhow::Result<Option<JobRecord>>> + Send;

    /// Only applies while the job is neither finished nor cancelled.
    fn record_progress(
        &self,
        name: &str,
        update: &ProgressUpdate,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Only applies while the job is not finished.
    fn record_message(&self, name: &str, message: &str) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Only applies while the job is not cancelled.
    fn record_finished(
        &self,
        name: &str,
        result: &serde_json::Value,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Creates the record if missing. Leaves cancelled jobs untouched.
    fn record_failed(
        &self,
        name: &str,
        message: &str,
        at: OffsetDateTime,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Only applies while the job is not finished.
    fn record_cancelled(
        &self,
        name: &str,
        error: &str,
        message: &str,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}
