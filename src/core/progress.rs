//! Job lifecycle on top of a [`JobRepository`].
//!
//! The manager is the only writer of job records. Workers report progress
//! through [`ProgressManager::update`], whose `false` return is the signal to
//! stop processing.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::core::db::{JobRecord, JobRepository, ProgressUpdate};

pub const CANCELLED_ERROR: &str = "Cancelled by user";

const QUEUED_MESSAGE: &str = "Queued...";
const CALCULATING_MESSAGE: &str = "Calculating...";
const FINISHING_MESSAGE: &str = "Finishing...";
const CANCELLED_MESSAGE: &str = "Cancelled";

/// Frames that must be processed before the frame rate is trusted.
const MIN_FRAMES_FOR_ESTIMATE: u64 = 5;
const MIN_ELAPSED_FOR_ESTIMATE: Duration = Duration::from_millis(100);

/// Format seconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_hms(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Remaining-time display for `frame_current` of `frame_total` after `elapsed`.
pub fn estimate_remaining(frame_current: u64, frame_total: u64, elapsed: Duration) -> String {
    if frame_current <= MIN_FRAMES_FOR_ESTIMATE || elapsed <= MIN_ELAPSED_FOR_ESTIMATE {
        return CALCULATING_MESSAGE.to_string();
    }
    let fps = frame_current as f64 / elapsed.as_secs_f64();
    if fps > 0.0 && frame_total > frame_current {
        let remaining = (frame_total - frame_current) as f64 / fps;
        format_hms(remaining as u64)
    } else {
        FINISHING_MESSAGE.to_string()
    }
}

#[derive(Debug)]
pub struct ProgressManager<R> {
    repo: Arc<R>,
}

impl<R> Clone for ProgressManager<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<R: JobRepository> ProgressManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Create or reset the record. Returns `false` if another caller holds
    /// the name with a job that is still active.
    pub async fn start(&self, name: &str) -> anyhow::Result<bool> {
        let claimed = self
            .repo
            .claim_job(name, OffsetDateTime::now_utc(), QUEUED_MESSAGE)
            .await?;
        if claimed {
            tracing::info!(job = name, "job started");
        }
        Ok(claimed)
    }

    /// Whether a worker should keep going: the record exists and is neither
    /// cancelled nor terminal. Read-only, unlike [`update`](Self::update).
    pub async fn should_continue(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self
            .repo
            .get_job(name)
            .await?
            .map(|record| !record.cancelled && !record.finished)
            .unwrap_or(false))
    }

    pub async fn is_active(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self
            .repo
            .get_job(name)
            .await?
            .map(|record| record.error.is_none() && !record.finished)
            .unwrap_or(false))
    }

    /// Persist frame progress. Returns `false` when the job is missing,
    /// cancelled or finished and processing must stop.
    pub async fn update(&self, name: &str, frame_current: u64, frame_total_estimate: u64) -> anyhow::Result<bool> {
        let Some(record) = self.repo.get_job(name).await? else {
            return Ok(false);
        };
        if record.cancelled || record.finished {
            return Ok(false);
        }

        let elapsed = OffsetDateTime::now_utc() - record.start_time;
        let elapsed = Duration::try_from(elapsed).unwrap_or(Duration::ZERO);
        let update = ProgressUpdate {
            frame_current: frame_current as i64,
            frame_total_estimate: frame_total_estimate as i64,
            remaining_time_display: estimate_remaining(frame_current, frame_total_estimate, elapsed),
        };
        self.repo.record_progress(name, &update).await
    }

    /// Replace the status text, e.g. during file transfers. Frame counters are untouched.
    pub async fn set_status_message(&self, name: &str, message: &str) -> anyhow::Result<()> {
        self.repo.record_message(name, message).await?;
        Ok(())
    }

    /// Mark the job as successfully finished. A cancelled job stays cancelled.
    pub async fn finish(&self, name: &str, result: &serde_json::Value) -> anyhow::Result<()> {
        if self.repo.record_finished(name, result).await? {
            tracing::info!(job = name, "job finished");
        } else {
            tracing::warn!(job = name, "finish ignored for cancelled or missing job");
        }
        Ok(())
    }

    /// Mark the job as failed, creating the record if it does not exist.
    pub async fn error(&self, name: &str, message: &str) -> anyhow::Result<()> {
        self.repo
            .record_failed(name, message, OffsetDateTime::now_utc())
            .await?;
        tracing::error!(job = name, error = message, "job failed");
        Ok(())
    }

    /// Request cancellation. Returns `false` if the job is missing or already terminal.
    pub async fn cancel(&self, name: &str) -> anyhow::Result<bool> {
        let cancelled = self
            .repo
            .record_cancelled(name, CANCELLED_ERROR, CANCELLED_MESSAGE)
            .await?;
        if cancelled {
            tracing::info!(job = name, "cancellation recorded");
        }
        Ok(cancelled)
    }

    pub async fn status(&self, name: &str) -> anyhow::Result<JobRecord> {
        Ok(self
            .repo
            .get_job(name)
            .await?
            .unwrap_or_else(|| JobRecord::not_found(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3_725), "01:02:05");
        assert_eq!(format_hms(90_000), "25:00:00");
    }

    #[test]
    fn estimate_waits_for_enough_samples() {
        assert_eq!(estimate_remaining(5, 100, Duration::from_secs(10)), CALCULATING_MESSAGE);
        assert_eq!(estimate_remaining(50, 100, Duration::from_millis(50)), CALCULATING_MESSAGE);
    }

    #[test]
    fn estimate_uses_observed_frame_rate() {
        // 10 fps, 90 frames left.
        assert_eq!(estimate_remaining(10, 100, Duration::from_secs(1)), "00:00:09");
        assert_eq!(estimate_remaining(100, 100, Duration::from_secs(1)), FINISHING_MESSAGE);
    }
}
