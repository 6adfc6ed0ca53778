mod record;
mod state;

use std::{path::Path, sync::Arc};

use sqlx::{Row, sqlite::SqliteRow};
use state::{DbState, format_timestamp, parse_timestamp};
use time::OffsetDateTime;

pub use record::{JobRecord, JobRepository, ProgressUpdate};

/// SQLite-backed job store shared by workers and status pollers.
#[derive(Debug, Clone)]
pub struct JobDb {
    state: Arc<DbState>,
}

impl JobDb {
    pub async fn open<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(DbState::open(db_file).await?),
        })
    }

    pub async fn close(&self) {
        self.state.close().await;
    }
}

fn row_to_record(row: &SqliteRow) -> anyhow::Result<JobRecord> {
    let result: Option<String> = row.try_get("result")?;
    let result = result.map(|json| serde_json::from_str(&json)).transpose()?;
    Ok(JobRecord {
        name: row.try_get("name")?,
        frame_current: row.try_get("frame_current")?,
        frame_total_estimate: row.try_get("frame_total_estimate")?,
        start_time: parse_timestamp(&row.try_get::<String, _>("start_time")?)?,
        remaining_time_display: row.try_get("remaining_time")?,
        finished: row.try_get("finished")?,
        cancelled: row.try_get("cancelled")?,
        error: row.try_get("error")?,
        result,
        last_updated: parse_timestamp(&row.try_get::<String, _>("last_updated")?)?,
    })
}

impl JobRepository for JobDb {
    async fn claim_job(&self, name: &str, started_at: OffsetDateTime, message: &str) -> anyhow::Result<bool> {
        let started_at = format_timestamp(started_at)?;
        let done = sqlx::query(
            r#"INSERT INTO job_progress
                (name, frame_current, frame_total_estimate, start_time, remaining_time,
                 finished, cancelled, error, result, last_updated)
            VALUES (?, 0, 1, ?, ?, 0, 0, NULL, NULL, ?)
            ON CONFLICT (name) DO UPDATE SET
                frame_current = 0, frame_total_estimate = 1,
                start_time = excluded.start_time, remaining_time = excluded.remaining_time,
                finished = 0, cancelled = 0, error = NULL, result = NULL,
                last_updated = excluded.last_updated
            WHERE job_progress.finished = 1 OR job_progress.error IS NOT NULL"#,
        )
        .bind(name)
        .bind(&started_at)
        .bind(message)
        .bind(&started_at)
        .execute(&self.state.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn get_job(&self, name: &str) -> anyhow::Result<Option<JobRecord>> {
        sqlx::query(
            r#"SELECT name, frame_current, frame_total_estimate, start_time, remaining_time,
                finished, cancelled, error, result, last_updated
            FROM job_progress WHERE name = ?"#,
        )
        .bind(name)
        .fetch_optional(&self.state.pool)
        .await?
        .map(|row| row_to_record(&row))
        .transpose()
    }

    async fn record_progress(&self, name: &str, update: &ProgressUpdate) -> anyhow::Result<bool> {
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let done = sqlx::query(
            r#"UPDATE job_progress
            SET frame_current = ?, frame_total_estimate = ?, remaining_time = ?, last_updated = ?
            WHERE name = ? AND finished = 0 AND cancelled = 0"#,
        )
        .bind(update.frame_current)
        .bind(update.frame_total_estimate)
        .bind(&update.remaining_time_display)
        .bind(&now)
        .bind(name)
        .execute(&self.state.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn record_message(&self, name: &str, message: &str) -> anyhow::Result<bool> {
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let done = sqlx::query(
            "UPDATE job_progress SET remaining_time = ?, last_updated = ? WHERE name = ? AND finished = 0",
        )
        .bind(message)
        .bind(&now)
        .bind(name)
        .execute(&self.state.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn record_finished(&self, name: &str, result: &serde_json::Value) -> anyhow::Result<bool> {
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let result = serde_json::to_string(result)?;
        let done = sqlx::query(
            r#"UPDATE job_progress
            SET finished = 1, result = ?, error = NULL, remaining_time = '00:00:00',
                frame_current = MAX(frame_current, frame_total_estimate), last_updated = ?
            WHERE name = ? AND cancelled = 0"#,
        )
        .bind(&result)
        .bind(&now)
        .bind(name)
        .execute(&self.state.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn record_failed(&self, name: &str, message: &str, at: OffsetDateTime) -> anyhow::Result<()> {
        let at = format_timestamp(at)?;
        sqlx::query(
            r#"INSERT INTO job_progress
                (name, frame_current, frame_total_estimate, start_time, remaining_time,
                 finished, cancelled, error, result, last_updated)
            VALUES (?, 0, 1, ?, 'Error', 1, 0, ?, NULL, ?)
            ON CONFLICT (name) DO UPDATE SET
                finished = 1, error = excluded.error, remaining_time = 'Error',
                last_updated = excluded.last_updated
            WHERE job_progress.cancelled = 0"#,
        )
        .bind(name)
        .bind(&at)
        .bind(message)
        .bind(&at)
        .execute(&self.state.pool)
        .await?;
        Ok(())
    }

    async fn record_cancelled(&self, name: &str, error: &str, message: &str) -> anyhow::Result<bool> {
        let now = format_timestamp(OffsetDateTime::now_utc())?;
        let done = sqlx::query(
            r#"UPDATE job_progress
            SET cancelled = 1, finished = 1, error = ?, remaining_time = ?, last_updated = ?
            WHERE name = ? AND finished = 0"#,
        )
        .bind(error)
        .bind(message)
        .bind(&now)
        .bind(name)
        .execute(&self.state.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}
