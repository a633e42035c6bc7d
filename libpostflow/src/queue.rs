//! Durable delayed-task queue
//!
//! Tasks are rows in the `tasks` table. Delivery is at-least-once:
//!
//! - a task becomes claimable once `run_at` has passed
//! - claiming leases the task; a consumer that dies without completing it
//!   lets the lease expire and the task is claimed again
//! - failed tasks go back to `pending` with a backoff until `max_attempts`
//!   deliveries have been made, after which they are buried as `dead`
//!
//! There is no deduplication key. Two enqueues for the same post produce two
//! deliveries.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

use crate::db::Database;
use crate::error::{DbError, QueueError, Result};

/// Task type for delayed post publishing
pub const TASK_TYPE_SCHEDULE_POST: &str = "schedule:post";

/// Upper bound for redelivery backoff
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Payload of a [`TASK_TYPE_SCHEDULE_POST`] task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePostPayload {
    pub post_id: i64,
}

impl SchedulePostPayload {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Submit(e.to_string()).into())
    }

    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| QueueError::Decode(e.to_string()).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Dead,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Dead => "dead",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "dead" => Ok(TaskStatus::Dead),
            other => Err(DbError::Corrupt(format!("task status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub payload: String,
    pub run_at: i64,
    pub status: TaskStatus,
    /// Deliveries so far, including the current one for a claimed task
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

/// Durable delayed-delivery queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task that becomes deliverable at `run_at`; returns its id
    async fn enqueue(&self, task_type: &str, payload: &str, run_at: i64) -> Result<String>;

    /// Lease up to `limit` deliverable tasks
    async fn claim_due(&self, now: i64, limit: u32, lease: Duration) -> Result<Vec<Task>>;

    /// Acknowledge a delivered task
    async fn complete(&self, task_id: &str) -> Result<()>;

    /// Return a task for redelivery at `run_at`, or bury it if its attempts
    /// are exhausted. Returns the resulting status.
    async fn retry_later(&self, task_id: &str, error: &str, run_at: i64) -> Result<TaskStatus>;

    /// Give up on a task without further deliveries
    async fn bury(&self, task_id: &str, error: &str) -> Result<()>;

    /// Tasks not yet completed or buried, soonest first
    async fn list_pending(&self) -> Result<Vec<Task>>;
}

/// [`TaskQueue`] stored in the Postflow SQLite database
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: Database,
    max_attempts: u32,
}

impl SqliteTaskQueue {
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_type, payload, run_at, status, attempts, max_attempts, last_error
            FROM tasks WHERE id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| row_to_task(&r)).transpose()
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, task_type: &str, payload: &str, run_at: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, payload, run_at, status, attempts, max_attempts, created_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(task_type)
        .bind(payload)
        .bind(run_at)
        .bind(self.max_attempts as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| QueueError::Submit(e.to_string()))?;

        Ok(id)
    }

    async fn claim_due(&self, now: i64, limit: u32, lease: Duration) -> Result<Vec<Task>> {
        // Single statement, so two consumers can never lease the same row
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running',
                attempts = attempts + 1,
                lease_until = ?
            WHERE id IN (
                SELECT id FROM tasks
                WHERE (status = 'pending' AND run_at <= ?)
                   OR (status = 'running' AND lease_until <= ?)
                ORDER BY run_at ASC
                LIMIT ?
            )
            RETURNING id, task_type, payload, run_at, status, attempts, max_attempts, last_error
            "#,
        )
        .bind(now + lease.as_secs() as i64)
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let mut tasks = rows.iter().map(row_to_task).collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|t| t.run_at);
        Ok(tasks)
    }

    async fn complete(&self, task_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'done', lease_until = NULL WHERE id = ?")
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn retry_later(&self, task_id: &str, error: &str, run_at: i64) -> Result<TaskStatus> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'pending' END,
                run_at = ?,
                last_error = ?,
                lease_until = NULL
            WHERE id = ?
            RETURNING status
            "#,
        )
        .bind(run_at)
        .bind(error)
        .bind(task_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(r) => Ok(r.get::<String, _>("status").parse()?),
            None => Err(crate::error::PostflowError::NotFound(format!("task {}", task_id))),
        }
    }

    async fn bury(&self, task_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'dead', last_error = ?, lease_until = NULL WHERE id = ?")
            .bind(error)
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_type, payload, run_at, status, attempts, max_attempts, last_error
            FROM tasks
            WHERE status IN ('pending', 'running')
            ORDER BY run_at ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_task).collect()
    }
}

fn row_to_task(r: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    Ok(Task {
        id: r.get("id"),
        task_type: r.get("task_type"),
        payload: r.get("payload"),
        run_at: r.get("run_at"),
        status: r.get::<String, _>("status").parse()?,
        attempts: r.get::<i64, _>("attempts") as u32,
        max_attempts: r.get::<i64, _>("max_attempts") as u32,
        last_error: r.get("last_error"),
    })
}

/// Redelivery delay after `attempts` deliveries: `base * 2^(attempts - 1)`,
/// capped at one hour, plus up to 10% jitter
pub fn retry_delay(base: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = base
        .checked_mul(1u32 << exponent)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY);

    let jitter_ms = (delay.as_millis() / 10) as u64;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}
