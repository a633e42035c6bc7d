//! Scheduling posts for delayed delivery
//!
//! The [`Scheduler`] turns "publish post N at time T" into a task on the
//! durable queue. The task carries only the post id; everything else is
//! loaded when the task is delivered. Targets in the past are delivered
//! immediately.
//!
//! [`parse_schedule`] parses the human-readable time formats accepted by the
//! command line tools.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PostflowError, Result};
use crate::queue::{SchedulePostPayload, TaskQueue, TASK_TYPE_SCHEDULE_POST};

/// A task accepted by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task_id: String,
    pub post_id: i64,
    pub delay: Duration,
    /// Unix timestamp at which the task becomes deliverable
    pub run_at: i64,
}

#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    /// Delay until `target`, never negative
    pub fn compute_delay(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        (target - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Enqueue delivery of `post_id` at `target`
    ///
    /// # Errors
    ///
    /// Returns `PostflowError::Queue` if the queue rejects the submission.
    pub async fn schedule(&self, post_id: i64, target: DateTime<Utc>) -> Result<ScheduledTask> {
        self.schedule_at(post_id, target, Utc::now()).await
    }

    /// [`Scheduler::schedule`] with an explicit clock
    pub async fn schedule_at(
        &self,
        post_id: i64,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTask> {
        let delay = Self::compute_delay(target, now);
        let run_at = now.timestamp() + delay.as_secs() as i64;
        let payload = SchedulePostPayload { post_id }.encode()?;

        let task_id = self
            .queue
            .enqueue(TASK_TYPE_SCHEDULE_POST, &payload, run_at)
            .await?;

        tracing::info!(post_id, task_id = %task_id, delay_secs = delay.as_secs(), "post scheduled");

        Ok(ScheduledTask {
            task_id,
            post_id,
            delay,
            run_at,
        })
    }
}

/// Parse a schedule string into a point in time
///
/// Supports:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next week", "in 1 hour"
/// - Absolute times: "2025-11-20 15:00", "next monday 10am"
/// - RFC 3339 timestamps
///
/// # Errors
///
/// Returns `PostflowError::Validation` if the input cannot be parsed.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostflowError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        let seconds = i64::try_from(duration.as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| PostflowError::Validation("Duration out of range".to_string()))?;
        return Ok(Utc::now() + seconds);
    }

    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| PostflowError::Validation(format!("Could not parse schedule '{}': {}", input, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::{Task, TaskStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records enqueues in memory
    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<(String, String, i64)>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, task_type: &str, payload: &str, run_at: i64) -> Result<String> {
            if self.fail {
                return Err(QueueError::Submit("connection refused".to_string()).into());
            }
            let mut enqueued = self.enqueued.lock().unwrap();
            enqueued.push((task_type.to_string(), payload.to_string(), run_at));
            Ok(format!("task-{}", enqueued.len()))
        }

        async fn claim_due(&self, _now: i64, _limit: u32, _lease: Duration) -> Result<Vec<Task>> {
            Ok(vec![])
        }

        async fn complete(&self, _task_id: &str) -> Result<()> {
            Ok(())
        }

        async fn retry_later(&self, _task_id: &str, _error: &str, _run_at: i64) -> Result<TaskStatus> {
            Ok(TaskStatus::Pending)
        }

        async fn bury(&self, _task_id: &str, _error: &str) -> Result<()> {
            Ok(())
        }

        async fn list_pending(&self) -> Result<Vec<Task>> {
            Ok(vec![])
        }
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn test_compute_delay_future() {
        assert_eq!(
            Scheduler::compute_delay(at(1_000 + 90), at(1_000)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_compute_delay_past_is_zero() {
        assert_eq!(Scheduler::compute_delay(at(500), at(1_000)), Duration::ZERO);
        assert_eq!(Scheduler::compute_delay(at(1_000), at(1_000)), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_schedule_enqueues_post_id_only() {
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = Scheduler::new(queue.clone());

        let task = scheduler.schedule_at(42, at(2_000), at(1_000)).await.unwrap();
        assert_eq!(task.task_id, "task-1");
        assert_eq!(task.delay, Duration::from_secs(1_000));
        assert_eq!(task.run_at, 2_000);

        let enqueued = queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, "schedule:post");
        assert_eq!(enqueued[0].1, r#"{"post_id":42}"#);
    }

    #[tokio::test]
    async fn test_schedule_past_target_runs_now() {
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = Scheduler::new(queue.clone());

        let task = scheduler.schedule_at(1, at(10), at(1_000)).await.unwrap();
        assert_eq!(task.delay, Duration::ZERO);
        assert_eq!(task.run_at, 1_000);
    }

    #[tokio::test]
    async fn test_schedule_surfaces_queue_failure() {
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(queue);

        let result = scheduler.schedule(1, Utc::now()).await;
        assert!(matches!(
            result,
            Err(PostflowError::Queue(QueueError::Submit(_)))
        ));
    }

    #[test]
    fn test_parse_schedule_duration() {
        let before = Utc::now();
        let parsed = parse_schedule("2h").unwrap();
        let diff = parsed - before;
        assert!(diff >= chrono::Duration::seconds(7199));
        assert!(diff <= chrono::Duration::seconds(7205));
    }

    #[test]
    fn test_parse_schedule_rfc3339() {
        let parsed = parse_schedule("2030-01-02T03:04:05Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_893_553_445);
    }

    #[test]
    fn test_parse_schedule_natural_language() {
        let parsed = parse_schedule("tomorrow").unwrap();
        assert!(parsed > Utc::now());
    }

    #[test]
    fn test_parse_schedule_rejects_garbage() {
        assert!(matches!(parse_schedule(""), Err(PostflowError::Validation(_))));
        assert!(matches!(
            parse_schedule("whenever you like"),
            Err(PostflowError::Validation(_))
        ));
    }
}
