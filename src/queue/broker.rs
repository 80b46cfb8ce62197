use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{QueueName, TaskEnvelope};
use crate::db::TaskAuditRepository;
use crate::error::AppError;

const KEY_PREFIX: &str = "arremate";

/// Redis-backed task broker.
///
/// Ready items live in one ZSET per queue, scored so that ZPOPMIN yields
/// highest priority first and FIFO within a priority. Leased items move to
/// a shared `processing` ZSET scored by their visibility deadline; a
/// janitor sweep returns expired leases to their queue. Items that exhaust
/// their retries land in `dead` and produce a task_audit row.
#[derive(Clone)]
pub struct TaskBroker {
    conn: redis::aio::ConnectionManager,
    audit: TaskAuditRepository,
    depth_cap: u64,
}

fn ready_key(queue: QueueName) -> String {
    format!("{}:queue:{}", KEY_PREFIX, queue.as_str())
}

fn scheduled_key(queue: QueueName) -> String {
    format!("{}:queue:{}:scheduled", KEY_PREFIX, queue.as_str())
}

fn task_key(id: &Uuid) -> String {
    format!("{}:task:{}", KEY_PREFIX, id)
}

fn processing_key() -> String {
    format!("{}:processing", KEY_PREFIX)
}

fn dead_key() -> String {
    format!("{}:dead", KEY_PREFIX)
}

fn revoked_key(job_id: &Uuid) -> String {
    format!("{}:revoked:{}", KEY_PREFIX, job_id)
}

/// Priority-then-FIFO in a single f64 score: higher priority gives a lower
/// band, the sequence counter breaks ties. The band width (2^40) keeps the
/// sum exactly representable in an f64.
fn ready_score(priority: u8, seq: u64) -> f64 {
    ((255 - priority) as f64) * (1u64 << 40) as f64 + seq as f64
}

impl TaskBroker {
    pub async fn connect(
        redis_url: &str,
        audit: TaskAuditRepository,
        depth_cap: u64,
    ) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Configuration(format!("Invalid REDIS_URL: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        log::info!("Task broker connected to redis at {}", redis_url);
        Ok(Self { conn, audit, depth_cap })
    }

    pub async fn depth(&self, queue: QueueName) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let n: u64 = conn.zcard(ready_key(queue)).await?;
        Ok(n)
    }

    /// Enqueue a work item. Fails fast with `QueueFull` above the
    /// high-water mark so producers can surface a retriable 503.
    pub async fn enqueue(&self, task: &TaskEnvelope) -> Result<(), AppError> {
        let mut conn = self.conn.clone();

        let depth: u64 = conn.zcard(ready_key(task.queue)).await?;
        if depth >= self.depth_cap {
            return Err(AppError::QueueFull(format!(
                "queue '{}' is at capacity ({})",
                task.queue.as_str(),
                depth
            )));
        }

        let seq: u64 = conn.incr(format!("{}:seq", KEY_PREFIX), 1).await?;
        let body = serde_json::to_string(task)?;
        let _: () = conn.set(task_key(&task.id), body).await?;
        let _: () = conn
            .zadd(ready_key(task.queue), task.id.to_string(), ready_score(task.priority, seq))
            .await?;

        log::debug!(
            "Enqueued task {} kind={} queue={} attempt={}",
            task.id,
            task.kind.as_str(),
            task.queue.as_str(),
            task.attempt
        );
        Ok(())
    }

    /// Lease the next ready item, scanning queues in drain order. The lease
    /// expires after the task's hard time limit.
    pub async fn lease(&self) -> Result<Option<TaskEnvelope>, AppError> {
        let mut conn = self.conn.clone();

        for queue in QueueName::DRAIN_ORDER {
            self.promote_scheduled(queue).await?;

            let popped: Vec<(String, f64)> = conn.zpopmin(ready_key(queue), 1).await?;
            let Some((id_str, _)) = popped.into_iter().next() else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(&id_str) else {
                log::warn!("Dropping malformed task id '{}' from queue {}", id_str, queue.as_str());
                continue;
            };

            let body: Option<String> = conn.get(task_key(&id)).await?;
            let Some(body) = body else {
                log::warn!("Task {} vanished between pop and fetch", id);
                continue;
            };
            let task: TaskEnvelope = serde_json::from_str(&body)?;

            // Late ack: park the lease under its visibility deadline.
            let deadline = Utc::now().timestamp() + task.hard_time_limit_secs as i64;
            let _: () = conn
                .zadd(processing_key(), id.to_string(), deadline as f64)
                .await?;

            // Tasks of a deleted job are dropped on lease.
            if let Some(job_id) = task.job_id() {
                let revoked: bool = conn.exists(revoked_key(&job_id)).await?;
                if revoked {
                    log::info!("Dropping revoked task {} for job {}", id, job_id);
                    self.ack(&id).await?;
                    continue;
                }
            }

            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Acknowledge a successful outcome, removing the lease and payload.
    pub async fn ack(&self, task_id: &Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(processing_key(), task_id.to_string()).await?;
        let _: () = conn.del(task_key(task_id)).await?;
        Ok(())
    }

    /// Report a failed attempt. Retryable failures re-enter the queue after
    /// backoff; exhausted items go to the dead-letter queue with an audit
    /// entry.
    pub async fn fail(&self, task: &TaskEnvelope, error: &AppError) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(processing_key(), task.id.to_string()).await?;

        let mut retried = task.clone();
        retried.attempt += 1;

        if error.is_permanent() || retried.attempt >= retried.retry.max_attempts {
            self.dead_letter(&retried, error).await?;
            return Ok(());
        }

        let delay = retried.retry.backoff_secs(retried.attempt);
        let ready_at = Utc::now().timestamp() + delay as i64;
        let body = serde_json::to_string(&retried)?;
        let _: () = conn.set(task_key(&retried.id), body).await?;
        let _: () = conn
            .zadd(scheduled_key(retried.queue), retried.id.to_string(), ready_at as f64)
            .await?;

        log::warn!(
            "Task {} attempt {} failed ({}); retrying in {}s",
            retried.id,
            retried.attempt,
            error,
            delay
        );
        Ok(())
    }

    async fn dead_letter(&self, task: &TaskEnvelope, error: &AppError) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(task)?;
        let _: () = conn.lpush(dead_key(), body).await?;
        let _: () = conn.del(task_key(&task.id)).await?;

        self.audit
            .record_dead_letter(
                &task.id,
                task.queue.as_str(),
                task.kind.as_str(),
                task.attempt as i32,
                &error.to_string(),
                task.payload.clone(),
            )
            .await?;

        log::error!(
            "Task {} kind={} dead-lettered after {} attempts: {}",
            task.id,
            task.kind.as_str(),
            task.attempt,
            error
        );
        Ok(())
    }

    /// Moves due scheduled retries into the ready set.
    async fn promote_scheduled(&self, queue: QueueName) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp() as f64;
        let due: Vec<String> = conn
            .zrangebyscore(scheduled_key(queue), "-inf", now)
            .await?;
        for id_str in due {
            let _: () = conn.zrem(scheduled_key(queue), &id_str).await?;
            let seq: u64 = conn.incr(format!("{}:seq", KEY_PREFIX), 1).await?;
            if let Ok(id) = Uuid::parse_str(&id_str) {
                let body: Option<String> = conn.get(task_key(&id)).await?;
                if let Some(body) = body {
                    if let Ok(task) = serde_json::from_str::<TaskEnvelope>(&body) {
                        let _: () = conn
                            .zadd(ready_key(queue), id_str, ready_score(task.priority, seq))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Janitor sweep: leases past their visibility deadline re-enter their
    /// queue as a retry attempt (worker-lost semantics).
    pub async fn requeue_expired(&self) -> Result<usize, AppError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp() as f64;
        let expired: Vec<String> = conn
            .zrangebyscore(processing_key(), "-inf", now)
            .await?;

        let mut requeued = 0;
        for id_str in expired {
            let _: () = conn.zrem(processing_key(), &id_str).await?;
            let Ok(id) = Uuid::parse_str(&id_str) else { continue };
            let body: Option<String> = conn.get(task_key(&id)).await?;
            let Some(body) = body else { continue };
            let Ok(task) = serde_json::from_str::<TaskEnvelope>(&body) else { continue };

            log::warn!(
                "Lease expired for task {} kind={}; returning to queue",
                task.id,
                task.kind.as_str()
            );
            self.fail(&task, &AppError::Timeout("worker lost".to_string())).await?;
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Revoke every outstanding task of a job (used by job deletion).
    /// Leased and queued items are dropped the next time they surface.
    pub async fn revoke_job(&self, job_id: &Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(revoked_key(job_id), 1u8, 24 * 3600).await?;
        log::info!("Revoked outstanding tasks for job {}", job_id);
        Ok(())
    }

    /// Pop everything off the dead-letter queue back into circulation.
    /// Used by the admin CLI.
    pub async fn requeue_dead(&self) -> Result<usize, AppError> {
        let mut conn = self.conn.clone();
        let mut count = 0;
        loop {
            let body: Option<String> = conn.rpop(dead_key(), None).await?;
            let Some(body) = body else { break };
            let mut task: TaskEnvelope = serde_json::from_str(&body)?;
            task.attempt = 0;
            self.enqueue(&task).await?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_score_orders_priority_before_fifo() {
        // Higher priority must always sort lower than any later sequence
        // of a lower priority.
        assert!(ready_score(10, 1_000_000) < ready_score(0, 1));
        // FIFO within equal priority.
        assert!(ready_score(5, 1) < ready_score(5, 2));
    }

    #[test]
    fn test_ready_score_is_exact_for_large_sequences() {
        let a = ready_score(0, (1u64 << 40) - 2);
        let b = ready_score(0, (1u64 << 40) - 1);
        assert!(a < b);
    }
}
