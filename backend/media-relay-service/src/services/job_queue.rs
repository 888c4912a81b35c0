use crate::error::ServiceResult;
use async_trait::async_trait;
use media_core::Job;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error};

/// Global FIFO hand-off between the front-end and the workers.
///
/// A job is removed from the queue when popped, so delivery to workers is
/// at-most-once: a worker that dies mid-job loses that job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: &Job) -> ServiceResult<()>;

    /// Remove the oldest job, waiting up to `timeout` for one to arrive.
    async fn pop(&self, timeout: Duration) -> ServiceResult<Option<Job>>;

    async fn len(&self) -> ServiceResult<usize>;
}

/// Redis list queue
///
/// LPUSH at the head, BRPOP from the tail. BRPOP holds its connection until
/// it returns, so each consumer needs a connection of its own.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: ConnectionManager,
    key: String,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, job: &Job) -> ServiceResult<()> {
        let payload = serde_json::to_string(job)?;
        let depth: i64 = self.redis.clone().lpush(&self.key, payload).await?;
        debug!(job_id = %job.id, depth, "Job enqueued");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> ServiceResult<Option<Job>> {
        // BRPOP only takes whole seconds on older servers, and 0 means block forever
        let timeout_secs = timeout.as_secs().max(1);
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(timeout_secs)
            .query_async(&mut self.redis.clone())
            .await?;

        let Some((_, payload)) = popped else {
            return Ok(None);
        };
        Ok(decode_payload(&payload))
    }

    async fn len(&self) -> ServiceResult<usize> {
        let len: usize = self.redis.clone().llen(&self.key).await?;
        Ok(len)
    }
}

/// A payload that cannot be decoded is already off the queue; it is logged and dropped.
fn decode_payload(payload: &str) -> Option<Job> {
    match serde_json::from_str::<Job>(payload) {
        Ok(job) => Some(job),
        Err(e) => {
            error!(error = %e, payload, "Discarding undecodable job payload");
            None
        }
    }
}

/// In-process queue for development and tests. Not durable.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, job: &Job) -> ServiceResult<()> {
        self.jobs.lock().await.push_back(job.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> ServiceResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> ServiceResult<usize> {
        Ok(self.jobs.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(url: &str) -> Job {
        Job::new("chat-1", "user-1", url)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryJobQueue::new();
        for url in ["https://a", "https://b", "https://c"] {
            queue.push(&job(url)).await.unwrap();
        }

        let mut popped = Vec::new();
        while let Some(job) = queue.pop(Duration::from_millis(10)).await.unwrap() {
            popped.push(job.url);
        }
        assert_eq!(popped, vec!["https://a", "https://b", "https://c"]);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = InMemoryJobQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.pop(Duration::from_millis(50)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_waiting_pop_wakes_on_push() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let pushed = job("https://late");
        queue.push(&pushed).await.unwrap();

        let popped = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.id, pushed.id);
    }

    #[tokio::test]
    async fn test_each_job_delivered_once() {
        let queue = Arc::new(InMemoryJobQueue::new());
        for i in 0..20 {
            queue.push(&job(&format!("https://x/{i}"))).await.unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = queue.pop(Duration::from_millis(20)).await.unwrap() {
                    ids.push(job.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_undecodable_payload_is_dropped() {
        assert!(decode_payload("{not json").is_none());

        let job = job("https://ok");
        let payload = serde_json::to_string(&job).unwrap();
        assert_eq!(decode_payload(&payload), Some(job));
    }
}
