use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::services::calendar::QuotaCalendar;
use crate::services::job_queue::{InMemoryJobQueue, JobQueue, RedisJobQueue};
use crate::services::usage_counter::{
    InMemoryUsageCounterStore, RedisUsageCounterStore, UsageCounterStore,
};
use anyhow::{Context, Result};
use redis_utils::RedisPool;
use std::sync::Arc;
use tracing::{info, warn};

enum Storage {
    Redis { pool: RedisPool, queue_key: String },
    InMemory,
}

/// Counter store and queue, either on Redis or in-process.
pub struct Backend {
    storage: Storage,
    counters: Arc<dyn UsageCounterStore>,
    queue: Arc<dyn JobQueue>,
}

impl Backend {
    pub async fn connect(config: &Config, calendar: QuotaCalendar) -> Result<Self> {
        let Some(url) = config.redis.url.as_deref() else {
            warn!("REDIS_URL not set, using in-process queue and counters (not durable)");
            return Ok(Self::in_memory(calendar));
        };

        let pool = RedisPool::connect(url)
            .await
            .context("failed to connect to Redis")?;
        pool.ping().await?;
        info!(redis = pool.label(), queue = %config.queue.key, "Using Redis backend");

        let counters = Arc::new(RedisUsageCounterStore::new(
            pool.manager(),
            config.quota.counter_prefix.clone(),
            calendar,
        ));
        let queue = Arc::new(RedisJobQueue::new(pool.manager(), config.queue.key.clone()));

        Ok(Self {
            storage: Storage::Redis {
                pool,
                queue_key: config.queue.key.clone(),
            },
            counters,
            queue,
        })
    }

    pub fn in_memory(calendar: QuotaCalendar) -> Self {
        Self {
            storage: Storage::InMemory,
            counters: Arc::new(InMemoryUsageCounterStore::new(calendar)),
            queue: Arc::new(InMemoryJobQueue::new()),
        }
    }

    pub fn counters(&self) -> Arc<dyn UsageCounterStore> {
        self.counters.clone()
    }

    /// Queue handle for producers and health checks.
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Queue handle for one consumer. On Redis this owns a separate
    /// connection, since BRPOP blocks the connection it runs on.
    pub async fn consumer_queue(&self) -> ServiceResult<Arc<dyn JobQueue>> {
        match &self.storage {
            Storage::Redis { pool, queue_key } => {
                let conn = pool
                    .dedicated()
                    .await
                    .map_err(|e| ServiceError::QueueUnavailable(format!("{e:#}")))?;
                Ok(Arc::new(RedisJobQueue::new(conn, queue_key.clone())))
            }
            Storage::InMemory => Ok(self.queue.clone()),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.storage, Storage::Redis { .. })
    }
}
