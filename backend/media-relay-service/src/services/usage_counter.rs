use crate::error::ServiceResult;
use crate::services::calendar::QuotaCalendar;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};

/// Per-identity, per-day delivery counters.
///
/// Counters only grow within a day and read as 0 once the day has rolled over.
#[async_trait]
pub trait UsageCounterStore: Send + Sync {
    /// Atomically add one and return the new value.
    async fn increment_and_get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64>;

    /// Current value, 0 when nothing was recorded.
    async fn get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64>;
}

/// Redis-backed counters
///
/// Keys: {prefix}:{identity}:{YYYY-MM-DD}
/// TTL: remainder of the day in the quota timezone
///
/// INCR and EXPIRE run in one MULTI block so a key never exists without a TTL.
#[derive(Clone)]
pub struct RedisUsageCounterStore {
    redis: ConnectionManager,
    prefix: String,
    calendar: QuotaCalendar,
}

impl RedisUsageCounterStore {
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>, calendar: QuotaCalendar) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            calendar,
        }
    }

    pub fn key(&self, identity: &str, day: NaiveDate) -> String {
        counter_key(&self.prefix, identity, day)
    }
}

pub fn counter_key(prefix: &str, identity: &str, day: NaiveDate) -> String {
    format!("{}:{}:{}", prefix, identity, day.format("%Y-%m-%d"))
}

#[async_trait]
impl UsageCounterStore for RedisUsageCounterStore {
    async fn increment_and_get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64> {
        let key = self.key(identity, day);
        let ttl = self.calendar.seconds_until_rollover(day, Utc::now());

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, ttl)
            .ignore()
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(count)
    }

    async fn get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64> {
        let key = self.key(identity, day);
        let count: Option<u64> = self.redis.clone().get(&key).await?;
        Ok(count.unwrap_or(0))
    }
}

/// Single-process counters for development and tests
///
/// Entries for days that have already rolled over are purged on write.
#[derive(Default)]
pub struct InMemoryUsageCounterStore {
    counts: DashMap<(String, NaiveDate), u64>,
    calendar: QuotaCalendar,
}

impl InMemoryUsageCounterStore {
    pub fn new(calendar: QuotaCalendar) -> Self {
        Self {
            counts: DashMap::new(),
            calendar,
        }
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        let calendar = self.calendar;
        self.counts
            .retain(|(_, day), _| calendar.rollover_after(*day) > now);
    }
}

#[async_trait]
impl UsageCounterStore for InMemoryUsageCounterStore {
    async fn increment_and_get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64> {
        self.purge_expired();

        let mut entry = self
            .counts
            .entry((identity.to_string(), day))
            .or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn get(&self, identity: &str, day: NaiveDate) -> ServiceResult<u64> {
        if self.calendar.rollover_after(day) <= Utc::now() {
            return Ok(0);
        }
        Ok(self
            .counts
            .get(&(identity.to_string(), day))
            .map(|count| *count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_and_get() {
        let store = InMemoryUsageCounterStore::default();
        let today = QuotaCalendar::utc().today();

        assert_eq!(store.get("42", today).await.unwrap(), 0);
        assert_eq!(store.increment_and_get("42", today).await.unwrap(), 1);
        assert_eq!(store.increment_and_get("42", today).await.unwrap(), 2);
        assert_eq!(store.get("42", today).await.unwrap(), 2);
        assert_eq!(store.get("43", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryUsageCounterStore::default());
        let today = QuotaCalendar::utc().today();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_and_get("42", today).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("42", today).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_next_day_reads_zero() {
        let store = InMemoryUsageCounterStore::default();
        let today = QuotaCalendar::utc().today();
        let tomorrow = today.succ_opt().unwrap();

        for _ in 0..10 {
            store.increment_and_get("42", today).await.unwrap();
        }

        assert_eq!(store.get("42", tomorrow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rolled_over_day_is_expired() {
        let store = InMemoryUsageCounterStore::default();
        let today = QuotaCalendar::utc().today();
        let two_days_ago = today.pred_opt().unwrap().pred_opt().unwrap();

        store.increment_and_get("42", two_days_ago).await.unwrap();
        assert_eq!(store.get("42", two_days_ago).await.unwrap(), 0);

        // the stale entry is purged by the next write
        store.increment_and_get("42", today).await.unwrap();
        assert_eq!(store.counts.len(), 1);
    }

    #[test]
    fn test_redis_key_format() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            counter_key("media_relay:daily", "42", day),
            "media_relay:daily:42:2024-05-01"
        );
    }
}
