/// Business logic layer for media-relay-service
pub mod backend;
pub mod calendar;
pub mod delivery;
pub mod job_queue;
pub mod pipeline;
pub mod rate_limiter;
pub mod url_extractor;
pub mod usage_counter;

pub use backend::Backend;
pub use calendar::QuotaCalendar;
pub use delivery::{DeliveryAdapter, DeliveryClient};
pub use job_queue::{InMemoryJobQueue, JobQueue, RedisJobQueue};
pub use pipeline::{DeliveryReceipt, MediaPipeline, PipelineSettings, SizeDecision};
pub use rate_limiter::{Admission, RateLimiter, TierDirectory};
pub use url_extractor::extract_media_url;
pub use usage_counter::{InMemoryUsageCounterStore, RedisUsageCounterStore, UsageCounterStore};
