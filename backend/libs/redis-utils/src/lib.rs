use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redis connections for the relay.
///
/// `manager()` hands out clones of one multiplexed connection for short
/// commands. Blocking commands such as `BRPOP` must use `dedicated()`, since
/// they hold the connection until they return.
pub struct RedisPool {
    client: Client,
    manager: ConnectionManager,
    label: String,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let info = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let client = Client::open(info).context("failed to construct Redis client")?;
        let label = redact_url(redis_url);

        let manager = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone()))
            .await
            .with_context(|| format!("timed out connecting to Redis at {label}"))?
            .context("failed to initialize Redis connection manager")?;

        info!(redis = %label, "Redis connection established");

        Ok(Self {
            client,
            manager,
            label,
        })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Open a connection that no other component shares.
    pub async fn dedicated(&self) -> Result<ConnectionManager> {
        timeout(CONNECT_TIMEOUT, ConnectionManager::new(self.client.clone()))
            .await
            .with_context(|| format!("timed out opening dedicated connection to {}", self.label))?
            .context("failed to open dedicated Redis connection")
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        anyhow::ensure!(reply == "PONG", "unexpected PING reply: {reply}");
        Ok(())
    }

    /// Connection target with credentials removed, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Strip the userinfo section from a Redis URL so it can be logged.
pub fn redact_url(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &raw[..scheme_end], &raw[at + 1..])
        }
        _ => raw.to_string(),
    }
}
