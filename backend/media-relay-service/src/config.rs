/// Configuration management for media-relay-service
///
/// Loads configuration from environment variables with sensible defaults.
/// A variable that is present but malformed is an error, never silently replaced.
use anyhow::{bail, Context, Result};
use media_core::constants;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub quota: QuotaConfig,
    pub pipeline: PipelineConfig,
    pub summary: SummaryConfig,
    pub telegram: TelegramConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    pub json_logs: bool,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// `None` selects the in-process backend
    pub url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub key: String,
    pub pop_timeout: Duration,
    pub workers: usize,
}

#[derive(Clone, Debug)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub counter_prefix: String,
    pub utc_offset_minutes: i32,
    pub unrestricted_identities: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_delivery_bytes: u64,
    pub caption_max_chars: usize,
    pub fetch_timeout: Duration,
    pub transform_timeout: Duration,
    pub delivery_timeout: Duration,
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// Caption summaries; active only when enabled and an API key is present
#[derive(Clone)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub summary_model: String,
    pub transcription_model: String,
    pub timeout: Duration,
}

impl SummaryConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

impl std::fmt::Debug for SummaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("summary_model", &self.summary_model)
            .field("transcription_model", &self.transcription_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let workers: usize = parse_env("WORKER_COUNT", 2)?;
        if workers == 0 {
            bail!("WORKER_COUNT must be at least 1");
        }

        let pop_timeout_secs: u64 = parse_env("QUEUE_POP_TIMEOUT_SECS", 1)?;
        if pop_timeout_secs == 0 {
            bail!("QUEUE_POP_TIMEOUT_SECS must be at least 1");
        }

        let utc_offset_minutes: i32 = parse_env("QUOTA_UTC_OFFSET_MINUTES", 0)?;
        if utc_offset_minutes.abs() >= 24 * 60 {
            bail!("QUOTA_UTC_OFFSET_MINUTES must be within one day of UTC");
        }

        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("TELEGRAM_BOT_TOKEN must be set")?;

        Ok(Config {
            app: AppConfig {
                host: std::env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("HTTP_PORT", 8090)?,
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                json_logs: std::env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            redis: RedisConfig {
                url: optional_env("REDIS_URL"),
            },
            queue: QueueConfig {
                key: std::env::var("QUEUE_KEY")
                    .unwrap_or_else(|_| constants::DEFAULT_QUEUE_KEY.to_string()),
                pop_timeout: Duration::from_secs(pop_timeout_secs),
                workers,
            },
            quota: QuotaConfig {
                daily_limit: parse_env("DAILY_QUOTA", constants::DEFAULT_DAILY_QUOTA)?,
                counter_prefix: std::env::var("COUNTER_PREFIX")
                    .unwrap_or_else(|_| constants::DEFAULT_COUNTER_PREFIX.to_string()),
                utc_offset_minutes,
                unrestricted_identities: parse_identity_list(
                    &std::env::var("UNRESTRICTED_IDENTITIES").unwrap_or_default(),
                ),
            },
            pipeline: PipelineConfig {
                max_delivery_bytes: parse_env(
                    "MAX_DELIVERY_BYTES",
                    constants::MAX_DELIVERY_BYTES,
                )?,
                caption_max_chars: parse_env("CAPTION_MAX_CHARS", constants::CAPTION_MAX_CHARS)?,
                fetch_timeout: Duration::from_secs(parse_env(
                    "FETCH_TIMEOUT_SECS",
                    constants::FETCH_TIMEOUT_SECS,
                )?),
                transform_timeout: Duration::from_secs(parse_env(
                    "TRANSFORM_TIMEOUT_SECS",
                    constants::TRANSFORM_TIMEOUT_SECS,
                )?),
                delivery_timeout: Duration::from_secs(parse_env(
                    "DELIVERY_TIMEOUT_SECS",
                    constants::DELIVERY_TIMEOUT_SECS,
                )?),
                yt_dlp_path: std::env::var("YT_DLP_PATH")
                    .unwrap_or_else(|_| "yt-dlp".to_string())
                    .into(),
                ffmpeg_path: std::env::var("FFMPEG_PATH")
                    .unwrap_or_else(|_| "ffmpeg".to_string())
                    .into(),
                ffprobe_path: std::env::var("FFPROBE_PATH")
                    .unwrap_or_else(|_| "ffprobe".to_string())
                    .into(),
                cookies_file: optional_env("MEDIA_COOKIES_FILE").map(PathBuf::from),
                work_dir: optional_env("MEDIA_WORK_DIR").map(PathBuf::from),
            },
            summary: SummaryConfig {
                enabled: env_flag("ENABLE_VIDEO_SUMMARY", true),
                api_key: optional_env("OPENAI_API_KEY").map(|k| k.trim().to_string()),
                base_url: std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                summary_model: std::env::var("SUMMARY_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                transcription_model: std::env::var("TRANSCRIPTION_MODEL")
                    .unwrap_or_else(|_| "whisper-1".to_string()),
                timeout: Duration::from_secs(parse_env(
                    "SUMMARY_TIMEOUT_SECS",
                    constants::SUMMARY_TIMEOUT_SECS,
                )?),
            },
            telegram: TelegramConfig { bot_token },
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Unset means `default`; only `0`, `false`, `no` and `off` turn a flag off.
fn env_flag(key: &str, default: bool) -> bool {
    match optional_env(key) {
        None => default,
        Some(raw) => !matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key} ({raw:?}): {e}")),
    }
}

/// Split a comma separated identity list, dropping blanks.
pub fn parse_identity_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "TELEGRAM_BOT_TOKEN",
        "REDIS_URL",
        "WORKER_COUNT",
        "QUEUE_POP_TIMEOUT_SECS",
        "DAILY_QUOTA",
        "MAX_DELIVERY_BYTES",
        "UNRESTRICTED_IDENTITIES",
        "QUOTA_UTC_OFFSET_MINUTES",
        "MEDIA_COOKIES_FILE",
        "ENABLE_VIDEO_SUMMARY",
        "OPENAI_API_KEY",
        "SUMMARY_MODEL",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");

        let config = Config::from_env().unwrap();
        assert!(config.redis.url.is_none());
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.quota.daily_limit, 10);
        assert_eq!(config.pipeline.max_delivery_bytes, 50 * 1024 * 1024);
        assert_eq!(config.pipeline.caption_max_chars, 1024);
        assert!(config.quota.unrestricted_identities.is_empty());
        assert!(config.pipeline.cookies_file.is_none());
        assert!(config.summary.enabled);
        assert!(!config.summary.is_active());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("REDIS_URL", "redis://cache:6379");
        std::env::set_var("DAILY_QUOTA", "3");
        std::env::set_var("UNRESTRICTED_IDENTITIES", " 42, ,77 ");
        std::env::set_var("QUOTA_UTC_OFFSET_MINUTES", "-180");

        let config = Config::from_env().unwrap();
        assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.quota.daily_limit, 3);
        assert_eq!(config.quota.unrestricted_identities, vec!["42", "77"]);
        assert_eq!(config.quota.utc_offset_minutes, -180);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_token_is_error() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_malformed_number_names_variable() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("DAILY_QUOTA", "ten");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DAILY_QUOTA"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_workers_rejected() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("WORKER_COUNT", "0");

        assert!(Config::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_pop_timeout_rejected() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("QUEUE_POP_TIMEOUT_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("QUEUE_POP_TIMEOUT_SECS"));

        std::env::set_var("QUEUE_POP_TIMEOUT_SECS", "3");
        let config = Config::from_env().unwrap();
        assert_eq!(config.queue.pop_timeout, Duration::from_secs(3));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_summary_needs_flag_and_key() {
        clear_env();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("SUMMARY_MODEL", "gpt-4o");

        let config = Config::from_env().unwrap();
        assert!(config.summary.is_active());
        assert_eq!(config.summary.summary_model, "gpt-4o");
        assert!(!format!("{:?}", config.summary).contains("sk-test"));

        std::env::set_var("ENABLE_VIDEO_SUMMARY", "false");
        let config = Config::from_env().unwrap();
        assert!(!config.summary.is_active());

        clear_env();
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let telegram = TelegramConfig {
            bot_token: "123:secret".into(),
        };
        assert!(!format!("{telegram:?}").contains("secret"));
    }
}
