//! Media relay constants

/// Largest artifact the chat channel accepts (50 MiB)
pub const MAX_DELIVERY_BYTES: u64 = 50 * 1024 * 1024;

/// Deliveries allowed per standard-tier identity per calendar day
pub const DEFAULT_DAILY_QUOTA: u32 = 10;

/// Caption ceiling imposed by the chat channel
pub const CAPTION_MAX_CHARS: usize = 1024;

/// Extensions the extractor may produce for a merged video
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov"];

/// Redis list holding pending jobs
pub const DEFAULT_QUEUE_KEY: &str = "media_relay:download_queue";

/// Prefix of per-day usage counter keys
pub const DEFAULT_COUNTER_PREFIX: &str = "media_relay:daily";

/// Extractor timeout (5 minutes)
pub const FETCH_TIMEOUT_SECS: u64 = 5 * 60;

/// Animation encoder timeout (10 minutes)
pub const TRANSFORM_TIMEOUT_SECS: u64 = 10 * 60;

/// Upload to the chat channel timeout (2 minutes)
pub const DELIVERY_TIMEOUT_SECS: u64 = 2 * 60;

/// Caption summary timeout, transcription included (3 minutes)
pub const SUMMARY_TIMEOUT_SECS: u64 = 3 * 60;

/// Largest upload the transcription endpoint accepts; bigger videos send only their audio
pub const TRANSCRIPTION_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;
