/// Media fetch stage backed by yt-dlp
use crate::error::FetchError;
use async_trait::async_trait;
use media_core::constants::{FETCH_TIMEOUT_SECS, VIDEO_EXTENSIONS};
use media_core::{MediaArtifact, MediaFormat};
use resilience::{retry_if, with_deadline, RetryConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A fetched artifact together with the work directory that owns its file.
///
/// Dropping this value deletes the directory, including any derived artifact
/// written next to the original.
#[derive(Debug)]
pub struct FetchedMedia {
    pub artifact: MediaArtifact,
    pub description: Option<String>,
    workdir: TempDir,
}

impl FetchedMedia {
    pub fn new(artifact: MediaArtifact, description: Option<String>, workdir: TempDir) -> Self {
        Self {
            artifact,
            description,
            workdir,
        }
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError>;
}

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary: PathBuf,
    /// Netscape cookies file; copied per job, never modified in place
    pub cookies_file: Option<PathBuf>,
    /// Parent for per-job work directories, system temp when unset
    pub work_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            cookies_file: None,
            work_dir: None,
            timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }
}

/// Downloads the best video+audio of a post and merges it to mp4.
pub struct YtDlpFetcher {
    config: YtDlpConfig,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn create_workdir(&self) -> Result<TempDir, FetchError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("media-relay-");
            builder
        };
        let workdir = match &self.config.work_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        workdir.map_err(|e| FetchError::Network(format!("cannot create work directory: {e}")))
    }

    async fn stage_cookies(&self, workdir: &Path) -> Option<PathBuf> {
        let source = self.config.cookies_file.as_ref()?;
        let target = workdir.join("cookies.txt");
        match tokio::fs::copy(source, &target).await {
            Ok(_) => Some(target),
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Cookies file unusable, fetching without it");
                None
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        let workdir = self.create_workdir()?;
        let template = workdir.path().join("%(id)s.%(ext)s");

        let mut command = Command::new(&self.config.binary);
        command
            .args(["--no-playlist", "--no-progress", "--no-warnings"])
            .args(["-f", "bestvideo+bestaudio/best"])
            .args(["--merge-output-format", "mp4"])
            .arg("--write-info-json")
            .arg("-o")
            .arg(&template)
            .kill_on_drop(true);
        if let Some(cookies) = self.stage_cookies(workdir.path()).await {
            command.arg("--cookies").arg(cookies);
        }
        command.arg("--").arg(url);

        let output = command.output().await.map_err(|e| {
            FetchError::Network(format!(
                "failed to run {}: {e}",
                self.config.binary.display()
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let video = find_video(workdir.path())
            .await
            .ok_or_else(|| FetchError::MediaUnavailable("no video file produced".into()))?;
        let size_bytes = tokio::fs::metadata(&video)
            .await
            .map_err(|e| FetchError::MediaUnavailable(format!("downloaded file unreadable: {e}")))?
            .len();
        let description = read_description(workdir.path()).await;

        debug!(url, path = %video.display(), size_bytes, "Extractor finished");

        Ok(FetchedMedia::new(
            MediaArtifact::new(url, video, size_bytes, MediaFormat::Video),
            description,
            workdir,
        ))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        let timeout = self.config.timeout;
        let fetched = retry_if(
            &self.config.retry,
            |_attempt| async move {
                with_deadline(timeout, self.fetch_once(url))
                    .await
                    .map_err(|e| e.into_inner_or(FetchError::Timeout))
            },
            FetchError::is_transient,
        )
        .await?;

        info!(url, size_bytes = fetched.artifact.size_bytes, "Media fetched");
        Ok(fetched)
    }
}

/// Map extractor stderr to a fetch failure.
pub fn classify_failure(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("extractor failed without output")
        .trim()
        .to_string();

    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if contains_any(&["429", "too many requests", "rate-limit", "rate limit", "login required"]) {
        FetchError::Throttled(detail)
    } else if contains_any(&["unsupported url", "is not a valid url", "invalid url"]) {
        FetchError::InvalidUrl(detail)
    } else if contains_any(&[
        "no video",
        "private",
        "not available",
        "unavailable",
        "has been removed",
        "does not exist",
        "404",
    ]) {
        FetchError::MediaUnavailable(detail)
    } else {
        FetchError::Network(detail)
    }
}

/// Largest finished video file in `dir`.
async fn find_video(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(u64, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_video = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_video {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if best.as_ref().map_or(true, |(size, _)| metadata.len() > *size) {
            best = Some((metadata.len(), path));
        }
    }

    best.map(|(_, path)| path)
}

/// Post description from the extractor's info JSON, falling back to its title.
async fn read_description(dir: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.to_string_lossy().ends_with(".info.json") {
            continue;
        }
        let raw = tokio::fs::read(&path).await.ok()?;
        let info: serde_json::Value = serde_json::from_slice(&raw).ok()?;
        return ["description", "title"]
            .iter()
            .filter_map(|field| info[*field].as_str())
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(str::to_string);
    }
    None
}
