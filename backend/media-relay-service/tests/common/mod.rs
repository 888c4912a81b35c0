//! Test doubles for the pipeline capabilities and the queue backend
//!
//! Artifacts are sparse files, so "large" media costs no disk space.

#![allow(dead_code)]

use async_trait::async_trait;
use media_core::{Job, MediaArtifact, MediaFormat};
use media_relay_service::error::{
    DeliveryError, ErrorKind, FetchError, ServiceError, ServiceResult, SummaryError,
    TransformError,
};
use media_relay_service::services::pipeline::{
    CaptionSummarizer, FetchedMedia, MediaFetcher, MediaPipeline, MediaTransformer,
    PipelineSettings,
};
use media_relay_service::services::{DeliveryAdapter, DeliveryClient, InMemoryJobQueue, JobQueue};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MB: u64 = 1024 * 1024;
pub const REEL_URL: &str = "https://www.instagram.com/reel/C8abc123/";

fn sparse_file(path: &Path, size: u64) -> std::io::Result<()> {
    let file = File::create(path)?;
    file.set_len(size)?;
    Ok(())
}

/// Fetcher that "downloads" a sparse file of a fixed size
pub struct FakeFetcher {
    size_bytes: u64,
    description: Option<String>,
    failure: Option<ErrorKind>,
    urls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_size(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            description: Some("Sunset over the bay".to_string()),
            failure: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every fetch with the given classification
    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::with_size(0)
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError> {
        self.urls.lock().unwrap().push(url.to_string());

        if let Some(kind) = self.failure {
            return Err(match kind {
                ErrorKind::InvalidUrl => FetchError::InvalidUrl(url.to_string()),
                ErrorKind::FetchTimeout => FetchError::Timeout(Duration::from_secs(300)),
                ErrorKind::FetchNetworkError => FetchError::Network("connection reset".into()),
                _ => FetchError::MediaUnavailable("private account".into()),
            });
        }

        let workdir = tempfile::tempdir().map_err(|e| FetchError::Network(e.to_string()))?;
        let path = workdir.path().join("video.mp4");
        sparse_file(&path, self.size_bytes).map_err(|e| FetchError::Network(e.to_string()))?;

        let artifact = MediaArtifact::new(url, path, self.size_bytes, MediaFormat::Video);
        Ok(FetchedMedia::new(artifact, self.description.clone(), workdir))
    }
}

/// Transformer that writes a sparse `.gif` of a fixed size next to the source
pub struct FakeTransformer {
    output_bytes: u64,
    fail: bool,
    calls: Mutex<usize>,
}

impl FakeTransformer {
    pub fn producing(output_bytes: u64) -> Self {
        Self {
            output_bytes,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::producing(0)
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MediaTransformer for FakeTransformer {
    async fn to_animation(
        &self,
        source: &MediaArtifact,
        _max_bytes: u64,
    ) -> Result<MediaArtifact, TransformError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(TransformError("ffmpeg exited with status 1".into()));
        }

        let path = source.path.with_extension("gif");
        sparse_file(&path, self.output_bytes).map_err(|e| TransformError(e.to_string()))?;
        Ok(
            MediaArtifact::new(&source.source_url, path, self.output_bytes, MediaFormat::AnimatedImage)
                .with_dimensions(Some((270, 480))),
        )
    }

    async fn probe_dimensions(&self, _source: &MediaArtifact) -> Option<(u32, u32)> {
        Some((1080, 1920))
    }
}

/// Summarizer with a canned reply that records what it was asked about
pub struct FakeSummarizer {
    reply: Option<String>,
    requests: Mutex<Vec<(u64, Option<String>)>>,
}

impl FakeSummarizer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Source size and description of every request
    pub fn requests(&self) -> Vec<(u64, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptionSummarizer for FakeSummarizer {
    async fn summarize(
        &self,
        media: &MediaArtifact,
        description: Option<&str>,
    ) -> Result<String, SummaryError> {
        self.requests
            .lock()
            .unwrap()
            .push((media.size_bytes, description.map(str::to_string)));
        self.reply
            .clone()
            .ok_or_else(|| SummaryError::Request("chat completion returned 429".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMedia {
    pub conversation: String,
    pub format: MediaFormat,
    pub size_bytes: u64,
    pub caption: Option<String>,
    /// Whether the file still existed when it was handed over
    pub file_present: bool,
}

/// Delivery client that records everything sent through it
#[derive(Default)]
pub struct RecordingDelivery {
    media: Mutex<Vec<SentMedia>>,
    texts: Mutex<Vec<(String, String)>>,
    fail_media: bool,
    upload_delay: Option<Duration>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Media uploads fail; text messages still go through
    pub fn rejecting_media() -> Self {
        Self {
            fail_media: true,
            ..Self::default()
        }
    }

    /// Media uploads take `delay` before they are recorded
    pub fn slow(delay: Duration) -> Self {
        Self {
            upload_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn media(&self) -> Vec<SentMedia> {
        self.media.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn send_media(
        &self,
        conversation: &str,
        artifact: &MediaArtifact,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_media {
            return Err(DeliveryError("Request Entity Too Large".into()));
        }
        self.media.lock().unwrap().push(SentMedia {
            conversation: conversation.to_string(),
            format: artifact.format,
            size_bytes: artifact.size_bytes,
            caption: caption.map(str::to_string),
            file_present: artifact.path.exists(),
        });
        Ok(())
    }

    async fn send_text(&self, conversation: &str, text: &str) -> Result<(), DeliveryError> {
        self.texts
            .lock()
            .unwrap()
            .push((conversation.to_string(), text.to_string()));
        Ok(())
    }
}

/// Queue whose backend is gone
pub struct UnreachableQueue;

#[async_trait]
impl JobQueue for UnreachableQueue {
    async fn push(&self, _job: &Job) -> ServiceResult<()> {
        Err(ServiceError::QueueUnavailable("connection refused".into()))
    }

    async fn pop(&self, _timeout: Duration) -> ServiceResult<Option<Job>> {
        Err(ServiceError::QueueUnavailable("connection refused".into()))
    }

    async fn len(&self) -> ServiceResult<usize> {
        Err(ServiceError::QueueUnavailable("connection refused".into()))
    }
}

/// Queue whose backend answers for a while, then drops the connection
pub struct DroppingQueue {
    after: Duration,
}

impl DroppingQueue {
    pub fn after(after: Duration) -> Self {
        Self { after }
    }
}

#[async_trait]
impl JobQueue for DroppingQueue {
    async fn push(&self, _job: &Job) -> ServiceResult<()> {
        Err(ServiceError::QueueUnavailable("connection reset".into()))
    }

    async fn pop(&self, _timeout: Duration) -> ServiceResult<Option<Job>> {
        tokio::time::sleep(self.after).await;
        Err(ServiceError::QueueUnavailable("connection reset".into()))
    }

    async fn len(&self) -> ServiceResult<usize> {
        Err(ServiceError::QueueUnavailable("connection reset".into()))
    }
}

/// Queue that is reachable but answers pops with an error, like a key of
/// the wrong type. After `failures` errors it serves from `inner`.
pub struct RejectingQueue {
    failures: Option<usize>,
    pops: AtomicUsize,
    pub inner: InMemoryJobQueue,
}

impl RejectingQueue {
    pub fn always() -> Self {
        Self {
            failures: None,
            pops: AtomicUsize::new(0),
            inner: InMemoryJobQueue::new(),
        }
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures: Some(failures),
            ..Self::always()
        }
    }

    pub fn pops(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for RejectingQueue {
    async fn push(&self, job: &Job) -> ServiceResult<()> {
        self.inner.push(job).await
    }

    async fn pop(&self, timeout: Duration) -> ServiceResult<Option<Job>> {
        let seen = self.pops.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(limit) if seen >= limit => self.inner.pop(timeout).await,
            _ => Err(ServiceError::Internal(
                "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
            )),
        }
    }

    async fn len(&self) -> ServiceResult<usize> {
        self.inner.len().await
    }
}

pub fn pipeline(
    fetcher: Arc<FakeFetcher>,
    transformer: Arc<FakeTransformer>,
    delivery: Arc<RecordingDelivery>,
) -> Arc<MediaPipeline> {
    Arc::new(MediaPipeline::new(
        fetcher,
        transformer,
        DeliveryAdapter::new(delivery, Duration::from_secs(5)),
        PipelineSettings::default(),
    ))
}

pub fn pipeline_with_summarizer(
    fetcher: Arc<FakeFetcher>,
    transformer: Arc<FakeTransformer>,
    delivery: Arc<RecordingDelivery>,
    summarizer: Arc<FakeSummarizer>,
) -> Arc<MediaPipeline> {
    Arc::new(
        MediaPipeline::new(
            fetcher,
            transformer,
            DeliveryAdapter::new(delivery, Duration::from_secs(5)),
            PipelineSettings::default(),
        )
        .with_summarizer(summarizer),
    )
}
