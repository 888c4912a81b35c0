//! Media pipeline: fetch, decide on size, optionally transform, deliver.
//!
//! Stages for one job:
//!
//! ```text
//! Enqueued -> Fetching -> FetchFailed
//!                      -> Fetched -> SizeDecision -> DeliveringOriginal            -> Delivered | DeliveryFailed
//!                                                 -> Transforming -> DeliveringDerived -> Delivered | DeliveryFailed
//!                                                                 -> ConversionFailed
//! ```
//!
//! With a [`CaptionSummarizer`] attached, the caption body is a generated
//! summary instead of the post description. A failed summary never fails the job.

pub mod caption;
pub mod fetcher;
pub mod summary;
pub mod transcoder;

pub use caption::{build_caption, normalize_hashtags};
pub use fetcher::{FetchedMedia, MediaFetcher, YtDlpConfig, YtDlpFetcher};
pub use summary::{CaptionSummarizer, OpenAiSummarizer, OpenAiSummaryConfig};
pub use transcoder::{AnimationConfig, AnimationProfile, FfmpegAnimationTransformer, MediaTransformer};

use crate::error::{FetchError, PipelineError, TransformError};
use crate::metrics;
use crate::services::delivery::DeliveryAdapter;
use media_core::constants::{CAPTION_MAX_CHARS, MAX_DELIVERY_BYTES};
use media_core::{Job, MediaFormat};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Two-state size decision made once per job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDecision {
    DeliverOriginal,
    Transform,
}

impl SizeDecision {
    pub fn decide(size_bytes: u64, threshold: u64) -> Self {
        if size_bytes <= threshold {
            SizeDecision::DeliverOriginal
        } else {
            SizeDecision::Transform
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Enqueued,
    Fetching,
    FetchFailed,
    Fetched,
    SizeDecision,
    DeliveringOriginal,
    Transforming,
    ConversionFailed,
    DeliveringDerived,
    Delivered,
    DeliveryFailed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Enqueued => "enqueued",
            JobStage::Fetching => "fetching",
            JobStage::FetchFailed => "fetch_failed",
            JobStage::Fetched => "fetched",
            JobStage::SizeDecision => "size_decision",
            JobStage::DeliveringOriginal => "delivering_original",
            JobStage::Transforming => "transforming",
            JobStage::ConversionFailed => "conversion_failed",
            JobStage::DeliveringDerived => "delivering_derived",
            JobStage::Delivered => "delivered",
            JobStage::DeliveryFailed => "delivery_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Size threshold and delivery ceiling in bytes
    pub max_delivery_bytes: u64,
    pub caption_max_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_delivery_bytes: MAX_DELIVERY_BYTES,
            caption_max_chars: CAPTION_MAX_CHARS,
        }
    }
}

/// What reached the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub format: MediaFormat,
    pub size_bytes: u64,
    pub transformed: bool,
    pub caption: Option<String>,
}

pub struct MediaPipeline {
    fetcher: Arc<dyn MediaFetcher>,
    transformer: Arc<dyn MediaTransformer>,
    delivery: DeliveryAdapter,
    settings: PipelineSettings,
    summarizer: Option<Arc<dyn CaptionSummarizer>>,
}

impl MediaPipeline {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transformer: Arc<dyn MediaTransformer>,
        delivery: DeliveryAdapter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            transformer,
            delivery,
            settings,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn CaptionSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn delivery(&self) -> &DeliveryAdapter {
        &self.delivery
    }

    /// Drive one job to a terminal stage. Artifacts are removed before returning.
    pub async fn run(&self, job: &Job) -> Result<DeliveryReceipt, PipelineError> {
        transition(job, JobStage::Enqueued);

        transition(job, JobStage::Fetching);
        let fetched = match timed("fetch", self.fetcher.fetch(&job.url)).await {
            Ok(fetched) => fetched,
            Err(e) => {
                fail(job, JobStage::FetchFailed, &e);
                return Err(e.into());
            }
        };
        transition(job, JobStage::Fetched);

        let result = self.deliver_fetched(job, &fetched).await;
        // removes the original and any derived artifact
        drop(fetched);
        result
    }

    async fn deliver_fetched(
        &self,
        job: &Job,
        fetched: &FetchedMedia,
    ) -> Result<DeliveryReceipt, PipelineError> {
        transition(job, JobStage::SizeDecision);
        let size_bytes = measure(&fetched.artifact.path).await.map_err(|e| {
            let err = FetchError::MediaUnavailable(format!("fetched file unreadable: {e}"));
            fail(job, JobStage::FetchFailed, &err);
            err
        })?;
        let decision = SizeDecision::decide(size_bytes, self.settings.max_delivery_bytes);
        info!(
            job_id = %job.id,
            size_bytes,
            threshold = self.settings.max_delivery_bytes,
            ?decision,
            "Size decision"
        );

        let (artifact, stage) = match decision {
            SizeDecision::DeliverOriginal => {
                let dimensions = self.transformer.probe_dimensions(&fetched.artifact).await;
                let mut artifact = fetched.artifact.clone().with_dimensions(dimensions);
                artifact.format = MediaFormat::Video;
                artifact.size_bytes = size_bytes;
                (artifact, JobStage::DeliveringOriginal)
            }
            SizeDecision::Transform => {
                transition(job, JobStage::Transforming);
                let derived = self.transform(job, fetched).await.map_err(|e| {
                    fail(job, JobStage::ConversionFailed, &e);
                    e
                })?;
                (derived, JobStage::DeliveringDerived)
            }
        };

        let body = self.caption_body(job, fetched).await;
        let caption = build_caption(
            body.as_deref(),
            &job.url,
            artifact.format,
            self.settings.caption_max_chars,
        );

        transition(job, stage);
        if let Err(e) = timed(
            "deliver",
            self.delivery
                .deliver(&job.conversation_identity, &artifact, caption.as_deref()),
        )
        .await
        {
            fail(job, JobStage::DeliveryFailed, &e);
            return Err(e.into());
        }
        transition(job, JobStage::Delivered);

        Ok(DeliveryReceipt {
            format: artifact.format,
            size_bytes: artifact.size_bytes,
            transformed: decision == SizeDecision::Transform,
            caption,
        })
    }

    /// Summary when a summarizer is attached and succeeds, the description otherwise.
    async fn caption_body(&self, job: &Job, fetched: &FetchedMedia) -> Option<String> {
        let description = fetched.description.as_deref();
        let body = match &self.summarizer {
            Some(summarizer) => {
                match timed(
                    "summarize",
                    summarizer.summarize(&fetched.artifact, description),
                )
                .await
                {
                    Ok(summary) if !summary.trim().is_empty() => Some(summary),
                    Ok(_) => {
                        warn!(job_id = %job.id, "Empty caption summary, using description");
                        description.map(str::to_string)
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Caption summary failed, using description");
                        description.map(str::to_string)
                    }
                }
            }
            None => description.map(str::to_string),
        };
        body.map(|text| normalize_hashtags(&text))
    }

    async fn transform(
        &self,
        job: &Job,
        fetched: &FetchedMedia,
    ) -> Result<media_core::MediaArtifact, TransformError> {
        let max_bytes = self.settings.max_delivery_bytes;
        let mut derived = timed(
            "transform",
            self.transformer.to_animation(&fetched.artifact, max_bytes),
        )
        .await?;

        let size_bytes = measure(&derived.path)
            .await
            .map_err(|e| TransformError(format!("derived artifact unreadable: {e}")))?;
        if size_bytes > max_bytes {
            return Err(TransformError(format!(
                "derived artifact is {size_bytes} bytes, limit {max_bytes}"
            )));
        }

        debug!(job_id = %job.id, size_bytes, "Derived artifact ready");
        derived.format = MediaFormat::AnimatedImage;
        derived.size_bytes = size_bytes;
        Ok(derived)
    }
}

fn transition(job: &Job, stage: JobStage) {
    debug!(job_id = %job.id, stage = stage.as_str(), "Stage transition");
}

fn fail(job: &Job, stage: JobStage, error: &dyn std::error::Error) {
    warn!(job_id = %job.id, stage = stage.as_str(), error = %error, "Job failed");
}

async fn measure(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

async fn timed<F, T>(stage: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let output = future.await;
    metrics::observe_stage(stage, started.elapsed().as_secs_f64());
    output
}
