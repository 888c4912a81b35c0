/// Video-to-animation transform stage backed by ffmpeg
use crate::error::TransformError;
use async_trait::async_trait;
use media_core::constants::TRANSFORM_TIMEOUT_SECS;
use media_core::{MediaArtifact, MediaFormat};
use resilience::with_deadline;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Encode `source` as an animated image of at most `max_bytes`, keeping its aspect ratio.
    async fn to_animation(
        &self,
        source: &MediaArtifact,
        max_bytes: u64,
    ) -> Result<MediaArtifact, TransformError>;

    /// Display dimensions of a video, when they can be determined.
    async fn probe_dimensions(&self, _source: &MediaArtifact) -> Option<(u32, u32)> {
        None
    }
}

/// One rung of the size-reduction ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationProfile {
    /// Longest side in pixels
    pub max_side: u32,
    pub fps: u32,
    /// Leading seconds of the source that are kept
    pub max_seconds: u32,
    pub colors: u32,
}

#[derive(Debug, Clone)]
pub struct AnimationConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Budget for the whole ladder
    pub timeout: Duration,
    /// Tried in order until the output fits
    pub ladder: Vec<AnimationProfile>,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(TRANSFORM_TIMEOUT_SECS),
            ladder: vec![
                AnimationProfile {
                    max_side: 480,
                    fps: 12,
                    max_seconds: 30,
                    colors: 128,
                },
                AnimationProfile {
                    max_side: 360,
                    fps: 10,
                    max_seconds: 20,
                    colors: 96,
                },
                AnimationProfile {
                    max_side: 270,
                    fps: 8,
                    max_seconds: 15,
                    colors: 64,
                },
                AnimationProfile {
                    max_side: 200,
                    fps: 6,
                    max_seconds: 10,
                    colors: 48,
                },
            ],
        }
    }
}

/// Stateless GIF encoder; each call walks the ladder from the top.
pub struct FfmpegAnimationTransformer {
    config: AnimationConfig,
}

impl FfmpegAnimationTransformer {
    pub fn new(config: AnimationConfig) -> Self {
        Self { config }
    }

    async fn encode_ladder(
        &self,
        source: &MediaArtifact,
        max_bytes: u64,
    ) -> Result<MediaArtifact, TransformError> {
        if self.config.ladder.is_empty() {
            return Err(TransformError("no animation profiles configured".into()));
        }

        let dimensions = self.probe_dimensions(source).await;
        let output = source.path.with_extension("gif");
        let mut last_size = 0;

        for (rung, profile) in self.config.ladder.iter().enumerate() {
            let target = dimensions.map(|(w, h)| fit_within(w, h, profile.max_side));
            self.encode(&source.path, &output, profile, target).await?;

            let size_bytes = tokio::fs::metadata(&output)
                .await
                .map_err(|e| TransformError(format!("encoder produced no output: {e}")))?
                .len();

            if size_bytes <= max_bytes {
                info!(
                    rung,
                    size_bytes,
                    max_side = profile.max_side,
                    fps = profile.fps,
                    "Animation fits delivery limit"
                );
                return Ok(MediaArtifact::new(
                    source.source_url.clone(),
                    output,
                    size_bytes,
                    MediaFormat::AnimatedImage,
                )
                .with_dimensions(target));
            }

            debug!(rung, size_bytes, max_bytes, "Animation too large, stepping down");
            last_size = size_bytes;
        }

        Err(TransformError(format!(
            "animation still {last_size} bytes after {} profiles, limit {max_bytes}",
            self.config.ladder.len()
        )))
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        profile: &AnimationProfile,
        target: Option<(u32, u32)>,
    ) -> Result<(), TransformError> {
        let filter = animation_filter(profile, target);
        let result = Command::new(&self.config.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .arg("-t")
            .arg(profile.max_seconds.to_string())
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(&filter)
            .args(["-loop", "0", "-an"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TransformError(format!("failed to run {}: {e}", self.config.ffmpeg.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TransformError(format!("ffmpeg error: {}", stderr.trim())));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransformer for FfmpegAnimationTransformer {
    async fn to_animation(
        &self,
        source: &MediaArtifact,
        max_bytes: u64,
    ) -> Result<MediaArtifact, TransformError> {
        with_deadline(self.config.timeout, self.encode_ladder(source, max_bytes))
            .await
            .map_err(|e| {
                e.into_inner_or(|d| TransformError(format!("encoder timed out after {d:?}")))
            })
    }

    async fn probe_dimensions(&self, source: &MediaArtifact) -> Option<(u32, u32)> {
        let output = Command::new(&self.config.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
            ])
            .args(["-of", "json"])
            .arg(&source.path)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => parse_probe_output(&output.stdout),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(stderr = %stderr.trim(), "ffprobe failed, sending without dimensions");
                None
            }
            Err(e) => {
                warn!(error = %e, "ffprobe unavailable, sending without dimensions");
                None
            }
        }
    }
}

/// Scale so the longest side is at most `max_side`, preserving aspect ratio.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }

    let ratio = max_side as f64 / longest as f64;
    let scale = |side: u32| ((side as f64 * ratio).round() as u32).max(1);
    if width >= height {
        (max_side, scale(height))
    } else {
        (scale(width), max_side)
    }
}

fn animation_filter(profile: &AnimationProfile, target: Option<(u32, u32)>) -> String {
    let scale = match target {
        Some((w, h)) => format!("scale={w}:{h}:flags=lanczos"),
        None => format!(
            "scale='if(gte(iw,ih),min({m},iw),-2)':'if(gte(iw,ih),-2,min({m},ih))':flags=lanczos",
            m = profile.max_side
        ),
    };
    format!(
        "fps={},{scale},split[a][b];[a]palettegen=max_colors={}[p];[b][p]paletteuse=dither=bayer",
        profile.fps, profile.colors
    )
}

/// Display dimensions from ffprobe JSON, swapping width and height for
/// streams rotated by a quarter turn.
pub fn parse_probe_output(raw: &[u8]) -> Option<(u32, u32)> {
    let probe: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let stream = probe["streams"].as_array()?.first()?;

    let width = u32::try_from(stream["width"].as_u64()?).ok()?;
    let height = u32::try_from(stream["height"].as_u64()?).ok()?;

    let tag_rotation = stream["tags"]["rotate"]
        .as_str()
        .and_then(|r| r.trim().parse::<i64>().ok());
    let side_data_rotation = stream["side_data_list"].as_array().and_then(|list| {
        list.iter()
            .find_map(|entry| entry["rotation"].as_f64().map(|r| r.round() as i64))
    });
    let rotation = tag_rotation.or(side_data_rotation).unwrap_or(0);

    if rotation.rem_euclid(180) == 90 {
        Some((height, width))
    } else {
        Some((width, height))
    }
}
