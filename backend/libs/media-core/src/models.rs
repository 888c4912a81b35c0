//! Core relay data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One queued download request
///
/// Serialized as-is onto the queue, so field names are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Where the result is sent
    pub conversation_identity: String,
    /// Whose quota is charged
    pub requester_identity: String,
    pub url: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl Job {
    pub fn new(
        conversation_identity: impl Into<String>,
        requester_identity: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_identity: conversation_identity.into(),
            requester_identity: requester_identity.into(),
            url: url.into(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }
}

/// Format of a deliverable artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaFormat {
    Video,
    AnimatedImage,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Video => "video",
            MediaFormat::AnimatedImage => "animated-image",
        }
    }
}

/// Transient media file produced while processing a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    pub source_url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: MediaFormat,
    /// Display width and height, when known
    pub dimensions: Option<(u32, u32)>,
}

impl MediaArtifact {
    pub fn new(
        source_url: impl Into<String>,
        path: impl Into<PathBuf>,
        size_bytes: u64,
        format: MediaFormat,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            path: path.into(),
            size_bytes,
            format,
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Option<(u32, u32)>) -> Self {
        self.dimensions = dimensions;
        self
    }
}

/// Quota tier of a requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityTier {
    #[default]
    Standard,
    Unrestricted,
}

impl IdentityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityTier::Standard => "standard",
            IdentityTier::Unrestricted => "unrestricted",
        }
    }
}
