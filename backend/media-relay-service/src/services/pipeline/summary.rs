//! Optional caption enrichment
//!
//! Transcribes the audio track of the fetched video and asks a chat model
//! for a short summary followed by ten hashtags. The pipeline treats every
//! failure here as soft and captions with the post description instead.

use crate::error::SummaryError;
use async_trait::async_trait;
use media_core::constants::{SUMMARY_TIMEOUT_SECS, TRANSCRIPTION_MAX_UPLOAD_BYTES};
use media_core::MediaArtifact;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use resilience::with_deadline;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Longest raw model reply used when it does not follow the requested layout
const RAW_REPLY_MAX_CHARS: usize = 2000;

const SUMMARY_PROMPT: &str = "You summarize short social media videos.

Input: a transcript of the video and/or the full description of the post.

Task:
1. Read the transcript and the description.
2. Ignore every hashtag already present in the description.
3. Keep only the relevant subjects, main ideas and useful information.
4. If the description contains a numbered list, fold it into the summary in a clear, structured way.
5. Do not invent information and do not add opinions.
6. Be direct and avoid repetition.

Hashtags (required):
- The first hashtag is the main category of the video, a single word or short expression.
- The other 9 hashtags help find the video later and are based only on its actual content.
- No generic hashtags such as #fyp, #viral or #reels.
- No repeated variations of the same word.
- All 10 start with # and are separated by spaces on a single line.

Output format (required):

Summary:
<one clear paragraph with the central ideas>

Hashtags:
#category #tag2 #tag3 #tag4 #tag5 #tag6 #tag7 #tag8 #tag9 #tag10";

static SUMMARY_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)summary\s*:\s*(.+?)(?:hashtags\s*:|\z)").expect("Invalid summary regex")
});

static HASHTAGS_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)hashtags\s*:\s*(.+)").expect("Invalid hashtags regex"));

#[async_trait]
pub trait CaptionSummarizer: Send + Sync {
    /// Caption text for `media`, written from its audio and the post description.
    async fn summarize(
        &self,
        media: &MediaArtifact,
        description: Option<&str>,
    ) -> Result<String, SummaryError>;
}

#[derive(Clone)]
pub struct OpenAiSummaryConfig {
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub summary_model: String,
    pub transcription_model: String,
    pub ffmpeg: PathBuf,
    /// Budget for transcription and summary together
    pub timeout: Duration,
}

impl Default for OpenAiSummaryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            transcription_model: "whisper-1".to_string(),
            ffmpeg: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(SUMMARY_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for OpenAiSummaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSummaryConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("summary_model", &self.summary_model)
            .field("transcription_model", &self.transcription_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Summarizer backed by the OpenAI transcription and chat completion endpoints
pub struct OpenAiSummarizer {
    client: HttpClient,
    config: OpenAiSummaryConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: OpenAiSummaryConfig) -> Result<Self, SummaryError> {
        let client = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SummaryError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn summarize_inner(
        &self,
        media: &MediaArtifact,
        description: Option<&str>,
    ) -> Result<String, SummaryError> {
        let transcript = match self.transcribe(media).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Transcription failed, summarizing description only");
                None
            }
        };

        let content = summary_input(transcript.as_deref(), description)
            .ok_or(SummaryError::NothingToSummarize)?;
        let reply = self.complete(&content).await?;
        parse_summary_reply(&reply).ok_or(SummaryError::EmptyResponse)
    }

    async fn transcribe(&self, media: &MediaArtifact) -> Result<Option<String>, SummaryError> {
        let upload = if media.size_bytes > TRANSCRIPTION_MAX_UPLOAD_BYTES {
            self.extract_audio(&media.path).await?
        } else {
            media.path.clone()
        };

        let bytes = tokio::fs::read(&upload)
            .await
            .map_err(|e| SummaryError::Audio(format!("cannot read {}: {e}", upload.display())))?;
        let file_name = upload
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        debug!(file = %file_name, bytes = bytes.len(), "Uploading for transcription");

        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "text")
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SummaryError::Request(format!("transcription: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummaryError::Request(format!(
                "transcription returned {status}: {body}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SummaryError::Request(format!("transcription body: {e}")))?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    /// Mono low-bitrate mp3 next to the video, inside the job's work directory.
    async fn extract_audio(&self, video: &Path) -> Result<PathBuf, SummaryError> {
        let output = video.with_extension("mp3");
        let result = Command::new(&self.config.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(video)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "48k"])
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SummaryError::Audio(format!("failed to run {}: {e}", self.config.ffmpeg.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(SummaryError::Audio(format!("ffmpeg error: {}", stderr.trim())));
        }
        Ok(output)
    }

    async fn complete(&self, content: &str) -> Result<String, SummaryError> {
        let request = ChatRequest {
            model: &self.config.summary_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SUMMARY_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
            max_tokens: 1024,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SummaryError::Request(format!("chat completion: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummaryError::Request(format!(
                "chat completion returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummaryError::Request(format!("chat completion body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(SummaryError::EmptyResponse)
    }
}

#[async_trait]
impl CaptionSummarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        media: &MediaArtifact,
        description: Option<&str>,
    ) -> Result<String, SummaryError> {
        let summary = with_deadline(self.config.timeout, self.summarize_inner(media, description))
            .await
            .map_err(|e| e.into_inner_or(SummaryError::Timeout))?;
        info!(chars = summary.chars().count(), "Caption summary ready");
        Ok(summary)
    }
}

/// User message for the model, or `None` when there is neither transcript nor description.
fn summary_input(transcript: Option<&str>, description: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(t) = transcript.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(format!("Video transcript:\n{t}"));
    }
    if let Some(d) = description.map(str::trim).filter(|d| !d.is_empty()) {
        parts.push(format!("Post description:\n{d}"));
    }
    (!parts.is_empty()).then(|| parts.join("\n\n---\n\n"))
}

/// Pull the `Summary:` paragraph and the `Hashtags:` line out of a model reply.
///
/// Returns `"summary\n\n#a #b"` when both are present, whichever one is
/// present otherwise, and the raw reply (capped) when neither header is found.
pub fn parse_summary_reply(reply: &str) -> Option<String> {
    let reply = reply.trim();
    if reply.is_empty() {
        return None;
    }

    let summary = SUMMARY_SECTION
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    let hashtags = HASHTAGS_SECTION
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty());

    Some(match (summary, hashtags) {
        (Some(s), Some(h)) => format!("{s}\n\n{h}"),
        (Some(s), None) => s,
        (None, Some(h)) => h,
        (None, None) => reply.chars().take(RAW_REPLY_MAX_CHARS).collect(),
    })
}
