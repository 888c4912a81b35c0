use crate::error::DeliveryError;
use async_trait::async_trait;
use media_core::MediaArtifact;
use resilience::with_deadline;
use std::sync::Arc;
use std::time::Duration;

/// Outbound chat channel.
///
/// Conversations are addressed by the identity string the front-end put on the job.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send_media(
        &self,
        conversation: &str,
        artifact: &MediaArtifact,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;

    async fn send_text(&self, conversation: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Injected delivery capability with a deadline on every send
#[derive(Clone)]
pub struct DeliveryAdapter {
    client: Arc<dyn DeliveryClient>,
    timeout: Duration,
}

impl DeliveryAdapter {
    pub fn new(client: Arc<dyn DeliveryClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn deliver(
        &self,
        conversation: &str,
        artifact: &MediaArtifact,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        with_deadline(
            self.timeout,
            self.client.send_media(conversation, artifact, caption),
        )
        .await
        .map_err(|e| e.into_inner_or(|d| DeliveryError(format!("upload timed out after {d:?}"))))
    }

    pub async fn notify(&self, conversation: &str, text: &str) -> Result<(), DeliveryError> {
        with_deadline(self.timeout, self.client.send_text(conversation, text))
            .await
            .map_err(|e| e.into_inner_or(|d| DeliveryError(format!("message timed out after {d:?}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_core::MediaFormat;

    struct SlowClient;

    #[async_trait]
    impl DeliveryClient for SlowClient {
        async fn send_media(
            &self,
            _conversation: &str,
            _artifact: &MediaArtifact,
            _caption: Option<&str>,
        ) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        async fn send_text(&self, _conversation: &str, _text: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError("bot was blocked by the user".into()))
        }
    }

    #[tokio::test]
    async fn test_deliver_times_out() {
        let adapter = DeliveryAdapter::new(Arc::new(SlowClient), Duration::from_millis(20));
        let artifact = MediaArtifact::new("https://x", "/tmp/a.mp4", 1, MediaFormat::Video);

        let err = adapter.deliver("1", &artifact, None).await.unwrap_err();
        assert!(err.0.contains("timed out"));
    }

    #[tokio::test]
    async fn test_notify_passes_client_error_through() {
        let adapter = DeliveryAdapter::new(Arc::new(SlowClient), Duration::from_secs(1));
        let err = adapter.notify("1", "hello").await.unwrap_err();
        assert_eq!(err.0, "bot was blocked by the user");
    }
}
