/// Error types for media-relay-service
use std::time::Duration;
use thiserror::Error;

/// Failure classification shown to the requester.
///
/// The user only ever sees `user_message()`; the underlying cause goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUrl,
    MediaUnavailable,
    FetchTimeout,
    FetchNetworkError,
    ConversionError,
    DeliveryError,
    RateLimitExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::MediaUnavailable => "media_unavailable",
            ErrorKind::FetchTimeout => "fetch_timeout",
            ErrorKind::FetchNetworkError => "fetch_network_error",
            ErrorKind::ConversionError => "conversion_error",
            ErrorKind::DeliveryError => "delivery_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => {
                "That link doesn't look like a supported post. Please check it and send it again."
            }
            ErrorKind::MediaUnavailable => {
                "This media is unavailable. The post may be private, deleted, or have no video."
            }
            ErrorKind::FetchTimeout => {
                "Downloading took too long. Please try again in a little while."
            }
            ErrorKind::FetchNetworkError => {
                "Couldn't download this media right now. Please try again later."
            }
            ErrorKind::ConversionError => {
                "This video is too large to send and couldn't be reduced. Try another link."
            }
            ErrorKind::DeliveryError => {
                "The media was downloaded but couldn't be sent. Please try again."
            }
            ErrorKind::RateLimitExceeded => "Daily limit reached. Try again tomorrow.",
        }
    }
}

/// Failure of the fetch stage
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Fetch network error: {0}")]
    Network(String),

    /// Upstream throttling; retried inside the fetch stage, then reported as a network error
    #[error("Upstream throttled request: {0}")]
    Throttled(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            FetchError::MediaUnavailable(_) => ErrorKind::MediaUnavailable,
            FetchError::Timeout(_) => ErrorKind::FetchTimeout,
            FetchError::Network(_) | FetchError::Throttled(_) => ErrorKind::FetchNetworkError,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Throttled(_))
    }
}

/// Failure of the transform stage
#[derive(Error, Debug)]
#[error("Conversion failed: {0}")]
pub struct TransformError(pub String);

/// Failure of the delivery stage
#[derive(Error, Debug)]
#[error("Delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Failure of the optional caption summary; the pipeline falls back to the description
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Audio extraction failed: {0}")]
    Audio(String),

    #[error("Summary request failed: {0}")]
    Request(String),

    #[error("Summary timed out after {0:?}")]
    Timeout(Duration),

    #[error("Nothing to summarize")]
    NothingToSummarize,

    #[error("Model returned no summary")]
    EmptyResponse,
}

/// Terminal failure of a job inside the media pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Transform(_) => ErrorKind::ConversionError,
            PipelineError::Delivery(_) => ErrorKind::DeliveryError,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

/// Infrastructure errors: queue backend, counters, configuration
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Queue backend unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the queue backend itself is gone, as opposed to a bad payload.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ServiceError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            ServiceError::QueueUnavailable(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_classify() {
        assert_eq!(
            FetchError::InvalidUrl("x".into()).kind(),
            ErrorKind::InvalidUrl
        );
        assert_eq!(
            FetchError::MediaUnavailable("gone".into()).kind(),
            ErrorKind::MediaUnavailable
        );
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::FetchTimeout
        );
        assert_eq!(
            FetchError::Throttled("429".into()).kind(),
            ErrorKind::FetchNetworkError
        );
    }

    #[test]
    fn test_only_throttling_is_transient() {
        assert!(FetchError::Throttled("429".into()).is_transient());
        assert!(!FetchError::Network("reset".into()).is_transient());
        assert!(!FetchError::MediaUnavailable("private".into()).is_transient());
    }

    #[test]
    fn test_pipeline_error_kinds() {
        let err: PipelineError = TransformError("still 70MB".into()).into();
        assert_eq!(err.kind(), ErrorKind::ConversionError);

        let err: PipelineError = DeliveryError("chat not found".into()).into();
        assert_eq!(err.kind(), ErrorKind::DeliveryError);
    }

    #[test]
    fn test_user_messages_hide_raw_cause() {
        let err: PipelineError = FetchError::Network("ECONNRESET at 10.0.0.3:443".into()).into();
        assert!(!err.user_message().contains("ECONNRESET"));
        assert!(err.to_string().contains("ECONNRESET"));
    }

    #[test]
    fn test_every_kind_has_message() {
        let kinds = [
            ErrorKind::InvalidUrl,
            ErrorKind::MediaUnavailable,
            ErrorKind::FetchTimeout,
            ErrorKind::FetchNetworkError,
            ErrorKind::ConversionError,
            ErrorKind::DeliveryError,
            ErrorKind::RateLimitExceeded,
        ];
        for kind in kinds {
            assert!(!kind.user_message().is_empty());
            assert!(!kind.as_str().is_empty());
        }
    }

    #[test]
    fn test_queue_unavailable_is_connectivity() {
        assert!(ServiceError::QueueUnavailable("closed".into()).is_connectivity());
        assert!(!ServiceError::Internal("oops".into()).is_connectivity());
    }
}
