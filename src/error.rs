use reqwest::StatusCode;
use thiserror::Error;

/// Retry-relevant classification derived from an error; the orchestrator's
/// policy table keys off this, never off the error variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    RateLimited,
    ServerUnavailable,
    NetworkUnreachable,
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::ServerUnavailable => "server_unavailable",
            ErrorClass::NetworkUnreachable => "network_unreachable",
            ErrorClass::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("no API credential configured")]
    MissingCredential,
    #[error("unsupported media type {0}")]
    UnsupportedMedia(String),
    #[error("upload session init failed: {0}")]
    UploadInit(String),
    #[error("upload transfer failed: {0}")]
    UploadTransfer(String),
    #[error("server-side media processing failed: {0}")]
    Processing(String),
    #[error("server-side media processing timed out")]
    ProcessingTimeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("service unavailable: {0}")]
    ServerUnavailable(String),
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("model returned no usable text")]
    EmptyResponse,
    #[error("content blocked by safety policy: {0}")]
    SafetyBlocked(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("submission cancelled")]
    Cancelled,
    #[error("request rejected: {0}")]
    Fatal(String),
}

impl TranscribeError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            TranscribeError::RateLimited(_) => ErrorClass::RateLimited,
            TranscribeError::ServerUnavailable(_) => ErrorClass::ServerUnavailable,
            TranscribeError::NetworkUnreachable(_) => ErrorClass::NetworkUnreachable,
            _ => ErrorClass::Fatal,
        }
    }

    #[allow(dead_code)]
    pub fn is_retryable(&self) -> bool {
        self.classification() != ErrorClass::Fatal
    }

    /// Short human-readable sentence for the UI. The classification and
    /// attempt count stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TranscribeError::MissingCredential => {
                "No API key is configured. Set GEMINI_API_KEY and try again.".to_string()
            }
            TranscribeError::UnsupportedMedia(mime) => {
                format!("The file type {mime} is not supported for transcription.")
            }
            TranscribeError::UploadInit(_) | TranscribeError::UploadTransfer(_) => {
                "Uploading the media file failed. Check your connection and retry.".to_string()
            }
            TranscribeError::Processing(_) => {
                "The service could not process this media file.".to_string()
            }
            TranscribeError::ProcessingTimeout => {
                "The service took too long to process this media file. Try again later."
                    .to_string()
            }
            TranscribeError::RateLimited(_) => {
                "The service is rate limiting requests. Wait a moment and retry.".to_string()
            }
            TranscribeError::ServerUnavailable(_) => {
                "The transcription service is temporarily unavailable.".to_string()
            }
            TranscribeError::NetworkUnreachable(_) => {
                "Could not reach the transcription service. Check your connection.".to_string()
            }
            TranscribeError::EmptyResponse => {
                "The service returned an empty transcript. Retrying may help.".to_string()
            }
            TranscribeError::SafetyBlocked(_) => {
                "The transcript was blocked by the service's content policy.".to_string()
            }
            TranscribeError::QuotaExceeded(_) => {
                "The daily API quota is exhausted. Quota typically resets at midnight Pacific."
                    .to_string()
            }
            TranscribeError::Cancelled => "The transcription was cancelled.".to_string(),
            TranscribeError::Fatal(detail) => {
                format!("The transcription request was rejected: {detail}")
            }
        }
    }
}

/// Map an upstream HTTP status plus body text to a classified error.
pub fn classify_status(status: StatusCode, body: &str) -> TranscribeError {
    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS {
        if lowered.contains("quota") && lowered.contains("exceeded") {
            return TranscribeError::QuotaExceeded(truncate(body));
        }
        return TranscribeError::RateLimited(truncate(body));
    }
    if status.is_server_error() {
        return TranscribeError::ServerUnavailable(format!("{}: {}", status, truncate(body)));
    }
    if (status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN)
        && lowered.contains("api key")
    {
        return TranscribeError::MissingCredential;
    }
    TranscribeError::Fatal(format!("{}: {}", status, truncate(body)))
}

/// Transport-level failures (connect, timeout, TLS) all read as the network
/// being unreachable for retry purposes.
pub fn classify_transport(err: reqwest::Error) -> TranscribeError {
    TranscribeError::NetworkUnreachable(err.to_string())
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.len() <= LIMIT {
        trimmed.to_string()
    } else {
        let mut end = LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_classifies_as_rate_limited() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, TranscribeError::RateLimited(_)));
        assert_eq!(err.classification(), ErrorClass::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn status_429_with_quota_text_is_terminal() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            "Resource has been exhausted: quota exceeded for this project",
        );
        assert!(matches!(err, TranscribeError::QuotaExceeded(_)));
        assert_eq!(err.classification(), ErrorClass::Fatal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_classify_as_unavailable() {
        for code in [500u16, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_status(status, "upstream exploded");
            assert_eq!(err.classification(), ErrorClass::ServerUnavailable);
        }
    }

    #[test]
    fn bad_api_key_is_missing_credential() {
        let err = classify_status(StatusCode::BAD_REQUEST, "API key not valid");
        assert!(matches!(err, TranscribeError::MissingCredential));
        assert_eq!(err.classification(), ErrorClass::Fatal);
    }

    #[test]
    fn unrecognized_4xx_falls_back_to_fatal() {
        let err = classify_status(StatusCode::NOT_FOUND, "no such model");
        assert!(matches!(err, TranscribeError::Fatal(_)));
    }

    #[test]
    fn upload_errors_are_never_retryable() {
        for err in [
            TranscribeError::UploadInit("x".into()),
            TranscribeError::UploadTransfer("x".into()),
            TranscribeError::Processing("x".into()),
            TranscribeError::ProcessingTimeout,
        ] {
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn user_messages_are_single_sentences() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "quota exceeded");
        assert!(err.user_message().contains("quota"));
    }
}
