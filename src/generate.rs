use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{GENERATE_TIMEOUT_FILE, GENERATE_TIMEOUT_INLINE};
use crate::error::{classify_status, classify_transport, TranscribeError};

/// Media half of a generation request: small files ride inline as base64,
/// large ones cite the reference obtained from the upload client.
#[derive(Debug, Clone)]
pub enum MediaPart {
    Inline { data: String, mime_type: String },
    FileRef { uri: String, mime_type: String },
}

#[derive(Debug, Clone)]
pub struct GenerationPayload {
    pub media: MediaPart,
    pub instruction: String,
}

impl GenerationPayload {
    pub fn timeout(&self) -> Duration {
        match self.media {
            MediaPart::Inline { .. } => GENERATE_TIMEOUT_INLINE,
            MediaPart::FileRef { .. } => GENERATE_TIMEOUT_FILE,
        }
    }

    fn request_body(&self) -> Value {
        let media_part = match &self.media {
            MediaPart::Inline { data, mime_type } => json!({
                "inline_data": { "data": data, "mime_type": mime_type }
            }),
            MediaPart::FileRef { uri, mime_type } => json!({
                "file_data": { "file_uri": uri, "mime_type": mime_type }
            }),
        };
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [media_part, { "text": self.instruction }],
                }
            ]
        })
    }
}

/// Seam between the orchestrator and the wire. One call, one classified
/// outcome; retrying is the orchestrator's business.
pub trait Generate: Send + Sync {
    fn generate(
        &self,
        model: &str,
        api_key: &str,
        payload: &GenerationPayload,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<String, TranscribeError>> + Send;
}

pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn call_once(
        &self,
        model: &str,
        api_key: &str,
        payload: &GenerationPayload,
    ) -> Result<String, TranscribeError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&payload.request_body())
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|err| TranscribeError::Fatal(format!("decoding response: {err}")))?;
        extract_text(&body)
    }
}

impl Generate for GenerationClient {
    async fn generate(
        &self,
        model: &str,
        api_key: &str,
        payload: &GenerationPayload,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, TranscribeError> {
        debug!(model, timeout_secs = timeout.as_secs(), "generateContent");
        tokio::select! {
            _ = cancel.cancelled() => Err(TranscribeError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.call_once(model, api_key, payload)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(TranscribeError::NetworkUnreachable(
                        "generation attempt timed out".to_string(),
                    )),
                }
            }
        }
    }
}

/// Pull the generated text out of the candidates/content/parts nesting.
fn extract_text(body: &Value) -> Result<String, TranscribeError> {
    if let Some(reason) = body
        .get("promptFeedback")
        .and_then(|fb| fb.get("blockReason"))
        .and_then(|r| r.as_str())
    {
        return Err(TranscribeError::SafetyBlocked(reason.to_string()));
    }

    let candidate = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|array| array.first());

    if let Some(reason) = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(|r| r.as_str())
    {
        if reason == "SAFETY" || reason == "PROHIBITED_CONTENT" {
            return Err(TranscribeError::SafetyBlocked(reason.to_string()));
        }
    }

    let text = candidate
        .and_then(|c| c.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(TranscribeError::EmptyResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_joined_candidate_text() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hello" }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_text(&body).unwrap(), "hello\nworld");
    }

    #[test]
    fn empty_candidates_raise_empty_response() {
        let body = json!({ "candidates": [] });
        assert!(matches!(
            extract_text(&body),
            Err(TranscribeError::EmptyResponse)
        ));
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "  " }] } }]
        });
        assert!(matches!(
            extract_text(&body),
            Err(TranscribeError::EmptyResponse)
        ));
    }

    #[test]
    fn prompt_block_reason_is_safety() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(
            extract_text(&body),
            Err(TranscribeError::SafetyBlocked(_))
        ));
    }

    #[test]
    fn safety_finish_reason_is_safety() {
        let body = json!({
            "candidates": [{ "finishReason": "SAFETY", "content": { "parts": [] } }]
        });
        assert!(matches!(
            extract_text(&body),
            Err(TranscribeError::SafetyBlocked(_))
        ));
    }

    #[test]
    fn payload_timeout_tracks_media_kind() {
        let inline = GenerationPayload {
            media: MediaPart::Inline {
                data: "AA==".into(),
                mime_type: "audio/mpeg".into(),
            },
            instruction: "transcribe".into(),
        };
        let referenced = GenerationPayload {
            media: MediaPart::FileRef {
                uri: "files/abc".into(),
                mime_type: "video/mp4".into(),
            },
            instruction: "transcribe".into(),
        };
        assert!(inline.timeout() < referenced.timeout());
    }

    #[test]
    fn request_body_places_media_before_instruction() {
        let payload = GenerationPayload {
            media: MediaPart::FileRef {
                uri: "https://example/files/abc".into(),
                mime_type: "video/mp4".into(),
            },
            instruction: "transcribe".into(),
        };
        let body = payload.request_body();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0]["file_data"]["file_uri"],
            "https://example/files/abc"
        );
        assert_eq!(parts[1]["text"], "transcribe");
    }
}
