use std::future::Future;
use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CredentialSet;
use crate::constants::{
    INIT_TIMEOUT, POLL_DEADLINE, POLL_FAST_COUNT, POLL_FAST_INTERVAL, POLL_SLOW_INTERVAL,
    PROGRESS_POLL_END, PROGRESS_PREPARE_END, PROGRESS_TRANSFER_END,
};
use crate::error::TranscribeError;
use crate::media::MediaDescriptor;
use crate::orchestrator::CredentialTier;
use crate::status::{map_range, ProgressSink};

const TRANSFER_CHUNK_BYTES: usize = 256 * 1024;

/// Poll counts used to creep the 50-60% band; purely cosmetic.
const POLL_PROGRESS_SPAN: u64 = 30;

/// Opaque handle to a fully processed server-side media resource. Reused
/// verbatim across every generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    Transferring,
    Processing,
    Active,
    Failed,
}

#[derive(Debug)]
pub struct UploadSession {
    pub session_url: String,
    pub media_name: String,
    pub state: UploadState,
}

/// Seam for the pipeline: the production client talks to the Files API,
/// tests substitute a scripted uploader.
pub trait UploadMedia: Send + Sync {
    fn upload(
        &self,
        descriptor: &MediaDescriptor,
        credentials: &CredentialSet,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<MediaReference, TranscribeError>> + Send;
}

pub struct UploadClient {
    http: reqwest::Client,
    base_url: String,
}

impl UploadClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Phase 1: create the resumable session. No media bytes have moved yet,
    /// so a 429 here may switch to the secondary credential and retry init
    /// exactly once. That is the only in-component retry of the whole upload.
    async fn init_session(
        &self,
        descriptor: &MediaDescriptor,
        mime: &str,
        credentials: &CredentialSet,
        cancel: &CancellationToken,
    ) -> Result<(String, CredentialTier), TranscribeError> {
        let mut tier = CredentialTier::Primary;
        loop {
            let outcome =
                with_cancel(cancel, self.send_init(descriptor, mime, credentials.for_tier(tier)))
                    .await?;
            match outcome {
                InitOutcome::Session(url) => return Ok((url, tier)),
                InitOutcome::RateLimited(detail) => {
                    if tier == CredentialTier::Primary && credentials.has_secondary() {
                        warn!("upload init rate limited on primary key, retrying with secondary");
                        tier = CredentialTier::Secondary;
                        continue;
                    }
                    return Err(TranscribeError::UploadInit(format!(
                        "rate limited: {detail}"
                    )));
                }
            }
        }
    }

    async fn send_init(
        &self,
        descriptor: &MediaDescriptor,
        mime: &str,
        api_key: &str,
    ) -> Result<InitOutcome, TranscribeError> {
        let url = format!("{}/upload/v1beta/files", self.base_url);
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Goog-Upload-Protocol",
            HeaderValue::from_static("resumable"),
        );
        headers.insert("X-Goog-Upload-Command", HeaderValue::from_static("start"));
        headers.insert(
            "X-Goog-Upload-Header-Content-Length",
            header_value(&descriptor.size_bytes().to_string())?,
        );
        headers.insert("X-Goog-Upload-Header-Content-Type", header_value(mime)?);

        let body = json!({
            "file": { "display_name": descriptor.file_name, "mime_type": mime }
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .headers(headers)
            .timeout(INIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| TranscribeError::UploadInit(err.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Ok(InitOutcome::RateLimited(text));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TranscribeError::UploadInit(format!("{status}: {text}")));
        }
        let session_url = resp
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                TranscribeError::UploadInit("missing x-goog-upload-url header".to_string())
            })?
            .to_string();
        Ok(InitOutcome::Session(session_url))
    }

    /// Phase 2: single-pass byte transfer. Never retried: a failure here
    /// leaves the session at an unknown offset and aborts the submission,
    /// since safe resumption needs offset tracking we do not keep.
    async fn transfer(
        &self,
        descriptor: &MediaDescriptor,
        mime: &str,
        session_url: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Value, TranscribeError> {
        let total = descriptor.size_bytes();
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Goog-Upload-Command",
            HeaderValue::from_static("upload, finalize"),
        );
        headers.insert("X-Goog-Upload-Offset", HeaderValue::from_static("0"));
        headers.insert(CONTENT_TYPE, header_value(mime)?);
        headers.insert(CONTENT_LENGTH, header_value(&total.to_string())?);

        let body = progress_body(descriptor.bytes.clone(), progress.clone());
        let send = async {
            let resp = self
                .http
                .post(session_url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|err| TranscribeError::UploadTransfer(err.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(TranscribeError::UploadTransfer(format!("{status}: {text}")));
            }
            resp.json::<Value>()
                .await
                .map_err(|err| TranscribeError::UploadTransfer(err.to_string()))
        };
        let value = with_cancel(cancel, send).await?;
        progress.update("upload complete", PROGRESS_TRANSFER_END);
        Ok(value)
    }

    /// Phase 3: poll the media resource until it leaves PROCESSING. Fast
    /// cadence for the first few polls, then a slow fixed interval; bounded
    /// by a wall-clock deadline rather than a poll count, so transient
    /// errors do not shorten the budget.
    async fn await_active(
        &self,
        session: &mut UploadSession,
        mime: &str,
        api_key: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MediaReference, TranscribeError> {
        let deadline = Instant::now() + POLL_DEADLINE;
        let url = format!("{}/v1beta/{}", self.base_url, session.media_name);
        let mut polls: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                session.state = UploadState::Failed;
                return Err(TranscribeError::ProcessingTimeout);
            }

            let poll = async {
                let resp = self
                    .http
                    .get(&url)
                    .query(&[("key", api_key)])
                    .send()
                    .await?;
                resp.error_for_status()?.json::<Value>().await
            };
            match with_cancel(cancel, async { Ok(poll.await) }).await? {
                Ok(value) => {
                    let state = value
                        .get("state")
                        .and_then(|v| v.as_str())
                        .unwrap_or("PROCESSING");
                    match state {
                        "ACTIVE" => {
                            session.state = UploadState::Active;
                            let uri = value
                                .get("uri")
                                .and_then(|v| v.as_str())
                                .ok_or_else(|| {
                                    TranscribeError::Processing(
                                        "active file missing uri".to_string(),
                                    )
                                })?
                                .to_string();
                            return Ok(MediaReference {
                                uri,
                                mime_type: mime.to_string(),
                            });
                        }
                        "FAILED" => {
                            session.state = UploadState::Failed;
                            return Err(TranscribeError::Processing(format!(
                                "file {} entered FAILED state",
                                session.media_name
                            )));
                        }
                        other => {
                            debug!(state = other, polls, "media still processing");
                        }
                    }
                }
                Err(err) => {
                    // Transient poll errors retry within the loop; only the
                    // deadline ends it.
                    debug!(error = %err, polls, "poll error, will retry");
                }
            }

            polls += 1;
            progress.update(
                "waiting for server-side processing",
                map_range(
                    (polls as u64).min(POLL_PROGRESS_SPAN),
                    POLL_PROGRESS_SPAN,
                    PROGRESS_TRANSFER_END,
                    PROGRESS_POLL_END,
                ),
            );
            let interval = if polls < POLL_FAST_COUNT {
                POLL_FAST_INTERVAL
            } else {
                POLL_SLOW_INTERVAL
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(TranscribeError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

enum InitOutcome {
    Session(String),
    RateLimited(String),
}

impl UploadMedia for UploadClient {
    async fn upload(
        &self,
        descriptor: &MediaDescriptor,
        credentials: &CredentialSet,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MediaReference, TranscribeError> {
        let mime = descriptor.effective_mime();
        progress.update("starting upload session", PROGRESS_PREPARE_END);

        let (session_url, tier) = self
            .init_session(descriptor, &mime, credentials, cancel)
            .await?;
        let mut session = UploadSession {
            session_url,
            media_name: String::new(),
            state: UploadState::Initiated,
        };

        session.state = UploadState::Transferring;
        let response = self
            .transfer(descriptor, &mime, &session.session_url, progress, cancel)
            .await?;

        let file = response.get("file").cloned().ok_or_else(|| {
            TranscribeError::UploadTransfer("upload response missing file object".to_string())
        })?;
        session.media_name = file
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TranscribeError::UploadTransfer("upload response missing file.name".to_string())
            })?
            .to_string();

        match file.get("state").and_then(|v| v.as_str()) {
            Some("ACTIVE") => {
                session.state = UploadState::Active;
                let uri = file
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        TranscribeError::Processing("active file missing uri".to_string())
                    })?
                    .to_string();
                progress.update("media ready", PROGRESS_POLL_END);
                return Ok(MediaReference {
                    uri,
                    mime_type: mime,
                });
            }
            Some("FAILED") => {
                session.state = UploadState::Failed;
                return Err(TranscribeError::Processing(format!(
                    "file {} rejected at finalize",
                    session.media_name
                )));
            }
            _ => session.state = UploadState::Processing,
        }

        let reference = self
            .await_active(
                &mut session,
                &mime,
                credentials.for_tier(tier),
                progress,
                cancel,
            )
            .await?;
        debug!(state = ?session.state, name = %session.media_name, "upload complete");
        progress.update("media ready", PROGRESS_POLL_END);
        Ok(reference)
    }
}

/// Streaming request body that reports byte progress into the 10-50% band
/// as chunks are consumed by the transport.
fn progress_body(bytes: Bytes, progress: ProgressSink) -> Body {
    Body::wrap_stream(futures::stream::iter(transfer_chunks(bytes, progress)))
}

/// Lazily chunk the media bytes, reporting cumulative progress as each
/// chunk is pulled off the iterator.
fn transfer_chunks(
    bytes: Bytes,
    progress: ProgressSink,
) -> impl Iterator<Item = Result<Bytes, std::io::Error>> {
    let total = bytes.len() as u64;
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let end = (offset + TRANSFER_CHUNK_BYTES).min(bytes.len());
        chunks.push((bytes.slice(offset..end), end as u64));
        offset = end;
    }
    chunks.into_iter().map(move |(chunk, sent)| {
        progress.update(
            "uploading media",
            map_range(sent, total, PROGRESS_PREPARE_END, PROGRESS_TRANSFER_END),
        );
        Ok(chunk)
    })
}

fn header_value(value: &str) -> Result<HeaderValue, TranscribeError> {
    HeaderValue::from_str(value)
        .map_err(|err| TranscribeError::UploadInit(format!("invalid header value: {err}")))
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, TranscribeError>>,
) -> Result<T, TranscribeError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(TranscribeError::Cancelled),
        out = fut => out,
    }
}
