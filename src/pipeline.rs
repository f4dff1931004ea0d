use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::constants::{API_BASE_URL, DEFAULT_INSTRUCTION, PROGRESS_PREPARE_END};
use crate::error::TranscribeError;
use crate::generate::{Generate, GenerationClient, GenerationPayload, MediaPart};
use crate::media::{MediaDescriptor, Route};
use crate::orchestrator::{ModelSet, ModelTier, Orchestrator};
use crate::status::{ProgressSink, StatusReporter};
use crate::telemetry::AttemptLog;
use crate::upload::{UploadClient, UploadMedia};

/// One submission pipeline: prepare, optionally upload, then generate with
/// retry. Strictly sequential; each call owns its own attempt state.
pub struct Transcriber<U: UploadMedia, G: Generate> {
    uploader: U,
    orchestrator: Orchestrator<G>,
    config: AppConfig,
    instruction: String,
}

impl Transcriber<UploadClient, GenerationClient> {
    pub fn new(config: AppConfig) -> Self {
        Self::with_parts(
            UploadClient::new(API_BASE_URL),
            GenerationClient::new(API_BASE_URL),
            config,
        )
    }
}

impl<U: UploadMedia, G: Generate> Transcriber<U, G> {
    pub fn with_parts(uploader: U, generator: G, config: AppConfig) -> Self {
        let models = ModelSet {
            primary: config.model_primary.clone(),
            fast: config.model_fast.clone(),
        };
        let orchestrator = Orchestrator::new(generator, config.credentials.clone(), models);
        let instruction = config
            .instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());
        Self {
            uploader,
            orchestrator,
            config,
            instruction,
        }
    }

    pub fn attempt_log(&self) -> AttemptLog {
        self.orchestrator.attempt_log()
    }

    pub async fn transcribe(
        &self,
        descriptor: MediaDescriptor,
        preference: ModelTier,
        reporter: Arc<dyn StatusReporter>,
        cancel: &CancellationToken,
    ) -> Result<String, TranscribeError> {
        let progress = ProgressSink::new(reporter);
        let mime = descriptor.effective_mime();
        if !mime.starts_with("audio/") && !mime.starts_with("video/") {
            return Err(TranscribeError::UnsupportedMedia(mime));
        }
        progress.update(&format!("preparing {} ({mime})", descriptor.file_name), 2);

        // The bytes leave this process at most once, before the retry loop;
        // every generation attempt reuses the same media part.
        let media = match descriptor.route() {
            Route::Inline => {
                let data = BASE64.encode(&descriptor.bytes);
                progress.update("media encoded", PROGRESS_PREPARE_END);
                MediaPart::Inline {
                    data,
                    mime_type: mime,
                }
            }
            Route::Upload => {
                let reference = self
                    .uploader
                    .upload(&descriptor, &self.config.credentials, &progress, cancel)
                    .await?;
                MediaPart::FileRef {
                    uri: reference.uri,
                    mime_type: reference.mime_type,
                }
            }
        };

        let payload = GenerationPayload {
            media,
            instruction: self.instruction.clone(),
        };
        let text = self
            .orchestrator
            .run(&payload, preference, &progress, cancel)
            .await?;

        let summary = self.orchestrator.attempt_log().summarize();
        info!(
            attempts = summary.total_attempts,
            failed = summary.failed_attempts,
            "transcription complete"
        );
        progress.update("transcript ready", 100);
        Ok(text)
    }
}
