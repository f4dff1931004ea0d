//! Shared constants for the scriba client.

use std::time::Duration;

pub const MODEL_PRIMARY: &str = "gemini-2.5-pro";
pub const MODEL_FAST: &str = "gemini-2.5-flash";

pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Media at or above this size goes through the resumable upload protocol;
/// anything smaller is inlined as base64.
pub const INLINE_THRESHOLD_BYTES: u64 = 20 * 1024 * 1024;

pub const DEFAULT_MIME: &str = "audio/mpeg";

pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);

pub const POLL_FAST_INTERVAL: Duration = Duration::from_secs(2);
pub const POLL_SLOW_INTERVAL: Duration = Duration::from_secs(10);
pub const POLL_FAST_COUNT: u32 = 10;
pub const POLL_DEADLINE: Duration = Duration::from_secs(15 * 60);

pub const GENERATE_TIMEOUT_INLINE: Duration = Duration::from_secs(5 * 60);
pub const GENERATE_TIMEOUT_FILE: Duration = Duration::from_secs(10 * 60);

pub const MAX_ATTEMPTS: u32 = 3;
pub const CREDENTIAL_SWITCH_THRESHOLD: u32 = 2;
pub const INFRA_DEMOTE_THRESHOLD: u32 = 2;
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Overall-progress sub-ranges per pipeline phase.
pub const PROGRESS_PREPARE_END: u8 = 10;
pub const PROGRESS_TRANSFER_END: u8 = 50;
pub const PROGRESS_POLL_END: u8 = 60;
pub const PROGRESS_GENERATE_END: u8 = 95;

pub const GATEWAY_WINDOW: Duration = Duration::from_secs(60);
pub const GATEWAY_LIMIT_INIT: u32 = 10;
pub const GATEWAY_LIMIT_POLL: u32 = 60;
pub const GATEWAY_LIMIT_GENERATE: u32 = 5;

pub const DEFAULT_INSTRUCTION: &str = "Transcribe this recording verbatim. \
Preserve speaker turns as paragraphs and do not summarize, annotate, or omit content.";
