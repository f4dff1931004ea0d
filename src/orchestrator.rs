use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CredentialSet;
use crate::constants::{
    BACKOFF_BASE, CREDENTIAL_SWITCH_THRESHOLD, INFRA_DEMOTE_THRESHOLD, MAX_ATTEMPTS,
    PROGRESS_GENERATE_END, PROGRESS_POLL_END,
};
use crate::error::{ErrorClass, TranscribeError};
use crate::generate::{Generate, GenerationPayload};
use crate::status::{map_range, ProgressSink};
use crate::telemetry::{AttemptLog, AttemptRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Primary,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialTier {
    Primary,
    Secondary,
}

impl CredentialTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialTier::Primary => "primary",
            CredentialTier::Secondary => "secondary",
        }
    }
}

/// State threaded through the retry loop. Owned by exactly one submission;
/// replaced wholesale between attempts, never mutated mid-attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    /// 1-based number of the attempt being executed.
    pub attempt: u32,
    pub model_tier: ModelTier,
    pub credential_tier: CredentialTier,
    pub consecutive_infra: u32,
    pub started_at: OffsetDateTime,
}

impl AttemptContext {
    pub fn first(preference: ModelTier) -> Self {
        Self {
            attempt: 1,
            model_tier: preference,
            credential_tier: CredentialTier::Primary,
            consecutive_infra: 0,
            started_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub credential_switch_threshold: u32,
    pub infra_demote_threshold: u32,
    pub base_delay: Duration,
    pub has_secondary: bool,
}

impl RetryPolicy {
    pub fn from_credentials(credentials: &CredentialSet) -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            credential_switch_threshold: CREDENTIAL_SWITCH_THRESHOLD,
            infra_demote_threshold: INFRA_DEMOTE_THRESHOLD,
            base_delay: BACKOFF_BASE,
            has_secondary: credentials.has_secondary(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Abort,
    Retry {
        model_tier: ModelTier,
        credential_tier: CredentialTier,
        delay: Duration,
    },
}

/// Pure policy table: `(classification, context) -> action`. The loop in
/// [`Orchestrator::run`] owns all the side effects.
pub fn next_action(class: ErrorClass, ctx: &AttemptContext, policy: &RetryPolicy) -> Action {
    if class == ErrorClass::Fatal {
        return Action::Abort;
    }
    if ctx.attempt >= policy.max_attempts {
        return Action::Abort;
    }

    let mut model_tier = ctx.model_tier;
    let mut delay = Duration::ZERO;
    match class {
        ErrorClass::RateLimited => {
            // Demotion is monotonic: once on the fast tier we stay there.
            if ctx.model_tier == ModelTier::Primary {
                model_tier = ModelTier::Fast;
            } else {
                delay = policy.base_delay * ctx.attempt;
            }
        }
        ErrorClass::ServerUnavailable | ErrorClass::NetworkUnreachable => {
            delay = policy.base_delay * (ctx.attempt + 1);
            if ctx.consecutive_infra + 1 >= policy.infra_demote_threshold {
                model_tier = ModelTier::Fast;
            }
        }
        ErrorClass::Fatal => unreachable!("fatal handled above"),
    }

    let mut credential_tier = ctx.credential_tier;
    if policy.has_secondary && ctx.attempt + 1 >= policy.credential_switch_threshold {
        credential_tier = CredentialTier::Secondary;
    }

    Action::Retry {
        model_tier,
        credential_tier,
        delay,
    }
}

/// Named model identifiers behind the two quality tiers.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub primary: String,
    pub fast: String,
}

impl ModelSet {
    pub fn id_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary,
            ModelTier::Fast => &self.fast,
        }
    }
}

/// Drives repeated generation attempts over an explicit [`AttemptContext`]
/// loop. The media reference inside the payload was obtained before this
/// loop starts and is reused verbatim on every attempt.
pub struct Orchestrator<G: Generate> {
    generator: G,
    credentials: CredentialSet,
    models: ModelSet,
    policy: RetryPolicy,
    log: AttemptLog,
}

impl<G: Generate> Orchestrator<G> {
    pub fn new(generator: G, credentials: CredentialSet, models: ModelSet) -> Self {
        let policy = RetryPolicy::from_credentials(&credentials);
        Self {
            generator,
            credentials,
            models,
            policy,
            log: AttemptLog::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn attempt_log(&self) -> AttemptLog {
        self.log.clone()
    }

    pub async fn run(
        &self,
        payload: &GenerationPayload,
        preference: ModelTier,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<String, TranscribeError> {
        let mut ctx = AttemptContext::first(preference);
        loop {
            if cancel.is_cancelled() {
                return Err(TranscribeError::Cancelled);
            }

            let model = self.models.id_for(ctx.model_tier);
            let api_key = self.credentials.for_tier(ctx.credential_tier);
            progress.update(
                &format!("transcribing with {model} (attempt {})", ctx.attempt),
                map_range(
                    (ctx.attempt - 1) as u64,
                    self.policy.max_attempts as u64,
                    PROGRESS_POLL_END,
                    PROGRESS_GENERATE_END,
                ),
            );

            let started_at = OffsetDateTime::now_utc();
            let result = self
                .generator
                .generate(model, api_key, payload, payload.timeout(), cancel)
                .await;
            self.log.record(AttemptRecord {
                model: model.to_string(),
                credential_tier: ctx.credential_tier.as_str().to_string(),
                classification: result
                    .as_ref()
                    .err()
                    .map(|err| err.classification().as_str().to_string()),
                started_at,
                finished_at: OffsetDateTime::now_utc(),
            });

            let err = match result {
                Ok(text) => return Ok(text),
                Err(TranscribeError::Cancelled) => return Err(TranscribeError::Cancelled),
                Err(err) => err,
            };

            let class = err.classification();
            match next_action(class, &ctx, &self.policy) {
                Action::Abort => {
                    let elapsed = (OffsetDateTime::now_utc() - ctx.started_at).as_seconds_f64();
                    warn!(
                        attempt = ctx.attempt,
                        classification = class.as_str(),
                        elapsed_secs = elapsed,
                        "giving up: {err}"
                    );
                    return Err(err);
                }
                Action::Retry {
                    model_tier,
                    credential_tier,
                    delay,
                } => {
                    debug!(
                        attempt = ctx.attempt,
                        classification = class.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    if model_tier != ctx.model_tier {
                        progress.message(&format!(
                            "switching to faster model {}",
                            self.models.id_for(model_tier)
                        ));
                    }
                    if credential_tier != ctx.credential_tier {
                        progress.message("switching to secondary credential");
                    }
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(TranscribeError::Cancelled),
                            _ = tokio::time::sleep(jittered(delay)) => {}
                        }
                    }

                    let infra = matches!(
                        class,
                        ErrorClass::ServerUnavailable | ErrorClass::NetworkUnreachable
                    );
                    ctx = AttemptContext {
                        attempt: ctx.attempt + 1,
                        model_tier,
                        credential_tier,
                        consecutive_infra: if infra { ctx.consecutive_infra + 1 } else { 0 },
                        started_at: ctx.started_at,
                    };
                }
            }
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
