use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Diagnostics for one generation attempt. Recorded for operators; never
/// surfaced to end users.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub model: String,
    pub credential_tier: String,
    pub classification: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl AttemptRecord {
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at)
            .as_seconds_f64()
            .max(0.0)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct AttemptSummary {
    pub total_attempts: usize,
    pub failed_attempts: usize,
    pub by_model: HashMap<String, usize>,
    pub total_duration_seconds: f64,
}

#[derive(Clone, Default)]
pub struct AttemptLog {
    inner: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: AttemptRecord) {
        self.inner.lock().unwrap().push(record);
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.inner.lock().unwrap().clone()
    }

    pub fn summarize(&self) -> AttemptSummary {
        let records = self.inner.lock().unwrap();
        let mut summary = AttemptSummary {
            total_attempts: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            if record.classification.is_some() {
                summary.failed_attempts += 1;
            }
            *summary.by_model.entry(record.model.clone()).or_default() += 1;
            summary.total_duration_seconds += record.duration_seconds();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, classification: Option<&str>) -> AttemptRecord {
        let now = OffsetDateTime::now_utc();
        AttemptRecord {
            model: model.to_string(),
            credential_tier: "primary".to_string(),
            classification: classification.map(|c| c.to_string()),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn summarize_counts_failures_and_models() {
        let log = AttemptLog::new();
        log.record(record("gemini-2.5-pro", Some("rate_limited")));
        log.record(record("gemini-2.5-flash", None));
        let summary = log.summarize();
        assert_eq!(summary.total_attempts, 2);
        assert_eq!(summary.failed_attempts, 1);
        assert_eq!(summary.by_model["gemini-2.5-pro"], 1);
        assert_eq!(summary.by_model["gemini-2.5-flash"], 1);
    }
}
