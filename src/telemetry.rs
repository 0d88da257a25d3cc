use crate::review::{Celebration, CompletionSummary};
use crate::submission::ReviewResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const FINISH_REVIEW_EVENT: &str = "finishReview";
const MAX_RECENT_RESULTS: usize = 64;

/// Body of a trace POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEnvelope {
    pub user: String,
    pub event: String,
    pub details: ReviewResult,
}

impl TraceEnvelope {
    pub fn finish_review(user: impl Into<String>, details: ReviewResult) -> Self {
        Self {
            user: user.into(),
            event: FINISH_REVIEW_EVENT.to_string(),
            details,
        }
    }
}

pub fn trace_endpoint(http_base: &str) -> String {
    format!("{}/trace", http_base.trim_end_matches('/'))
}

/// In-memory counters over reported results, optionally mirrored to a
/// JSON-lines file.
#[derive(Clone)]
pub struct TraceLog {
    shared: Arc<TraceShared>,
}

impl TraceLog {
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    pub fn ephemeral() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(TraceShared {
                inner: RwLock::new(TraceData::default()),
                persistence: TracePersistence { path },
            }),
        }
    }

    pub fn record_result(&self, envelope: &TraceEnvelope) {
        let now = Utc::now();
        let mut guard = self.shared.inner.write();
        guard.results = guard.results.saturating_add(1);
        guard.last_result_at = Some(now);
        guard.recent.push_back(RecentResult::from_envelope(envelope, now));
        while guard.recent.len() > MAX_RECENT_RESULTS {
            guard.recent.pop_front();
        }
        drop(guard);
        self.shared.persistence.append(&TraceRecord::Result {
            recorded_at: now,
            envelope,
        });
    }

    pub fn record_completion(&self, summary: &CompletionSummary) {
        let now = Utc::now();
        let mut guard = self.shared.inner.write();
        guard.completions = guard.completions.saturating_add(1);
        guard.accepted = guard.accepted.saturating_add(summary.accepted as u64);
        guard.declined = guard.declined.saturating_add(summary.declined as u64);
        drop(guard);
        self.shared.persistence.append(&TraceRecord::Completion {
            recorded_at: now,
            summary,
        });
    }

    pub fn stats(&self) -> TraceStats {
        let guard = self.shared.inner.read();
        TraceStats {
            results: guard.results,
            completions: guard.completions,
            accepted: guard.accepted,
            declined: guard.declined,
            last_result_at: guard.last_result_at,
            recent: guard.recent.iter().rev().cloned().collect(),
        }
    }
}

struct TraceShared {
    inner: RwLock<TraceData>,
    persistence: TracePersistence,
}

#[derive(Default)]
struct TraceData {
    results: u64,
    completions: u64,
    accepted: u64,
    declined: u64,
    last_result_at: Option<DateTime<Utc>>,
    recent: VecDeque<RecentResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceStats {
    pub results: u64,
    pub completions: u64,
    pub accepted: u64,
    pub declined: u64,
    pub last_result_at: Option<DateTime<Utc>>,
    /// Newest first.
    pub recent: Vec<RecentResult>,
}

/// Carries no user id: ids double as session keys.
#[derive(Debug, Clone, Serialize)]
pub struct RecentResult {
    pub mode: crate::align::ReviewMode,
    pub selected: usize,
    pub improvement_level: Option<u8>,
    pub recorded_at: DateTime<Utc>,
}

impl RecentResult {
    fn from_envelope(envelope: &TraceEnvelope, recorded_at: DateTime<Utc>) -> Self {
        Self {
            mode: envelope.details.mode,
            selected: envelope.details.selected_indexes.len(),
            improvement_level: envelope.details.improvement_level,
            recorded_at,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TraceRecord<'a> {
    Result {
        recorded_at: DateTime<Utc>,
        envelope: &'a TraceEnvelope,
    },
    Completion {
        recorded_at: DateTime<Utc>,
        summary: &'a CompletionSummary,
    },
}

struct TracePersistence {
    path: Option<PathBuf>,
}

impl TracePersistence {
    fn append(&self, record: &TraceRecord<'_>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(error = %err, "failed to create trace log directory");
                return;
            }
        }
        let mut line = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to serialize trace record");
                return;
            }
        };
        line.push(b'\n');
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(&line) {
                    warn!(error = %err, "failed to write trace record");
                }
            }
            Err(err) => warn!(error = %err, "failed to open trace log"),
        }
    }
}

/// Logs each completed board and counts it in the [`TraceLog`].
pub struct LogCelebration {
    log: TraceLog,
}

impl LogCelebration {
    pub fn new(log: TraceLog) -> Self {
        Self { log }
    }
}

impl Celebration for LogCelebration {
    fn celebrate(&self, summary: &CompletionSummary) {
        info!(
            board = summary.board_id,
            mode = %summary.mode,
            accepted = summary.accepted,
            declined = summary.declined,
            "review complete"
        );
        self.log.record_completion(summary);
    }
}

#[cfg(feature = "web")]
pub use upload::{ChannelReporter, TraceError, run_trace_uploader};

#[cfg(feature = "web")]
mod upload {
    use super::*;
    use crate::submission::{ReportError, ResultReporter};
    use thiserror::Error;
    use tokio::sync::mpsc;
    use tracing::debug;

    #[derive(Debug, Error)]
    pub enum TraceError {
        #[error("trace request failed: {0}")]
        Http(#[from] reqwest::Error),
    }

    /// Queues results for [`run_trace_uploader`] on behalf of one user.
    #[derive(Clone)]
    pub struct ChannelReporter {
        user: String,
        tx: mpsc::UnboundedSender<TraceEnvelope>,
    }

    impl ChannelReporter {
        pub fn new(user: impl Into<String>, tx: mpsc::UnboundedSender<TraceEnvelope>) -> Self {
            Self {
                user: user.into(),
                tx,
            }
        }
    }

    impl ResultReporter for ChannelReporter {
        fn report(&self, result: ReviewResult) -> Result<(), ReportError> {
            self.tx
                .send(TraceEnvelope::finish_review(self.user.clone(), result))
                .map_err(|_| ReportError::QueueClosed)
        }
    }

    /// Drains the queue until every sender is gone. Each envelope is recorded
    /// locally and, when an endpoint is configured, POSTed to it.
    pub async fn run_trace_uploader(
        mut rx: mpsc::UnboundedReceiver<TraceEnvelope>,
        client: reqwest::Client,
        endpoint: Option<String>,
        log: TraceLog,
    ) {
        while let Some(envelope) = rx.recv().await {
            log.record_result(&envelope);
            let Some(url) = endpoint.as_deref() else {
                debug!(user = %envelope.user, "no trace endpoint configured");
                continue;
            };
            match post(&client, url, &envelope).await {
                Ok(()) => info!(user = %envelope.user, "review trace uploaded"),
                Err(err) => warn!(error = %err, %url, "failed to upload review trace"),
            }
        }
        debug!("trace uploader stopped");
    }

    async fn post(
        client: &reqwest::Client,
        url: &str,
        envelope: &TraceEnvelope,
    ) -> Result<(), TraceError> {
        client
            .post(url)
            .json(envelope)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::ReviewMode;
    use crate::review::ReviewStatus;
    use std::collections::BTreeMap;

    fn sample_result() -> ReviewResult {
        let mut selected = BTreeMap::new();
        selected.insert(2, ReviewStatus::Accepted);
        selected.insert(5, ReviewStatus::Declined);
        ReviewResult {
            original_recipe: Some("boil water".to_string()),
            improved_recipe: "Boil salted water.".to_string(),
            selected_indexes: selected,
            timestamp: Utc::now(),
            improvement_level: Some(1),
            mode: ReviewMode::Word,
            sentences: None,
        }
    }

    fn summary() -> CompletionSummary {
        CompletionSummary {
            board_id: 7,
            mode: ReviewMode::Word,
            annotated: 2,
            accepted: 1,
            declined: 1,
        }
    }

    #[test]
    fn envelope_matches_trace_payload() {
        let envelope = TraceEnvelope::finish_review("u1", sample_result());
        let payload = serde_json::to_value(&envelope).unwrap();
        assert_eq!(payload["user"], "u1");
        assert_eq!(payload["event"], "finishReview");
        assert_eq!(payload["details"]["selectedIndexes"]["5"], "declined");
        assert_eq!(trace_endpoint("http://localhost:8000/"), "http://localhost:8000/trace");
    }

    #[test]
    fn ephemeral_log_counts_results_and_completions() {
        let log = TraceLog::ephemeral();
        log.record_result(&TraceEnvelope::finish_review("a", sample_result()));
        log.record_result(&TraceEnvelope::finish_review("b", sample_result()));
        LogCelebration::new(log.clone()).celebrate(&summary());
        let stats = log.stats();
        assert_eq!(stats.results, 2);
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.recent.len(), 2);
        assert_eq!(stats.recent[0].selected, 2);
        assert_eq!(stats.recent[0].improvement_level, Some(1));
        assert!(stats.last_result_at.is_some());
    }

    #[test]
    fn persistent_log_appends_json_lines() {
        let path = std::env::temp_dir()
            .join(format!("gelex-trace-{}", crate::config::generate_user_id()))
            .join("trace.jsonl");
        let log = TraceLog::persistent(&path);
        log.record_result(&TraceEnvelope::finish_review("a", sample_result()));
        log.record_completion(&summary());

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "result");
        assert_eq!(lines[0]["envelope"]["event"], "finishReview");
        assert_eq!(lines[1]["kind"], "completion");
        assert_eq!(lines[1]["summary"]["board_id"], 7);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[cfg(feature = "web")]
    #[tokio::test]
    async fn channel_reporter_feeds_the_uploader() {
        use crate::submission::{ReportError, ResultReporter};
        use tokio::sync::mpsc;

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ChannelReporter::new("user-9", tx);
        reporter.report(sample_result()).unwrap();
        drop(reporter);

        let log = TraceLog::ephemeral();
        run_trace_uploader(rx, reqwest::Client::new(), None, log.clone()).await;
        let stats = log.stats();
        assert_eq!(stats.results, 1);
        assert_eq!(stats.recent[0].mode, ReviewMode::Word);

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let err = ChannelReporter::new("x", tx)
            .report(sample_result())
            .unwrap_err();
        assert!(matches!(err, ReportError::QueueClosed));
    }
}
