//! Per-item outcomes and the persisted run summary.
//!
//! The runner appends one [`GenerationOutcome`] per attempted item to the
//! run log and checkpoints the whole [`RunSummary`] after every item, so an
//! interrupted or crashed run still leaves an accurate record behind.
//!
//! ## Storage
//!
//! The summary is a JSON file at `<output_dir>/batch_results.json`, next to
//! the images it describes:
//!
//! ```json
//! {
//!   "timestamp": "2026-10-18T09:12:44Z",
//!   "state": "completed",
//!   "backend": "remote:gemini-2.5-flash-image",
//!   "style": { "theme": "Pirates", "technique": "...", ... },
//!   "total_cards": 55,
//!   "completed": 54,
//!   "failed": 1,
//!   "total_secs": 1234.5,
//!   "avg_secs_per_card": 22.4,
//!   "cards": [
//!     { "key": "Hearts_01_Ace", "card": "Ace of Hearts", "status": "success",
//!       "filename": "Hearts_01_Ace.png", "secs": 21.8, "attempts": 1 },
//!     { "key": "Clubs_07_7", "card": "7 of Clubs", "status": "failure",
//!       "secs": 60.2, "attempts": 4, "error_kind": "transient",
//!       "error": "HTTP 503: overloaded" }
//!   ]
//! }
//! ```
//!
//! Writes go to a temp file that is renamed into place, so a reader never
//! sees a half-written summary.

use crate::backend::ErrorKind;
use crate::manifest;
use crate::prompt::StyleConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the summary file within the output directory.
pub const SUMMARY_FILENAME: &str = "batch_results.json";

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No run summary at {0}")]
    NotFound(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of one work item. Appended to the run log, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    /// Card key, e.g. `Hearts_01_Ace`.
    pub key: String,
    /// Display name, e.g. "Ace of Hearts".
    pub card: String,
    pub status: OutcomeStatus,
    /// Output filename, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Wall time from the first attempt until the outcome was decided.
    pub secs: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationOutcome {
    pub fn success(
        key: String,
        card: String,
        filename: String,
        elapsed: Duration,
        attempts: u32,
        seed: Option<u32>,
    ) -> Self {
        Self {
            key,
            card,
            status: OutcomeStatus::Success,
            filename: Some(filename),
            secs: round_secs(elapsed),
            attempts,
            seed,
            error_kind: None,
            error: None,
        }
    }

    pub fn failure(
        key: String,
        card: String,
        kind: ErrorKind,
        error: String,
        elapsed: Duration,
        attempts: u32,
        seed: Option<u32>,
    ) -> Self {
        Self {
            key,
            card,
            status: OutcomeStatus::Failure,
            filename: None,
            secs: round_secs(elapsed),
            attempts,
            seed,
            error_kind: Some(kind),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Lifecycle of a run.
///
/// `NotStarted → Running → {Completed, Interrupted, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    /// Every item was attempted.
    Completed,
    /// Cancelled by the user.
    Interrupted,
    /// Stopped early after fatal backend errors.
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::NotStarted => "not started",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Interrupted => "interrupted",
            RunState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Interrupted | RunState::Aborted
        )
    }
}

/// Aggregate record of a run, persisted as `batch_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub state: RunState,
    /// Backend identifier, e.g. `remote:gemini-2.5-flash-image`.
    pub backend: String,
    pub style: StyleConfig,
    /// Items planned for the run.
    pub total_cards: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_secs: f64,
    /// Mean wall time per attempted item; absent until one finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_secs_per_card: Option<f64>,
    /// One entry per attempted item, in manifest order.
    pub cards: Vec<GenerationOutcome>,
}

impl RunSummary {
    pub fn new(backend: String, style: StyleConfig, total_cards: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            state: RunState::NotStarted,
            backend,
            style,
            total_cards,
            completed: 0,
            failed: 0,
            total_secs: 0.0,
            avg_secs_per_card: None,
            cards: Vec::new(),
        }
    }

    /// Append an outcome and update the counts.
    pub fn record(&mut self, outcome: GenerationOutcome) {
        if outcome.is_success() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.cards.push(outcome);
    }

    /// Set the run's wall time and the derived average.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.total_secs = round_secs(elapsed);
        self.avg_secs_per_card = self.average();
    }

    fn average(&self) -> Option<f64> {
        let attempted = self.cards.len();
        (attempted > 0).then(|| ((self.total_secs / attempted as f64) * 100.0).round() / 100.0)
    }

    fn recount(&mut self) {
        self.completed = self.cards.iter().filter(|c| c.is_success()).count();
        self.failed = self.cards.len() - self.completed;
        self.avg_secs_per_card = self.average();
    }

    /// Keys of failed items, in log order.
    pub fn failed_keys(&self) -> Vec<String> {
        self.cards
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| c.key.clone())
            .collect()
    }

    /// Fold a retry run into this summary.
    ///
    /// Entries from `retry` replace entries with the same key; new keys are
    /// added. Cards are re-sorted into manifest order and the counts
    /// recomputed. Timestamp, state, backend and style come from the retry run;
    /// its time is added to the total.
    pub fn merge_retry(&mut self, retry: RunSummary) {
        for outcome in retry.cards {
            match self.cards.iter_mut().find(|c| c.key == outcome.key) {
                Some(existing) => *existing = outcome,
                None => self.cards.push(outcome),
            }
        }
        let order: Vec<String> = manifest::enumerate().iter().map(|i| i.key()).collect();
        self.cards.sort_by_key(|c| {
            order
                .iter()
                .position(|k| *k == c.key)
                .unwrap_or(order.len())
        });
        self.timestamp = retry.timestamp;
        self.state = retry.state;
        self.backend = retry.backend;
        self.style = retry.style;
        self.total_cards = self.total_cards.max(self.cards.len());
        self.total_secs = ((self.total_secs + retry.total_secs) * 100.0).round() / 100.0;
        self.recount();
    }

    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(SUMMARY_FILENAME)
    }

    /// Write the summary atomically into the output directory.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf, SummaryError> {
        let path = Self::path(output_dir);
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    /// Load the summary from the output directory.
    pub fn load(output_dir: &Path) -> Result<Self, SummaryError> {
        let path = Self::path(output_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SummaryError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 100.0).round() / 100.0
}

/// Temp path used while writing `path`: `.<name>.tmp` in the same directory,
/// so the final rename never crosses filesystems.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write `bytes` to `path` via a temp file and rename.
///
/// On failure the temp file is removed and `path` is left untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeckConfig;
    use tempfile::TempDir;

    fn style() -> StyleConfig {
        StyleConfig::from_config(&DeckConfig::default()).unwrap()
    }

    fn ok(key: &str) -> GenerationOutcome {
        GenerationOutcome::success(
            key.to_string(),
            key.to_string(),
            format!("{key}.png"),
            Duration::from_millis(1500),
            1,
            None,
        )
    }

    fn failed(key: &str) -> GenerationOutcome {
        GenerationOutcome::failure(
            key.to_string(),
            key.to_string(),
            ErrorKind::Transient,
            "HTTP 503: overloaded".to_string(),
            Duration::from_secs(4),
            4,
            None,
        )
    }

    #[test]
    fn record_updates_counts() {
        let mut summary = RunSummary::new("remote:test".into(), style(), 3);
        summary.record(ok("Hearts_01_Ace"));
        summary.record(failed("Hearts_02_2"));
        assert_eq!((summary.completed, summary.failed), (1, 1));
        assert_eq!(summary.cards.len(), 2);
    }

    #[test]
    fn average_over_attempted_items() {
        let mut summary = RunSummary::new("remote:test".into(), style(), 55);
        summary.record(ok("Hearts_01_Ace"));
        summary.record(failed("Hearts_02_2"));
        summary.set_elapsed(Duration::from_secs(10));
        assert_eq!(summary.total_secs, 10.0);
        assert_eq!(summary.avg_secs_per_card, Some(5.0));
    }

    #[test]
    fn no_average_without_items() {
        let mut summary = RunSummary::new("remote:test".into(), style(), 55);
        summary.set_elapsed(Duration::from_secs(1));
        assert_eq!(summary.avg_secs_per_card, None);
    }

    #[test]
    fn failed_keys_in_order() {
        let mut summary = RunSummary::new("remote:test".into(), style(), 4);
        summary.record(failed("Hearts_01_Ace"));
        summary.record(ok("Hearts_02_2"));
        summary.record(failed("Hearts_03_3"));
        assert_eq!(summary.failed_keys(), vec!["Hearts_01_Ace", "Hearts_03_3"]);
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let mut summary = RunSummary::new("local:http://x".into(), style(), 2);
        summary.state = RunState::Completed;
        summary.record(ok("Hearts_01_Ace"));
        summary.record(failed("ZZ_ZZ_00_Card-Back"));
        summary.set_elapsed(Duration::from_secs(6));

        let path = summary.save(tmp.path()).unwrap();
        assert_eq!(path, tmp.path().join("batch_results.json"));
        assert!(!tmp.path().join(".batch_results.json.tmp").exists());

        let loaded = RunSummary::load(tmp.path()).unwrap();
        assert_eq!(loaded, summary);
    }

    #[test]
    fn json_field_names() {
        let mut summary = RunSummary::new("remote:test".into(), style(), 1);
        summary.record(failed("Hearts_01_Ace"));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["state"], "not_started");
        assert_eq!(json["style"]["theme"], "Western Steampunk");
        assert_eq!(json["style"]["seed_mode"], "random");
        let card = &json["cards"][0];
        assert_eq!(card["status"], "failure");
        assert_eq!(card["error_kind"], "transient");
        assert!(card.get("filename").is_none());
    }

    #[test]
    fn load_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            RunSummary::load(tmp.path()),
            Err(SummaryError::NotFound(_))
        ));
    }

    #[test]
    fn load_corrupt_is_json_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(SUMMARY_FILENAME), "{ nope").unwrap();
        assert!(matches!(
            RunSummary::load(tmp.path()),
            Err(SummaryError::Json(_))
        ));
    }

    #[test]
    fn merge_retry_replaces_by_key_and_recounts() {
        let mut first = RunSummary::new("remote:test".into(), style(), 3);
        first.record(ok("Hearts_01_Ace"));
        first.record(failed("Spades_13_King"));
        first.record(failed("ZZ_ZZ_00_Card-Back"));
        first.set_elapsed(Duration::from_secs(9));

        let mut retry = RunSummary::new("remote:test".into(), style(), 2);
        retry.state = RunState::Completed;
        retry.record(ok("Spades_13_King"));
        retry.record(failed("ZZ_ZZ_00_Card-Back"));
        retry.set_elapsed(Duration::from_secs(3));

        first.merge_retry(retry);
        assert_eq!(first.state, RunState::Completed);
        assert_eq!((first.completed, first.failed), (2, 1));
        assert_eq!(first.cards.len(), 3);
        assert_eq!(first.total_cards, 3);
        assert_eq!(first.total_secs, 12.0);
        let keys: Vec<&str> = first.cards.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["Hearts_01_Ace", "Spades_13_King", "ZZ_ZZ_00_Card-Back"]
        );
        assert_eq!(first.failed_keys(), vec!["ZZ_ZZ_00_Card-Back"]);
    }

    #[test]
    fn merge_retry_adds_new_keys_in_manifest_order() {
        let mut first = RunSummary::new("remote:test".into(), style(), 55);
        first.record(ok("Spades_01_Ace"));
        let mut retry = RunSummary::new("remote:test".into(), style(), 1);
        retry.record(ok("Hearts_01_Ace"));
        first.merge_retry(retry);
        let keys: Vec<&str> = first.cards.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["Hearts_01_Ace", "Spades_01_Ace"]);
    }

    #[test]
    fn write_atomic_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.png");
        std::fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn write_atomic_into_missing_dir_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing").join("a.png");
        assert!(write_atomic(&path, b"x").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn run_state_terminal() {
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Aborted.is_terminal());
        assert!(RunState::Interrupted.is_terminal());
    }
}
