//! Batch runner: drives the card manifest through a generation client.
//!
//! Items are processed strictly one at a time, in manifest order:
//!
//! ```text
//! for each item:
//!     build request ─→ generate ─┬─ Ok ─→ validate bytes ─→ write {key}.{ext} ─→ success
//!                                ├─ Transient ─→ backoff, retry (up to max_retries)
//!                                └─ Resource / Fatal / retries exhausted ─→ failure
//!     record outcome, checkpoint batch_results.json, emit progress
//! ```
//!
//! Per-item errors never stop the run; they become failure records. The
//! exceptions are cancellation (state `Interrupted`) and fatal backend errors
//! on the first item or on several items in a row (state `Aborted`).
//!
//! ## Cancellation
//!
//! The cancel flag is checked before each item and before each retry. A call
//! already in flight completes and is recorded; an item caught in retry
//! backoff is abandoned without an outcome. Backoff sleeps are sliced so the
//! flag is noticed within [`CANCEL_POLL`].
//!
//! ## Files
//!
//! Images are written to a temp file and renamed into place, so a failed or
//! interrupted item never leaves a partial image behind. Re-running a deck
//! overwrites the same filenames.

use crate::backend::{ErrorKind, GeneratedImage, GenerationClient, GenerationError};
use crate::config::{ConfigError, DeckConfig, OutputFormat, RetryConfig};
use crate::manifest::WorkItem;
use crate::naming;
use crate::progress::Progress;
use crate::prompt::{self, StyleConfig};
use crate::summary::{self, GenerationOutcome, RunState, RunSummary, SummaryError};
use chrono::Utc;
use image::ImageFormat;
use rand::{Rng, thread_rng};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Longest a backoff sleep runs without looking at the cancel flag.
pub const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Upper bound of the random jitter added to each backoff delay.
const JITTER_MS: u64 = 200;

/// Longest wait before a single retry, jitter included.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Run summary error: {0}")]
    Summary(#[from] SummaryError),
}

/// Run-level settings taken from the config.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub retry: RetryConfig,
    pub abort_on_first_fatal: bool,
    pub max_consecutive_fatal: u32,
}

impl BatchOptions {
    pub fn from_config(config: &DeckConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.run.output_dir),
            format: config.image.format,
            retry: config.retry.clone(),
            abort_on_first_fatal: config.run.abort_on_first_fatal,
            max_consecutive_fatal: config.run.max_consecutive_fatal,
        }
    }
}

/// Progress notifications, sent to an optional channel as the run advances.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        total: usize,
        backend: String,
        output_dir: PathBuf,
    },
    ItemStarted {
        index: usize,
        total: usize,
        card: String,
    },
    Retrying {
        card: String,
        /// 1-based retry number.
        retry: u32,
        max_retries: u32,
        delay: Duration,
        error: String,
    },
    ItemFinished {
        outcome: GenerationOutcome,
        progress: Progress,
    },
    Finished {
        state: RunState,
        completed: usize,
        failed: usize,
        elapsed: Duration,
    },
}

/// What a call to [`BatchRunner::step`] did.
#[derive(Debug, Clone)]
pub enum Step {
    /// One item was processed and recorded.
    Item {
        outcome: GenerationOutcome,
        progress: Progress,
    },
    /// The run is in a terminal state; nothing more will be processed.
    Stopped(RunState),
}

/// Delay before retry number `retry` (0-based): `base * 2^retry` plus up to
/// 200 ms of jitter, capped at [`MAX_BACKOFF`]. A zero base disables both.
pub fn backoff_delay(base_delay_ms: u64, retry: u32) -> Duration {
    if base_delay_ms == 0 {
        return Duration::ZERO;
    }
    let jitter: u64 = thread_rng().gen_range(0..JITTER_MS);
    let ms = base_delay_ms
        .saturating_mul(2_u64.saturating_pow(retry))
        .saturating_add(jitter);
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

/// Sleep for `delay` in short slices. Returns `false` as soon as the cancel
/// flag is seen, including before sleeping at all.
fn sleep_unless_cancelled(delay: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

/// Sequential generation run over a list of work items.
///
/// Owns the run log for its run. Drive it with [`run`](Self::run), or one
/// item at a time with [`step`](Self::step).
pub struct BatchRunner<'a> {
    client: &'a dyn GenerationClient,
    items: Vec<WorkItem>,
    style: StyleConfig,
    options: BatchOptions,
    summary: RunSummary,
    next: usize,
    consecutive_fatal: u32,
    started: Option<Instant>,
    events: Option<Sender<BatchEvent>>,
    previous: Option<RunSummary>,
}

impl<'a> BatchRunner<'a> {
    /// Validate the style and create the output directory.
    ///
    /// Errors here are pre-flight failures: nothing has been generated yet.
    pub fn new(
        client: &'a dyn GenerationClient,
        items: Vec<WorkItem>,
        style: StyleConfig,
        options: BatchOptions,
        backend_label: String,
    ) -> Result<Self, BatchError> {
        style.validate()?;
        std::fs::create_dir_all(&options.output_dir)?;
        let summary = RunSummary::new(backend_label, style.clone(), items.len());
        Ok(Self {
            client,
            items,
            style,
            options,
            summary,
            next: 0,
            consecutive_fatal: 0,
            started: None,
            events: None,
            previous: None,
        })
    }

    /// Fold this run into an earlier run's summary whenever it is saved.
    ///
    /// Used when retrying failed cards: `batch_results.json` keeps the earlier
    /// successes, and retried entries replace their old records as they
    /// complete.
    ///
    /// The retried cards are rendered in the style recorded in `previous`,
    /// whatever style the runner was built with, so the deck stays uniform.
    pub fn merge_into(mut self, previous: RunSummary) -> Result<Self, BatchError> {
        previous.style.validate()?;
        if previous.style != self.style {
            warn!(
                theme = %previous.style.theme,
                "retrying with the style recorded in the previous run"
            );
            self.style = previous.style.clone();
            self.summary.style = previous.style.clone();
        }
        self.previous = Some(previous);
        Ok(self)
    }

    /// The summary as written to disk: this run alone, or merged into the
    /// previous one.
    fn persisted(&self) -> Cow<'_, RunSummary> {
        match &self.previous {
            Some(previous) => {
                let mut merged = previous.clone();
                merged.merge_retry(self.summary.clone());
                Cow::Owned(merged)
            }
            None => Cow::Borrowed(&self.summary),
        }
    }

    pub fn state(&self) -> RunState {
        self.summary.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn output_dir(&self) -> &Path {
        &self.options.output_dir
    }

    /// Process items until the run reaches a terminal state, then return the
    /// finalized summary exactly as saved to disk.
    pub fn run(
        mut self,
        cancel: &AtomicBool,
        events: Option<Sender<BatchEvent>>,
    ) -> Result<RunSummary, BatchError> {
        self.events = events;
        while let Step::Item { .. } = self.step(cancel)? {}
        Ok(self.persisted().into_owned())
    }

    /// Advance the run by at most one item.
    pub fn step(&mut self, cancel: &AtomicBool) -> Result<Step, BatchError> {
        if self.summary.state.is_terminal() {
            return Ok(Step::Stopped(self.summary.state));
        }
        if self.summary.state == RunState::NotStarted {
            self.start();
        }
        let Some(item) = self.items.get(self.next).cloned() else {
            return self.finish(RunState::Completed);
        };
        if cancel.load(Ordering::SeqCst) {
            return self.finish(RunState::Interrupted);
        }
        let index = self.next + 1;
        self.emit(BatchEvent::ItemStarted {
            index,
            total: self.items.len(),
            card: item.display_name.clone(),
        });

        let Some(outcome) = self.process(&item, cancel) else {
            info!(card = %item.display_name, "cancelled during retry backoff");
            return self.finish(RunState::Interrupted);
        };
        self.next += 1;

        let item_elapsed = Duration::from_secs_f64(outcome.secs);
        match &outcome.error {
            None => info!(card = %item.display_name, secs = outcome.secs, "generated"),
            Some(error) => warn!(card = %item.display_name, attempts = outcome.attempts, %error, "failed"),
        }
        let fatal = outcome.error_kind == Some(ErrorKind::Fatal);
        self.summary.record(outcome.clone());
        self.checkpoint();

        let progress = Progress::new(
            index,
            self.items.len(),
            self.summary.completed,
            self.summary.failed,
            item_elapsed,
            self.elapsed(),
        );
        self.emit(BatchEvent::ItemFinished {
            outcome: outcome.clone(),
            progress: progress.clone(),
        });

        if fatal {
            self.consecutive_fatal += 1;
            let first = self.summary.cards.len() == 1;
            if (first && self.options.abort_on_first_fatal)
                || self.consecutive_fatal >= self.options.max_consecutive_fatal
            {
                warn!(
                    consecutive = self.consecutive_fatal,
                    "aborting run after fatal backend error"
                );
                self.finish(RunState::Aborted)?;
            }
        } else {
            self.consecutive_fatal = 0;
        }

        Ok(Step::Item { outcome, progress })
    }

    fn start(&mut self) {
        self.started = Some(Instant::now());
        self.summary.timestamp = Utc::now();
        self.summary.state = RunState::Running;
        info!(
            total = self.items.len(),
            backend = %self.summary.backend,
            output = %self.options.output_dir.display(),
            "batch started"
        );
        self.emit(BatchEvent::Started {
            total: self.items.len(),
            backend: self.summary.backend.clone(),
            output_dir: self.options.output_dir.clone(),
        });
    }

    fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    fn checkpoint(&mut self) {
        self.summary.set_elapsed(self.elapsed());
        if let Err(e) = self.persisted().save(&self.options.output_dir) {
            warn!(error = %e, "could not checkpoint run summary");
        }
    }

    fn finish(&mut self, state: RunState) -> Result<Step, BatchError> {
        self.summary.state = state;
        self.summary.set_elapsed(self.elapsed());
        self.persisted().save(&self.options.output_dir)?;
        info!(
            state = state.as_str(),
            completed = self.summary.completed,
            failed = self.summary.failed,
            "batch finished"
        );
        self.emit(BatchEvent::Finished {
            state,
            completed: self.summary.completed,
            failed: self.summary.failed,
            elapsed: self.elapsed(),
        });
        Ok(Step::Stopped(state))
    }

    /// Generate and persist one item. `None` means it was abandoned because
    /// the run was cancelled during retry backoff.
    fn process(&self, item: &WorkItem, cancel: &AtomicBool) -> Option<GenerationOutcome> {
        let start = Instant::now();
        let key = item.key();
        let card = item.display_name.clone();

        let request = match prompt::build(item, &self.style) {
            Ok(r) => r,
            Err(e) => {
                return Some(GenerationOutcome::failure(
                    key,
                    card,
                    ErrorKind::Fatal,
                    e.to_string(),
                    start.elapsed(),
                    0,
                    None,
                ));
            }
        };
        let seed = request.seed;
        let max_retries = self.options.retry.max_retries;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.client.generate(&request) {
                Ok(image) => {
                    return Some(match self.persist(item, &image) {
                        Ok(filename) => GenerationOutcome::success(
                            key,
                            card,
                            filename,
                            start.elapsed(),
                            attempts,
                            seed,
                        ),
                        Err(reason) => GenerationOutcome::failure(
                            key,
                            card,
                            ErrorKind::Persistence,
                            reason,
                            start.elapsed(),
                            attempts,
                            seed,
                        ),
                    });
                }
                Err(GenerationError::Transient(error)) if attempts <= max_retries => {
                    let delay = backoff_delay(self.options.retry.base_delay_ms, attempts - 1);
                    warn!(
                        card = %card,
                        retry = attempts,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient failure, retrying"
                    );
                    self.emit(BatchEvent::Retrying {
                        card: card.clone(),
                        retry: attempts,
                        max_retries,
                        delay,
                        error,
                    });
                    if !sleep_unless_cancelled(delay, cancel) {
                        return None;
                    }
                }
                Err(e) => {
                    return Some(GenerationOutcome::failure(
                        key,
                        card,
                        e.kind(),
                        e.message().to_string(),
                        start.elapsed(),
                        attempts,
                        seed,
                    ));
                }
            }
        }
    }

    /// Validate the returned bytes and write them under the item's filename.
    fn persist(&self, item: &WorkItem, image: &GeneratedImage) -> Result<String, String> {
        let (bytes, extension) = encode_for_output(image, self.options.format)?;
        let filename = naming::file_name(item, extension);
        let path = self.options.output_dir.join(&filename);
        summary::write_atomic(&path, &bytes)
            .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
        Ok(filename)
    }
}

/// Sniff the image format and produce the bytes and extension to write.
///
/// With [`OutputFormat::Png`] anything that is not already PNG is decoded and
/// re-encoded. With [`OutputFormat::Original`] the bytes are kept and the
/// extension follows the sniffed format.
fn encode_for_output(
    image: &GeneratedImage,
    format: OutputFormat,
) -> Result<(Cow<'_, [u8]>, &'static str), String> {
    let detected = image::guess_format(&image.bytes).map_err(|e| {
        format!(
            "unrecognized image data ({} bytes, reported {}): {e}",
            image.bytes.len(),
            image.mime_type
        )
    })?;
    match format {
        OutputFormat::Png if detected == ImageFormat::Png => {
            Ok((Cow::Borrowed(image.bytes.as_slice()), "png"))
        }
        OutputFormat::Png => {
            let decoded = image::load_from_memory_with_format(&image.bytes, detected)
                .map_err(|e| format!("cannot decode {detected:?} image: {e}"))?;
            let mut buf = Cursor::new(Vec::new());
            decoded
                .write_to(&mut buf, ImageFormat::Png)
                .map_err(|e| format!("cannot encode PNG: {e}"))?;
            Ok((Cow::Owned(buf.into_inner()), "png"))
        }
        OutputFormat::Original => {
            let extension = detected.extensions_str().first().copied().unwrap_or("img");
            Ok((Cow::Borrowed(image.bytes.as_slice()), extension))
        }
    }
}
