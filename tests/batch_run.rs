//! End-to-end runs of the batch runner against a stub backend.
//!
//! The stub implements the public `GenerationClient` trait, so these tests
//! exercise exactly what a third-party backend would see.
//!
//! Run with: cargo test --test batch_run

use deck_gen::backend::{ErrorKind, GeneratedImage, GenerationClient, GenerationError};
use deck_gen::batch::{BatchOptions, BatchRunner};
use deck_gen::config::{DeckConfig, OutputFormat, RetryConfig, SeedMode};
use deck_gen::manifest::{self, Rank, Suit, WorkItem};
use deck_gen::naming;
use deck_gen::prompt::{GenerationRequest, StyleConfig};
use deck_gen::summary::{OutcomeStatus, RunState, RunSummary};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Reply = Result<GeneratedImage, GenerationError>;

/// Replays scripted replies (then succeeds forever) and can raise the
/// cancel flag after a given number of calls.
struct StubBackend {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<GenerationRequest>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl StubBackend {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    fn cancelling_after(calls: usize, flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel_after: Some((calls, flag)),
            ..Self::new(Vec::new())
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl GenerationClient for StubBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        if let Some((after, flag)) = &self.cancel_after {
            if count >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(png()))
    }
}

fn png() -> GeneratedImage {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 120, 40]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    GeneratedImage {
        bytes: buf.into_inner(),
        mime_type: "image/png".to_string(),
    }
}

fn style() -> StyleConfig {
    StyleConfig::from_config(&DeckConfig::default()).unwrap()
}

fn options(dir: &Path) -> BatchOptions {
    BatchOptions {
        output_dir: dir.to_path_buf(),
        format: OutputFormat::Png,
        retry: RetryConfig {
            max_retries: 3,
            base_delay_ms: 0,
        },
        abort_on_first_fatal: false,
        max_consecutive_fatal: 3,
    }
}

fn run(client: &StubBackend, items: Vec<WorkItem>, dir: &Path, cancel: &AtomicBool) -> RunSummary {
    BatchRunner::new(client, items, style(), options(dir), "stub".to_string())
        .unwrap()
        .run(cancel, None)
        .unwrap()
}

fn image_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".png"))
        .collect();
    names.sort();
    names
}

fn temp_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tmp"))
        .collect()
}

#[test]
fn three_items_with_trailing_fatal() {
    let tmp = TempDir::new().unwrap();
    let client = StubBackend::new(vec![
        Ok(png()),
        Ok(png()),
        Err(GenerationError::Fatal("HTTP 400: rejected".into())),
    ]);
    let items = vec![
        WorkItem::standard(Suit::Hearts, Rank::Ace),
        WorkItem::standard(Suit::Spades, Rank::King),
        WorkItem::back(),
    ];
    let summary = run(&client, items, tmp.path(), &AtomicBool::new(false));

    assert_eq!(summary.cards.len(), 3);
    assert_eq!((summary.completed, summary.failed), (2, 1));
    assert_eq!(summary.cards[2].error_kind, Some(ErrorKind::Fatal));
    assert_eq!(
        image_files(tmp.path()),
        vec!["Hearts_01_Ace.png", "Spades_13_King.png"]
    );

    let on_disk = RunSummary::load(tmp.path()).unwrap();
    assert_eq!(on_disk.state, RunState::Completed);
    assert_eq!(on_disk.cards.len(), 3);
}

#[test]
fn full_deck_completes() {
    let tmp = TempDir::new().unwrap();
    let client = StubBackend::new(Vec::new());
    let summary = run(&client, manifest::enumerate(), tmp.path(), &AtomicBool::new(false));

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.cards.len(), 55);
    assert_eq!(summary.total_cards, 55);
    assert_eq!(summary.completed, 55);
    assert_eq!(image_files(tmp.path()).len(), 55);
    assert!(tmp.path().join("ZZ_Joker_15_Joker2.png").exists());
    assert!(tmp.path().join("ZZ_ZZ_00_Card-Back.png").exists());
    assert!(summary.avg_secs_per_card.is_some());
}

#[test]
fn outcomes_follow_manifest_order() {
    let tmp = TempDir::new().unwrap();
    let client = StubBackend::new(Vec::new());
    let summary = run(&client, manifest::enumerate(), tmp.path(), &AtomicBool::new(false));

    let keys: Vec<String> = summary.cards.iter().map(|c| c.key.clone()).collect();
    let expected: Vec<String> = manifest::enumerate().iter().map(WorkItem::key).collect();
    assert_eq!(keys, expected);
}

#[test]
fn resource_failure_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let mut replies: Vec<Reply> = (0..29).map(|_| Ok(png())).collect();
    replies.push(Err(GenerationError::Resource("CUDA out of memory".into())));
    let client = StubBackend::new(replies);
    let summary = run(&client, manifest::enumerate(), tmp.path(), &AtomicBool::new(false));

    assert_eq!(summary.cards.len(), 55);
    assert_eq!((summary.completed, summary.failed), (54, 1));
    let failed = &summary.cards[29];
    assert_eq!(failed.status, OutcomeStatus::Failure);
    assert_eq!(failed.error_kind, Some(ErrorKind::Resource));
    assert!(summary.cards[30..].iter().all(|c| c.is_success()));
    assert!(!tmp.path().join(format!("{}.png", failed.key)).exists());
}

#[test]
fn interruption_after_ten_items() {
    let tmp = TempDir::new().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let client = StubBackend::cancelling_after(10, Arc::clone(&cancel));
    let summary = run(&client, manifest::enumerate(), tmp.path(), &cancel);

    assert_eq!(summary.state, RunState::Interrupted);
    assert_eq!(summary.cards.len(), 10);
    assert_eq!(client.call_count(), 10);
    assert_eq!(image_files(tmp.path()).len(), 10);
    assert!(temp_files(tmp.path()).is_empty());

    let on_disk = RunSummary::load(tmp.path()).unwrap();
    assert_eq!(on_disk.state, RunState::Interrupted);
    assert_eq!(on_disk.cards.len(), 10);
}

#[test]
fn transient_past_retry_limit_is_one_failure() {
    let tmp = TempDir::new().unwrap();
    let busy = || Err(GenerationError::Transient("HTTP 503: overloaded".into()));
    let client = StubBackend::new(vec![busy(), busy(), busy(), busy()]);
    let items = vec![WorkItem::joker(1), WorkItem::joker(2)];
    let summary = run(&client, items, tmp.path(), &AtomicBool::new(false));

    assert_eq!(summary.cards.len(), 2);
    let joker1: Vec<_> = summary
        .cards
        .iter()
        .filter(|c| c.key == "ZZ_Joker_14_Joker1")
        .collect();
    assert_eq!(joker1.len(), 1);
    assert_eq!(joker1[0].attempts, 4);
    assert_eq!(joker1[0].error_kind, Some(ErrorKind::Transient));
    assert!(summary.cards[1].is_success());
    assert_eq!(client.call_count(), 5);
}

#[test]
fn cancel_during_backoff_abandons_item() {
    let tmp = TempDir::new().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let client = StubBackend {
        replies: Mutex::new(vec![Err(GenerationError::Transient("timeout".into()))].into()),
        ..StubBackend::cancelling_after(1, Arc::clone(&cancel))
    };
    let summary = run(&client, manifest::enumerate(), tmp.path(), &cancel);

    assert_eq!(summary.state, RunState::Interrupted);
    assert!(summary.cards.is_empty());
    assert_eq!(client.call_count(), 1);
}

#[test]
fn rerun_overwrites_same_files() {
    let tmp = TempDir::new().unwrap();
    let items = || {
        vec![
            WorkItem::standard(Suit::Diamonds, Rank::Queen),
            WorkItem::back(),
        ]
    };
    let first = run(&StubBackend::new(Vec::new()), items(), tmp.path(), &AtomicBool::new(false));
    let second = run(&StubBackend::new(Vec::new()), items(), tmp.path(), &AtomicBool::new(false));

    let names = |s: &RunSummary| -> Vec<Option<String>> {
        s.cards.iter().map(|c| c.filename.clone()).collect()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(
        image_files(tmp.path()),
        vec!["Diamonds_12_Queen.png", "ZZ_ZZ_00_Card-Back.png"]
    );
}

#[test]
fn fatal_first_item_aborts_when_enabled() {
    let tmp = TempDir::new().unwrap();
    let client = StubBackend::new(vec![Err(GenerationError::Fatal("HTTP 401".into()))]);
    let mut opts = options(tmp.path());
    opts.abort_on_first_fatal = true;
    let summary = BatchRunner::new(&client, manifest::enumerate(), style(), opts, "stub".into())
        .unwrap()
        .run(&AtomicBool::new(false), None)
        .unwrap();

    assert_eq!(summary.state, RunState::Aborted);
    assert_eq!(summary.cards.len(), 1);
    assert_eq!(client.call_count(), 1);
}

#[test]
fn per_card_seeds_reach_backend_and_summary() {
    let tmp = TempDir::new().unwrap();
    let client = StubBackend::new(Vec::new());
    let mut config = DeckConfig::default();
    config.seed.mode = SeedMode::PerCard;
    config.seed.value = Some(2024);
    let style = StyleConfig::from_config(&config).unwrap();
    let items: Vec<WorkItem> = manifest::enumerate().into_iter().take(3).collect();
    let summary = BatchRunner::new(&client, items, style, options(tmp.path()), "stub".into())
        .unwrap()
        .run(&AtomicBool::new(false), None)
        .unwrap();

    let seeds: Vec<Option<u32>> = summary.cards.iter().map(|c| c.seed).collect();
    assert!(seeds.iter().all(Option::is_some));
    assert_ne!(seeds[0], seeds[1]);
    let sent: Vec<Option<u32>> = client.calls.lock().unwrap().iter().map(|r| r.seed).collect();
    assert_eq!(sent, seeds);
}

#[test]
fn retry_failed_flow_merges_into_previous_summary() {
    let tmp = TempDir::new().unwrap();
    let mut replies: Vec<Reply> = vec![Ok(png()); 5];
    replies[1] = Err(GenerationError::Resource("quota".into()));
    replies[3] = Err(GenerationError::Resource("quota".into()));
    let items: Vec<WorkItem> = manifest::enumerate().into_iter().take(5).collect();
    run(&StubBackend::new(replies), items, tmp.path(), &AtomicBool::new(false));

    let previous = RunSummary::load(tmp.path()).unwrap();
    let retry_items: Vec<WorkItem> = previous
        .failed_keys()
        .iter()
        .filter_map(|k| naming::parse_card_key(k))
        .collect();
    assert_eq!(retry_items.len(), 2);

    let client = StubBackend::new(Vec::new());
    let merged = BatchRunner::new(&client, retry_items, style(), options(tmp.path()), "stub".into())
        .unwrap()
        .merge_into(previous)
        .unwrap()
        .run(&AtomicBool::new(false), None)
        .unwrap();

    assert_eq!(client.call_count(), 2);
    assert_eq!(merged.cards.len(), 5);
    assert_eq!((merged.completed, merged.failed), (5, 0));
    assert!(merged.failed_keys().is_empty());
    let on_disk = RunSummary::load(tmp.path()).unwrap();
    assert_eq!(on_disk.cards.len(), 5);
    assert_eq!(on_disk.completed, 5);
    assert_eq!(on_disk.state, RunState::Completed);
    assert_eq!(image_files(tmp.path()).len(), 5);
}
