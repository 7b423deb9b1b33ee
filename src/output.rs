//! CLI output formatting for every command.
//!
//! # Output Format
//!
//! ## Generate
//!
//! ```text
//! ==> Generating 55 cards with remote:gemini-2.5-flash-image
//!     Output: card_images
//! [█░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░]   1.8% | 1/55 | Ace of Hearts        |  4.21s | ETA: 3m 47s
//!     retry 1/3 for 2 of Hearts in 0.9s: HTTP 503: overloaded
//! [█░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░]   3.6% | 2/55 | 2 of Hearts          |  9.80s | ETA: 3m 58s
//!     failed (transient): HTTP 503: overloaded
//! ```
//!
//! ## Summary
//!
//! ```text
//! Run completed
//!     Backend: remote:gemini-2.5-flash-image
//!     Style: Western Steampunk / Victorian engraving / aged parchment
//!     Total time: 3m 51s
//!     Average per card: 4.21s
//!     Successful: 54/55
//!     Failed: 1/55
//! Failed cards
//!     2 of Hearts (Hearts_02_2): transient: HTTP 503: overloaded
//! Results saved to: card_images/batch_results.json
//! ```
//!
//! ## List
//!
//! ```text
//! 001 Ace of Hearts → Hearts_01_Ace.png
//! ...
//! 055 Card Back → ZZ_ZZ_00_Card-Back.png
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::batch::BatchEvent;
use crate::manifest::WorkItem;
use crate::naming;
use crate::presets::Preset;
use crate::progress::{Progress, format_duration};
use crate::prompt::{GenerationRequest, StyleConfig};
use crate::summary::{GenerationOutcome, RunSummary};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// One progress line: bar, percentage, count, card, item time, ETA.
fn progress_line(progress: &Progress, card: &str) -> String {
    let eta = match progress.eta {
        Some(eta) => format!("ETA: {}", format_duration(eta)),
        None => "ETA: calculating...".to_string(),
    };
    format!(
        "[{}] {:5.1}% | {}/{} | {:20} | {:5.2}s | {}",
        progress.bar(),
        progress.percent(),
        progress.done(),
        progress.total,
        card,
        progress.item_elapsed.as_secs_f64(),
        eta
    )
}

fn failure_reason(outcome: &GenerationOutcome) -> String {
    let kind = outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
    let error = outcome.error.as_deref().unwrap_or("no reason recorded");
    format!("{kind}: {error}")
}

// ============================================================================
// Generate
// ============================================================================

/// Format a single batch progress event as display lines.
///
/// `ItemStarted` and `Finished` produce nothing: the progress line is printed
/// once the item is decided, and the run summary follows the last event.
pub fn format_batch_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Started {
            total,
            backend,
            output_dir,
        } => vec![
            format!("==> Generating {} cards with {}", total, backend),
            format!("{}Output: {}", indent(1), output_dir.display()),
        ],
        BatchEvent::ItemStarted { .. } | BatchEvent::Finished { .. } => Vec::new(),
        BatchEvent::Retrying {
            card,
            retry,
            max_retries,
            delay,
            error,
        } => vec![format!(
            "{}retry {}/{} for {} in {:.1}s: {}",
            indent(1),
            retry,
            max_retries,
            card,
            delay.as_secs_f64(),
            error
        )],
        BatchEvent::ItemFinished { outcome, progress } => {
            let mut lines = vec![progress_line(progress, &outcome.card)];
            if !outcome.is_success() {
                lines.push(format!(
                    "{}failed ({}): {}",
                    indent(1),
                    outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                    outcome.error.as_deref().unwrap_or("no reason recorded")
                ));
            }
            lines
        }
    }
}

/// Format the end-of-run report.
pub fn format_summary(summary: &RunSummary, output_dir: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("Run {}", summary.state.as_str()));
    lines.push(format!("{}Backend: {}", indent(1), summary.backend));
    lines.push(format!(
        "{}Style: {} / {} / {}",
        indent(1),
        summary.style.theme,
        summary.style.technique,
        summary.style.background
    ));
    lines.push(format!(
        "{}Total time: {}",
        indent(1),
        format_duration(Duration::from_secs_f64(summary.total_secs))
    ));
    if let Some(avg) = summary.avg_secs_per_card {
        lines.push(format!("{}Average per card: {:.2}s", indent(1), avg));
    }
    lines.push(format!(
        "{}Successful: {}/{}",
        indent(1),
        summary.completed,
        summary.total_cards
    ));
    lines.push(format!(
        "{}Failed: {}/{}",
        indent(1),
        summary.failed,
        summary.total_cards
    ));
    let skipped = summary.total_cards.saturating_sub(summary.cards.len());
    if skipped > 0 {
        lines.push(format!("{}Not attempted: {}", indent(1), skipped));
    }

    let failures: Vec<&GenerationOutcome> =
        summary.cards.iter().filter(|c| !c.is_success()).collect();
    if !failures.is_empty() {
        lines.push("Failed cards".to_string());
        for outcome in failures {
            lines.push(format!(
                "{}{} ({}): {}",
                indent(1),
                outcome.card,
                outcome.key,
                failure_reason(outcome)
            ));
        }
    }

    lines.push(format!(
        "Results saved to: {}",
        RunSummary::path(output_dir).display()
    ));
    lines
}

pub fn print_summary(summary: &RunSummary, output_dir: &Path) {
    for line in format_summary(summary, output_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// List
// ============================================================================

/// Format the manifest with each item's output filename.
pub fn format_manifest_list(items: &[WorkItem], extension: &str) -> Vec<String> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{} {} \u{2192} {}",
                format_index(i + 1),
                item.display_name,
                naming::file_name(item, extension)
            )
        })
        .collect()
}

pub fn print_manifest_list(items: &[WorkItem], extension: &str) {
    for line in format_manifest_list(items, extension) {
        println!("{}", line);
    }
}

// ============================================================================
// Presets
// ============================================================================

fn preset_section(title: &str, presets: &[Preset]) -> Vec<String> {
    let mut lines = vec![title.to_string()];
    for (i, preset) in presets.iter().enumerate() {
        lines.push(format!(
            "{}{:>2} {} ({})",
            indent(1),
            i + 1,
            preset.name,
            preset.slug()
        ));
        lines.push(format!("{}{}", indent(2), preset.description));
    }
    lines
}

/// Format the technique and background presets.
pub fn format_presets(techniques: &[Preset], backgrounds: &[Preset]) -> Vec<String> {
    let mut lines = preset_section("Techniques", techniques);
    lines.push(String::new());
    lines.extend(preset_section("Backgrounds", backgrounds));
    lines
}

pub fn print_presets(techniques: &[Preset], backgrounds: &[Preset]) {
    for line in format_presets(techniques, backgrounds) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the resolved style and one sample request per card kind.
pub fn format_check_output(
    style: &StyleConfig,
    backend: &str,
    samples: &[(WorkItem, GenerationRequest)],
) -> Vec<String> {
    let mut lines = vec![
        "Style".to_string(),
        format!("{}Theme: {}", indent(1), style.theme),
        format!("{}Technique: {}", indent(1), style.technique),
        format!("{}Background: {}", indent(1), style.background),
        format!(
            "{}Image: {}x{}, {} steps, seed {}",
            indent(1),
            style.width,
            style.height,
            style.steps,
            style.seed_mode.as_str()
        ),
        format!("{}Backend: {}", indent(1), backend),
    ];
    for (item, request) in samples {
        lines.push(format!(
            "Sample: {} ({}, aspect {})",
            item.display_name,
            item.key(),
            request.aspect_ratio()
        ));
        for line in request.prompt.lines() {
            lines.push(format!("{}{}", indent(1), line));
        }
        lines.push(format!(
            "{}Negative: {}",
            indent(1),
            request.negative_prompt
        ));
    }
    lines
}

pub fn print_check_output(
    style: &StyleConfig,
    backend: &str,
    samples: &[(WorkItem, GenerationRequest)],
) {
    for line in format_check_output(style, backend, samples) {
        println!("{}", line);
    }
}
